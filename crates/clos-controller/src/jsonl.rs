//! JSON-lines bridge to an external protocol stack.
//!
//! Events arrive as one JSON object per line and commands leave the same
//! way, e.g.:
//!
//! ```text
//! {"event":"connection_up","device":3}
//! {"device":3,"command":{"type":"port_stats_request"}}
//! ```

use crate::error::ControllerResult;
use crate::events::FabricEvent;
use crate::protocol::OutboundCommand;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Parses events from `reader` into `tx` until EOF or until the receiver
/// goes away. Malformed lines are skipped.
///
/// Resolves to the number of events forwarded.
pub fn spawn_reader<R>(reader: R, tx: mpsc::Sender<FabricEvent>) -> JoinHandle<ControllerResult<usize>>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = reader.lines();
        let mut forwarded = 0;
        let mut line_no = 0usize;

        while let Some(line) = lines.next_line().await? {
            line_no += 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let event = match serde_json::from_str::<FabricEvent>(line) {
                Ok(event) => event,
                Err(e) => {
                    warn!("Skipping malformed event on line {}: {}", line_no, e);
                    continue;
                }
            };

            if tx.send(event).await.is_err() {
                debug!("Event receiver gone, stopping reader");
                break;
            }
            forwarded += 1;
        }

        Ok(forwarded)
    })
}

/// Writes every command from `rx` to `writer` as one JSON line until all
/// senders are dropped.
///
/// Resolves to the number of commands written.
pub fn spawn_writer<W>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<OutboundCommand>,
) -> JoinHandle<ControllerResult<usize>>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut written = 0;
        while let Some(command) = rx.recv().await {
            let mut line = serde_json::to_vec(&command)?;
            line.push(b'\n');
            writer.write_all(&line).await?;
            writer.flush().await?;
            written += 1;
        }
        Ok(written)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SwitchCommand;
    use clos_types::{DeviceId, PortNo};
    use pretty_assertions::assert_eq;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_reader_skips_bad_lines() {
        let input = concat!(
            "{\"event\":\"connection_up\",\"device\":1}\n",
            "\n",
            "# comment\n",
            "{\"event\":\"no_such_event\"}\n",
            "not json\n",
            "{\"event\":\"telemetry_tick\"}\n",
        );
        let (tx, mut rx) = mpsc::channel(8);
        let forwarded = spawn_reader(BufReader::new(input.as_bytes()), tx)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(forwarded, 2);
        assert_eq!(
            rx.recv().await,
            Some(FabricEvent::ConnectionUp {
                device: DeviceId::new(1)
            })
        );
        assert_eq!(rx.recv().await, Some(FabricEvent::TelemetryTick));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_writer_emits_json_lines() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (client, mut server) = tokio::io::duplex(1024);
        let handle = spawn_writer(client, rx);

        tx.send(OutboundCommand {
            device: DeviceId::new(3),
            command: SwitchCommand::PortMod {
                port: PortNo::new(4),
                flood: false,
            },
        })
        .unwrap();
        tx.send(OutboundCommand {
            device: DeviceId::new(3),
            command: SwitchCommand::PortStatsRequest,
        })
        .unwrap();
        drop(tx);

        assert_eq!(handle.await.unwrap().unwrap(), 2);

        let mut output = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut server, &mut output)
            .await
            .unwrap();
        let lines: Vec<serde_json::Value> = output
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(
            lines,
            vec![
                serde_json::json!({"device": 3, "command": {"type": "port_mod", "port": 4, "flood": false}}),
                serde_json::json!({"device": 3, "command": {"type": "port_stats_request"}}),
            ]
        );
    }
}
