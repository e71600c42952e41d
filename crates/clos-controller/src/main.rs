//! closd - adaptive leaf-spine fabric controller
//!
//! Reads fabric events as JSON lines (stdin or `--events`), writes switch
//! commands as JSON lines to stdout and logs to stderr.

use anyhow::Context;
use clap::Parser;
use clos_controller::{
    jsonl, run, ChannelConnector, ClosTopology, ControllerConfig, ControllerResult,
    FabricController, StopReason, DEFAULT_CONFIG_PATH,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::io::{AsyncBufRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Depth of the inbound event queue
const EVENT_QUEUE_DEPTH: usize = 1024;

/// Adaptive leaf-spine fabric controller
#[derive(Parser, Debug)]
#[command(name = "closd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Number of core switches
    #[arg(long)]
    core_count: Option<u32>,

    /// Number of leaf switches
    #[arg(long)]
    leaf_count: Option<u32>,

    /// Hosts attached to each leaf
    #[arg(long)]
    hosts_per_leaf: Option<u32>,

    /// Link bandwidth in Mbit/s
    #[arg(long)]
    bandwidth: Option<u32>,

    /// Enable tenant VLAN isolation
    #[arg(long)]
    tenant: bool,

    /// Number of tenant VLANs
    #[arg(long)]
    vlan_count: Option<u16>,

    /// Read events from this file instead of stdin
    #[arg(short = 'e', long)]
    events: Option<PathBuf>,
}

impl Args {
    /// Applies command line overrides on top of the file configuration.
    fn apply(&self, config: &mut ControllerConfig) {
        if let Some(n) = self.core_count {
            config.fabric.core_count = n;
        }
        if let Some(n) = self.leaf_count {
            config.fabric.leaf_count = n;
        }
        if let Some(n) = self.hosts_per_leaf {
            config.fabric.hosts_per_leaf = n;
        }
        if let Some(bw) = self.bandwidth {
            config.fabric.link_bandwidth_mbps = bw;
        }
        if self.tenant {
            config.tenant.enabled = true;
        }
        if let Some(n) = self.vlan_count {
            config.tenant.vlan_count = n;
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

async fn event_source(path: Option<&PathBuf>) -> anyhow::Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    Ok(match path {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening event file {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    })
}

async fn run_controller(args: Args) -> anyhow::Result<()> {
    let mut config = ControllerConfig::load_or_default(&args.config)?;
    args.apply(&mut config);
    config.validate()?;

    info!(
        "Fabric: {} cores, {} leaves, {} hosts per leaf, {} Mbit/s links",
        config.fabric.core_count,
        config.fabric.leaf_count,
        config.fabric.hosts_per_leaf,
        config.fabric.link_bandwidth_mbps
    );

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);

    let mut controller = FabricController::new(
        &config,
        Box::new(ClosTopology::from_config(&config.fabric)),
        Box::new(ChannelConnector::new(command_tx)),
    )?;

    let reader = jsonl::spawn_reader(event_source(args.events.as_ref()).await?, event_tx);
    let writer = jsonl::spawn_writer(tokio::io::stdout(), command_rx);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let reason = run(&mut controller, event_rx, shutdown).await?;

    // Dropping the controller closes every command sender and lets the
    // writer drain
    drop(controller);
    let written = writer.await??;
    info!("closd stopped ({:?}), {} commands written", reason, written);

    finish_reader(reader, reason).await?;
    Ok(())
}

/// Stops the event reader, or collects its outcome if the stream ended on
/// its own. A read error surfaces here.
async fn finish_reader(
    reader: JoinHandle<ControllerResult<usize>>,
    reason: StopReason,
) -> anyhow::Result<Option<usize>> {
    match reason {
        StopReason::Shutdown => {
            reader.abort();
            Ok(None)
        }
        StopReason::EventsClosed => {
            let read = reader.await?.context("reading events")?;
            info!("{} events read", read);
            Ok(Some(read))
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level);

    info!("Starting closd");

    match run_controller(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("closd exiting: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
