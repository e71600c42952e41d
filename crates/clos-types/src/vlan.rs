//! Tenant VLAN index with validation.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Tenant isolation domain index (0-4094).
///
/// Unlike an on-wire 802.1Q VID, tenant indices start at 0: they number
/// the tenants of the fabric and drive the owning-core computation.
///
/// # Examples
///
/// ```
/// use clos_types::TenantVlan;
///
/// let vlan = TenantVlan::new(0).unwrap();
/// assert_eq!(vlan.as_u16(), 0);
/// assert!(TenantVlan::new(4095).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct TenantVlan(u16);

impl TenantVlan {
    /// Maximum valid tenant index.
    pub const MAX: u16 = 4094;

    /// Creates a tenant VLAN index.
    ///
    /// # Errors
    ///
    /// Returns an error if the index is above [`TenantVlan::MAX`].
    pub const fn new(id: u16) -> Result<Self, ParseError> {
        if id <= Self::MAX {
            Ok(TenantVlan(id))
        } else {
            Err(ParseError::InvalidTenantVlan(id))
        }
    }

    /// Returns the index as a u16.
    pub const fn as_u16(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for TenantVlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TenantVlan {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id_str = if s.to_lowercase().starts_with("vlan") {
            &s[4..]
        } else {
            s
        };

        let id: u16 = id_str
            .parse()
            .map_err(|_| ParseError::InvalidTenantVlan(u16::MAX))?;

        TenantVlan::new(id)
    }
}

impl TryFrom<u16> for TenantVlan {
    type Error = ParseError;

    fn try_from(id: u16) -> Result<Self, Self::Error> {
        TenantVlan::new(id)
    }
}

impl From<TenantVlan> for u16 {
    fn from(vlan: TenantVlan) -> u16 {
        vlan.0
    }
}
