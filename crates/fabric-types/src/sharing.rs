//! VLAN sharing class.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Selects which local VLAN range a network draws from on a switch.
///
/// Shared (provider) networks and unshared (tenant-private) networks use
/// disjoint ranges so exhausting one never blocks the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SharingClass {
    Unshared,
    Shared,
}

impl SharingClass {
    /// Maps a network's `shared` attribute onto a class.
    pub const fn from_shared(shared: bool) -> Self {
        if shared {
            SharingClass::Shared
        } else {
            SharingClass::Unshared
        }
    }

    pub const fn is_shared(&self) -> bool {
        matches!(self, SharingClass::Shared)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            SharingClass::Unshared => "unshared",
            SharingClass::Shared => "shared",
        }
    }
}

impl fmt::Display for SharingClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SharingClass {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "shared" | "true" | "1" => Ok(SharingClass::Shared),
            "unshared" | "false" | "0" => Ok(SharingClass::Unshared),
            _ => Err(ParseError::InvalidSharingClass(s.to_string())),
        }
    }
}
