//! VXLAN network identifier.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Cluster-wide 24-bit VXLAN network identifier.
///
/// A network's segmentation id is its VNI; every switch that hosts a port of
/// the network maps one of its local VLANs onto it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Vni(u32);

impl Vni {
    /// Minimum valid VNI.
    pub const MIN: u32 = 1;

    /// Maximum valid VNI (2^24 - 1).
    pub const MAX: u32 = 0x00ff_ffff;

    /// Creates a new VNI.
    ///
    /// # Errors
    ///
    /// Returns an error if the value does not fit in 24 bits or is zero.
    pub fn new(id: u32) -> Result<Self, ParseError> {
        if (Self::MIN..=Self::MAX).contains(&id) {
            Ok(Vni(id))
        } else {
            Err(ParseError::InvalidVni(id.to_string()))
        }
    }

    /// Returns the VNI as a u32.
    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Vni {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Vni {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id: u32 = s
            .trim()
            .parse()
            .map_err(|_| ParseError::InvalidVni(s.to_string()))?;
        Vni::new(id)
    }
}

impl TryFrom<u32> for Vni {
    type Error = ParseError;

    fn try_from(id: u32) -> Result<Self, Self::Error> {
        Vni::new(id)
    }
}

impl From<Vni> for u32 {
    fn from(vni: Vni) -> u32 {
        vni.0
    }
}
