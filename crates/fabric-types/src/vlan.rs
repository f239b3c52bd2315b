//! VLAN ID type with validation.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Switch-local IEEE 802.1Q VLAN identifier (1-4094).
///
/// The local VLAN handed to a host port is only meaningful on the switch that
/// allocated it; the overlay identity travels as a [`Vni`](crate::Vni).
///
/// # Examples
///
/// ```
/// use fabric_types::VlanId;
///
/// let vlan = VlanId::new(100).unwrap();
/// assert_eq!(vlan.as_u16(), 100);
///
/// assert!(VlanId::new(0).is_err());
/// assert!(VlanId::new(4095).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct VlanId(u16);

impl VlanId {
    /// Minimum valid VLAN ID.
    pub const MIN: u16 = 1;

    /// Maximum valid VLAN ID.
    pub const MAX: u16 = 4094;

    /// Creates a new VLAN ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the VLAN ID is not in the valid range (1-4094).
    pub fn new(id: u16) -> Result<Self, ParseError> {
        if (Self::MIN..=Self::MAX).contains(&id) {
            Ok(VlanId(id))
        } else {
            Err(ParseError::InvalidVlanId(id.to_string()))
        }
    }

    /// Converts an allocator bit index into a VLAN ID.
    pub fn from_index(index: u32) -> Result<Self, ParseError> {
        u16::try_from(index)
            .map_err(|_| ParseError::InvalidVlanId(index.to_string()))
            .and_then(Self::new)
    }

    /// Returns the VLAN ID as a u16.
    pub const fn as_u16(&self) -> u16 {
        self.0
    }

    /// Returns the VLAN ID as an allocator bit index.
    pub const fn as_index(&self) -> u32 {
        self.0 as u32
    }
}

impl fmt::Display for VlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VlanId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Accept "Vlan100" as switch agents print it
        let id_str = if s.len() > 4 && s[..4].eq_ignore_ascii_case("vlan") {
            &s[4..]
        } else {
            s
        };

        let id: u16 = id_str
            .trim()
            .parse()
            .map_err(|_| ParseError::InvalidVlanId(s.to_string()))?;

        VlanId::new(id)
    }
}

impl TryFrom<u16> for VlanId {
    type Error = ParseError;

    fn try_from(id: u16) -> Result<Self, Self::Error> {
        VlanId::new(id)
    }
}

impl From<VlanId> for u16 {
    fn from(vlan: VlanId) -> u16 {
        vlan.0
    }
}
