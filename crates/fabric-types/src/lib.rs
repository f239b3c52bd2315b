//! Value types shared across the fabric control plane.
//!
//! - [`VlanId`]: switch-local IEEE 802.1Q VLAN identifier
//! - [`Vni`]: cluster-wide 24-bit VXLAN network identifier
//! - [`MacAddress`]: 48-bit Ethernet MAC address, as reported in LLDP chassis ids
//! - [`SharingClass`]: shared (provider) vs unshared (tenant) VLAN range selector

mod mac;
mod sharing;
mod vlan;
mod vni;

pub use mac::MacAddress;
pub use sharing::SharingClass;
pub use vlan::VlanId;
pub use vni::Vni;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid VLAN ID: {0} (must be 1-4094)")]
    InvalidVlanId(String),

    #[error("invalid VXLAN network identifier: {0} (must be 1-16777215)")]
    InvalidVni(String),

    #[error("invalid sharing class: {0}")]
    InvalidSharingClass(String),
}
