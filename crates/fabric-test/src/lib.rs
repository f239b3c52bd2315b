//! Integration test infrastructure for the fabric control plane
//!
//! Provides:
//! - Synthetic LLDP walks and a static SNMP walker
//! - A recording device transport with scripted replies
//! - Entity fixtures for networks, ports and switches
//! - Store verification helpers

pub mod fixtures;
mod transport;
mod verification;
mod walker;

pub use fixtures::*;
pub use transport::{RecordingTransport, SentCommand};
pub use verification::*;
pub use walker::{LldpFixture, StaticWalker};
