//! Topology discovery for top-of-rack switches.
//!
//! Switches are polled for LLDP-MIB data over SNMP. The local system table
//! and the remote neighbor table are joined into host adjacency, which the
//! [`TopologyAggregator`] merges across the fabric.

pub mod aggregator;
pub mod lldp;
pub mod oids;
pub mod walker;

pub use aggregator::{RefreshReport, TopologyAggregator, TopologySnapshot};
pub use lldp::{Adjacency, LldpReader, LocalSystem, RemoteNeighbor, DEFAULT_HOST_MARKERS};
pub use walker::{SnmpValue, SnmpVersion, SnmpWalker, UdpSnmpWalker, VarBind, WalkConfig};
