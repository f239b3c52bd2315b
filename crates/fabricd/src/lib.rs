//! fabricd - ToR fabric control daemon
//!
//! Allocates per-switch local VLANs for overlay networks, maps them to
//! cluster-wide VXLAN identifiers and keeps a full VXLAN tunnel mesh
//! between registered switches.

pub mod commands;
pub mod config;
pub mod daemon;
pub mod metrics;
pub mod provision;
pub mod pusher;
pub mod rest_api;
pub mod tasks;
pub mod tunnel_mgr;
pub mod types;
pub mod vlan_mgr;

pub use config::{FabricConfig, DEFAULT_CONFIG_PATH};
pub use daemon::Fabric;
pub use metrics::MetricsCollector;
pub use provision::ProvisionMgr;
pub use pusher::DevicePusher;
pub use tunnel_mgr::TunnelMgr;
pub use types::{AssignRequest, RegisterRequest, SwitchVlanState, VlanMapping, VlanRanges};
pub use vlan_mgr::{ReconcileReport, VlanMgr};
