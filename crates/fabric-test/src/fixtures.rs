//! Test fixtures for common fabric scenarios

use std::collections::BTreeMap;

use fabric_common::{Network, Port, Switch};
use fabric_topology::{Adjacency, TopologySnapshot};
use fabric_types::Vni;

/// Management IP of the first test switch.
pub const TOR1_MGMT: &str = "192.168.0.1";
/// Tunnel source of the first test switch.
pub const TOR1_SRC: &str = "10.0.0.1";
/// Management IP of the second test switch.
pub const TOR2_MGMT: &str = "192.168.0.2";
/// Tunnel source of the second test switch.
pub const TOR2_SRC: &str = "10.0.0.2";

/// Network fixtures
pub mod network_fixtures {
    use super::*;

    /// Tenant network `id` carried on VNI `vni`.
    pub fn unshared(id: &str, vni: u32) -> Network {
        Network {
            id: id.to_string(),
            tenant_id: "tenant-a".to_string(),
            segmentation_type: "vxlan".to_string(),
            segmentation_id: Vni::new(vni).ok(),
            admin_state_up: true,
            shared: false,
        }
    }

    /// Provider network `id` carried on VNI `vni`.
    pub fn shared(id: &str, vni: u32) -> Network {
        Network {
            shared: true,
            tenant_id: "admin".to_string(),
            ..unshared(id, vni)
        }
    }
}

/// Port fixtures
pub mod port_fixtures {
    use super::*;

    /// Active port `id` of `network` bound to `host`.
    pub fn bound(id: &str, network: &str, host: &str) -> Port {
        Port {
            id: id.to_string(),
            tenant_id: "tenant-a".to_string(),
            network_id: network.to_string(),
            device_owner: "compute:nova".to_string(),
            status: "ACTIVE".to_string(),
            admin_state_up: true,
            binding_host_id: host.to_string(),
            ..Default::default()
        }
    }
}

/// Switch fixtures
pub mod switch_fixtures {
    use super::*;

    pub fn tor(mgmt_ip: &str, tunnel_src_ip: &str) -> Switch {
        Switch {
            mgmt_ip: mgmt_ip.to_string(),
            tunnel_src_ip: tunnel_src_ip.to_string(),
            device_type: "h3c".to_string(),
        }
    }
}

/// Topology fixtures
pub mod topology_fixtures {
    use super::*;

    /// Adjacency of `host` on local port `index` of `switch`.
    pub fn adjacency(switch: &str, index: u32, port_name: &str, host: &str) -> Adjacency {
        Adjacency {
            local_interface_index: index,
            local_port_name: port_name.to_string(),
            switch_id: format!("tor-{}", switch),
            switch_management_ip: switch.to_string(),
            neighbor_host: host.to_string(),
            neighbor_interface: "ens1f0".to_string(),
            neighbor_ip: String::new(),
            neighbor_mac: "52:54:00:00:00:01".to_string(),
            neighbor_system_description: "Ubuntu 20.04 LTS".to_string(),
        }
    }

    /// Snapshot from `(switch, index, port_name, host)` rows.
    pub fn snapshot(rows: &[(&str, u32, &str, &str)]) -> TopologySnapshot {
        let mut by_switch: BTreeMap<String, Vec<Adjacency>> = BTreeMap::new();
        for (switch, index, port, host) in rows {
            by_switch
                .entry(switch.to_string())
                .or_default()
                .push(adjacency(switch, *index, port, host));
        }
        TopologySnapshot::from_adjacency(by_switch)
    }
}
