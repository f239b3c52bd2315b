//! LLDP topology reader.
//!
//! Walks the local and remote LLDP-MIB subtrees of a switch, classifies
//! every returned record by the longest matching column OID, and joins the
//! local port table with host-class neighbors into [`Adjacency`] rows.
//!
//! Remote records are indexed by the local port number, which is the
//! second-to-last OID segment for the remote system columns but the
//! eighth-from-last segment for the management address column (that table
//! appends subtype, length and the four address octets to the index).

use std::collections::BTreeMap;
use std::sync::Arc;

use fabric_common::FabricResult;
use fabric_types::MacAddress;
use serde::Serialize;
use tracing::{debug, warn};

use crate::oids::{self, local, remote};
use crate::walker::{SnmpValue, SnmpWalker, VarBind, WalkConfig};

/// System-description markers identifying host operating systems.
pub const DEFAULT_HOST_MARKERS: &[&str] = &["Linux", "Ubuntu"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LocalField {
    ChassisIdSubtype,
    ChassisId,
    SysName,
    SysDesc,
    PortId,
    ManAddrIfId,
}

const LOCAL_FIELDS: &[(&str, LocalField)] = &[
    (local::CHASSIS_ID_SUBTYPE, LocalField::ChassisIdSubtype),
    (local::CHASSIS_ID, LocalField::ChassisId),
    (local::SYS_NAME, LocalField::SysName),
    (local::SYS_DESC, LocalField::SysDesc),
    (local::PORT_ID, LocalField::PortId),
    (local::MAN_ADDR_IF_ID, LocalField::ManAddrIfId),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RemoteField {
    ChassisIdSubtype,
    ChassisId,
    PortDesc,
    SysName,
    SysDesc,
    ManAddr,
}

const REMOTE_FIELDS: &[(&str, RemoteField)] = &[
    (remote::CHASSIS_ID_SUBTYPE, RemoteField::ChassisIdSubtype),
    (remote::CHASSIS_ID, RemoteField::ChassisId),
    (remote::PORT_DESC, RemoteField::PortDesc),
    (remote::SYS_NAME, RemoteField::SysName),
    (remote::SYS_DESC, RemoteField::SysDesc),
    (remote::MAN_ADDR, RemoteField::ManAddr),
];

/// Local system data of one switch, rebuilt on every poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LocalSystem {
    pub chassis_id_subtype: Option<i64>,
    pub mac_address: String,
    pub system_name: String,
    pub system_description: String,
    /// Management address by the interface index carrying it.
    pub management_addresses: BTreeMap<u32, String>,
    /// Port name by local port number.
    pub port_names: BTreeMap<u32, String>,
}

impl LocalSystem {
    /// The address the switch identifies itself with.
    ///
    /// Prefers the lowest interface index that carries a management address
    /// and also appears in the port table, then the lowest-index address.
    pub fn management_ip(&self) -> Option<&str> {
        self.management_addresses
            .iter()
            .find(|(index, _)| self.port_names.contains_key(index))
            .or_else(|| self.management_addresses.iter().next())
            .map(|(_, addr)| addr.as_str())
    }
}

/// One LLDP neighbor seen on a local port.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemoteNeighbor {
    pub index: u32,
    pub chassis_id_subtype: Option<i64>,
    pub mac_address: String,
    pub port_description: String,
    pub system_name: String,
    pub system_description: String,
    pub management_address: String,
}

/// Host-to-switch adjacency discovered in one poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Adjacency {
    pub local_interface_index: u32,
    pub local_port_name: String,
    pub switch_id: String,
    pub switch_management_ip: String,
    pub neighbor_host: String,
    pub neighbor_interface: String,
    pub neighbor_ip: String,
    pub neighbor_mac: String,
    pub neighbor_system_description: String,
}

/// Finds the longest table prefix the OID falls under. The OID must
/// continue with a segment boundary after the prefix.
fn classify<F: Copy>(oid: &str, table: &[(&str, F)]) -> Option<F> {
    let body = oid.strip_prefix('.').unwrap_or(oid);
    table
        .iter()
        .filter(|(prefix, _)| {
            body.strip_prefix(prefix)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
        })
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, field)| *field)
}

/// Segment `n` counted from the end (1 = last).
fn segment_from_end(oid: &str, n: usize) -> Option<&str> {
    let segments: Vec<&str> = oid.split('.').collect();
    segments.len().checked_sub(n).and_then(|i| segments.get(i)).copied()
}

fn index_from_end(oid: &str, n: usize) -> Option<u32> {
    segment_from_end(oid, n).and_then(|s| s.parse().ok())
}

/// The four trailing segments of an address-indexed OID, as an IPv4 address.
fn trailing_ipv4(oid: &str) -> Option<String> {
    let segments: Vec<&str> = oid.split('.').collect();
    let tail = segments.get(segments.len().checked_sub(4)?..)?;
    if tail.iter().all(|s| s.parse::<u8>().is_ok()) {
        Some(tail.join("."))
    } else {
        None
    }
}

fn expect_text(bind: &VarBind) -> Option<String> {
    match &bind.value {
        SnmpValue::OctetString(bytes) => Some(
            String::from_utf8_lossy(bytes)
                .trim_end_matches('\0')
                .to_string(),
        ),
        other => {
            warn!(oid = %bind.oid, got = other.kind(), "Expected octet string, skipping field");
            None
        }
    }
}

fn expect_bytes(bind: &VarBind) -> Option<&[u8]> {
    match &bind.value {
        SnmpValue::OctetString(bytes) => Some(bytes),
        other => {
            warn!(oid = %bind.oid, got = other.kind(), "Expected octet string, skipping field");
            None
        }
    }
}

fn expect_integer(bind: &VarBind) -> Option<i64> {
    match &bind.value {
        SnmpValue::Integer(n) => Some(*n),
        SnmpValue::Unsigned(n) => i64::try_from(*n).ok(),
        other => {
            warn!(oid = %bind.oid, got = other.kind(), "Expected integer, skipping field");
            None
        }
    }
}

/// Chassis ids of MAC subtype render as a MAC; anything else as plain hex.
fn format_chassis_id(bytes: &[u8]) -> String {
    match MacAddress::from_slice(bytes) {
        Some(mac) => mac.to_string(),
        None => bytes.iter().map(|b| format!("{:02x}", b)).collect(),
    }
}

/// Builds the local system record from a walk of [`oids::LLDP_LOCAL_ROOT`].
pub fn parse_local(records: &[VarBind]) -> LocalSystem {
    let mut system = LocalSystem::default();

    for bind in records {
        let Some(field) = classify(&bind.oid, LOCAL_FIELDS) else {
            continue;
        };
        match field {
            LocalField::ChassisIdSubtype => {
                system.chassis_id_subtype = expect_integer(bind).or(system.chassis_id_subtype);
            }
            LocalField::ChassisId => {
                if let Some(bytes) = expect_bytes(bind) {
                    system.mac_address = format_chassis_id(bytes);
                }
            }
            LocalField::SysName => {
                if let Some(name) = expect_text(bind) {
                    system.system_name = name;
                }
            }
            LocalField::SysDesc => {
                if let Some(desc) = expect_text(bind) {
                    system.system_description = desc;
                }
            }
            LocalField::PortId => {
                let (Some(index), Some(name)) = (index_from_end(&bind.oid, 1), expect_text(bind))
                else {
                    continue;
                };
                system.port_names.entry(index).or_insert(name);
            }
            LocalField::ManAddrIfId => {
                let Some(addr) = trailing_ipv4(&bind.oid) else {
                    debug!(oid = %bind.oid, "Management address is not IPv4, skipping");
                    continue;
                };
                let Some(index) = expect_integer(bind).and_then(|n| u32::try_from(n).ok()) else {
                    continue;
                };
                system.management_addresses.entry(index).or_insert(addr);
            }
        }
    }

    system
}

/// Builds neighbor records from a walk of [`oids::LLDP_REMOTE_ROOT`], keyed
/// by the local port they were seen on.
pub fn parse_remote(records: &[VarBind]) -> BTreeMap<u32, RemoteNeighbor> {
    let mut neighbors: BTreeMap<u32, RemoteNeighbor> = BTreeMap::new();

    for bind in records {
        let Some(field) = classify(&bind.oid, REMOTE_FIELDS) else {
            continue;
        };
        let position = if field == RemoteField::ManAddr { 8 } else { 2 };
        let Some(index) = index_from_end(&bind.oid, position) else {
            debug!(oid = %bind.oid, "Remote record without a usable index, skipping");
            continue;
        };

        let neighbor = neighbors.entry(index).or_insert_with(|| RemoteNeighbor {
            index,
            ..Default::default()
        });

        match field {
            RemoteField::ChassisIdSubtype => {
                neighbor.chassis_id_subtype = expect_integer(bind).or(neighbor.chassis_id_subtype);
            }
            RemoteField::ChassisId => {
                if let Some(bytes) = expect_bytes(bind) {
                    neighbor.mac_address = format_chassis_id(bytes);
                }
            }
            RemoteField::PortDesc => {
                if let Some(desc) = expect_text(bind) {
                    neighbor.port_description = desc;
                }
            }
            RemoteField::SysName => {
                if let Some(name) = expect_text(bind) {
                    neighbor.system_name = name;
                }
            }
            RemoteField::SysDesc => {
                if let Some(desc) = expect_text(bind) {
                    neighbor.system_description = desc;
                }
            }
            RemoteField::ManAddr => {
                if let Some(addr) = trailing_ipv4(&bind.oid) {
                    neighbor.management_address = addr;
                }
            }
        }
    }

    neighbors
}

/// True if the description names one of the host operating systems.
pub fn is_host(system_description: &str, markers: &[String]) -> bool {
    markers
        .iter()
        .any(|marker| system_description.contains(marker.as_str()))
}

/// Joins the local port table with host-class neighbors.
///
/// `polled_address` is used as the switch's management IP when the switch
/// advertises no management address of its own.
pub fn resolve_adjacency(
    polled_address: &str,
    local: &LocalSystem,
    neighbors: &BTreeMap<u32, RemoteNeighbor>,
    host_markers: &[String],
) -> Vec<Adjacency> {
    let management_ip = local.management_ip().unwrap_or_else(|| {
        warn!(
            switch = %polled_address,
            "Switch advertises no LLDP management address, using polled address"
        );
        polled_address
    });

    neighbors
        .values()
        .filter(|n| {
            let keep = is_host(&n.system_description, host_markers);
            if !keep {
                debug!(
                    switch = %polled_address,
                    neighbor = %n.system_name,
                    "Dropping non-host neighbor"
                );
            }
            keep
        })
        .map(|n| Adjacency {
            local_interface_index: n.index,
            local_port_name: local.port_names.get(&n.index).cloned().unwrap_or_default(),
            switch_id: local.system_name.clone(),
            switch_management_ip: management_ip.to_string(),
            neighbor_host: n.system_name.clone(),
            neighbor_interface: n.port_description.clone(),
            neighbor_ip: n.management_address.clone(),
            neighbor_mac: n.mac_address.clone(),
            neighbor_system_description: n.system_description.clone(),
        })
        .collect()
}

/// Polls switches for LLDP data over SNMP.
#[derive(Clone)]
pub struct LldpReader {
    walker: Arc<dyn SnmpWalker>,
    config: WalkConfig,
    host_markers: Vec<String>,
}

impl LldpReader {
    pub fn new(walker: Arc<dyn SnmpWalker>, config: WalkConfig, host_markers: Vec<String>) -> Self {
        Self {
            walker,
            config,
            host_markers,
        }
    }

    /// Reader with the default host markers.
    pub fn with_defaults(walker: Arc<dyn SnmpWalker>, config: WalkConfig) -> Self {
        let markers = DEFAULT_HOST_MARKERS.iter().map(|m| m.to_string()).collect();
        Self::new(walker, config, markers)
    }

    pub fn walk_config(&self) -> &WalkConfig {
        &self.config
    }

    pub async fn read_local(&self, device: &str) -> FabricResult<LocalSystem> {
        let records = self
            .walker
            .walk(device, oids::LLDP_LOCAL_ROOT, &self.config)
            .await?;
        Ok(parse_local(&records))
    }

    pub async fn read_remote(&self, device: &str) -> FabricResult<BTreeMap<u32, RemoteNeighbor>> {
        let records = self
            .walker
            .walk(device, oids::LLDP_REMOTE_ROOT, &self.config)
            .await?;
        Ok(parse_remote(&records))
    }

    /// Walks both subtrees of `device` and returns its host adjacency.
    pub async fn read_adjacency(&self, device: &str) -> FabricResult<Vec<Adjacency>> {
        let local = self.read_local(device).await?;
        let neighbors = self.read_remote(device).await?;
        let rows = resolve_adjacency(device, &local, &neighbors, &self.host_markers);
        debug!(
            switch = %device,
            neighbors = neighbors.len(),
            hosts = rows.len(),
            "LLDP poll complete"
        );
        Ok(rows)
    }
}
