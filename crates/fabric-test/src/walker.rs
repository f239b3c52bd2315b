//! Synthetic LLDP data served through [`SnmpWalker`]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use fabric_common::{FabricError, FabricResult};
use fabric_topology::oids::{local, remote, LLDP_LOCAL_ROOT, LLDP_REMOTE_ROOT};
use fabric_topology::{SnmpValue, SnmpWalker, VarBind, WalkConfig};
use parking_lot::RwLock;

#[derive(Debug, Clone)]
struct Neighbor {
    port: u32,
    system_name: String,
    system_description: String,
    port_description: String,
    chassis_mac: [u8; 6],
    management_ip: Option<[u8; 4]>,
}

/// LLDP-MIB contents of one switch.
#[derive(Debug, Clone)]
pub struct LldpFixture {
    system_name: String,
    system_description: String,
    chassis_mac: [u8; 6],
    management_ip: Option<([u8; 4], u32)>,
    ports: Vec<(u32, String)>,
    neighbors: Vec<Neighbor>,
}

fn octets(ip: &str) -> [u8; 4] {
    let mut out = [0u8; 4];
    for (slot, part) in out.iter_mut().zip(ip.split('.')) {
        *slot = part.parse().unwrap_or(0);
    }
    out
}

fn text(oid: String, value: &str) -> VarBind {
    VarBind::new(format!(".{}", oid), SnmpValue::OctetString(value.as_bytes().to_vec()))
}

impl LldpFixture {
    /// A switch named `system_name` with no ports and no neighbors.
    pub fn switch(system_name: &str) -> Self {
        Self {
            system_name: system_name.to_string(),
            system_description: "H3C Comware Platform Software".to_string(),
            chassis_mac: [0x00, 0x0c, 0x29, 0x00, 0x00, 0x01],
            management_ip: None,
            ports: Vec::new(),
            neighbors: Vec::new(),
        }
    }

    /// Advertises `ip` as the management address carried by interface `if_index`.
    pub fn management(mut self, ip: &str, if_index: u32) -> Self {
        self.management_ip = Some((octets(ip), if_index));
        self
    }

    /// Adds local port `index` named `name`.
    pub fn port(mut self, index: u32, name: &str) -> Self {
        self.ports.push((index, name.to_string()));
        self
    }

    /// Adds a neighbor seen on local port `port`.
    pub fn neighbor(mut self, port: u32, system_name: &str, system_description: &str) -> Self {
        let last = u8::try_from(self.neighbors.len() + 1).unwrap_or(u8::MAX);
        self.neighbors.push(Neighbor {
            port,
            system_name: system_name.to_string(),
            system_description: system_description.to_string(),
            port_description: format!("{}-nic{}", system_name, port),
            chassis_mac: [0x52, 0x54, 0x00, 0x00, 0x00, last],
            management_ip: None,
        });
        self
    }

    /// Adds a Linux host seen on local port `port`.
    pub fn host(self, port: u32, system_name: &str) -> Self {
        self.neighbor(port, system_name, "Ubuntu 20.04 LTS Linux 5.4.0")
    }

    /// Sets the management address of the neighbor added last.
    pub fn with_neighbor_ip(mut self, ip: &str) -> Self {
        if let Some(n) = self.neighbors.last_mut() {
            n.management_ip = Some(octets(ip));
        }
        self
    }

    /// Records of a walk of the local subtree.
    pub fn local_records(&self) -> Vec<VarBind> {
        let mut records = vec![
            VarBind::new(format!(".{}", local::CHASSIS_ID_SUBTYPE), SnmpValue::Integer(4)),
            VarBind::new(
                format!(".{}", local::CHASSIS_ID),
                SnmpValue::OctetString(self.chassis_mac.to_vec()),
            ),
            text(local::SYS_NAME.to_string(), &self.system_name),
            text(local::SYS_DESC.to_string(), &self.system_description),
        ];
        for (index, name) in &self.ports {
            records.push(text(format!("{}.{}", local::PORT_ID, index), name));
        }
        if let Some((ip, if_index)) = self.management_ip {
            records.push(VarBind::new(
                format!(
                    ".{}.1.4.{}.{}.{}.{}",
                    local::MAN_ADDR_IF_ID,
                    ip[0],
                    ip[1],
                    ip[2],
                    ip[3]
                ),
                SnmpValue::Integer(i64::from(if_index)),
            ));
        }
        records
    }

    /// Records of a walk of the remote subtree.
    pub fn remote_records(&self) -> Vec<VarBind> {
        let mut records = Vec::new();
        for (i, n) in self.neighbors.iter().enumerate() {
            let suffix = format!("0.{}.{}", n.port, i + 1);
            records.push(VarBind::new(
                format!(".{}.{}", remote::CHASSIS_ID_SUBTYPE, suffix),
                SnmpValue::Integer(4),
            ));
            records.push(VarBind::new(
                format!(".{}.{}", remote::CHASSIS_ID, suffix),
                SnmpValue::OctetString(n.chassis_mac.to_vec()),
            ));
            records.push(text(format!("{}.{}", remote::PORT_DESC, suffix), &n.port_description));
            records.push(text(format!("{}.{}", remote::SYS_NAME, suffix), &n.system_name));
            records.push(text(
                format!("{}.{}", remote::SYS_DESC, suffix),
                &n.system_description,
            ));
            if let Some(ip) = n.management_ip {
                records.push(VarBind::new(
                    format!(
                        ".{}.{}.1.4.{}.{}.{}.{}",
                        remote::MAN_ADDR,
                        suffix,
                        ip[0],
                        ip[1],
                        ip[2],
                        ip[3]
                    ),
                    SnmpValue::Integer(2),
                ));
            }
        }
        records
    }
}

/// Serves [`LldpFixture`]s by device address. Unknown devices fail with a
/// connect error, like an unreachable agent.
#[derive(Default)]
pub struct StaticWalker {
    devices: RwLock<HashMap<String, LldpFixture>>,
    walks: AtomicUsize,
}

impl StaticWalker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs or replaces the LLDP data of `device`.
    pub fn set(&self, device: &str, fixture: LldpFixture) {
        self.devices.write().insert(device.to_string(), fixture);
    }

    /// Makes `device` unreachable.
    pub fn remove(&self, device: &str) {
        self.devices.write().remove(device);
    }

    /// Number of walks served or refused so far.
    pub fn walks(&self) -> usize {
        self.walks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnmpWalker for StaticWalker {
    async fn walk(
        &self,
        device: &str,
        root: &str,
        _config: &WalkConfig,
    ) -> FabricResult<Vec<VarBind>> {
        self.walks.fetch_add(1, Ordering::SeqCst);
        let devices = self.devices.read();
        let fixture = devices
            .get(device)
            .ok_or_else(|| FabricError::connect(device, "no route to host"))?;
        match root.trim_start_matches('.') {
            LLDP_LOCAL_ROOT => Ok(fixture.local_records()),
            LLDP_REMOTE_ROOT => Ok(fixture.remote_records()),
            _ => Ok(Vec::new()),
        }
    }
}
