//! Type definitions for fabricd

use std::collections::HashMap;
use std::net::IpAddr;

use fabric_common::{BitRange, FabricError, FabricResult};
use fabric_types::{SharingClass, VlanId};
use serde::{Deserialize, Serialize};

/// Local VLAN ranges of the two sharing classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VlanRanges {
    pub unshared_min: u32,
    pub unshared_max: u32,
    pub shared_min: u32,
    pub shared_max: u32,
}

impl Default for VlanRanges {
    fn default() -> Self {
        Self {
            unshared_min: 2,
            unshared_max: 4000,
            shared_min: 4002,
            shared_max: 4094,
        }
    }
}

impl VlanRanges {
    /// `(min, max)` of `class`.
    pub fn bounds(&self, class: SharingClass) -> (u32, u32) {
        match class {
            SharingClass::Unshared => (self.unshared_min, self.unshared_max),
            SharingClass::Shared => (self.shared_min, self.shared_max),
        }
    }

    pub fn contains(&self, class: SharingClass, vlan: VlanId) -> bool {
        let (min, max) = self.bounds(class);
        (min..=max).contains(&vlan.as_index())
    }
}

/// In-memory VLAN state of one switch: a bitmap per sharing class and the
/// VLAN already held by each `(network, class)`.
#[derive(Debug, Clone)]
pub struct SwitchVlanState {
    unshared: BitRange,
    shared: BitRange,
    cache: HashMap<(String, SharingClass), VlanId>,
}

impl SwitchVlanState {
    pub fn new(ranges: &VlanRanges) -> Self {
        let (umin, umax) = ranges.bounds(SharingClass::Unshared);
        let (smin, smax) = ranges.bounds(SharingClass::Shared);
        Self {
            unshared: BitRange::new(umin, umax),
            shared: BitRange::new(smin, smax),
            cache: HashMap::new(),
        }
    }

    fn bitmap(&self, class: SharingClass) -> &BitRange {
        match class {
            SharingClass::Unshared => &self.unshared,
            SharingClass::Shared => &self.shared,
        }
    }

    /// Takes the lowest free VLAN of `class`.
    ///
    /// Ids held by the other class are skipped so the classes never collide,
    /// even if their ranges overlap.
    pub fn allocate(&mut self, class: SharingClass) -> Option<VlanId> {
        let (range, other) = match class {
            SharingClass::Unshared => (&mut self.unshared, &self.shared),
            SharingClass::Shared => (&mut self.shared, &self.unshared),
        };
        let id = range.allocate_first_free_where(|id| {
            !other.is_set(id) && VlanId::from_index(id).is_ok()
        })?;
        VlanId::from_index(id).ok()
    }

    /// Returns `vlan` to the bitmap of `class`.
    pub fn release(&mut self, class: SharingClass, vlan: VlanId) -> FabricResult<()> {
        match class {
            SharingClass::Unshared => self.unshared.release(vlan.as_index()),
            SharingClass::Shared => self.shared.release(vlan.as_index()),
        }
    }

    /// Marks `vlan` as held; used when replaying persisted allocations.
    pub fn mark(&mut self, class: SharingClass, vlan: VlanId) -> FabricResult<()> {
        let other = match class {
            SharingClass::Unshared => &self.shared,
            SharingClass::Shared => &self.unshared,
        };
        if other.is_set(vlan.as_index()) {
            return Err(FabricError::bad_input(format!(
                "VLAN {} is already held by the other sharing class",
                vlan
            )));
        }
        match class {
            SharingClass::Unshared => self.unshared.set(vlan.as_index()),
            SharingClass::Shared => self.shared.set(vlan.as_index()),
        }
    }

    pub fn is_held(&self, class: SharingClass, vlan: VlanId) -> bool {
        self.bitmap(class).is_set(vlan.as_index())
    }

    /// VLAN already held by `network` in `class`.
    pub fn cached(&self, network: &str, class: SharingClass) -> Option<VlanId> {
        self.cache.get(&(network.to_string(), class)).copied()
    }

    pub fn remember(&mut self, network: &str, class: SharingClass, vlan: VlanId) {
        self.cache.insert((network.to_string(), class), vlan);
    }

    pub fn forget(&mut self, network: &str, class: SharingClass) -> Option<VlanId> {
        self.cache.remove(&(network.to_string(), class))
    }

    /// Number of VLANs held across both classes.
    pub fn held(&self) -> usize {
        self.unshared.count_set() + self.shared.count_set()
    }

    /// Drops every bit and cache entry.
    pub fn reset(&mut self) {
        self.unshared.clear();
        self.shared.clear();
        self.cache.clear();
    }
}

/// Body of `POST /localvlan/`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssignRequest {
    #[serde(rename = "netid")]
    pub network_id: String,
    pub host: String,
    #[serde(rename = "portid")]
    pub port_id: String,
}

impl AssignRequest {
    pub fn new(
        network_id: impl Into<String>,
        host: impl Into<String>,
        port_id: impl Into<String>,
    ) -> Self {
        Self {
            network_id: network_id.into(),
            host: host.into(),
            port_id: port_id.into(),
        }
    }

    pub fn validate(&self) -> FabricResult<()> {
        if self.network_id.is_empty() || self.host.is_empty() || self.port_id.is_empty() {
            return Err(FabricError::bad_input("netid, host and portid are required"));
        }
        Ok(())
    }
}

/// Outcome of an assignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlanMapping {
    pub vlan_id: VlanId,
    #[serde(rename = "netid")]
    pub network_id: String,
    pub host: String,
    /// Management IP of the uplink switch
    pub tor: String,
}

/// Body of `POST /tsync`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterRequest {
    pub switch_type: String,
    pub mgr: String,
    pub tunnel_src: String,
}

impl RegisterRequest {
    pub fn new(
        switch_type: impl Into<String>,
        mgr: impl Into<String>,
        tunnel_src: impl Into<String>,
    ) -> Self {
        Self {
            switch_type: switch_type.into(),
            mgr: mgr.into(),
            tunnel_src: tunnel_src.into(),
        }
    }

    pub fn validate(&self) -> FabricResult<()> {
        if self.switch_type.is_empty() || self.mgr.is_empty() || self.tunnel_src.is_empty() {
            return Err(FabricError::bad_input(
                "switch_type, mgr and tunnel_src are required",
            ));
        }
        self.tunnel_src.parse::<IpAddr>().map_err(|_| {
            FabricError::bad_input(format!("tunnel_src '{}' is not an IP address", self.tunnel_src))
        })?;
        Ok(())
    }
}
