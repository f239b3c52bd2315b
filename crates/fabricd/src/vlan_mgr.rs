//! VlanMgr - VLAN/VXLAN allocation orchestrator
//!
//! Hands out switch-local VLAN ids for (switch, network, sharing class),
//! persists the allocation with its VSI and port mappings, and pushes the
//! VLAN to VXLAN binding to the switch agent.
//!
//! Each switch's bitmap pair and allocation cache sit behind one async
//! mutex; every allocate, release and rebuild for that switch runs with
//! the mutex held, including the store writes that accompany it.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use fabric_common::tables::{allocation_fields, mapping_fields, vsi_fields};
use fabric_common::{
    field_values, FabricError, FabricResult, Filter, Network, Port, PortVlanMapping, Repository,
    Switch, SwitchVsi, VlanAllocation,
};
use fabric_topology::TopologyAggregator;
use fabric_types::{SharingClass, VlanId, Vni};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::commands::{build_map_vlan, build_unmap_vlan};
use crate::metrics::MetricsCollector;
use crate::pusher::DevicePusher;
use crate::tunnel_mgr::{device_type_of, tunnel_ids_of};
use crate::types::{AssignRequest, SwitchVlanState, VlanMapping, VlanRanges};

/// Outcome of a reconciliation sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub switches: usize,
    pub orphans_removed: usize,
    pub allocations: usize,
}

/// VlanMgr owns the per-switch VLAN state
pub struct VlanMgr {
    repo: Repository,
    topology: Arc<TopologyAggregator>,
    pusher: DevicePusher,
    ranges: VlanRanges,
    default_device_type: String,
    metrics: MetricsCollector,

    /// Bitmap pair and cache per switch management IP
    switches: DashMap<String, Arc<Mutex<SwitchVlanState>>>,
}

impl VlanMgr {
    pub fn new(
        repo: Repository,
        topology: Arc<TopologyAggregator>,
        pusher: DevicePusher,
        ranges: VlanRanges,
        default_device_type: impl Into<String>,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            repo,
            topology,
            pusher,
            ranges,
            default_device_type: default_device_type.into(),
            metrics,
            switches: DashMap::new(),
        }
    }

    fn state_of(&self, switch: &str) -> Arc<Mutex<SwitchVlanState>> {
        self.switches
            .entry(switch.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SwitchVlanState::new(&self.ranges))))
            .clone()
    }

    /// Creates the bitmap pair of `switch` if it has none yet.
    pub fn ensure_switch(&self, switch: &str) {
        self.state_of(switch);
    }

    /// Switches with in-memory VLAN state.
    pub fn known_switches(&self) -> Vec<String> {
        let mut switches: Vec<String> = self.switches.iter().map(|e| e.key().clone()).collect();
        switches.sort();
        switches
    }

    /// VLAN currently cached for `network` on `switch`.
    pub async fn cached_vlan(
        &self,
        switch: &str,
        network: &str,
        class: SharingClass,
    ) -> Option<VlanId> {
        let state = self.switches.get(switch)?.clone();
        let state = state.lock().await;
        state.cached(network, class)
    }

    /// Whether `vlan` is held in the `class` bitmap of `switch`.
    pub async fn is_held(&self, switch: &str, class: SharingClass, vlan: VlanId) -> bool {
        let Some(state) = self.switches.get(switch).map(|s| s.clone()) else {
            return false;
        };
        let state = state.lock().await;
        state.is_held(class, vlan)
    }

    /// Binds a port to the local VLAN of its network on the host's uplink switch.
    #[instrument(skip(self), fields(network = %request.network_id, port = %request.port_id))]
    pub async fn assign(&self, request: &AssignRequest) -> FabricResult<VlanMapping> {
        request.validate()?;

        let network: Network = self
            .repo
            .get(&request.network_id)
            .await?
            .ok_or_else(|| FabricError::not_found("network", &request.network_id))?;
        if !self.repo.exists::<Port>(&request.port_id).await? {
            return Err(FabricError::not_found("port", &request.port_id));
        }
        let vni = network.segmentation_id.ok_or_else(|| {
            FabricError::bad_input(format!("network '{}' has no segmentation id", network.id))
        })?;

        let snapshot = self.topology.snapshot();
        let switch = snapshot
            .uplink_for(&request.host)
            .ok_or_else(|| FabricError::not_found("host", &request.host))?
            .to_string();
        let if_index = snapshot
            .interface_index(&request.host, &switch)
            .unwrap_or_default();
        let class = network.sharing();

        let state = self.state_of(&switch);
        let mut state = state.lock().await;

        let existing: Vec<PortVlanMapping> = self
            .repo
            .find(&field_values! { mapping_fields::PORT_ID => request.port_id })
            .await?;
        if let Some(current) = existing.first() {
            if current.network_id == network.id && current.switch == switch {
                debug!(vlan = %current.vlan_id, "Port already mapped");
                return Ok(VlanMapping {
                    vlan_id: current.vlan_id,
                    network_id: network.id,
                    host: request.host.clone(),
                    tor: switch,
                });
            }
            return Err(FabricError::bad_input(format!(
                "port '{}' is already mapped to network '{}' on {}",
                request.port_id, current.network_id, current.switch
            )));
        }

        let vlan = match state.cached(&network.id, class) {
            Some(vlan) => vlan,
            None => {
                let vlan = state.allocate(class).ok_or_else(|| FabricError::NoCapacity {
                    switch: switch.clone(),
                    class: class.to_string(),
                })?;
                if let Err(e) = self
                    .persist_allocation(&network.id, &switch, class, vlan, vni)
                    .await
                {
                    if let Err(release_err) = state.release(class, vlan) {
                        warn!(error = %release_err, "Failed to roll back VLAN bit");
                    }
                    return Err(e);
                }
                state.remember(&network.id, class, vlan);
                self.metrics.record_vlan_allocation();
                info!(switch = %switch, vlan = %vlan, vxlan = %vni, %class, "Allocated local VLAN");
                vlan
            }
        };

        self.repo
            .insert(&PortVlanMapping {
                port_id: request.port_id.clone(),
                network_id: network.id.clone(),
                switch: switch.clone(),
                vlan_id: vlan,
                if_index,
            })
            .await?;
        drop(state);

        info!(switch = %switch, vlan = %vlan, index = if_index, "Mapped port to local VLAN");
        self.push_map(&switch, vlan, vni, if_index);

        Ok(VlanMapping {
            vlan_id: vlan,
            network_id: network.id,
            host: request.host.clone(),
            tor: switch,
        })
    }

    async fn persist_allocation(
        &self,
        network: &str,
        switch: &str,
        class: SharingClass,
        vlan: VlanId,
        vni: Vni,
    ) -> FabricResult<()> {
        self.repo
            .insert(&VlanAllocation {
                network_id: network.to_string(),
                switch: switch.to_string(),
                sharing: class,
                vlan_id: vlan,
                allocated: true,
            })
            .await?;

        let vsi_filter = field_values! {
            vsi_fields::SWITCH => switch,
            vsi_fields::VXLAN => vni,
        };
        if self.repo.count::<SwitchVsi>(&vsi_filter).await? == 0 {
            self.repo
                .insert(&SwitchVsi {
                    switch: switch.to_string(),
                    vxlan: vni,
                })
                .await?;
        }
        Ok(())
    }

    /// Removes the mapping of `port_id`; the last mapping of a network on a
    /// switch frees its VLAN.
    ///
    /// The mapping is read again once the switch lock is held, so a second
    /// release of the same port finds nothing and cannot drop another
    /// port's reference. Store rows go first; the bitmap and cache follow
    /// only once every delete has succeeded.
    #[instrument(skip(self))]
    pub async fn release(&self, port_id: &str) -> FabricResult<()> {
        let port_filter = field_values! { mapping_fields::PORT_ID => port_id };
        let mut switch = self.mapping_of(&port_filter, port_id).await?.switch;

        let (mut state, mapping) = loop {
            let guard = self.state_of(&switch).lock_owned().await;
            let mapping = self.mapping_of(&port_filter, port_id).await?;
            if mapping.switch == switch {
                break (guard, mapping);
            }
            debug!(from = %switch, to = %mapping.switch, "Port moved while waiting for lock");
            switch = mapping.switch;
        };

        let users = self
            .repo
            .count::<PortVlanMapping>(&field_values! {
                mapping_fields::NETWORK_ID => mapping.network_id,
                mapping_fields::SWITCH => mapping.switch,
            })
            .await?;
        let last = users <= 1;

        let network: Option<Network> = self.repo.get(&mapping.network_id).await?;
        let vni = network.as_ref().and_then(|n| n.segmentation_id);

        self.repo.delete::<PortVlanMapping>(&port_filter).await?;

        if last {
            let allocation_filter = field_values! {
                allocation_fields::NETWORK_ID => mapping.network_id,
                allocation_fields::SWITCH => mapping.switch,
            };
            let allocations: Vec<VlanAllocation> = self.repo.find(&allocation_filter).await?;
            let class = allocations
                .first()
                .map(|a| a.sharing)
                .or_else(|| network.as_ref().map(Network::sharing))
                .unwrap_or(SharingClass::Unshared);

            self.repo.delete::<VlanAllocation>(&allocation_filter).await?;
            if let Some(vni) = vni {
                self.repo
                    .delete::<SwitchVsi>(&field_values! {
                        vsi_fields::SWITCH => mapping.switch,
                        vsi_fields::VXLAN => vni,
                    })
                    .await?;
            }

            if let Err(e) = state.release(class, mapping.vlan_id) {
                warn!(vlan = %mapping.vlan_id, error = %e, "VLAN outside configured range");
            }
            state.forget(&mapping.network_id, class);
            self.metrics.record_vlan_release();
            info!(switch = %mapping.switch, vlan = %mapping.vlan_id, "Released local VLAN");
        }
        drop(state);

        match vni {
            Some(vni) => self.push_unmap(&mapping, vni, !last),
            None => warn!(
                network = %mapping.network_id,
                "Network has no VNI, skipping unmap push"
            ),
        }
        Ok(())
    }

    async fn mapping_of(&self, filter: &Filter, port_id: &str) -> FabricResult<PortVlanMapping> {
        self.repo
            .find::<PortVlanMapping>(filter)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| FabricError::not_found("port mapping", port_id))
    }

    fn push_map(&self, switch: &str, vlan: VlanId, vni: Vni, if_index: u32) {
        let repo = self.repo.clone();
        let pusher = self.pusher.clone();
        let fallback = self.default_device_type.clone();
        let switch = switch.to_string();
        self.pusher.spawn(async move {
            let device_type = device_type_of(&repo, &switch, &fallback).await;
            let tunnel_ids = match tunnel_ids_of(&repo, &switch).await {
                Ok(ids) => ids,
                Err(e) => {
                    warn!(switch = %switch, error = %e, "Failed to read tunnel ids");
                    Vec::new()
                }
            };
            let cmd = build_map_vlan(&device_type, &switch, vlan, vni, &tunnel_ids, if_index);
            pusher.send(&cmd).await;
        });
    }

    fn push_unmap(&self, mapping: &PortVlanMapping, vni: Vni, delete_on_index: bool) {
        let repo = self.repo.clone();
        let pusher = self.pusher.clone();
        let fallback = self.default_device_type.clone();
        let mapping = mapping.clone();
        self.pusher.spawn(async move {
            let device_type = device_type_of(&repo, &mapping.switch, &fallback).await;
            let cmd = build_unmap_vlan(
                &device_type,
                &mapping.switch,
                mapping.vlan_id,
                vni,
                mapping.if_index,
                delete_on_index,
            );
            pusher.send(&cmd).await;
        });
    }

    /// Rebuilds the in-memory state from the store at startup.
    ///
    /// Every registered switch gets a bitmap pair; every persisted allocation
    /// inside the configured ranges is marked and cached.
    #[instrument(skip(self))]
    pub async fn restore(&self) -> FabricResult<usize> {
        let switches: Vec<Switch> = self.repo.all().await?;
        for switch in &switches {
            self.ensure_switch(&switch.mgmt_ip);
        }

        let allocations: Vec<VlanAllocation> = self.repo.all().await?;
        let mut restored = 0;
        for allocation in &allocations {
            let state = self.state_of(&allocation.switch);
            let mut state = state.lock().await;
            if self.replay(&mut state, allocation) {
                restored += 1;
            }
        }

        info!(
            switches = switches.len(),
            allocations = restored,
            skipped = allocations.len() - restored,
            "Restored VLAN state"
        );
        Ok(restored)
    }

    fn replay(&self, state: &mut SwitchVlanState, allocation: &VlanAllocation) -> bool {
        if !self.ranges.contains(allocation.sharing, allocation.vlan_id) {
            warn!(
                switch = %allocation.switch,
                network = %allocation.network_id,
                vlan = %allocation.vlan_id,
                class = %allocation.sharing,
                "Persisted VLAN outside configured range, skipping"
            );
            return false;
        }
        if let Err(e) = state.mark(allocation.sharing, allocation.vlan_id) {
            warn!(
                switch = %allocation.switch,
                vlan = %allocation.vlan_id,
                error = %e,
                "Cannot replay persisted VLAN, skipping"
            );
            return false;
        }
        state.remember(&allocation.network_id, allocation.sharing, allocation.vlan_id);
        true
    }

    /// Deletes allocations no port mapping refers to and rebuilds every
    /// switch's state from the remaining rows.
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> FabricResult<ReconcileReport> {
        let mut switches: BTreeSet<String> = self.known_switches().into_iter().collect();
        for allocation in self.repo.all::<VlanAllocation>().await? {
            switches.insert(allocation.switch);
        }

        let mut report = ReconcileReport::default();
        for switch in &switches {
            let (removed, kept) = self.reconcile_switch(switch).await?;
            report.switches += 1;
            report.orphans_removed += removed;
            report.allocations += kept;
        }

        if report.orphans_removed > 0 {
            info!(
                removed = report.orphans_removed,
                switches = report.switches,
                "Removed orphaned VLAN allocations"
            );
        } else {
            debug!(switches = report.switches, "Reconciliation found no orphans");
        }
        Ok(report)
    }

    async fn reconcile_switch(&self, switch: &str) -> FabricResult<(usize, usize)> {
        let state = self.state_of(switch);
        let mut state = state.lock().await;

        let allocations: Vec<VlanAllocation> = self
            .repo
            .find(&field_values! { allocation_fields::SWITCH => switch })
            .await?;
        let in_use: BTreeSet<String> = self
            .repo
            .find::<PortVlanMapping>(&field_values! { mapping_fields::SWITCH => switch })
            .await?
            .into_iter()
            .map(|m| m.network_id)
            .collect();

        let mut removed = 0;
        let mut kept = Vec::new();
        for allocation in allocations {
            if in_use.contains(&allocation.network_id) {
                kept.push(allocation);
                continue;
            }
            self.repo
                .delete::<VlanAllocation>(&field_values! {
                    allocation_fields::NETWORK_ID => allocation.network_id,
                    allocation_fields::SWITCH => switch,
                })
                .await?;
            let network: Option<Network> = self.repo.get(&allocation.network_id).await?;
            if let Some(vni) = network.and_then(|n| n.segmentation_id) {
                self.repo
                    .delete::<SwitchVsi>(&field_values! {
                        vsi_fields::SWITCH => switch,
                        vsi_fields::VXLAN => vni,
                    })
                    .await?;
            }
            warn!(
                switch = %switch,
                network = %allocation.network_id,
                vlan = %allocation.vlan_id,
                "Removed orphaned VLAN allocation"
            );
            removed += 1;
        }

        state.reset();
        let mut restored = 0;
        for allocation in &kept {
            if self.replay(&mut state, allocation) {
                restored += 1;
            }
        }
        Ok((removed, restored))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_common::DeviceMethod;
    use fabric_test::{
        network_fixtures, port_fixtures, switch_fixtures, topology_fixtures, RecordingTransport,
        StaticWalker, StoreVerifier, TOR1_MGMT, TOR1_SRC, TOR2_MGMT,
    };
    use async_trait::async_trait;
    use fabric_common::tables::VLAN_ALLOCATION_TABLE;
    use fabric_common::{EntityStore, FieldValues, MemoryStore};
    use fabric_topology::{LldpReader, WalkConfig};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Harness {
        repo: Repository,
        transport: Arc<RecordingTransport>,
        pusher: DevicePusher,
        mgr: Arc<VlanMgr>,
    }

    fn harness_with(ranges: VlanRanges) -> Harness {
        harness_over(Repository::in_memory(), ranges)
    }

    fn harness_over(repo: Repository, ranges: VlanRanges) -> Harness {
        let transport = Arc::new(RecordingTransport::new());
        let metrics = MetricsCollector::new().unwrap();
        let pusher = DevicePusher::new(transport.clone(), metrics.clone());
        let topology = Arc::new(TopologyAggregator::new(LldpReader::with_defaults(
            Arc::new(StaticWalker::new()),
            WalkConfig::default(),
        )));
        topology.install(topology_fixtures::snapshot(&[
            (TOR1_MGMT, 1, "eth0", "compute1"),
            (TOR1_MGMT, 2, "eth1", "compute2"),
            (TOR2_MGMT, 1, "eth0", "compute3"),
        ]));
        let mgr = Arc::new(VlanMgr::new(
            repo.clone(),
            topology,
            pusher.clone(),
            ranges,
            "h3c",
            metrics,
        ));
        Harness {
            repo,
            transport,
            pusher,
            mgr,
        }
    }

    fn harness() -> Harness {
        harness_with(VlanRanges::default())
    }

    impl Harness {
        async fn network(&self, network: Network) {
            self.repo.insert(&network).await.unwrap();
        }

        async fn port(&self, id: &str, network: &str, host: &str) {
            self.repo
                .insert(&port_fixtures::bound(id, network, host))
                .await
                .unwrap();
        }

        async fn assign(&self, network: &str, host: &str, port: &str) -> FabricResult<VlanMapping> {
            self.mgr.assign(&AssignRequest::new(network, host, port)).await
        }
    }

    /// Memory store whose deletes on one table fail while `failing` is set.
    struct FailingDeletes {
        inner: MemoryStore,
        table: &'static str,
        failing: AtomicBool,
    }

    impl FailingDeletes {
        fn new(table: &'static str) -> Self {
            Self {
                inner: MemoryStore::new(),
                table,
                failing: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl EntityStore for FailingDeletes {
        async fn insert(
            &self,
            table: &str,
            key: Option<&str>,
            fields: FieldValues,
        ) -> FabricResult<String> {
            self.inner.insert(table, key, fields).await
        }

        async fn get(&self, table: &str, key: &str) -> FabricResult<Option<FieldValues>> {
            self.inner.get(table, key).await
        }

        async fn find(
            &self,
            table: &str,
            filter: &Filter,
        ) -> FabricResult<Vec<(String, FieldValues)>> {
            self.inner.find(table, filter).await
        }

        async fn delete(&self, table: &str, filter: &Filter) -> FabricResult<u64> {
            if table == self.table && self.failing.load(Ordering::SeqCst) {
                return Err(FabricError::store("delete", "connection reset"));
            }
            self.inner.delete(table, filter).await
        }

        async fn update_all(
            &self,
            table: &str,
            filter: &Filter,
            fields: &FieldValues,
        ) -> FabricResult<u64> {
            self.inner.update_all(table, filter, fields).await
        }

        async fn ping(&self) -> FabricResult<()> {
            self.inner.ping().await
        }
    }

    fn vlan(id: u16) -> VlanId {
        VlanId::new(id).unwrap()
    }

    #[tokio::test]
    async fn test_assign_allocates_range_minimum() {
        let h = harness();
        h.network(network_fixtures::unshared("net1", 5001)).await;
        h.port("p1", "net1", "compute1").await;

        let mapping = h.assign("net1", "compute1", "p1").await.unwrap();
        assert_eq!(mapping.vlan_id, vlan(2));
        assert_eq!(mapping.tor, TOR1_MGMT);

        let verifier = StoreVerifier::new(&h.repo);
        verifier.assert_allocation(TOR1_MGMT, "net1", 2).await.unwrap();
        verifier.assert_mapping_count(TOR1_MGMT, "net1", 1).await.unwrap();
        verifier.assert_vsi(TOR1_MGMT, 5001, true).await.unwrap();
    }

    #[tokio::test]
    async fn test_assign_pushes_map_with_tunnels() {
        let h = harness();
        h.repo
            .insert(&switch_fixtures::tor(TOR1_MGMT, TOR1_SRC))
            .await
            .unwrap();
        h.repo
            .insert(&fabric_common::SwitchTunnel {
                switch: TOR1_MGMT.to_string(),
                tunnel_id: 7,
                dst_addr: "10.0.0.2".to_string(),
            })
            .await
            .unwrap();
        h.network(network_fixtures::unshared("net1", 5001)).await;
        h.port("p1", "net1", "compute2").await;

        h.assign("net1", "compute2", "p1").await.unwrap();
        h.pusher.flush().await;

        let sent = h.transport.sent_to("/vlan2vxlan");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].method, DeviceMethod::Post);
        assert_eq!(
            sent[0].payload,
            json!({
                "type": "h3c",
                "vlan": 2,
                "vxlan": 5001,
                "tunnel_ids": [7],
                "mgr": TOR1_MGMT,
                "index": 2,
            })
        );
    }

    #[tokio::test]
    async fn test_same_network_reuses_vlan() {
        let h = harness();
        h.network(network_fixtures::unshared("net1", 5001)).await;
        h.port("p1", "net1", "compute1").await;
        h.port("p2", "net1", "compute2").await;

        let first = h.assign("net1", "compute1", "p1").await.unwrap();
        let second = h.assign("net1", "compute2", "p2").await.unwrap();
        assert_eq!(first.vlan_id, second.vlan_id);
        StoreVerifier::new(&h.repo)
            .assert_mapping_count(TOR1_MGMT, "net1", 2)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_reassigning_same_port_is_idempotent() {
        let h = harness();
        h.network(network_fixtures::unshared("net1", 5001)).await;
        h.network(network_fixtures::unshared("net2", 5002)).await;
        h.port("p1", "net1", "compute1").await;

        let first = h.assign("net1", "compute1", "p1").await.unwrap();
        let again = h.assign("net1", "compute1", "p1").await.unwrap();
        assert_eq!(first, again);
        assert!(matches!(
            h.assign("net2", "compute1", "p1").await,
            Err(FabricError::BadInput(_))
        ));
    }

    #[tokio::test]
    async fn test_assign_unknown_entities() {
        let h = harness();
        h.network(network_fixtures::unshared("net1", 5001)).await;
        h.port("p1", "net1", "compute1").await;

        assert!(matches!(
            h.assign("nope", "compute1", "p1").await,
            Err(FabricError::NotFound { ref kind, .. }) if kind == "network"
        ));
        assert!(matches!(
            h.assign("net1", "compute1", "nope").await,
            Err(FabricError::NotFound { ref kind, .. }) if kind == "port"
        ));
        assert!(matches!(
            h.assign("net1", "ghost", "p1").await,
            Err(FabricError::NotFound { ref kind, .. }) if kind == "host"
        ));
        assert!(matches!(
            h.assign("", "compute1", "p1").await,
            Err(FabricError::BadInput(_))
        ));
    }

    #[tokio::test]
    async fn test_network_without_vni_is_rejected() {
        let h = harness();
        let mut net = network_fixtures::unshared("net1", 5001);
        net.segmentation_id = None;
        h.network(net).await;
        h.port("p1", "net1", "compute1").await;
        assert!(matches!(
            h.assign("net1", "compute1", "p1").await,
            Err(FabricError::BadInput(_))
        ));
    }

    #[tokio::test]
    async fn test_shared_and_unshared_use_separate_ranges() {
        let h = harness();
        h.network(network_fixtures::unshared("net1", 5001)).await;
        h.network(network_fixtures::shared("ext", 9000)).await;
        h.port("p1", "net1", "compute1").await;
        h.port("p2", "ext", "compute1").await;

        assert_eq!(h.assign("net1", "compute1", "p1").await.unwrap().vlan_id, vlan(2));
        assert_eq!(h.assign("ext", "compute1", "p2").await.unwrap().vlan_id, vlan(4002));
    }

    #[tokio::test]
    async fn test_exhausted_range_reports_no_capacity() {
        let h = harness_with(VlanRanges {
            unshared_min: 2,
            unshared_max: 2,
            shared_min: 4002,
            shared_max: 4094,
        });
        h.network(network_fixtures::unshared("net1", 5001)).await;
        h.network(network_fixtures::unshared("net2", 5002)).await;
        h.port("p1", "net1", "compute1").await;
        h.port("p2", "net2", "compute1").await;

        h.assign("net1", "compute1", "p1").await.unwrap();
        assert!(matches!(
            h.assign("net2", "compute1", "p2").await,
            Err(FabricError::NoCapacity { .. })
        ));
        StoreVerifier::new(&h.repo)
            .assert_no_allocation(TOR1_MGMT, "net2")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_release_is_reference_counted() {
        let h = harness();
        h.network(network_fixtures::unshared("net1", 5001)).await;
        h.port("p1", "net1", "compute1").await;
        h.port("p2", "net1", "compute2").await;
        h.assign("net1", "compute1", "p1").await.unwrap();
        h.assign("net1", "compute2", "p2").await.unwrap();

        h.mgr.release("p1").await.unwrap();
        assert!(h.mgr.is_held(TOR1_MGMT, SharingClass::Unshared, vlan(2)).await);
        let verifier = StoreVerifier::new(&h.repo);
        verifier.assert_allocation(TOR1_MGMT, "net1", 2).await.unwrap();

        h.mgr.release("p2").await.unwrap();
        assert!(!h.mgr.is_held(TOR1_MGMT, SharingClass::Unshared, vlan(2)).await);
        verifier.assert_no_allocation(TOR1_MGMT, "net1").await.unwrap();
        verifier.assert_vsi(TOR1_MGMT, 5001, false).await.unwrap();
        assert_eq!(
            h.mgr
                .cached_vlan(TOR1_MGMT, "net1", SharingClass::Unshared)
                .await,
            None
        );

        h.pusher.flush().await;
        let unmaps = h.transport.sent_to("/vlan2vxlan");
        let flags: Vec<_> = unmaps
            .iter()
            .filter(|c| c.method == DeviceMethod::Delete)
            .map(|c| c.payload["delete_on_index"].clone())
            .collect();
        assert_eq!(flags, vec![json!(true), json!(false)]);
    }

    #[tokio::test]
    async fn test_duplicate_release_keeps_other_references() {
        let h = harness();
        h.network(network_fixtures::unshared("net1", 5001)).await;
        h.port("p1", "net1", "compute1").await;
        h.port("p2", "net1", "compute2").await;
        h.assign("net1", "compute1", "p1").await.unwrap();
        h.assign("net1", "compute2", "p2").await.unwrap();

        // Both releases read the mapping before either gets the switch lock.
        let state = h.mgr.state_of(TOR1_MGMT);
        let guard = state.lock().await;
        let first = tokio::spawn({
            let mgr = h.mgr.clone();
            async move { mgr.release("p1").await }
        });
        let second = tokio::spawn({
            let mgr = h.mgr.clone();
            async move { mgr.release("p1").await }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        drop(guard);

        let results = [first.await.unwrap(), second.await.unwrap()];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(FabricError::NotFound { .. }))));

        let verifier = StoreVerifier::new(&h.repo);
        verifier.assert_mapping_count(TOR1_MGMT, "net1", 1).await.unwrap();
        verifier.assert_allocation(TOR1_MGMT, "net1", 2).await.unwrap();
        verifier.assert_vsi(TOR1_MGMT, 5001, true).await.unwrap();
        assert!(h.mgr.is_held(TOR1_MGMT, SharingClass::Unshared, vlan(2)).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_assigns_get_distinct_vlans() {
        let h = harness();
        for n in 0..20u32 {
            h.network(network_fixtures::unshared(&format!("net{}", n), 5000 + n))
                .await;
            h.port(&format!("p{}", n), &format!("net{}", n), "compute1")
                .await;
        }

        let mut tasks = Vec::new();
        for n in 0..20u32 {
            let mgr = h.mgr.clone();
            tasks.push(tokio::spawn(async move {
                mgr.assign(&AssignRequest::new(
                    format!("net{}", n),
                    "compute1",
                    format!("p{}", n),
                ))
                .await
            }));
        }
        let mut vlans = Vec::new();
        for task in tasks {
            vlans.push(task.await.unwrap().unwrap().vlan_id.as_u16());
        }
        vlans.sort_unstable();
        assert_eq!(vlans, (2..22).collect::<Vec<u16>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_releases_hold_reference_count() {
        let h = harness();
        h.network(network_fixtures::unshared("net1", 5001)).await;
        for port in ["p1", "p2", "p3"] {
            h.port(port, "net1", "compute1").await;
            h.assign("net1", "compute1", port).await.unwrap();
        }

        let mut tasks = Vec::new();
        for port in ["p1", "p1", "p2"] {
            let mgr = h.mgr.clone();
            tasks.push(tokio::spawn(async move { mgr.release(port).await }));
        }
        let mut not_found = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(()) => {}
                Err(FabricError::NotFound { .. }) => not_found += 1,
                Err(e) => panic!("unexpected release error: {}", e),
            }
        }
        assert_eq!(not_found, 1);

        let verifier = StoreVerifier::new(&h.repo);
        verifier.assert_mapping_count(TOR1_MGMT, "net1", 1).await.unwrap();
        verifier.assert_allocation(TOR1_MGMT, "net1", 2).await.unwrap();
        assert!(h.mgr.is_held(TOR1_MGMT, SharingClass::Unshared, vlan(2)).await);

        h.mgr.release("p3").await.unwrap();
        verifier.assert_no_allocation(TOR1_MGMT, "net1").await.unwrap();
        assert!(!h.mgr.is_held(TOR1_MGMT, SharingClass::Unshared, vlan(2)).await);
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_vlan_held() {
        let store = Arc::new(FailingDeletes::new(VLAN_ALLOCATION_TABLE));
        let h = harness_over(Repository::new(store.clone()), VlanRanges::default());
        h.network(network_fixtures::unshared("net1", 5001)).await;
        h.network(network_fixtures::unshared("net2", 5002)).await;
        h.port("p1", "net1", "compute1").await;
        h.port("p2", "net1", "compute1").await;
        h.port("p3", "net2", "compute1").await;
        h.assign("net1", "compute1", "p1").await.unwrap();

        store.failing.store(true, Ordering::SeqCst);
        assert!(matches!(
            h.mgr.release("p1").await,
            Err(FabricError::Store { .. })
        ));
        store.failing.store(false, Ordering::SeqCst);

        assert!(h.mgr.is_held(TOR1_MGMT, SharingClass::Unshared, vlan(2)).await);
        assert_eq!(
            h.mgr
                .cached_vlan(TOR1_MGMT, "net1", SharingClass::Unshared)
                .await,
            Some(vlan(2))
        );
        let verifier = StoreVerifier::new(&h.repo);
        verifier.assert_allocation(TOR1_MGMT, "net1", 2).await.unwrap();

        // The surviving row is reused, not duplicated.
        assert_eq!(h.assign("net1", "compute1", "p2").await.unwrap().vlan_id, vlan(2));
        verifier.assert_allocation(TOR1_MGMT, "net1", 2).await.unwrap();
        assert_eq!(h.assign("net2", "compute1", "p3").await.unwrap().vlan_id, vlan(3));
    }

    #[tokio::test]
    async fn test_release_unknown_port() {
        let h = harness();
        assert!(matches!(
            h.mgr.release("p404").await,
            Err(FabricError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_released_vlan_is_reused_first() {
        let h = harness();
        for (net, vni) in [("net1", 5001), ("net2", 5002), ("net3", 5003)] {
            h.network(network_fixtures::unshared(net, vni)).await;
        }
        h.port("p1", "net1", "compute1").await;
        h.port("p2", "net2", "compute1").await;
        h.port("p3", "net3", "compute1").await;

        assert_eq!(h.assign("net1", "compute1", "p1").await.unwrap().vlan_id, vlan(2));
        assert_eq!(h.assign("net2", "compute1", "p2").await.unwrap().vlan_id, vlan(3));
        h.mgr.release("p1").await.unwrap();
        assert_eq!(h.assign("net3", "compute1", "p3").await.unwrap().vlan_id, vlan(2));
    }

    #[tokio::test]
    async fn test_restore_replays_allocations() {
        let h = harness();
        h.repo
            .insert(&switch_fixtures::tor(TOR1_MGMT, TOR1_SRC))
            .await
            .unwrap();
        for (net, id, class) in [
            ("net1", 2, SharingClass::Unshared),
            ("net2", 4002, SharingClass::Shared),
            ("bad", 4050, SharingClass::Unshared),
        ] {
            h.repo
                .insert(&VlanAllocation {
                    network_id: net.to_string(),
                    switch: TOR1_MGMT.to_string(),
                    sharing: class,
                    vlan_id: vlan(id),
                    allocated: true,
                })
                .await
                .unwrap();
        }

        assert_eq!(h.mgr.restore().await.unwrap(), 2);
        assert_eq!(h.mgr.known_switches(), vec![TOR1_MGMT.to_string()]);
        assert_eq!(
            h.mgr.cached_vlan(TOR1_MGMT, "net2", SharingClass::Shared).await,
            Some(vlan(4002))
        );
        assert!(h.mgr.is_held(TOR1_MGMT, SharingClass::Unshared, vlan(2)).await);
    }

    #[tokio::test]
    async fn test_reconcile_removes_orphans() {
        let h = harness();
        h.network(network_fixtures::unshared("net1", 5001)).await;
        h.network(network_fixtures::unshared("net2", 5002)).await;
        h.port("p1", "net1", "compute1").await;
        h.port("p2", "net2", "compute1").await;
        h.assign("net1", "compute1", "p1").await.unwrap();
        h.assign("net2", "compute1", "p2").await.unwrap();

        // Simulate a crash between mapping removal and allocation cleanup
        h.repo
            .delete::<PortVlanMapping>(&field_values! { mapping_fields::PORT_ID => "p1" })
            .await
            .unwrap();

        let report = h.mgr.reconcile().await.unwrap();
        assert_eq!(report.orphans_removed, 1);
        assert_eq!(report.allocations, 1);

        let verifier = StoreVerifier::new(&h.repo);
        verifier.assert_no_allocation(TOR1_MGMT, "net1").await.unwrap();
        verifier.assert_vsi(TOR1_MGMT, 5001, false).await.unwrap();
        verifier.assert_allocation(TOR1_MGMT, "net2", 3).await.unwrap();
        assert!(!h.mgr.is_held(TOR1_MGMT, SharingClass::Unshared, vlan(2)).await);
        assert!(h.mgr.is_held(TOR1_MGMT, SharingClass::Unshared, vlan(3)).await);
    }
}
