//! Fabric daemon assembly
//!
//! [`Fabric`] wires the store, topology aggregator, orchestrators and
//! background tasks together and owns their shutdown.

use std::sync::Arc;

use fabric_common::{DeviceTransport, EntityStore, FabricError, FabricResult, Repository, Switch};
use fabric_topology::{LldpReader, SnmpWalker, TopologyAggregator};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use crate::config::FabricConfig;
use crate::metrics::MetricsCollector;
use crate::provision::ProvisionMgr;
use crate::pusher::DevicePusher;
use crate::tasks;
use crate::tunnel_mgr::TunnelMgr;
use crate::types::RegisterRequest;
use crate::vlan_mgr::VlanMgr;

/// Capacity of the mesh completion channel.
const MESH_COMPLETION_CAPACITY: usize = 64;

pub struct Fabric {
    config: FabricConfig,
    repo: Repository,
    topology: Arc<TopologyAggregator>,
    vlans: Arc<VlanMgr>,
    tunnels: TunnelMgr,
    provision: ProvisionMgr,
    pusher: DevicePusher,
    metrics: MetricsCollector,
    refresh: Arc<Notify>,
    mesh_completions: Mutex<Option<mpsc::Receiver<String>>>,
    background: TaskTracker,
    shutdown: CancellationToken,
}

impl Fabric {
    pub fn new(
        config: FabricConfig,
        store: Arc<dyn EntityStore>,
        walker: Arc<dyn SnmpWalker>,
        transport: Arc<dyn DeviceTransport>,
    ) -> FabricResult<Self> {
        let metrics = MetricsCollector::new()
            .map_err(|e| FabricError::invalid_config("metrics", e.to_string()))?;
        let repo = Repository::new(store);
        let pusher = DevicePusher::new(transport, metrics.clone());

        let reader = LldpReader::new(
            walker,
            config.walk_config(),
            config.topology.host_os_markers.clone(),
        );
        let topology = Arc::new(TopologyAggregator::new(reader));

        let refresh = Arc::new(Notify::new());
        let (mesh_tx, mesh_rx) = mpsc::channel(MESH_COMPLETION_CAPACITY);

        let vlans = Arc::new(VlanMgr::new(
            repo.clone(),
            topology.clone(),
            pusher.clone(),
            config.vlan_ranges(),
            config.device.default_device_type.clone(),
            metrics.clone(),
        ));
        let tunnels = TunnelMgr::new(
            repo.clone(),
            pusher.clone(),
            metrics.clone(),
            config.device.default_device_type.clone(),
            refresh.clone(),
            mesh_tx,
        );

        Ok(Self {
            config,
            provision: ProvisionMgr::new(repo.clone()),
            repo,
            topology,
            vlans,
            tunnels,
            pusher,
            metrics,
            refresh,
            mesh_completions: Mutex::new(Some(mesh_rx)),
            background: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &FabricConfig {
        &self.config
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    pub fn topology(&self) -> &Arc<TopologyAggregator> {
        &self.topology
    }

    pub fn vlans(&self) -> &VlanMgr {
        &self.vlans
    }

    pub fn tunnels(&self) -> &TunnelMgr {
        &self.tunnels
    }

    pub fn provision(&self) -> &ProvisionMgr {
        &self.provision
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn pusher(&self) -> &DevicePusher {
        &self.pusher
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Wakes the topology owner.
    pub fn request_refresh(&self) {
        self.refresh.notify_one();
    }

    /// Registers a switch, creates its VLAN state and starts its tunnel mesh.
    pub async fn register(&self, request: &RegisterRequest) -> FabricResult<Switch> {
        let switch = self.tunnels.register(request).await?;
        self.vlans.ensure_switch(&switch.mgmt_ip);
        Ok(switch)
    }

    /// Restores VLAN state, spawns the background tasks and requests the
    /// first topology refresh. Returns the number of allocations restored.
    pub async fn start(&self) -> FabricResult<usize> {
        let restored = self.vlans.restore().await?;

        let Some(completions) = self.mesh_completions.lock().await.take() else {
            return Err(FabricError::invalid_config("fabric", "already started"));
        };

        self.background.spawn(tasks::run_topology_loop(
            self.topology.clone(),
            self.repo.clone(),
            self.metrics.clone(),
            self.refresh.clone(),
            self.config.refresh_interval(),
            self.shutdown.clone(),
        ));
        self.background.spawn(tasks::run_mesh_completion_loop(
            self.tunnels.clone(),
            completions,
            self.shutdown.clone(),
        ));
        self.background.spawn(tasks::run_reconcile_loop(
            self.vlans.clone(),
            self.config.reconcile_interval(),
            self.shutdown.clone(),
        ));
        self.background.spawn(tasks::run_store_keepalive(
            self.repo.clone(),
            self.config.keepalive_interval(),
            self.shutdown.clone(),
        ));

        self.request_refresh();
        info!(restored, "Fabric started");
        Ok(restored)
    }

    /// Stops the background tasks and waits for in-flight device pushes.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.background.close();
        self.background.wait().await;
        self.pusher.flush().await;
        info!("Fabric stopped");
    }
}
