//! Prometheus metrics collection for fabricd
//!
//! Exposed as Prometheus text on `GET /metrics`.

use prometheus::{Counter, Encoder, Gauge, Registry, TextEncoder};
use std::sync::Arc;

/// Prometheus metrics collector for fabricd
#[derive(Clone)]
pub struct MetricsCollector {
    // Counters
    vlan_allocations: Counter,
    vlan_releases: Counter,
    device_push_failures: Counter,
    tunnels_created: Counter,
    topology_refreshes: Counter,
    topology_poll_failures: Counter,

    // Gauges
    adjacency_records: Gauge,

    registry: Arc<Registry>,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let vlan_allocations = Counter::new(
            "fabric_vlan_allocations_total",
            "Local VLAN ids allocated from a switch bitmap",
        )?;
        registry.register(Box::new(vlan_allocations.clone()))?;

        let vlan_releases = Counter::new(
            "fabric_vlan_releases_total",
            "Local VLAN ids returned to a switch bitmap",
        )?;
        registry.register(Box::new(vlan_releases.clone()))?;

        let device_push_failures = Counter::new(
            "fabric_device_push_failures_total",
            "Device agent commands that failed",
        )?;
        registry.register(Box::new(device_push_failures.clone()))?;

        let tunnels_created = Counter::new(
            "fabric_tunnels_created_total",
            "VXLAN tunnels created and persisted",
        )?;
        registry.register(Box::new(tunnels_created.clone()))?;

        let topology_refreshes = Counter::new(
            "fabric_topology_refresh_total",
            "Completed topology refresh cycles",
        )?;
        registry.register(Box::new(topology_refreshes.clone()))?;

        let topology_poll_failures = Counter::new(
            "fabric_topology_poll_failures_total",
            "Switch polls that failed during topology refresh",
        )?;
        registry.register(Box::new(topology_poll_failures.clone()))?;

        let adjacency_records = Gauge::new(
            "fabric_adjacency_records",
            "Adjacency records in the current topology snapshot",
        )?;
        registry.register(Box::new(adjacency_records.clone()))?;

        Ok(Self {
            vlan_allocations,
            vlan_releases,
            device_push_failures,
            tunnels_created,
            topology_refreshes,
            topology_poll_failures,
            adjacency_records,
            registry: Arc::new(registry),
        })
    }

    pub fn record_vlan_allocation(&self) {
        self.vlan_allocations.inc();
    }

    pub fn record_vlan_release(&self) {
        self.vlan_releases.inc();
    }

    pub fn record_push_failure(&self) {
        self.device_push_failures.inc();
    }

    pub fn record_tunnel_created(&self) {
        self.tunnels_created.inc();
    }

    /// Record one refresh cycle and its failed polls
    pub fn record_topology_refresh(&self, failed_polls: usize, adjacency: usize) {
        self.topology_refreshes.inc();
        self.topology_poll_failures.inc_by(failed_polls as f64);
        self.adjacency_records.set(adjacency as f64);
    }

    /// Gather metrics in Prometheus text format
    pub fn gather_metrics(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buf = vec![];
        encoder.encode(&self.registry.gather(), &mut buf).ok();
        String::from_utf8(buf).unwrap_or_else(|_| String::from("# Error encoding metrics\n"))
    }
}
