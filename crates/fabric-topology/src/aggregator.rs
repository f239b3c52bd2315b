//! Fabric-wide topology aggregate.
//!
//! [`TopologyAggregator::refresh_all`] polls every switch in turn and swaps
//! in a new [`TopologySnapshot`]. A switch whose poll fails keeps the rows
//! of its last successful poll. Readers take an `Arc` of the current
//! snapshot and never block a refresh.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::lldp::{Adjacency, LldpReader};

/// Adjacency of the whole fabric at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TopologySnapshot {
    /// Adjacency rows by polled switch address.
    #[serde(rename = "topology")]
    pub adjacency: BTreeMap<String, Vec<Adjacency>>,
    /// Host names by polled switch address.
    #[serde(rename = "topology_simple")]
    pub hosts: BTreeMap<String, Vec<String>>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl TopologySnapshot {
    /// Builds a snapshot from per-switch adjacency rows.
    pub fn from_adjacency(adjacency: BTreeMap<String, Vec<Adjacency>>) -> Self {
        let hosts = adjacency
            .iter()
            .map(|(switch, rows)| {
                let mut names: Vec<String> = Vec::with_capacity(rows.len());
                for row in rows {
                    if !names.contains(&row.neighbor_host) {
                        names.push(row.neighbor_host.clone());
                    }
                }
                (switch.clone(), names)
            })
            .collect();
        Self {
            adjacency,
            hosts,
            refreshed_at: Some(Utc::now()),
        }
    }

    /// The switch a host is attached to. The first switch in address order
    /// wins if a host is seen behind several.
    pub fn uplink_for(&self, host: &str) -> Option<&str> {
        self.hosts
            .iter()
            .find(|(_, hosts)| hosts.iter().any(|h| h == host))
            .map(|(switch, _)| switch.as_str())
    }

    /// Local interface index of `host` on `switch`.
    pub fn interface_index(&self, host: &str, switch: &str) -> Option<u32> {
        self.adjacency
            .get(switch)?
            .iter()
            .find(|row| row.neighbor_host == host)
            .map(|row| row.local_interface_index)
    }

    /// Total adjacency rows across the fabric.
    pub fn len(&self) -> usize {
        self.adjacency.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of one refresh pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub polled: usize,
    pub failed: Vec<String>,
    pub adjacency: usize,
}

/// Owns the current topology snapshot.
pub struct TopologyAggregator {
    reader: LldpReader,
    current: RwLock<Arc<TopologySnapshot>>,
}

impl TopologyAggregator {
    pub fn new(reader: LldpReader) -> Self {
        Self {
            reader,
            current: RwLock::new(Arc::new(TopologySnapshot::default())),
        }
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<TopologySnapshot> {
        self.current.read().clone()
    }

    /// Replaces the snapshot wholesale.
    pub fn install(&self, snapshot: TopologySnapshot) {
        *self.current.write() = Arc::new(snapshot);
    }

    /// Polls `switches` sequentially and installs the merged result.
    #[instrument(skip(self, switches), fields(switches = switches.len()))]
    pub async fn refresh_all(&self, switches: &[String]) -> RefreshReport {
        let previous = self.snapshot();
        let mut adjacency = BTreeMap::new();
        let mut report = RefreshReport::default();

        for switch in switches {
            match self.reader.read_adjacency(switch).await {
                Ok(rows) => {
                    report.polled += 1;
                    adjacency.insert(switch.clone(), rows);
                }
                Err(e) => {
                    warn!(switch = %switch, error = %e, "Topology poll failed, keeping previous data");
                    report.failed.push(switch.clone());
                    if let Some(rows) = previous.adjacency.get(switch) {
                        adjacency.insert(switch.clone(), rows.clone());
                    }
                }
            }
        }

        let snapshot = TopologySnapshot::from_adjacency(adjacency);
        report.adjacency = snapshot.len();
        self.install(snapshot);

        info!(
            polled = report.polled,
            failed = report.failed.len(),
            adjacency = report.adjacency,
            "Topology refreshed"
        );
        report
    }
}
