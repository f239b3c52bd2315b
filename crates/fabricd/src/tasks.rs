//! Long-running background tasks of fabricd
//!
//! Every task runs until the shared [`CancellationToken`] is cancelled.
//! Failures inside a cycle are logged and the task carries on with its
//! next cycle.

use std::sync::Arc;
use std::time::Duration;

use fabric_common::{Repository, Switch};
use fabric_topology::{RefreshReport, TopologyAggregator};
use tokio::sync::{mpsc, Notify};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::MetricsCollector;
use crate::tunnel_mgr::TunnelMgr;
use crate::vlan_mgr::VlanMgr;

/// Polls every registered switch once and installs the result.
pub async fn refresh_topology(
    aggregator: &TopologyAggregator,
    repo: &Repository,
    metrics: &MetricsCollector,
) -> Option<RefreshReport> {
    let switches: Vec<String> = match repo.all::<Switch>().await {
        Ok(rows) => rows.into_iter().map(|s| s.mgmt_ip).collect(),
        Err(e) => {
            warn!(error = %e, "Failed to read switch registry, skipping topology refresh");
            return None;
        }
    };
    let report = aggregator.refresh_all(&switches).await;
    metrics.record_topology_refresh(report.failed.len(), report.adjacency);
    Some(report)
}

/// Owns topology refresh: on every tick and on every refresh request.
///
/// A request arriving during a refresh is served by one more refresh right
/// after it; refreshes never overlap.
pub async fn run_topology_loop(
    aggregator: Arc<TopologyAggregator>,
    repo: Repository,
    metrics: MetricsCollector,
    refresh: Arc<Notify>,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(period_secs = period.as_secs(), "Topology owner started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Topology owner stopping");
                break;
            }
            _ = ticker.tick() => {
                debug!("Periodic topology refresh");
                refresh_topology(&aggregator, &repo, &metrics).await;
            }
            _ = refresh.notified() => {
                info!("Topology refresh requested");
                refresh_topology(&aggregator, &repo, &metrics).await;
                ticker.reset();
            }
        }
    }
}

/// Runs the ensure sweep whenever a tunnel mesh build completes.
pub async fn run_mesh_completion_loop(
    tunnels: TunnelMgr,
    mut completions: mpsc::Receiver<String>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Mesh completion listener stopping");
                break;
            }
            completed = completions.recv() => {
                let Some(first) = completed else {
                    debug!("Mesh completion channel closed");
                    break;
                };
                // One sweep covers every completion queued so far
                let mut switches = vec![first];
                while let Ok(more) = completions.try_recv() {
                    switches.push(more);
                }
                info!(switches = ?switches, "Tunnel mesh complete, ensuring switch configuration");
                if let Err(e) = tunnels.ensure_all().await {
                    warn!(error = %e, "Ensure sweep failed");
                }
            }
        }
    }
}

/// Periodically removes orphaned allocations; `None` disables the sweep.
pub async fn run_reconcile_loop(
    vlans: Arc<VlanMgr>,
    period: Option<Duration>,
    shutdown: CancellationToken,
) {
    let Some(period) = period else {
        info!("Reconciliation sweep disabled");
        return;
    };
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Reconciliation sweep stopping");
                break;
            }
            _ = ticker.tick() => {
                if let Err(e) = vlans.reconcile().await {
                    warn!(error = %e, "Reconciliation sweep failed");
                }
            }
        }
    }
}

/// Pings the entity store; `None` disables the keepalive.
pub async fn run_store_keepalive(
    repo: Repository,
    period: Option<Duration>,
    shutdown: CancellationToken,
) {
    let Some(period) = period else {
        return;
    };
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                match repo.ping().await {
                    Ok(()) => debug!("Store keepalive ok"),
                    Err(e) => warn!(error = %e, "Store keepalive failed"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pusher::DevicePusher;
    use crate::types::VlanRanges;
    use fabric_common::tables::allocation_fields;
    use fabric_common::{field_values, VlanAllocation};
    use fabric_test::{
        switch_fixtures, LldpFixture, RecordingTransport, StaticWalker, TOR1_MGMT, TOR1_SRC,
    };
    use fabric_topology::{LldpReader, WalkConfig};
    use fabric_types::{SharingClass, VlanId};

    fn aggregator_with(walker: Arc<StaticWalker>) -> Arc<TopologyAggregator> {
        Arc::new(TopologyAggregator::new(LldpReader::with_defaults(
            walker,
            WalkConfig::default(),
        )))
    }

    #[tokio::test]
    async fn test_refresh_topology_reads_registry() {
        let walker = Arc::new(StaticWalker::new());
        walker.set(
            TOR1_MGMT,
            LldpFixture::switch("tor1").port(1, "eth0").host(1, "compute1"),
        );
        let repo = Repository::in_memory();
        repo.insert(&switch_fixtures::tor(TOR1_MGMT, TOR1_SRC))
            .await
            .unwrap();
        let aggregator = aggregator_with(walker);
        let metrics = MetricsCollector::new().unwrap();

        let report = refresh_topology(&aggregator, &repo, &metrics).await.unwrap();
        assert_eq!(report.polled, 1);
        assert_eq!(aggregator.snapshot().uplink_for("compute1"), Some(TOR1_MGMT));
        assert!(metrics.gather_metrics().contains("fabric_adjacency_records 1"));
    }

    #[tokio::test]
    async fn test_topology_loop_serves_requests_and_stops() {
        let walker = Arc::new(StaticWalker::new());
        walker.set(
            TOR1_MGMT,
            LldpFixture::switch("tor1").port(1, "eth0").host(1, "compute1"),
        );
        let repo = Repository::in_memory();
        repo.insert(&switch_fixtures::tor(TOR1_MGMT, TOR1_SRC))
            .await
            .unwrap();
        let aggregator = aggregator_with(walker.clone());
        let refresh = Arc::new(Notify::new());
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(run_topology_loop(
            aggregator.clone(),
            repo,
            MetricsCollector::new().unwrap(),
            refresh.clone(),
            Duration::from_secs(3600),
            shutdown.clone(),
        ));
        refresh.notify_one();

        tokio::time::timeout(Duration::from_secs(5), async {
            while aggregator.snapshot().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(walker.walks(), 2);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_mesh_completion_runs_ensure() {
        let repo = Repository::in_memory();
        repo.insert(&switch_fixtures::tor(TOR1_MGMT, TOR1_SRC))
            .await
            .unwrap();
        let transport = Arc::new(RecordingTransport::new());
        let metrics = MetricsCollector::new().unwrap();
        let pusher = DevicePusher::new(transport.clone(), metrics.clone());
        let (tx, rx) = mpsc::channel(4);
        let tunnels = TunnelMgr::new(
            repo,
            pusher,
            metrics,
            "h3c",
            Arc::new(Notify::new()),
            tx.clone(),
        );
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_mesh_completion_loop(tunnels, rx, shutdown.clone()));

        tx.send(TOR1_MGMT.to_string()).await.unwrap();
        let ensures = transport.wait_for("/ensure", 1).await.unwrap();
        assert_eq!(ensures[0].mgr, TOR1_MGMT);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_loop_sweeps_on_schedule() {
        let repo = Repository::in_memory();
        repo.insert(&VlanAllocation {
            network_id: "net1".to_string(),
            switch: TOR1_MGMT.to_string(),
            sharing: SharingClass::Unshared,
            vlan_id: VlanId::new(2).unwrap(),
            allocated: true,
        })
        .await
        .unwrap();
        let metrics = MetricsCollector::new().unwrap();
        let vlans = Arc::new(VlanMgr::new(
            repo.clone(),
            aggregator_with(Arc::new(StaticWalker::new())),
            DevicePusher::new(Arc::new(RecordingTransport::new()), metrics.clone()),
            VlanRanges::default(),
            "h3c",
            metrics,
        ));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_reconcile_loop(
            vlans,
            Some(Duration::from_secs(300)),
            shutdown.clone(),
        ));

        let filter = field_values! { allocation_fields::NETWORK_ID => "net1" };
        tokio::time::sleep(Duration::from_secs(299)).await;
        assert_eq!(repo.count::<VlanAllocation>(&filter).await.unwrap(), 1);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(repo.count::<VlanAllocation>(&filter).await.unwrap(), 0);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_disabled_loops_return_immediately() {
        let shutdown = CancellationToken::new();
        run_store_keepalive(Repository::in_memory(), None, shutdown.clone()).await;
        let metrics = MetricsCollector::new().unwrap();
        let vlans = Arc::new(VlanMgr::new(
            Repository::in_memory(),
            aggregator_with(Arc::new(StaticWalker::new())),
            DevicePusher::new(Arc::new(RecordingTransport::new()), metrics.clone()),
            VlanRanges::default(),
            "h3c",
            metrics,
        ));
        run_reconcile_loop(vlans, None, shutdown).await;
    }
}
