//! Tunnel Manager - switch registration and VXLAN tunnel mesh
//!
//! Registering a switch persists it, wakes the topology owner and builds
//! tunnels in both directions between the new switch and every peer. When
//! a mesh build finishes the switch address is sent on the completion
//! channel, whose listener runs [`TunnelMgr::ensure_all`].

use std::collections::BTreeSet;
use std::sync::Arc;

use fabric_common::tables::{tunnel_fields, vsi_fields};
use fabric_common::{field_values, FabricResult, Repository, Switch, SwitchTunnel, SwitchVsi};
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, info, instrument, warn};

use crate::commands::{
    build_create_tunnel, build_ensure, build_tunnel_sync, parse_tunnel_id, parse_tunnel_peers,
};
use crate::metrics::MetricsCollector;
use crate::pusher::DevicePusher;
use crate::types::RegisterRequest;

/// Sorted tunnel ids created on `switch`.
pub(crate) async fn tunnel_ids_of(repo: &Repository, switch: &str) -> FabricResult<Vec<u32>> {
    let tunnels: Vec<SwitchTunnel> = repo
        .find(&field_values! { tunnel_fields::SWITCH => switch })
        .await?;
    let ids: BTreeSet<u32> = tunnels.into_iter().map(|t| t.tunnel_id).collect();
    Ok(ids.into_iter().collect())
}

/// Sorted VNIs `switch` must carry.
pub(crate) async fn vxlans_of(repo: &Repository, switch: &str) -> FabricResult<Vec<u32>> {
    let vsis: Vec<SwitchVsi> = repo
        .find(&field_values! { vsi_fields::SWITCH => switch })
        .await?;
    let vnis: BTreeSet<u32> = vsis.into_iter().map(|v| v.vxlan.as_u32()).collect();
    Ok(vnis.into_iter().collect())
}

/// Device type recorded for `switch`, or `fallback`.
pub(crate) async fn device_type_of(repo: &Repository, switch: &str, fallback: &str) -> String {
    match repo.get::<Switch>(switch).await {
        Ok(Some(s)) if !s.device_type.is_empty() => s.device_type,
        Ok(_) => fallback.to_string(),
        Err(e) => {
            warn!(switch = %switch, error = %e, "Failed to read switch record");
            fallback.to_string()
        }
    }
}

/// Tunnel Manager
#[derive(Clone)]
pub struct TunnelMgr {
    repo: Repository,
    pusher: DevicePusher,
    metrics: MetricsCollector,
    default_device_type: String,

    /// Wakes the topology owner
    refresh: Arc<Notify>,

    /// Switch addresses whose mesh build finished
    mesh_done: mpsc::Sender<String>,

    /// Held while a registration reads its peers and persists the switch
    registration: Arc<Mutex<()>>,

    /// Held across the lookup, agent call and insert of one tunnel
    tunnel_creation: Arc<Mutex<()>>,
}

impl TunnelMgr {
    pub fn new(
        repo: Repository,
        pusher: DevicePusher,
        metrics: MetricsCollector,
        default_device_type: impl Into<String>,
        refresh: Arc<Notify>,
        mesh_done: mpsc::Sender<String>,
    ) -> Self {
        Self {
            repo,
            pusher,
            metrics,
            default_device_type: default_device_type.into(),
            refresh,
            mesh_done,
            registration: Arc::new(Mutex::new(())),
            tunnel_creation: Arc::new(Mutex::new(())),
        }
    }

    /// Registers a switch and starts building its tunnel mesh.
    ///
    /// Registering a known switch updates its record and builds only the
    /// tunnels still missing.
    #[instrument(skip(self), fields(switch = %request.mgr))]
    pub async fn register(&self, request: &RegisterRequest) -> FabricResult<Switch> {
        request.validate()?;

        // Of two concurrent registrations the later one sees the earlier as a peer.
        let registration = self.registration.lock().await;
        let peers: Vec<Switch> = self
            .repo
            .all::<Switch>()
            .await?
            .into_iter()
            .filter(|s| s.mgmt_ip != request.mgr)
            .collect();

        let switch = Switch {
            mgmt_ip: request.mgr.clone(),
            tunnel_src_ip: request.tunnel_src.clone(),
            device_type: request.switch_type.clone(),
        };
        if self.repo.exists::<Switch>(&switch.mgmt_ip).await? {
            info!(tunnel_src = %switch.tunnel_src_ip, "Re-registering switch");
        } else {
            info!(tunnel_src = %switch.tunnel_src_ip, peers = peers.len(), "Registering switch");
        }
        self.repo.insert(&switch).await?;
        drop(registration);

        self.refresh.notify_one();

        let mgr = self.clone();
        let new_switch = switch.clone();
        self.pusher.spawn(async move {
            mgr.build_mesh(&new_switch, &peers).await;
        });

        Ok(switch)
    }

    /// Creates tunnels from `switch` to every known peer endpoint and back.
    ///
    /// Peer endpoints are the tunnel peers the switch reports itself plus
    /// the tunnel sources of the registered `peers`. Returns the number of
    /// tunnels created.
    #[instrument(skip(self, switch, peers), fields(switch = %switch.mgmt_ip))]
    pub async fn build_mesh(&self, switch: &Switch, peers: &[Switch]) -> usize {
        let sync = build_tunnel_sync(&switch.mgmt_ip, &switch.tunnel_src_ip);
        let reported = match self.pusher.send(&sync).await {
            Some(reply) => parse_tunnel_peers(&reply),
            None => Vec::new(),
        };
        debug!(reported = ?reported, "Tunnel sync reply");

        let mut targets: BTreeSet<String> = reported.into_iter().collect();
        targets.extend(peers.iter().map(|p| p.tunnel_src_ip.clone()));
        targets.remove(&switch.tunnel_src_ip);

        let mut created = 0;
        for dst in &targets {
            if self.create_tunnel(switch, dst).await {
                created += 1;
            }
        }
        for peer in peers {
            if peer.tunnel_src_ip == switch.tunnel_src_ip {
                continue;
            }
            if self.create_tunnel(peer, &switch.tunnel_src_ip).await {
                created += 1;
            }
        }

        info!(created, targets = targets.len(), "Tunnel mesh build complete");
        if self.mesh_done.send(switch.mgmt_ip.clone()).await.is_err() {
            debug!("Mesh completion listener has stopped");
        }
        created
    }

    async fn create_tunnel(&self, on: &Switch, dst: &str) -> bool {
        let filter = field_values! {
            tunnel_fields::SWITCH => on.mgmt_ip,
            tunnel_fields::DST_ADDR => dst,
        };
        let _creating = self.tunnel_creation.lock().await;
        match self.repo.count::<SwitchTunnel>(&filter).await {
            Ok(0) => {}
            Ok(_) => {
                debug!(switch = %on.mgmt_ip, dst = %dst, "Tunnel already exists");
                return false;
            }
            Err(e) => {
                warn!(switch = %on.mgmt_ip, dst = %dst, error = %e, "Failed to look up tunnel");
                return false;
            }
        }

        let device_type = if on.device_type.is_empty() {
            self.default_device_type.as_str()
        } else {
            on.device_type.as_str()
        };
        let cmd = build_create_tunnel(device_type, &on.mgmt_ip, &on.tunnel_src_ip, dst);
        let Some(reply) = self.pusher.send(&cmd).await else {
            return false;
        };
        let Some(tunnel_id) = parse_tunnel_id(&reply) else {
            warn!(switch = %on.mgmt_ip, dst = %dst, reply = %reply, "Agent returned no tunnel id");
            return false;
        };

        let tunnel = SwitchTunnel {
            switch: on.mgmt_ip.clone(),
            tunnel_id,
            dst_addr: dst.to_string(),
        };
        if let Err(e) = self.repo.insert(&tunnel).await {
            warn!(switch = %on.mgmt_ip, tunnel_id, error = %e, "Failed to persist tunnel");
            return false;
        }
        self.metrics.record_tunnel_created();
        info!(
            switch = %on.mgmt_ip,
            src = %on.tunnel_src_ip,
            dst = %dst,
            tunnel_id,
            "Created VXLAN tunnel"
        );
        true
    }

    /// Pushes every switch its complete VNI and tunnel sets. Returns the
    /// number of switches whose agent accepted the push.
    #[instrument(skip(self))]
    pub async fn ensure_all(&self) -> FabricResult<usize> {
        let switches: Vec<Switch> = self.repo.all().await?;
        let mut accepted = 0;
        for switch in &switches {
            let vxlans = vxlans_of(&self.repo, &switch.mgmt_ip).await?;
            let tunnels = tunnel_ids_of(&self.repo, &switch.mgmt_ip).await?;
            let device_type = if switch.device_type.is_empty() {
                self.default_device_type.as_str()
            } else {
                switch.device_type.as_str()
            };
            debug!(
                switch = %switch.mgmt_ip,
                vxlans = ?vxlans,
                tunnels = ?tunnels,
                "Ensuring switch configuration"
            );
            let cmd = build_ensure(device_type, &switch.mgmt_ip, &vxlans, &tunnels);
            if self.pusher.send(&cmd).await.is_some() {
                accepted += 1;
            }
        }
        info!(switches = switches.len(), accepted, "Ensure sweep complete");
        Ok(accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_test::{
        switch_fixtures, RecordingTransport, StoreVerifier, TOR1_MGMT, TOR1_SRC, TOR2_MGMT,
        TOR2_SRC,
    };
    use fabric_types::Vni;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct Harness {
        repo: Repository,
        transport: Arc<RecordingTransport>,
        pusher: DevicePusher,
        refresh: Arc<Notify>,
        done_rx: mpsc::Receiver<String>,
        mgr: TunnelMgr,
    }

    fn harness() -> Harness {
        let repo = Repository::in_memory();
        let transport = Arc::new(RecordingTransport::new());
        let metrics = MetricsCollector::new().unwrap();
        let pusher = DevicePusher::new(transport.clone(), metrics.clone());
        let refresh = Arc::new(Notify::new());
        let (done_tx, done_rx) = mpsc::channel(8);
        let mgr = TunnelMgr::new(
            repo.clone(),
            pusher.clone(),
            metrics,
            "h3c",
            refresh.clone(),
            done_tx,
        );
        Harness {
            repo,
            transport,
            pusher,
            refresh,
            done_rx,
            mgr,
        }
    }

    #[tokio::test]
    async fn test_first_switch_has_no_tunnels() {
        let mut h = harness();
        let switch = h
            .mgr
            .register(&RegisterRequest::new("h3c", TOR1_MGMT, TOR1_SRC))
            .await
            .unwrap();
        assert_eq!(switch.tunnel_src_ip, TOR1_SRC);

        assert_eq!(h.done_rx.recv().await.as_deref(), Some(TOR1_MGMT));
        h.pusher.flush().await;
        assert_eq!(h.transport.sent_to("/tsync").len(), 1);
        assert!(h.transport.sent_to("/tunnel").is_empty());
        assert!(h.repo.exists::<Switch>(TOR1_MGMT).await.unwrap());
    }

    #[tokio::test]
    async fn test_registration_wakes_topology_owner() {
        let h = harness();
        h.mgr
            .register(&RegisterRequest::new("h3c", TOR1_MGMT, TOR1_SRC))
            .await
            .unwrap();
        // notify_one stores a permit when nobody is waiting yet
        tokio::time::timeout(std::time::Duration::from_secs(1), h.refresh.notified())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_second_switch_builds_both_directions() {
        let mut h = harness();
        h.repo
            .insert(&switch_fixtures::tor(TOR1_MGMT, TOR1_SRC))
            .await
            .unwrap();
        h.transport.set_tunnel_peers(TOR2_SRC, &[TOR1_SRC, TOR2_SRC]);

        h.mgr
            .register(&RegisterRequest::new("h3c", TOR2_MGMT, TOR2_SRC))
            .await
            .unwrap();
        assert_eq!(h.done_rx.recv().await.as_deref(), Some(TOR2_MGMT));

        let verifier = StoreVerifier::new(&h.repo);
        verifier.assert_tunnel(TOR2_MGMT, TOR1_SRC).await.unwrap();
        verifier.assert_tunnel(TOR1_MGMT, TOR2_SRC).await.unwrap();
        verifier.assert_tunnel_count(2).await.unwrap();

        let creates = h.transport.sent_to("/tunnel");
        assert_eq!(
            creates[0].payload,
            json!({"type": "h3c", "mgr": TOR2_MGMT, "src": TOR2_SRC, "dst": TOR1_SRC})
        );
        assert_eq!(
            creates[1].payload,
            json!({"type": "h3c", "mgr": TOR1_MGMT, "src": TOR1_SRC, "dst": TOR2_SRC})
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registrations_connect_both_switches() {
        let h = harness();
        let first = tokio::spawn({
            let mgr = h.mgr.clone();
            async move {
                mgr.register(&RegisterRequest::new("h3c", TOR1_MGMT, TOR1_SRC))
                    .await
            }
        });
        let second = tokio::spawn({
            let mgr = h.mgr.clone();
            async move {
                mgr.register(&RegisterRequest::new("h3c", TOR2_MGMT, TOR2_SRC))
                    .await
            }
        });
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();
        h.pusher.flush().await;

        let verifier = StoreVerifier::new(&h.repo);
        verifier.assert_tunnel(TOR1_MGMT, TOR2_SRC).await.unwrap();
        verifier.assert_tunnel(TOR2_MGMT, TOR1_SRC).await.unwrap();
        verifier.assert_tunnel_count(2).await.unwrap();
        assert_eq!(h.transport.sent_to("/tunnel").len(), 2);
    }

    #[tokio::test]
    async fn test_reregistration_skips_existing_tunnels() {
        let h = harness();
        let tor1 = switch_fixtures::tor(TOR1_MGMT, TOR1_SRC);
        let tor2 = switch_fixtures::tor(TOR2_MGMT, TOR2_SRC);
        h.repo.insert(&tor1).await.unwrap();
        h.repo.insert(&tor2).await.unwrap();

        assert_eq!(h.mgr.build_mesh(&tor2, &[tor1.clone()]).await, 2);
        assert_eq!(h.mgr.build_mesh(&tor2, &[tor1]).await, 0);
        StoreVerifier::new(&h.repo)
            .assert_tunnel_count(2)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_skipped() {
        let h = harness();
        let tor1 = switch_fixtures::tor(TOR1_MGMT, TOR1_SRC);
        let tor2 = switch_fixtures::tor(TOR2_MGMT, TOR2_SRC);
        h.transport.set_unreachable(TOR1_MGMT);

        assert_eq!(h.mgr.build_mesh(&tor2, &[tor1]).await, 1);
        let verifier = StoreVerifier::new(&h.repo);
        verifier.assert_tunnel(TOR2_MGMT, TOR1_SRC).await.unwrap();
        verifier.assert_tunnel_count(1).await.unwrap();
    }

    #[tokio::test]
    async fn test_register_rejects_bad_request() {
        let h = harness();
        assert!(h
            .mgr
            .register(&RegisterRequest::new("h3c", TOR1_MGMT, ""))
            .await
            .is_err());
        assert!(h.repo.all::<Switch>().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ensure_all_pushes_full_state() {
        let h = harness();
        h.repo
            .insert(&switch_fixtures::tor(TOR1_MGMT, TOR1_SRC))
            .await
            .unwrap();
        h.repo
            .insert(&switch_fixtures::tor(TOR2_MGMT, TOR2_SRC))
            .await
            .unwrap();
        for vni in [5002, 5001] {
            h.repo
                .insert(&SwitchVsi {
                    switch: TOR1_MGMT.to_string(),
                    vxlan: Vni::new(vni).unwrap(),
                })
                .await
                .unwrap();
        }
        h.repo
            .insert(&SwitchTunnel {
                switch: TOR1_MGMT.to_string(),
                tunnel_id: 4,
                dst_addr: TOR2_SRC.to_string(),
            })
            .await
            .unwrap();

        assert_eq!(h.mgr.ensure_all().await.unwrap(), 2);
        let ensures = h.transport.sent_to("/ensure");
        assert_eq!(ensures.len(), 2);
        let tor1 = ensures.iter().find(|c| c.mgr == TOR1_MGMT).unwrap();
        assert_eq!(
            tor1.payload,
            json!({"type": "h3c", "mgr": TOR1_MGMT, "vxlans": [5001, 5002], "tunnels": [4]})
        );
        let tor2 = ensures.iter().find(|c| c.mgr == TOR2_MGMT).unwrap();
        assert_eq!(tor2.payload["vxlans"], json!([]));
    }
}
