//! End-to-end tests of fabricd over an in-memory store, a scripted LLDP
//! walker and a recording device agent.

use std::sync::Arc;
use std::time::Duration;

use fabric_common::{DeviceMethod, EntityStore, MemoryStore, Network, Port};
use fabric_test::{
    network_fixtures, port_fixtures, LldpFixture, RecordingTransport, StaticWalker,
    StoreVerifier, TOR1_MGMT, TOR1_SRC, TOR2_MGMT, TOR2_SRC,
};
use fabricd::{AssignRequest, Fabric, FabricConfig, RegisterRequest};
use pretty_assertions::assert_eq;
use serde_json::json;

struct TestFabric {
    fabric: Fabric,
    store: Arc<MemoryStore>,
    walker: Arc<StaticWalker>,
    transport: Arc<RecordingTransport>,
}

impl TestFabric {
    fn new() -> Self {
        Self::over(Arc::new(MemoryStore::new()))
    }

    fn over(store: Arc<MemoryStore>) -> Self {
        let walker = Arc::new(StaticWalker::new());
        walker.set(
            TOR1_MGMT,
            LldpFixture::switch("tor1")
                .port(1, "eth0")
                .port(2, "eth1")
                .host(1, "compute1")
                .host(2, "compute2")
                .neighbor(3, "spine1", "SomeSwitchOS"),
        );
        walker.set(
            TOR2_MGMT,
            LldpFixture::switch("tor2").port(1, "eth0").host(1, "compute3"),
        );
        let transport = Arc::new(RecordingTransport::new());
        let fabric = Fabric::new(
            FabricConfig::default(),
            store.clone() as Arc<dyn EntityStore>,
            walker.clone(),
            transport.clone(),
        )
        .unwrap();
        Self {
            fabric,
            store,
            walker,
            transport,
        }
    }

    async fn register(&self, mgmt: &str, src: &str) {
        self.fabric
            .register(&RegisterRequest::new("h3c", mgmt, src))
            .await
            .unwrap();
    }

    async fn wait_for_host(&self, host: &str) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.fabric.topology().snapshot().uplink_for(host).is_none() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    async fn network(&self, network: Network) {
        self.fabric.provision().create_network(network).await.unwrap();
    }

    async fn port(&self, port: Port) {
        self.fabric.provision().create_port(port).await.unwrap();
    }

    async fn assign(&self, network: &str, host: &str, port: &str) -> u16 {
        self.fabric
            .vlans()
            .assign(&AssignRequest::new(network, host, port))
            .await
            .unwrap()
            .vlan_id
            .as_u16()
    }
}

#[tokio::test]
async fn test_allocation_scenario_reuses_lowest_free_vlan() {
    let t = TestFabric::new();
    t.register(TOR1_MGMT, TOR1_SRC).await;
    t.fabric.start().await.unwrap();
    t.wait_for_host("compute1").await;

    for (id, vni) in [("net1", 5001), ("net2", 5002), ("net3", 5003)] {
        t.network(network_fixtures::unshared(id, vni)).await;
    }
    t.port(port_fixtures::bound("p1", "net1", "compute1")).await;
    t.port(port_fixtures::bound("p2", "net2", "compute1")).await;
    t.port(port_fixtures::bound("p3", "net3", "compute1")).await;

    assert_eq!(t.assign("net1", "compute1", "p1").await, 2);
    assert_eq!(t.assign("net2", "compute1", "p2").await, 3);
    t.fabric.vlans().release("p1").await.unwrap();
    assert_eq!(t.assign("net3", "compute1", "p3").await, 2);

    t.fabric.pusher().flush().await;
    let verifier = StoreVerifier::new(t.fabric.repo());
    verifier.assert_no_allocation(TOR1_MGMT, "net1").await.unwrap();
    verifier.assert_allocation(TOR1_MGMT, "net2", 3).await.unwrap();
    verifier.assert_allocation(TOR1_MGMT, "net3", 2).await.unwrap();
    verifier.assert_vsi(TOR1_MGMT, 5001, false).await.unwrap();
    verifier.assert_vsi(TOR1_MGMT, 5003, true).await.unwrap();

    let maps = t.transport.sent_to("/vlan2vxlan");
    let mut posted: Vec<(u64, u64)> = maps
        .iter()
        .filter(|c| c.method == DeviceMethod::Post)
        .filter_map(|c| Some((c.payload["vxlan"].as_u64()?, c.payload["vlan"].as_u64()?)))
        .collect();
    posted.sort_unstable();
    assert_eq!(posted, vec![(5001, 2), (5002, 3), (5003, 2)]);
    let unmap = maps
        .iter()
        .find(|c| c.method == DeviceMethod::Delete)
        .unwrap();
    assert_eq!(unmap.payload["delete_on_index"], json!(false));
    assert_eq!(unmap.payload["index"], json!(1));

    t.fabric.shutdown().await;
}

#[tokio::test]
async fn test_shared_ports_count_references() {
    let t = TestFabric::new();
    t.register(TOR1_MGMT, TOR1_SRC).await;
    t.fabric.start().await.unwrap();
    t.wait_for_host("compute2").await;

    t.network(network_fixtures::unshared("net1", 5001)).await;
    t.port(port_fixtures::bound("p1", "net1", "compute1")).await;
    t.port(port_fixtures::bound("p2", "net1", "compute2")).await;

    assert_eq!(t.assign("net1", "compute1", "p1").await, 2);
    assert_eq!(t.assign("net1", "compute2", "p2").await, 2);

    let verifier = StoreVerifier::new(t.fabric.repo());
    verifier.assert_mapping_count(TOR1_MGMT, "net1", 2).await.unwrap();

    t.fabric.vlans().release("p1").await.unwrap();
    verifier.assert_allocation(TOR1_MGMT, "net1", 2).await.unwrap();
    verifier.assert_vsi(TOR1_MGMT, 5001, true).await.unwrap();

    t.fabric.vlans().release("p2").await.unwrap();
    verifier.assert_no_allocation(TOR1_MGMT, "net1").await.unwrap();
    verifier.assert_vsi(TOR1_MGMT, 5001, false).await.unwrap();

    t.fabric.pusher().flush().await;
    let mut flags: Vec<(u64, bool)> = t
        .transport
        .sent_to("/vlan2vxlan")
        .into_iter()
        .filter(|c| c.method == DeviceMethod::Delete)
        .filter_map(|c| {
            Some((
                c.payload["index"].as_u64()?,
                c.payload["delete_on_index"].as_bool()?,
            ))
        })
        .collect();
    flags.sort_unstable();
    assert_eq!(flags, vec![(1, true), (2, false)]);

    t.fabric.shutdown().await;
}

#[tokio::test]
async fn test_sharing_classes_do_not_collide() {
    let t = TestFabric::new();
    t.register(TOR1_MGMT, TOR1_SRC).await;
    t.fabric.start().await.unwrap();
    t.wait_for_host("compute1").await;

    t.network(network_fixtures::unshared("tenant", 5001)).await;
    t.network(network_fixtures::shared("provider", 7001)).await;
    t.port(port_fixtures::bound("p1", "tenant", "compute1")).await;
    t.port(port_fixtures::bound("p2", "provider", "compute1")).await;

    assert_eq!(t.assign("tenant", "compute1", "p1").await, 2);
    assert_eq!(t.assign("provider", "compute1", "p2").await, 4002);

    t.fabric.shutdown().await;
}

#[tokio::test]
async fn test_registration_builds_full_mesh() {
    let t = TestFabric::new();
    t.fabric.start().await.unwrap();

    t.register(TOR1_MGMT, TOR1_SRC).await;
    t.fabric.pusher().flush().await;
    t.register(TOR2_MGMT, TOR2_SRC).await;
    t.fabric.pusher().flush().await;

    let verifier = StoreVerifier::new(t.fabric.repo());
    verifier.assert_tunnel(TOR2_MGMT, TOR1_SRC).await.unwrap();
    verifier.assert_tunnel(TOR1_MGMT, TOR2_SRC).await.unwrap();
    verifier.assert_tunnel_count(2).await.unwrap();

    t.transport.wait_for("/ensure", 2).await.unwrap();

    // Re-registration builds nothing new.
    t.register(TOR2_MGMT, TOR2_SRC).await;
    t.fabric.pusher().flush().await;
    verifier.assert_tunnel_count(2).await.unwrap();
    assert_eq!(t.transport.sent_to("/tunnel").len(), 2);

    t.fabric.shutdown().await;
}

#[tokio::test]
async fn test_hosts_follow_their_uplink() {
    let t = TestFabric::new();
    t.register(TOR1_MGMT, TOR1_SRC).await;
    t.register(TOR2_MGMT, TOR2_SRC).await;
    t.fabric.start().await.unwrap();
    t.wait_for_host("compute3").await;

    let snapshot = t.fabric.topology().snapshot();
    assert_eq!(snapshot.uplink_for("compute1"), Some(TOR1_MGMT));
    assert_eq!(snapshot.uplink_for("compute3"), Some(TOR2_MGMT));
    assert_eq!(snapshot.uplink_for("spine1"), None);

    t.network(network_fixtures::unshared("net1", 5001)).await;
    t.port(port_fixtures::bound("p1", "net1", "compute1")).await;
    t.port(port_fixtures::bound("p3", "net1", "compute3")).await;

    let tor1 = t
        .fabric
        .vlans()
        .assign(&AssignRequest::new("net1", "compute1", "p1"))
        .await
        .unwrap();
    let tor2 = t
        .fabric
        .vlans()
        .assign(&AssignRequest::new("net1", "compute3", "p3"))
        .await
        .unwrap();
    assert_eq!(tor1.tor, TOR1_MGMT);
    assert_eq!(tor2.tor, TOR2_MGMT);
    assert_eq!(tor1.vlan_id, tor2.vlan_id);

    t.fabric.shutdown().await;
}

#[tokio::test]
async fn test_unreachable_switch_keeps_previous_topology() {
    let t = TestFabric::new();
    t.register(TOR1_MGMT, TOR1_SRC).await;
    t.fabric.start().await.unwrap();
    t.wait_for_host("compute1").await;

    t.walker.remove(TOR1_MGMT);
    let report = fabricd::tasks::refresh_topology(
        t.fabric.topology(),
        t.fabric.repo(),
        t.fabric.metrics(),
    )
    .await
    .unwrap();
    assert_eq!(report.failed, vec![TOR1_MGMT.to_string()]);
    assert_eq!(
        t.fabric.topology().snapshot().uplink_for("compute1"),
        Some(TOR1_MGMT)
    );

    t.fabric.shutdown().await;
}

#[tokio::test]
async fn test_restart_restores_allocations() {
    let store = Arc::new(MemoryStore::new());
    {
        let t = TestFabric::over(store.clone());
        t.register(TOR1_MGMT, TOR1_SRC).await;
        t.fabric.start().await.unwrap();
        t.wait_for_host("compute1").await;
        t.network(network_fixtures::unshared("net1", 5001)).await;
        t.network(network_fixtures::unshared("net2", 5002)).await;
        t.port(port_fixtures::bound("p1", "net1", "compute1")).await;
        assert_eq!(t.assign("net1", "compute1", "p1").await, 2);
        t.fabric.shutdown().await;
    }

    let t = TestFabric::over(store);
    assert_eq!(t.fabric.start().await.unwrap(), 1);
    t.wait_for_host("compute1").await;

    t.port(port_fixtures::bound("p2", "net2", "compute1")).await;
    t.port(port_fixtures::bound("p3", "net1", "compute1")).await;
    assert_eq!(t.assign("net2", "compute1", "p2").await, 3);
    assert_eq!(t.assign("net1", "compute1", "p3").await, 2);
    assert_eq!(t.store.len("VLAN_ALLOCATION"), 2);

    t.fabric.shutdown().await;
}
