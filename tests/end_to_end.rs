//! Multi-node scenarios over loopback UDP.

use bytes::Bytes;
use kadis::{Client, Config, Contact, Node, NodeId, RoutingTable};
use std::sync::Arc;
use std::time::Duration;

const TTL: Duration = Duration::from_secs(2);

fn test_config() -> Config {
    Config {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        ttl: TTL,
        ..Config::default()
    }
}

async fn spawn_node() -> Arc<Node> {
    spawn_node_with(test_config()).await
}

async fn spawn_node_with(config: Config) -> Arc<Node> {
    let node = Arc::new(Node::bind(config).await.unwrap());
    let server = Arc::clone(&node);
    tokio::spawn(async move {
        server.run().await;
    });
    node
}

#[tokio::test(flavor = "multi_thread")]
async fn join_discovers_the_bootstrap_node() {
    let a = spawn_node().await;
    let b = spawn_node().await;

    let discovered = b.join_network(a.contact()).await;

    assert!(discovered.contains(&a.contact()));
    // The join lookup announced b to a as a side effect.
    assert!(a.routing_table().contact_count() >= 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn store_replicates_and_lookup_finds_data() {
    let a = spawn_node().await;
    let b = spawn_node().await;

    b.join_network(a.contact()).await;

    let hash = b.store(Bytes::from_static(b"hello")).await;
    assert_eq!(hash, "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d");

    // c joins only after the store, so it holds no replica and must locate
    // the value through the iterative lookup.
    let c = spawn_node().await;
    c.join_network(a.contact()).await;
    let (value, responder) = c.lookup_data(&hash).await.unwrap();
    assert_eq!(value, Some(Bytes::from_static(b"hello")));
    assert!(responder.is_some());

    // The storing node answers from its own copy.
    let (value, responder) = b.lookup_data(&hash).await.unwrap();
    assert_eq!(value, Some(Bytes::from_static(b"hello")));
    assert_eq!(responder, Some(b.contact()));
}

#[tokio::test(flavor = "multi_thread")]
async fn lookup_of_unknown_hash_returns_nothing() {
    let a = spawn_node().await;
    let b = spawn_node().await;

    b.join_network(a.contact()).await;
    b.store(Bytes::from_static(b"present")).await;

    let absent = kadis::NodeId::from_data(b"absent").to_string();
    let (value, responder) = b.lookup_data(&absent).await.unwrap();
    assert_eq!(value, None);
    assert_eq!(responder, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn forgotten_values_age_out_of_replicas() {
    let a = spawn_node().await;
    let b = spawn_node().await;

    b.join_network(a.contact()).await;

    let hash = b.store(Bytes::from_static(b"ephemeral")).await;

    // Replicated and reachable while refreshed.
    let (value, _) = a.lookup_data(&hash).await.unwrap();
    assert_eq!(value, Some(Bytes::from_static(b"ephemeral")));

    b.forget(&hash).unwrap();

    // No refresh reaches the replicas anymore; wait out one TTL window.
    tokio::time::sleep(TTL + Duration::from_millis(500)).await;

    let (value, responder) = a.lookup_data(&hash).await.unwrap();
    assert_eq!(value, None);
    assert_eq!(responder, None);

    let (value, _) = b.lookup_data(&hash).await.unwrap();
    assert_eq!(value, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn timeout_evicts_the_unresponsive_contact() {
    let a = spawn_node().await;
    let b = spawn_node().await;

    b.join_network(a.contact()).await;

    // A contact nobody listens on: the lookup query against it times out,
    // evicts it, and convergence continues with live peers.
    let dead = kadis::Contact::new(
        kadis::NodeId::random(),
        "127.0.0.1:1".parse().unwrap(),
    );
    b.routing_table().add(dead);

    let found = b.lookup_contact(&kadis::NodeId::random()).await;
    assert!(!found.iter().any(|c| c.id == dead.id));

    let closest = b.routing_table().find_closest(&dead.id, 20);
    assert!(!closest.iter().any(|c| c.id == dead.id));
}

#[tokio::test(flavor = "multi_thread")]
async fn serving_loop_survives_bad_datagrams() {
    let a = spawn_node().await;

    // Undecodable noise straight at the serving socket.
    let noise = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    noise
        .send_to(b"not an rpc at all", a.contact().addr)
        .await
        .unwrap();
    noise.send_to(&[0xff; 512], a.contact().addr).await.unwrap();

    // The node must still answer real traffic afterwards.
    let b = spawn_node().await;
    let discovered = b.join_network(a.contact()).await;
    assert!(discovered.contains(&a.contact()));
}

#[tokio::test(flavor = "multi_thread")]
async fn live_reply_sender_replaces_dead_bucket_head() {
    // Ids chosen so the dead head and the live responder share a bucket
    // relative to the zero self id, with bucket capacity one.
    let mut live_id = [0u8; 20];
    live_id[19] = 2;
    let live = spawn_node_with(Config {
        id: Some(NodeId(live_id)),
        ..test_config()
    })
    .await;

    let mut dead_id = [0u8; 20];
    dead_id[19] = 3;
    let dead = Contact::new(NodeId(dead_id), "127.0.0.1:1".parse().unwrap());

    let table = Arc::new(RoutingTable::new(NodeId([0u8; 20]), 1));
    table.add(dead);

    let self_contact = Contact::new(NodeId([0u8; 20]), "127.0.0.1:9".parse().unwrap());
    let client = Client::new(self_contact, Arc::clone(&table), Duration::from_millis(500));

    // The reply's sender lands in the full bucket: the unresponsive head
    // is pinged, times out, and the responder takes its slot.
    client.ping(&live.contact()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(800)).await;

    let closest = table.find_closest(&live.contact().id, 2);
    assert!(closest.iter().any(|c| c.id == live.contact().id));
    assert!(!closest.iter().any(|c| c.id == dead.id));
}
