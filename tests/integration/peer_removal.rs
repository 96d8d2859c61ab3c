//! A discovery peer that stops beaconing is pruned from the node table and
//! reported via a `Removed` event once `nodeTimeout` elapses.

use std::net::UdpSocket;
use std::time::Duration;

use meshlink::discovery::Discovery;
use meshlink::{DiscoveryEvent, DiscoveryOptions};
use uuid::Uuid;

fn free_udp_port() -> u16 {
    UdpSocket::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
}

#[tokio::test]
async fn peer_is_removed_after_node_timeout_elapses() {
    let port_a = free_udp_port();
    let port_b = free_udp_port();

    let options_a = DiscoveryOptions {
        hello_interval: Duration::from_millis(50),
        check_interval: Duration::from_millis(100),
        node_timeout: Duration::from_millis(10_000),
        master_timeout: Duration::from_millis(10_000),
        address: "127.0.0.1".to_owned(),
        port: port_a,
        unicast: vec![format!("127.0.0.1:{port_b}")],
        masters_required: 0,
        ..Default::default()
    };
    let options_b = DiscoveryOptions {
        hello_interval: Duration::from_millis(50),
        check_interval: Duration::from_millis(100),
        node_timeout: Duration::from_millis(300),
        master_timeout: Duration::from_millis(400),
        address: "127.0.0.1".to_owned(),
        port: port_b,
        unicast: vec![format!("127.0.0.1:{port_a}")],
        masters_required: 0,
        ..Default::default()
    };

    let discovery_a = Discovery::new(Uuid::new_v4(), options_a);
    discovery_a.advertise(serde_json::json!({"key": "$$"}));
    let _events_a = discovery_a.start().await.unwrap();

    let discovery_b = Discovery::new(Uuid::new_v4(), options_b);
    discovery_b.advertise(serde_json::json!({"key": "$$"}));
    let mut events_b = discovery_b.start().await.unwrap();

    let added = tokio::time::timeout(Duration::from_secs(2), events_b.recv())
        .await
        .expect("timed out waiting for Added event")
        .expect("events channel closed");
    assert!(matches!(added, DiscoveryEvent::Added(_)));

    discovery_a.release();

    let removed = tokio::time::timeout(Duration::from_secs(2), events_b.recv())
        .await
        .expect("timed out waiting for Removed event")
        .expect("events channel closed");
    assert!(matches!(removed, DiscoveryEvent::Removed(_)));
}
