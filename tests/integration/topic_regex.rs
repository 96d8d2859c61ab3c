//! Subscription patterns are unanchored regular expressions matched against
//! the full `message::topic` wire string, so a pattern naming a topic
//! fragment picks up every topic containing it and nothing else.

use std::net::UdpSocket;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use meshlink::{DiscoveryOptions, Endpoint, EndpointOptions, Field, Role};

fn free_udp_port() -> u16 {
    UdpSocket::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
}

fn fast_discovery(own_port: u16, peer_port: u16) -> DiscoveryOptions {
    DiscoveryOptions {
        hello_interval: Duration::from_millis(50),
        check_interval: Duration::from_millis(200),
        node_timeout: Duration::from_millis(500),
        master_timeout: Duration::from_millis(600),
        address: "127.0.0.1".to_owned(),
        port: own_port,
        unicast: vec![format!("127.0.0.1:{peer_port}")],
        masters_required: 0,
        ..Default::default()
    }
}

#[tokio::test]
async fn pattern_matches_only_topics_containing_it() {
    let pub_port = free_udp_port();
    let sub_port = free_udp_port();

    let publisher = Endpoint::new(
        Role::Pub,
        EndpointOptions {
            discovery: fast_discovery(pub_port, sub_port),
            ..Default::default()
        },
    );
    publisher.start().await.unwrap();

    let subscriber = Endpoint::new(
        Role::Sub,
        EndpointOptions {
            discovery: fast_discovery(sub_port, pub_port),
            ..Default::default()
        },
    );
    let received: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let received_clone = received.clone();
    subscriber
        .subscribe(
            "sensors::temperature",
            Arc::new(move |topic, _fields| {
                received_clone.lock().unwrap().push(topic.to_owned());
                None
            }),
        )
        .await
        .unwrap();
    subscriber.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;

    publisher
        .send("sensors::temperature", vec![Field::BigInt(1)])
        .await
        .unwrap();
    publisher
        .send("sensors::humidity", vec![Field::BigInt(2)])
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;

    let guard = received.lock().unwrap();
    assert_eq!(guard.as_slice(), ["sensors::temperature"]);
}
