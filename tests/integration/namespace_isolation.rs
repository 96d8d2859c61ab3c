//! A publisher advertising under a namespace is only dialed by a subscriber
//! configured with the matching namespace; a subscriber in a different
//! namespace never sees the publisher as a connection candidate.

use std::net::UdpSocket;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use meshlink::{DiscoveryOptions, Endpoint, EndpointOptions, Field, Role};

fn free_udp_port() -> u16 {
    UdpSocket::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
}

fn fast_discovery(own_port: u16, peer_ports: &[u16]) -> DiscoveryOptions {
    DiscoveryOptions {
        hello_interval: Duration::from_millis(50),
        check_interval: Duration::from_millis(200),
        node_timeout: Duration::from_millis(500),
        master_timeout: Duration::from_millis(600),
        address: "127.0.0.1".to_owned(),
        port: own_port,
        unicast: peer_ports
            .iter()
            .map(|p| format!("127.0.0.1:{p}"))
            .collect(),
        masters_required: 0,
        ..Default::default()
    }
}

#[tokio::test]
async fn subscriber_in_different_namespace_never_receives() {
    let pub_port = free_udp_port();
    let sub_a_port = free_udp_port();
    let sub_b_port = free_udp_port();

    let publisher = Endpoint::new(
        Role::Pub,
        EndpointOptions {
            namespace: Some("zoneA".to_owned()),
            broadcasts: vec!["reading".to_owned()],
            discovery: fast_discovery(pub_port, &[sub_a_port, sub_b_port]),
            ..Default::default()
        },
    );
    publisher.start().await.unwrap();

    let sub_a = Endpoint::new(
        Role::Sub,
        EndpointOptions {
            namespace: Some("zoneA".to_owned()),
            subscribes_to: vec!["reading".to_owned()],
            discovery: fast_discovery(sub_a_port, &[pub_port]),
            ..Default::default()
        },
    );
    let received_a: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));
    let received_a_clone = received_a.clone();
    sub_a
        .subscribe(
            "reading",
            Arc::new(move |_topic, _fields| {
                *received_a_clone.lock().unwrap() += 1;
                None
            }),
        )
        .await
        .unwrap();
    sub_a.start().await.unwrap();

    let sub_b = Endpoint::new(
        Role::Sub,
        EndpointOptions {
            namespace: Some("zoneB".to_owned()),
            subscribes_to: vec!["reading".to_owned()],
            discovery: fast_discovery(sub_b_port, &[pub_port]),
            ..Default::default()
        },
    );
    let received_b: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));
    let received_b_clone = received_b.clone();
    sub_b
        .subscribe(
            "reading",
            Arc::new(move |_topic, _fields| {
                *received_b_clone.lock().unwrap() += 1;
                None
            }),
        )
        .await
        .unwrap();
    sub_b.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    publisher.send("reading", vec![Field::BigInt(1)]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(*received_a.lock().unwrap(), 1);
    assert_eq!(*received_b.lock().unwrap(), 0);
}
