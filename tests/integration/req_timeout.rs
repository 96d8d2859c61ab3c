//! A REQ endpoint whose peer never replies within the call's deadline sees
//! `MeshlinkError::Timeout`, not a hang.

use std::net::UdpSocket;
use std::sync::Arc;
use std::time::Duration;

use meshlink::{DiscoveryOptions, Endpoint, EndpointOptions, MeshlinkError, Role};

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

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn request_times_out_when_handler_never_returns() {
    let req_port = free_udp_port();
    let rep_port = free_udp_port();

    let replier = Endpoint::new(
        Role::Rep,
        EndpointOptions {
            responds_to: vec!["slow".to_owned()],
            discovery: fast_discovery(rep_port, req_port),
            ..Default::default()
        },
    );
    replier
        .on_request(
            "slow",
            Arc::new(|_topic, _fields| {
                std::thread::sleep(Duration::from_secs(5));
                None
            }),
        )
        .await
        .unwrap();
    replier.start().await.unwrap();

    let requester = Endpoint::new(
        Role::Req,
        EndpointOptions {
            requests: vec!["slow".to_owned()],
            discovery: fast_discovery(req_port, rep_port),
            ..Default::default()
        },
    );
    requester.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;

    let err = requester
        .send_request("slow", serde_json::json!({}), Duration::from_millis(200))
        .await
        .unwrap_err();

    assert!(matches!(err, MeshlinkError::Timeout));
}
