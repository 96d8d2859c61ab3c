//! A REQ endpoint with no compatible REP advertised anywhere still waits out
//! the call's deadline and returns `MeshlinkError::Timeout`, rather than
//! failing immediately because its dial table happens to be empty.

use std::net::UdpSocket;
use std::time::{Duration, Instant};

use meshlink::{DiscoveryOptions, Endpoint, EndpointOptions, MeshlinkError, Role};

fn free_udp_port() -> u16 {
    UdpSocket::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
}

fn isolated_discovery(own_port: u16) -> DiscoveryOptions {
    DiscoveryOptions {
        hello_interval: Duration::from_millis(50),
        check_interval: Duration::from_millis(200),
        address: "127.0.0.1".to_owned(),
        port: own_port,
        // No unicast peers and no broadcast reachable on this port: this
        // endpoint never discovers anyone.
        unicast: vec![format!("127.0.0.1:{}", free_udp_port())],
        masters_required: 0,
        ..Default::default()
    }
}

#[tokio::test]
async fn request_with_no_peer_waits_out_deadline_then_times_out() {
    let req_port = free_udp_port();

    let requester = Endpoint::new(
        Role::Req,
        EndpointOptions {
            requests: vec!["slow".to_owned()],
            discovery: isolated_discovery(req_port),
            ..Default::default()
        },
    );
    requester.start().await.unwrap();

    let started = Instant::now();
    let err = requester
        .send_request("slow", serde_json::json!({}), Duration::from_millis(500))
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, MeshlinkError::Timeout));
    assert!(elapsed >= Duration::from_millis(500));
    assert!(elapsed < Duration::from_millis(750));
}
