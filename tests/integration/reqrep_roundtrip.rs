//! A REQ endpoint sends a typed request to a REP peer and receives the
//! handler's reply.

use std::net::UdpSocket;
use std::sync::Arc;
use std::time::Duration;

use meshlink::{DiscoveryOptions, Endpoint, EndpointOptions, Field, Message, Role};

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
async fn request_reaches_handler_and_reply_comes_back() {
    let req_port = free_udp_port();
    let rep_port = free_udp_port();

    let replier = Endpoint::new(
        Role::Rep,
        EndpointOptions {
            responds_to: vec!["add".to_owned()],
            discovery: fast_discovery(rep_port, req_port),
            ..Default::default()
        },
    );
    replier
        .on_request(
            "add",
            Arc::new(|_topic, fields| {
                let Some(Field::Json(request)) = fields.first() else {
                    return None;
                };
                let a = request.get("a")?.as_i64()?;
                let b = request.get("b")?.as_i64()?;
                Message::new(vec![Field::Json(serde_json::json!({ "sum": a + b }))]).ok()
            }),
        )
        .await
        .unwrap();
    replier.start().await.unwrap();

    let requester = Endpoint::new(
        Role::Req,
        EndpointOptions {
            requests: vec!["add".to_owned()],
            discovery: fast_discovery(req_port, rep_port),
            ..Default::default()
        },
    );
    requester.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;

    let reply = requester
        .send_request("add", serde_json::json!({"a": 2, "b": 3}), Duration::from_secs(2))
        .await
        .unwrap();

    assert_eq!(reply.get("sum").and_then(|v| v.as_i64()), Some(5));
}
