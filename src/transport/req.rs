//! REQ role transport: round-robins outgoing requests across every dialed
//! REP peer, correlating replies to requests by FIFO order on each
//! connection's own socket (the wire carries no request id — see DESIGN.md).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use meshlink_protocol::{read_message, write_message, Message};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, trace, warn};

use crate::error::MeshlinkError;

struct Connection {
    addr: String,
    outbox: mpsc::UnboundedSender<(Message, oneshot::Sender<Message>)>,
}

pub struct ReqTransport {
    connections: Arc<Mutex<Vec<Connection>>>,
    next: AtomicUsize,
}

impl ReqTransport {
    pub fn new() -> Self {
        ReqTransport {
            connections: Arc::new(Mutex::new(Vec::new())),
            next: AtomicUsize::new(0),
        }
    }

    pub async fn dial(&self, addr: String) {
        {
            let guard = self.connections.lock().await;
            if guard.iter().any(|c| c.addr == addr) {
                return;
            }
        }

        let stream = match TcpStream::connect(&addr).await {
            Ok(s) => s,
            Err(e) => {
                warn!(%addr, "req: connect failed: {e}");
                return;
            }
        };
        debug!(%addr, "req: connected to replier");

        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
        tokio::spawn(connection_task(stream, outbox_rx));

        self.connections.lock().await.push(Connection {
            addr,
            outbox: outbox_tx,
        });
    }

    pub async fn peer_count(&self) -> usize {
        self.connections.lock().await.len()
    }

    /// Send `request` to the next peer in round-robin order and await its
    /// reply, or `MeshlinkError::Timeout` if none arrives within `timeout`.
    /// With no dialed peer at all, this still waits out the full `timeout`
    /// before returning `Timeout` rather than failing fast.
    pub async fn send_request(
        &self,
        request: Message,
        timeout: Duration,
    ) -> Result<Message, MeshlinkError> {
        let guard = self.connections.lock().await;
        if guard.is_empty() {
            drop(guard);
            tokio::time::sleep(timeout).await;
            return Err(MeshlinkError::Timeout);
        }
        let index = self.next.fetch_add(1, Ordering::SeqCst) % guard.len();
        let outbox = guard[index].outbox.clone();
        drop(guard);

        let (reply_tx, reply_rx) = oneshot::channel();
        outbox
            .send((request, reply_tx))
            .map_err(|_| MeshlinkError::NetworkError("REP connection closed".to_owned()))?;

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(MeshlinkError::NetworkError(
                "REP connection closed before reply".to_owned(),
            )),
            Err(_) => Err(MeshlinkError::Timeout),
        }
    }
}

async fn connection_task(
    stream: TcpStream,
    mut outbox_rx: mpsc::UnboundedReceiver<(Message, oneshot::Sender<Message>)>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let pending: Arc<Mutex<VecDeque<oneshot::Sender<Message>>>> =
        Arc::new(Mutex::new(VecDeque::new()));

    let reader_pending = pending.clone();
    let reader = tokio::spawn(async move {
        loop {
            match read_message(&mut read_half).await {
                Ok(reply) => {
                    let waiter = reader_pending.lock().await.pop_front();
                    if let Some(tx) = waiter {
                        let _ = tx.send(reply);
                    } else {
                        trace!("req: reply arrived with no pending request");
                    }
                }
                Err(_) => break,
            }
        }
    });

    while let Some((request, reply_tx)) = outbox_rx.recv().await {
        pending.lock().await.push_back(reply_tx);
        if let Err(e) = write_message(&mut write_half, &request).await {
            trace!("req: write failed: {e}");
            break;
        }
    }

    reader.abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshlink_protocol::Field;
    use tokio::net::TcpListener;

    async fn echo_server(listener: TcpListener) {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                while let Ok(msg) = read_message(&mut socket).await {
                    let _ = write_message(&mut socket, &msg).await;
                }
            });
        }
    }

    #[tokio::test]
    async fn round_trip_request_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(echo_server(listener));

        let req = ReqTransport::new();
        req.dial(addr.to_string()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let msg = Message::new(vec![Field::Str("ping".into())]).unwrap();
        let reply = req
            .send_request(msg.clone(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply, msg);
    }

    #[tokio::test]
    async fn send_request_with_no_peers_waits_out_timeout() {
        let req = ReqTransport::new();
        let msg = Message::new(vec![Field::Str("ping".into())]).unwrap();
        let started = tokio::time::Instant::now();
        let err = req
            .send_request(msg, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, MeshlinkError::Timeout));
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn send_request_times_out_when_replier_never_answers() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            // Accept the connection but never reply.
            std::future::pending::<()>().await;
        });

        let req = ReqTransport::new();
        req.dial(addr.to_string()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let msg = Message::new(vec![Field::Str("ping".into())]).unwrap();
        let err = req
            .send_request(msg, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, MeshlinkError::Timeout));
    }

    #[tokio::test]
    async fn requests_round_robin_across_peers() {
        let listener_a = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr_a = listener_a.local_addr().unwrap();
        let listener_b = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr_b = listener_b.local_addr().unwrap();
        tokio::spawn(echo_server(listener_a));
        tokio::spawn(echo_server(listener_b));

        let req = ReqTransport::new();
        req.dial(addr_a.to_string()).await;
        req.dial(addr_b.to_string()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(req.peer_count().await, 2);

        for i in 0..4 {
            let msg = Message::new(vec![Field::Str(format!("ping-{i}"))]).unwrap();
            let reply = req
                .send_request(msg.clone(), Duration::from_secs(1))
                .await
                .unwrap();
            assert_eq!(reply, msg);
        }
    }
}
