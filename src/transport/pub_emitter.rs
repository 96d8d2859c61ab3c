//! PUB role transport: a TCP listener fanning out every sent message to all
//! currently connected subscribers.
//!
//! Grounded on the accept-loop / per-connection worker pattern used for the
//! timer server's client registry: one task owns the listener, each accepted
//! socket gets its own write task fed by an mpsc channel, and disconnects are
//! detected by a read-side EOF and pruned from the connection table.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use meshlink_protocol::{write_message, Message};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, trace, warn};

use crate::error::MeshlinkError;

type ConnectionId = u64;

pub struct PubEmitter {
    local_addr: SocketAddr,
    connections: Arc<Mutex<HashMap<ConnectionId, mpsc::UnboundedSender<Message>>>>,
}

impl PubEmitter {
    /// Bind the listener and spawn the accept loop. Returns the transport and
    /// the address it actually bound to (useful when `port: 0` was requested).
    pub async fn bind(addr: SocketAddr) -> Result<(Self, SocketAddr), MeshlinkError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| MeshlinkError::NetworkError(format!("pub-emitter bind {addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| MeshlinkError::NetworkError(e.to_string()))?;

        let connections = Arc::new(Mutex::new(HashMap::new()));
        let transport = PubEmitter {
            local_addr,
            connections: connections.clone(),
        };

        tokio::spawn(accept_loop(listener, connections, Arc::new(AtomicU64::new(0))));

        Ok((transport, local_addr))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Send `msg` to every currently connected subscriber. Slow or dead peers
    /// never block the caller: each connection has its own bounded mailbox
    /// via an unbounded channel, and a full/closed channel just drops silently
    /// (the peer will be pruned once its read side observes EOF/reset).
    pub async fn broadcast(&self, msg: Message) {
        let guard = self.connections.lock().await;
        for (id, tx) in guard.iter() {
            if tx.send(msg.clone()).is_err() {
                trace!(connection = id, "pub-emitter: peer channel closed");
            }
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.lock().await.len()
    }
}

async fn accept_loop(
    listener: TcpListener,
    connections: Arc<Mutex<HashMap<ConnectionId, mpsc::UnboundedSender<Message>>>>,
    next_id: Arc<AtomicU64>,
) {
    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("pub-emitter accept failed: {e}");
                continue;
            }
        };
        let id = next_id.fetch_add(1, Ordering::SeqCst);
        debug!(connection = id, %peer, "pub-emitter: subscriber connected");

        let (tx, rx) = mpsc::unbounded_channel();
        connections.lock().await.insert(id, tx);

        tokio::spawn(connection_task(id, socket, rx, connections.clone()));
    }
}

async fn connection_task(
    id: ConnectionId,
    socket: TcpStream,
    mut rx: mpsc::UnboundedReceiver<Message>,
    connections: Arc<Mutex<HashMap<ConnectionId, mpsc::UnboundedSender<Message>>>>,
) {
    let (mut read_half, mut write_half) = socket.into_split();

    // Subscribers never send anything on a PUB connection; the only thing we
    // read for is EOF/reset so we can prune the table promptly.
    let disconnect_watch = tokio::spawn(async move {
        let mut scratch = [0u8; 1];
        loop {
            match tokio::io::AsyncReadExt::read(&mut read_half, &mut scratch).await {
                Ok(0) => break,
                Ok(_) => continue,
                Err(_) => break,
            }
        }
    });

    let write_loop = async {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = write_message(&mut write_half, &msg).await {
                trace!(connection = id, "pub-emitter write failed: {e}");
                break;
            }
        }
    };

    tokio::select! {
        _ = disconnect_watch => {}
        _ = write_loop => {}
    }

    connections.lock().await.remove(&id);
    debug!(connection = id, "pub-emitter: subscriber disconnected");
}
