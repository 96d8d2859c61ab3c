//! SUB role transport: dials every PUB peer discovery hands us and forwards
//! whatever arrives on each connection to a single incoming-message channel.
//!
//! Grounded on the forwarder's reconnect-on-drop uplink pattern: one task per
//! remote address, with the address set deduplicated so a peer re-announced
//! by discovery doesn't open a second socket.

use std::collections::HashSet;
use std::sync::Arc;

use meshlink_protocol::{read_message, Message};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, trace, warn};

/// A message received from a connected PUB peer, tagged with the address it
/// came from (useful for diagnostics; dispatch keys only on the topic field).
#[derive(Debug, Clone)]
pub struct SubMessage {
    pub peer: String,
    pub message: Message,
}

pub struct SubEmitter {
    dialed: Arc<Mutex<HashSet<String>>>,
    incoming_tx: mpsc::UnboundedSender<SubMessage>,
    shutdown_tx: broadcast::Sender<()>,
}

impl SubEmitter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SubMessage>) {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _rx) = broadcast::channel(8);
        (
            SubEmitter {
                dialed: Arc::new(Mutex::new(HashSet::new())),
                incoming_tx,
                shutdown_tx,
            },
            incoming_rx,
        )
    }

    /// Connect to `addr` unless already connected. Reconnection on drop is
    /// intentionally not attempted here: discovery will re-offer the peer on
    /// its next beacon and the orchestrator re-dials through this method.
    pub async fn dial(&self, addr: String) {
        {
            let mut guard = self.dialed.lock().await;
            if !guard.insert(addr.clone()) {
                return;
            }
        }

        let dialed = self.dialed.clone();
        let incoming_tx = self.incoming_tx.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            match TcpStream::connect(&addr).await {
                Ok(stream) => {
                    debug!(%addr, "sub-emitter: connected to publisher");
                    read_connection(stream, addr.clone(), incoming_tx, &mut shutdown_rx).await;
                }
                Err(e) => {
                    warn!(%addr, "sub-emitter: connect failed: {e}");
                }
            }
            dialed.lock().await.remove(&addr);
        });
    }

    pub async fn is_connected(&self, addr: &str) -> bool {
        self.dialed.lock().await.contains(addr)
    }

    pub fn release(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

async fn read_connection(
    mut stream: TcpStream,
    addr: String,
    incoming_tx: mpsc::UnboundedSender<SubMessage>,
    shutdown_rx: &mut broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            result = read_message(&mut stream) => {
                match result {
                    Ok(message) => {
                        if incoming_tx.send(SubMessage { peer: addr.clone(), message }).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        trace!(%addr, "sub-emitter: connection closed: {e}");
                        break;
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                break;
            }
        }
    }
}
