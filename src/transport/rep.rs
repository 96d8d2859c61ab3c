//! REP role transport: accepts REQ connections and processes each one's
//! requests strictly sequentially (one in flight at a time per connection),
//! matching the request/reply ordering REQ relies on.

use std::net::SocketAddr;

use meshlink_protocol::{read_message, write_message, Message};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::error::MeshlinkError;

/// One inbound request, paired with the channel its handler must reply on.
pub struct RepRequest {
    pub message: Message,
    pub reply: oneshot::Sender<Message>,
}

pub struct RepTransport {
    local_addr: SocketAddr,
}

impl RepTransport {
    /// Bind the listener and spawn the accept loop. Every accepted
    /// connection's requests are forwarded on `requests_tx` for the
    /// orchestrator to dispatch to the registered handler.
    pub async fn bind(
        addr: SocketAddr,
        requests_tx: mpsc::UnboundedSender<RepRequest>,
    ) -> Result<(Self, SocketAddr), MeshlinkError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| MeshlinkError::NetworkError(format!("rep bind {addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| MeshlinkError::NetworkError(e.to_string()))?;

        tokio::spawn(accept_loop(listener, requests_tx));

        Ok((RepTransport { local_addr }, local_addr))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

async fn accept_loop(listener: TcpListener, requests_tx: mpsc::UnboundedSender<RepRequest>) {
    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("rep accept failed: {e}");
                continue;
            }
        };
        debug!(%peer, "rep: requester connected");
        tokio::spawn(connection_task(socket, requests_tx.clone()));
    }
}

async fn connection_task(socket: TcpStream, requests_tx: mpsc::UnboundedSender<RepRequest>) {
    let (mut read_half, mut write_half) = socket.into_split();

    loop {
        let message = match read_message(&mut read_half).await {
            Ok(m) => m,
            Err(_) => break,
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        if requests_tx
            .send(RepRequest {
                message,
                reply: reply_tx,
            })
            .is_err()
        {
            break;
        }

        match reply_rx.await {
            Ok(reply) => {
                if let Err(e) = write_message(&mut write_half, &reply).await {
                    trace!("rep: write failed: {e}");
                    break;
                }
            }
            Err(_) => {
                trace!("rep: handler dropped without replying");
                break;
            }
        }
    }
}
