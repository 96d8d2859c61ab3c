//! UDP beaconing, node table maintenance, and master election (spec §4.3).

pub mod node;
pub mod options;

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use uuid::Uuid;

pub use node::{BeaconPayload, DiscoveryNode};
pub use options::DiscoveryOptions;

use crate::error::MeshlinkError;

/// Events raised by the discovery engine (spec §6).
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    Added(DiscoveryNode),
    Removed(DiscoveryNode),
    Error(String),
}

/// The per-endpoint discovery engine. Owns no process-wide state (Design
/// Note: no global discovery singleton — each endpoint owns its own).
pub struct Discovery {
    iid: Uuid,
    options: DiscoveryOptions,
    local_hostname: String,
    local_address: String,
    advertisement: Arc<StdMutex<serde_json::Value>>,
    nodes: Arc<StdMutex<HashMap<Uuid, DiscoveryNode>>>,
    is_master: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    released: AtomicBool,
    handles: StdMutex<Vec<JoinHandle<()>>>,
}

impl Discovery {
    pub fn new(iid: Uuid, options: DiscoveryOptions) -> Self {
        let local_hostname = options
            .hostname
            .clone()
            .or_else(|| hostname::get().ok().and_then(|h| h.into_string().ok()))
            .unwrap_or_else(|| "localhost".to_owned());
        let local_address = local_outbound_address(&options).unwrap_or_else(|| "127.0.0.1".to_owned());
        let (shutdown_tx, _rx) = broadcast::channel(8);
        Discovery {
            iid,
            options,
            local_hostname,
            local_address,
            advertisement: Arc::new(StdMutex::new(serde_json::json!({}))),
            nodes: Arc::new(StdMutex::new(HashMap::new())),
            is_master: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            released: AtomicBool::new(false),
            handles: StdMutex::new(Vec::new()),
        }
    }

    /// Replace the advertisement payload carried in every beacon.
    pub fn advertise(&self, advertisement: serde_json::Value) {
        *self.advertisement.lock().unwrap() = advertisement;
    }

    pub fn is_master(&self) -> bool {
        self.is_master.load(Ordering::SeqCst)
    }

    /// Bind the discovery sockets and spawn the beacon, listener, and
    /// liveness-check tasks. Returns the event stream the orchestrator reads.
    pub async fn start(&self) -> Result<mpsc::UnboundedReceiver<DiscoveryEvent>, MeshlinkError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let bind_addr: SocketAddr = format!("{}:{}", self.options.address, self.options.port)
            .parse()
            .map_err(|e| MeshlinkError::InvalidArgument(format!("invalid discovery address: {e}")))?;

        let listener_std = build_listener_socket(bind_addr, &self.options)?;
        listener_std.set_nonblocking(true)?;
        let listener_socket = UdpSocket::from_std(listener_std)?;

        let sender_std = build_sender_socket(&self.options)?;
        sender_std.set_nonblocking(true)?;
        let sender_socket = UdpSocket::from_std(sender_std)?;

        let mut handles = Vec::new();

        if !self.options.client {
            handles.push(tokio::spawn(beacon_task(
                self.iid,
                self.options.clone(),
                self.local_hostname.clone(),
                self.local_address.clone(),
                self.advertisement.clone(),
                self.is_master.clone(),
                sender_socket,
                self.shutdown_tx.subscribe(),
            )));
        }

        handles.push(tokio::spawn(listener_task(
            self.iid,
            self.options.clone(),
            listener_socket,
            self.nodes.clone(),
            events_tx.clone(),
            self.shutdown_tx.subscribe(),
        )));

        handles.push(tokio::spawn(liveness_task(
            self.iid,
            self.options.clone(),
            self.nodes.clone(),
            self.is_master.clone(),
            events_tx,
            self.shutdown_tx.subscribe(),
        )));

        *self.handles.lock().unwrap() = handles;
        Ok(events_rx)
    }

    /// Stop the beacon timer, close the sockets, and release node-table
    /// state. Idempotent: a second call is a no-op.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(());
    }
}

fn local_outbound_address(options: &DiscoveryOptions) -> Option<String> {
    if options.address != "0.0.0.0" && !options.address.is_empty() {
        return Some(options.address.clone());
    }
    // Best-effort local address discovery: connect a UDP socket to a
    // non-routed address and read back the address the OS chose.
    let probe = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    probe.connect("198.51.100.1:1").ok()?;
    probe.local_addr().ok().map(|a| a.ip().to_string())
}

fn build_listener_socket(
    bind_addr: SocketAddr,
    options: &DiscoveryOptions,
) -> Result<std::net::UdpSocket, MeshlinkError> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| MeshlinkError::NetworkError(format!("discovery socket create: {e}")))?;
    if options.reuse_addr {
        socket
            .set_reuse_address(true)
            .map_err(|e| MeshlinkError::NetworkError(format!("SO_REUSEADDR: {e}")))?;
    }
    socket
        .set_broadcast(true)
        .map_err(|e| MeshlinkError::NetworkError(format!("SO_BROADCAST: {e}")))?;
    socket
        .bind(&bind_addr.into())
        .map_err(|e| MeshlinkError::NetworkError(format!("discovery bind {bind_addr}: {e}")))?;

    if let Some(group) = &options.multicast {
        if let Ok(group_addr) = group.parse::<Ipv4Addr>() {
            socket
                .join_multicast_v4(&group_addr, &Ipv4Addr::UNSPECIFIED)
                .map_err(|e| MeshlinkError::NetworkError(format!("join multicast {group}: {e}")))?;
        }
    }

    Ok(socket.into())
}

fn build_sender_socket(options: &DiscoveryOptions) -> Result<std::net::UdpSocket, MeshlinkError> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| MeshlinkError::NetworkError(format!("discovery sender create: {e}")))?;
    socket
        .set_broadcast(true)
        .map_err(|e| MeshlinkError::NetworkError(format!("SO_BROADCAST: {e}")))?;
    if options.multicast.is_some() {
        socket
            .set_multicast_ttl_v4(options.multicast_ttl)
            .map_err(|e| MeshlinkError::NetworkError(format!("multicast TTL: {e}")))?;
    }
    let bind_addr: SocketAddr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0).into();
    socket
        .bind(&bind_addr.into())
        .map_err(|e| MeshlinkError::NetworkError(format!("sender bind: {e}")))?;
    Ok(socket.into())
}

fn beacon_destinations(options: &DiscoveryOptions) -> Vec<SocketAddr> {
    if let Some(group) = &options.multicast {
        if let Ok(addr) = format!("{group}:{}", options.port).parse() {
            return vec![addr];
        }
    }
    if !options.unicast.is_empty() {
        return options
            .unicast
            .iter()
            .filter_map(|host| {
                // Accept either a bare host (cluster-wide shared port) or an
                // explicit "host:port" override for the common single-host
                // multi-instance case (e.g. integration tests).
                host.parse()
                    .ok()
                    .or_else(|| format!("{host}:{}", options.port).parse().ok())
            })
            .collect();
    }
    format!("{}:{}", options.broadcast, options.port)
        .parse()
        .into_iter()
        .collect()
}

#[allow(clippy::too_many_arguments)]
async fn beacon_task(
    iid: Uuid,
    options: DiscoveryOptions,
    hostname: String,
    address: String,
    advertisement: Arc<StdMutex<serde_json::Value>>,
    is_master: Arc<AtomicBool>,
    socket: UdpSocket,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let destinations = beacon_destinations(&options);
    let mut ticker = tokio::time::interval(options.hello_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let payload = BeaconPayload {
                    iid: iid.to_string(),
                    hostname: hostname.clone(),
                    address: address.clone(),
                    advertisement: advertisement.lock().unwrap().clone(),
                    is_master: is_master.load(Ordering::SeqCst),
                    weight: options.weight,
                    pid: std::process::id(),
                };
                match serde_json::to_vec(&payload) {
                    Ok(bytes) => {
                        for dest in &destinations {
                            if let Err(e) = socket.send_to(&bytes, dest).await {
                                trace!("discovery beacon send to {dest} failed: {e}");
                            }
                        }
                    }
                    Err(e) => warn!("failed to serialize beacon payload: {e}"),
                }
            }
            _ = shutdown_rx.recv() => {
                debug!("discovery beacon task shutting down");
                break;
            }
        }
    }
}

async fn listener_task(
    iid: Uuid,
    options: DiscoveryOptions,
    socket: UdpSocket,
    nodes: Arc<StdMutex<HashMap<Uuid, DiscoveryNode>>>,
    events_tx: mpsc::UnboundedSender<DiscoveryEvent>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut buf = vec![0u8; 16 * 1024];
    loop {
        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((len, _src)) => {
                        handle_datagram(&buf[..len], iid, &options, &nodes, &events_tx);
                    }
                    Err(e) => {
                        let _ = events_tx.send(DiscoveryEvent::Error(format!("discovery recv error: {e}")));
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                debug!("discovery listener task shutting down");
                break;
            }
        }
    }
}

fn handle_datagram(
    bytes: &[u8],
    local_iid: Uuid,
    options: &DiscoveryOptions,
    nodes: &Arc<StdMutex<HashMap<Uuid, DiscoveryNode>>>,
    events_tx: &mpsc::UnboundedSender<DiscoveryEvent>,
) {
    // Malformed datagrams are common on multi-tenant networks; drop silently.
    let payload: BeaconPayload = match serde_json::from_slice(bytes) {
        Ok(p) => p,
        Err(e) => {
            trace!("dropping malformed discovery datagram: {e}");
            return;
        }
    };

    let Ok(peer_iid) = payload.iid.parse::<Uuid>() else {
        trace!("dropping discovery datagram with invalid iid");
        return;
    };
    if peer_iid == local_iid {
        return;
    }
    if options.ignore_instance == Some(peer_iid) {
        return;
    }
    if options.ignore_process && payload.pid == std::process::id() {
        return;
    }

    let advertisement_key = payload
        .advertisement
        .get("key")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    if advertisement_key != options.key {
        trace!("dropping discovery datagram with mismatched key");
        return;
    }

    let mut guard = nodes.lock().unwrap();
    let changed = match guard.get(&peer_iid) {
        Some(existing) => existing.advertisement != payload.advertisement,
        None => true,
    };
    let node = DiscoveryNode::from_beacon(&payload, peer_iid);
    guard.insert(peer_iid, node.clone());
    drop(guard);

    if changed {
        let _ = events_tx.send(DiscoveryEvent::Added(node));
    }
}

async fn liveness_task(
    local_iid: Uuid,
    options: DiscoveryOptions,
    nodes: Arc<StdMutex<HashMap<Uuid, DiscoveryNode>>>,
    is_master: Arc<AtomicBool>,
    events_tx: mpsc::UnboundedSender<DiscoveryEvent>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(options.check_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                run_liveness_check(local_iid, &options, &nodes, &is_master, &events_tx);
            }
            _ = shutdown_rx.recv() => {
                debug!("discovery liveness task shutting down");
                break;
            }
        }
    }
}

fn run_liveness_check(
    local_iid: Uuid,
    options: &DiscoveryOptions,
    nodes: &Arc<StdMutex<HashMap<Uuid, DiscoveryNode>>>,
    is_master: &Arc<AtomicBool>,
    events_tx: &mpsc::UnboundedSender<DiscoveryEvent>,
) {
    let now = Instant::now();
    let mut removed = Vec::new();
    let mut demoted_master = false;

    {
        let mut guard = nodes.lock().unwrap();
        let timed_out: Vec<Uuid> = guard
            .iter()
            .filter(|(_, node)| now.duration_since(node.last_seen) > options.node_timeout)
            .map(|(iid, _)| *iid)
            .collect();
        for iid in timed_out {
            if let Some(node) = guard.remove(&iid) {
                removed.push(node);
            }
        }

        for node in guard.values_mut() {
            if node.is_master && now.duration_since(node.last_seen) > options.master_timeout {
                node.is_master = false;
                demoted_master = true;
            }
        }
    }

    for node in removed {
        let _ = events_tx.send(DiscoveryEvent::Removed(node));
    }

    if demoted_master || !removed.is_empty() {
        elect_master(local_iid, options, nodes, is_master);
    }
}

/// Deterministic election: highest `weight` wins, ties broken by
/// lexicographically smallest instance id.
fn elect_master(
    local_iid: Uuid,
    options: &DiscoveryOptions,
    nodes: &Arc<StdMutex<HashMap<Uuid, DiscoveryNode>>>,
    is_master: &Arc<AtomicBool>,
) {
    if options.masters_required == 0 {
        return;
    }
    let guard = nodes.lock().unwrap();
    let mut best_iid = local_iid;
    let mut best_weight = options.weight;
    for (iid, node) in guard.iter() {
        if node.weight > best_weight
            || (node.weight == best_weight && iid.to_string() < best_iid.to_string())
        {
            best_weight = node.weight;
            best_iid = *iid;
        }
    }
    is_master.store(best_iid == local_iid, Ordering::SeqCst);
}
