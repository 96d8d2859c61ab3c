//! Discovery configuration knobs (see spec §4.3/§6). Defaults match the
//! `c-cote`/`node-discover` deployments this crate interoperates with and
//! MUST NOT change without an explicit `set_option` call.

use std::time::Duration;

use uuid::Uuid;

/// The discovery port used by `node-discover`-derived implementations absent
/// configuration.
const DEFAULT_DISCOVERY_PORT: u16 = 12345;

#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub hello_interval: Duration,
    pub check_interval: Duration,
    pub node_timeout: Duration,
    pub master_timeout: Duration,
    /// Local bind address for the discovery sockets.
    pub address: String,
    /// UDP port used for both sending and receiving beacons.
    pub port: u16,
    /// Broadcast destination used when neither `multicast` nor `unicast` is set.
    pub broadcast: String,
    /// Multicast group address; when set, beacons are sent/joined via multicast
    /// instead of broadcast.
    pub multicast: Option<String>,
    pub multicast_ttl: u32,
    /// Explicit unicast peer list; when non-empty, beacons are sent to each
    /// address individually instead of broadcast/multicast.
    pub unicast: Vec<String>,
    /// Shared key; datagrams carrying a different key are dropped silently.
    pub key: String,
    /// Number of masters the election should consider converged (informational).
    pub masters_required: u32,
    /// Election weight; highest wins, ties broken by lexicographically
    /// smallest instance id.
    pub weight: f64,
    /// Receive-only mode: never emit our own beacon.
    pub client: bool,
    pub reuse_addr: bool,
    /// Ignore beacons emitted by this OS process (loopback of our own send
    /// when running multiple endpoints in one process on the same port).
    pub ignore_process: bool,
    /// Ignore beacons from one specific instance id (test/debug hook).
    pub ignore_instance: Option<Uuid>,
    pub hostname: Option<String>,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            hello_interval: Duration::from_millis(2000),
            check_interval: Duration::from_millis(4000),
            node_timeout: Duration::from_millis(5000),
            master_timeout: Duration::from_millis(6000),
            address: "0.0.0.0".to_owned(),
            port: DEFAULT_DISCOVERY_PORT,
            broadcast: "255.255.255.255".to_owned(),
            multicast: None,
            multicast_ttl: 1,
            unicast: Vec::new(),
            key: "$$".to_owned(),
            masters_required: 1,
            weight: default_weight(),
            client: false,
            reuse_addr: true,
            ignore_process: false,
            ignore_instance: None,
            hostname: None,
        }
    }
}

fn default_weight() -> f64 {
    use rand::Rng;
    rand::thread_rng().gen_range(0.0..1_000_000.0)
}
