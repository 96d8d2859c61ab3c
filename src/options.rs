//! Endpoint-level configuration (spec §4.2/§6): everything above the
//! discovery layer — namespace, advertisement payload, and the lists the
//! orchestrator uses to decide which discovered peers are connection
//! candidates.

use uuid::Uuid;

use crate::discovery::DiscoveryOptions;
use crate::error::MeshlinkError;

#[derive(Debug, Clone)]
pub struct EndpointOptions {
    /// Namespace segment inserted between `message::` and the topic on the
    /// wire. `None` means no namespace segment at all.
    pub namespace: Option<String>,
    /// Resolve peer addresses to hostnames instead of raw IPs when dialing.
    pub use_hostnames: bool,
    /// Arbitrary JSON merged into the advertisement beacon.
    pub advertisement: serde_json::Value,
    /// Topics this PUB endpoint actually publishes; advertised so SUB peers
    /// can skip dialing publishers with no overlap with their subscriptions.
    pub broadcasts: Vec<String>,
    /// Topics this SUB endpoint subscribes to; empty means "dial every
    /// discovered publisher".
    pub subscribes_to: Vec<String>,
    /// Request types this REQ endpoint sends; empty means "dial every
    /// discovered replier".
    pub requests: Vec<String>,
    /// Request types this REP endpoint handles; advertised so REQ peers can
    /// skip dialing repliers with no overlap with their request types.
    pub responds_to: Vec<String>,
    pub discovery: DiscoveryOptions,
}

impl Default for EndpointOptions {
    fn default() -> Self {
        EndpointOptions {
            namespace: None,
            use_hostnames: false,
            advertisement: serde_json::json!({}),
            broadcasts: Vec::new(),
            subscribes_to: Vec::new(),
            requests: Vec::new(),
            responds_to: Vec::new(),
            discovery: DiscoveryOptions::default(),
        }
    }
}

impl EndpointOptions {
    /// Apply a single named option, type-checking the value and leaving all
    /// other state untouched on error (spec §4.2 `set_option` semantics).
    pub fn set_option(&mut self, name: &str, value: serde_json::Value) -> Result<(), MeshlinkError> {
        match name {
            "namespace" => {
                self.namespace = Some(expect_string(name, value)?);
            }
            "useHostnames" => {
                self.use_hostnames = expect_bool(name, value)?;
            }
            "advertisement" => {
                self.advertisement = value;
            }
            "hostname" => {
                self.discovery.hostname = Some(expect_string(name, value)?);
            }
            "ignoreInstance" => {
                self.discovery.ignore_instance = Some(expect_uuid(name, value)?);
            }
            "helloInterval" => {
                self.discovery.hello_interval = std::time::Duration::from_millis(expect_u64(name, value)?);
            }
            "checkInterval" => {
                self.discovery.check_interval = std::time::Duration::from_millis(expect_u64(name, value)?);
            }
            "nodeTimeout" => {
                self.discovery.node_timeout = std::time::Duration::from_millis(expect_u64(name, value)?);
            }
            "masterTimeout" => {
                self.discovery.master_timeout = std::time::Duration::from_millis(expect_u64(name, value)?);
            }
            "address" => {
                self.discovery.address = expect_string(name, value)?;
            }
            "port" => {
                let port = expect_u64(name, value)?;
                self.discovery.port = u16::try_from(port)
                    .map_err(|_| MeshlinkError::InvalidArgument(format!("{name} out of range")))?;
            }
            "broadcast" => {
                self.discovery.broadcast = expect_string(name, value)?;
            }
            "multicast" => {
                self.discovery.multicast = Some(expect_string(name, value)?);
            }
            "multicastTTL" => {
                self.discovery.multicast_ttl = expect_u64(name, value)? as u32;
            }
            "unicast" => {
                self.discovery.unicast = expect_string_array(name, value)?;
            }
            "key" => {
                self.discovery.key = expect_string(name, value)?;
            }
            "mastersRequired" => {
                self.discovery.masters_required = expect_u64(name, value)? as u32;
            }
            "weight" => {
                self.discovery.weight = expect_f64(name, value)?;
            }
            "client" => {
                self.discovery.client = expect_bool(name, value)?;
            }
            "reuseAddr" => {
                self.discovery.reuse_addr = expect_bool(name, value)?;
            }
            "ignoreProcess" => {
                self.discovery.ignore_process = expect_bool(name, value)?;
            }
            "broadcasts" => {
                self.broadcasts = expect_string_array(name, value)?;
            }
            "subscribesTo" => {
                self.subscribes_to = expect_string_array(name, value)?;
            }
            "requests" => {
                self.requests = expect_string_array(name, value)?;
            }
            "respondsTo" => {
                self.responds_to = expect_string_array(name, value)?;
            }
            other => {
                return Err(MeshlinkError::InvalidArgument(format!(
                    "unknown option '{other}'"
                )));
            }
        }
        Ok(())
    }
}

fn expect_string(name: &str, value: serde_json::Value) -> Result<String, MeshlinkError> {
    value
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| MeshlinkError::InvalidArgument(format!("option '{name}' expects a string")))
}

fn expect_bool(name: &str, value: serde_json::Value) -> Result<bool, MeshlinkError> {
    value
        .as_bool()
        .ok_or_else(|| MeshlinkError::InvalidArgument(format!("option '{name}' expects a boolean")))
}

fn expect_u64(name: &str, value: serde_json::Value) -> Result<u64, MeshlinkError> {
    value
        .as_u64()
        .ok_or_else(|| MeshlinkError::InvalidArgument(format!("option '{name}' expects a non-negative integer")))
}

fn expect_f64(name: &str, value: serde_json::Value) -> Result<f64, MeshlinkError> {
    value
        .as_f64()
        .ok_or_else(|| MeshlinkError::InvalidArgument(format!("option '{name}' expects a number")))
}

fn expect_uuid(name: &str, value: serde_json::Value) -> Result<Uuid, MeshlinkError> {
    let s = expect_string(name, value)?;
    s.parse()
        .map_err(|_| MeshlinkError::InvalidArgument(format!("option '{name}' expects a uuid")))
}

fn expect_string_array(name: &str, value: serde_json::Value) -> Result<Vec<String>, MeshlinkError> {
    value
        .as_array()
        .ok_or_else(|| MeshlinkError::InvalidArgument(format!("option '{name}' expects an array")))?
        .iter()
        .map(|v| {
            v.as_str()
                .map(str::to_owned)
                .ok_or_else(|| MeshlinkError::InvalidArgument(format!("option '{name}' expects an array of strings")))
        })
        .collect()
}
