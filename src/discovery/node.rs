//! Discovery wire payload and the remote-peer node table.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The JSON document broadcast as the UDP beacon payload (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeaconPayload {
    pub iid: String,
    pub hostname: String,
    pub address: String,
    pub advertisement: serde_json::Value,
    #[serde(rename = "isMaster")]
    pub is_master: bool,
    pub weight: f64,
    /// Not part of the documented wire contract; used locally to support
    /// `ignoreProcess`. Other implementations will simply ignore this field.
    #[serde(default)]
    pub pid: u32,
}

/// A remote peer observed via beacons.
#[derive(Debug, Clone)]
pub struct DiscoveryNode {
    pub iid: Uuid,
    pub address: String,
    pub hostname: String,
    pub advertisement: serde_json::Value,
    pub is_master: bool,
    pub weight: f64,
    pub last_seen: Instant,
}

impl DiscoveryNode {
    pub(crate) fn from_beacon(payload: &BeaconPayload, iid: Uuid) -> Self {
        DiscoveryNode {
            iid,
            address: payload.address.clone(),
            hostname: payload.hostname.clone(),
            advertisement: payload.advertisement.clone(),
            is_master: payload.is_master,
            weight: payload.weight,
            last_seen: Instant::now(),
        }
    }
}
