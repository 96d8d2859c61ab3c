//! The per-role orchestrator: owns the FSM, builds the advertisement,
//! dispatches discovery events to the right transport, and exposes the
//! public pub/sub/req/rep API (spec §4.4).

use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use meshlink_protocol::{Field, Message};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::discovery::{Discovery, DiscoveryEvent, DiscoveryNode};
use crate::error::MeshlinkError;
use crate::options::EndpointOptions;
use crate::role::{AxonRole, Role};
use crate::subscription::{Callback, SubscriptionList};
use crate::transport::rep::RepRequest;
use crate::transport::sub_emitter::SubMessage;
use crate::transport::{PubEmitter, RepTransport, ReqTransport, SubEmitter};

const TOPIC_PREFIX: &str = "message::";

/// Endpoint lifecycle state (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    New,
    Configured,
    Bound,
    Running,
    Released,
}

/// An event raised to endpoint-level `on` handlers (spec §4.5/§6). `added`
/// and `removed` carry the discovered peer; `message` carries every raw
/// message a SUB endpoint receives regardless of a matching
/// [`Endpoint::subscribe`] pattern; `error` mirrors what was previously only
/// reachable through `on_error`.
#[derive(Debug, Clone)]
pub enum EndpointEvent {
    Added(DiscoveryNode),
    Removed(DiscoveryNode),
    Message { topic: String, fields: Vec<Field> },
    Error(String),
}

type ErrorCallback = Arc<dyn Fn(String) + Send + Sync>;
type EventCallback = Arc<dyn Fn(EndpointEvent) + Send + Sync>;

/// A zero-configuration peer-to-peer endpoint. Construct with [`Endpoint::new`],
/// configure via [`Endpoint::set_option`], then [`Endpoint::start`].
pub struct Endpoint {
    iid: Uuid,
    role: Role,
    options: Mutex<EndpointOptions>,
    state: StdMutex<State>,
    discovery: Arc<Discovery>,
    subscriptions: Mutex<SubscriptionList>,
    error_callbacks: StdMutex<Vec<ErrorCallback>>,
    event_callbacks: StdMutex<Vec<(String, EventCallback)>>,

    pub_emitter: Mutex<Option<PubEmitter>>,
    sub_emitter: Mutex<Option<SubEmitter>>,
    req_transport: Mutex<Option<Arc<ReqTransport>>>,
    rep_transport: Mutex<Option<RepTransport>>,
    listen_addr: StdMutex<Option<SocketAddr>>,
}

impl Endpoint {
    pub fn new(role: Role, options: EndpointOptions) -> Arc<Self> {
        let iid = Uuid::new_v4();
        let discovery = Arc::new(Discovery::new(iid, options.discovery.clone()));
        Arc::new(Endpoint {
            iid,
            role,
            options: Mutex::new(options),
            state: StdMutex::new(State::New),
            discovery,
            subscriptions: Mutex::new(SubscriptionList::new()),
            error_callbacks: StdMutex::new(Vec::new()),
            event_callbacks: StdMutex::new(Vec::new()),
            pub_emitter: Mutex::new(None),
            sub_emitter: Mutex::new(None),
            req_transport: Mutex::new(None),
            rep_transport: Mutex::new(None),
            listen_addr: StdMutex::new(None),
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn instance_id(&self) -> Uuid {
        self.iid
    }

    pub fn state(&self) -> State {
        *self.state.lock().unwrap()
    }

    pub fn is_master(&self) -> bool {
        self.discovery.is_master()
    }

    /// The bound TCP listener address, once `start` has run for a PUB/REP
    /// endpoint. `None` for every other role or before binding.
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        *self.listen_addr.lock().unwrap()
    }

    /// Apply a single configuration option. Only valid before [`Endpoint::start`].
    pub async fn set_option(&self, name: &str, value: serde_json::Value) -> Result<(), MeshlinkError> {
        let state = self.state();
        if state != State::New && state != State::Configured {
            return Err(MeshlinkError::InvalidState(
                "options cannot change after start".to_owned(),
            ));
        }
        self.options.lock().await.set_option(name, value)?;
        let mut guard = self.state.lock().unwrap();
        if *guard == State::New {
            *guard = State::Configured;
        }
        Ok(())
    }

    /// Register a handler invoked whenever a background task hits an error
    /// that can't be surfaced any other way (spec §6 `error` event).
    pub fn on_error(&self, callback: ErrorCallback) {
        self.error_callbacks.lock().unwrap().push(callback);
    }

    fn emit_error(&self, message: String) {
        warn!("{message}");
        for cb in self.error_callbacks.lock().unwrap().iter() {
            cb(message.clone());
        }
        self.emit("error", EndpointEvent::Error(message));
    }

    /// Register a handler for one of the `added`/`removed`/`message`/`error`
    /// events. MON forwards `added`/`removed` unfiltered; every other role
    /// only sees peers it would also dial. `message` fires for every raw
    /// message a SUB endpoint receives, regardless of whether any
    /// `subscribe` pattern matched it.
    pub fn on(&self, event: &str, callback: EventCallback) {
        self.event_callbacks.lock().unwrap().push((event.to_owned(), callback));
    }

    fn emit(&self, event: &str, payload: EndpointEvent) {
        for (name, cb) in self.event_callbacks.lock().unwrap().iter() {
            if name == event {
                cb(payload.clone());
            }
        }
    }

    /// Replace the advertisement payload merged into every discovery beacon.
    /// Valid at any point before [`Endpoint::release`], including after
    /// `start` — the new payload takes effect on the next beacon tick.
    pub async fn advertise(&self, payload: serde_json::Value) -> Result<(), MeshlinkError> {
        if self.state() == State::Released {
            return Err(MeshlinkError::InvalidState(
                "endpoint already released".to_owned(),
            ));
        }
        let mut opts = self.options.lock().await;
        opts.advertisement = payload;
        self.discovery.advertise(build_advertisement(self, &opts));
        Ok(())
    }

    /// Register a topic handler. PUB/SUB only.
    pub async fn subscribe(&self, pattern: &str, callback: Callback) -> Result<(), MeshlinkError> {
        if self.role != Role::Sub {
            return Err(MeshlinkError::InvalidState(
                "subscribe is only valid on a sub endpoint".to_owned(),
            ));
        }
        self.subscriptions.lock().await.upsert(pattern, callback)
    }

    pub async fn unsubscribe(&self, pattern: &str) -> Result<(), MeshlinkError> {
        if self.role != Role::Sub {
            return Err(MeshlinkError::InvalidState(
                "unsubscribe is only valid on a sub endpoint".to_owned(),
            ));
        }
        self.subscriptions.lock().await.remove(pattern);
        Ok(())
    }

    /// Register a request-type handler. REP only. The callback always
    /// produces a reply; registering under the same pattern twice replaces
    /// the previous handler.
    pub async fn on_request(&self, pattern: &str, callback: Callback) -> Result<(), MeshlinkError> {
        if self.role != Role::Rep {
            return Err(MeshlinkError::InvalidState(
                "on_request is only valid on a rep endpoint".to_owned(),
            ));
        }
        self.subscriptions.lock().await.upsert(pattern, callback)
    }

    /// Bind (if PUB/REP), start discovery, and spawn the dispatch loop.
    pub async fn start(self: &Arc<Self>) -> Result<(), MeshlinkError> {
        {
            let state = self.state();
            if state == State::Running || state == State::Released {
                return Err(MeshlinkError::InvalidState(format!(
                    "cannot start from state {state:?}"
                )));
            }
        }

        let opts = self.options.lock().await.clone();

        if self.role.has_listener() {
            let bind_addr: SocketAddr = format!("{}:0", opts.discovery.address)
                .parse()
                .map_err(|e| MeshlinkError::InvalidArgument(format!("invalid bind address: {e}")))?;

            match self.role {
                Role::Pub => {
                    let (emitter, addr) = PubEmitter::bind(bind_addr).await?;
                    *self.pub_emitter.lock().await = Some(emitter);
                    *self.listen_addr.lock().unwrap() = Some(addr);
                }
                Role::Rep => {
                    let (requests_tx, requests_rx) = mpsc::unbounded_channel();
                    let (rep, addr) = RepTransport::bind(bind_addr, requests_tx).await?;
                    *self.rep_transport.lock().await = Some(rep);
                    *self.listen_addr.lock().unwrap() = Some(addr);
                    tokio::spawn(rep_dispatch_loop(self.clone(), requests_rx));
                }
                _ => unreachable!("only pub/rep have listeners"),
            }
            *self.state.lock().unwrap() = State::Bound;
        }

        if self.role == Role::Sub {
            let (emitter, rx) = SubEmitter::new();
            *self.sub_emitter.lock().await = Some(emitter);
            tokio::spawn(sub_dispatch_loop(self.clone(), rx));
        }
        if self.role == Role::Req {
            *self.req_transport.lock().await = Some(Arc::new(ReqTransport::new()));
        }

        self.discovery.advertise(build_advertisement(self, &opts));
        let events = self.discovery.start().await?;
        tokio::spawn(discovery_dispatch_loop(self.clone(), events));

        *self.state.lock().unwrap() = State::Running;
        debug!(iid = %self.iid, role = self.role.as_str(), "endpoint started");
        Ok(())
    }

    /// Publish a message. PUB only.
    pub async fn send(&self, topic: &str, fields: Vec<Field>) -> Result<(), MeshlinkError> {
        if self.role != Role::Pub {
            return Err(MeshlinkError::InvalidState(
                "send is only valid on a pub endpoint".to_owned(),
            ));
        }
        let full_topic = self.full_topic(topic).await;
        let mut all_fields = vec![Field::Str(full_topic)];
        all_fields.extend(fields);
        let message = Message::new(all_fields)?;

        let guard = self.pub_emitter.lock().await;
        let emitter = guard
            .as_ref()
            .ok_or_else(|| MeshlinkError::InvalidState("endpoint not started".to_owned()))?;
        emitter.broadcast(message).await;
        Ok(())
    }

    /// Send a request and await its reply. REQ only. `payload` is deep-copied
    /// and merged with `{"type": topic}` before it goes on the wire.
    pub async fn send_request(
        &self,
        topic: &str,
        payload: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, MeshlinkError> {
        if self.role != Role::Req {
            return Err(MeshlinkError::InvalidState(
                "send_request is only valid on a req endpoint".to_owned(),
            ));
        }
        let mut request_payload = payload;
        match &mut request_payload {
            serde_json::Value::Object(map) => {
                map.insert("type".to_owned(), serde_json::Value::String(topic.to_owned()));
            }
            other => {
                let mut map = serde_json::Map::new();
                map.insert("value".to_owned(), other.clone());
                map.insert("type".to_owned(), serde_json::Value::String(topic.to_owned()));
                request_payload = serde_json::Value::Object(map);
            }
        }
        let message = Message::new(vec![Field::Json(request_payload)])?;

        let transport = self
            .req_transport
            .lock()
            .await
            .clone()
            .ok_or_else(|| MeshlinkError::InvalidState("endpoint not started".to_owned()))?;
        let reply = transport.send_request(message, timeout).await?;
        match reply.fields().first() {
            Some(Field::Json(value)) => Ok(value.clone()),
            _ => Err(MeshlinkError::MalformedFrame(
                "reply did not carry a JSON field".to_owned(),
            )),
        }
    }

    async fn full_topic(&self, topic: &str) -> String {
        let opts = self.options.lock().await;
        match &opts.namespace {
            Some(ns) => format!("{TOPIC_PREFIX}{ns}::{topic}"),
            None => format!("{TOPIC_PREFIX}{topic}"),
        }
    }

    /// Stop all background tasks and release sockets. Idempotent.
    pub async fn release(&self) {
        let mut guard = self.state.lock().unwrap();
        if *guard == State::Released {
            return;
        }
        *guard = State::Released;
        drop(guard);

        self.discovery.release();
        if let Some(sub) = self.sub_emitter.lock().await.as_ref() {
            sub.release();
        }
    }
}

fn build_advertisement(endpoint: &Endpoint, opts: &EndpointOptions) -> serde_json::Value {
    let mut advertisement = opts.advertisement.clone();
    let map = match &mut advertisement {
        serde_json::Value::Object(map) => map,
        _ => {
            advertisement = serde_json::json!({});
            match &mut advertisement {
                serde_json::Value::Object(map) => map,
                _ => unreachable!(),
            }
        }
    };

    map.insert("key".to_owned(), serde_json::Value::String(opts.discovery.key.clone()));
    if let Some(axon_role) = endpoint.role.axon_role() {
        map.insert(
            "axon_type".to_owned(),
            serde_json::Value::String(axon_role.as_str().to_owned()),
        );
    }
    match &opts.namespace {
        Some(ns) => {
            map.insert("namespace".to_owned(), serde_json::Value::String(ns.clone()));
        }
        None => {
            map.insert("namespace".to_owned(), serde_json::Value::Null);
        }
    }
    if let Some(addr) = *endpoint.listen_addr.lock().unwrap() {
        map.insert("port".to_owned(), serde_json::json!(addr.port()));
    }
    match endpoint.role {
        Role::Pub => {
            map.insert("topics".to_owned(), serde_json::json!(opts.broadcasts));
        }
        Role::Sub => {
            map.insert("topics".to_owned(), serde_json::json!(opts.subscribes_to));
        }
        Role::Req => {
            map.insert("topics".to_owned(), serde_json::json!(opts.requests));
        }
        Role::Rep => {
            map.insert("topics".to_owned(), serde_json::json!(opts.responds_to));
        }
        Role::Mon => {}
    }

    advertisement
}

/// Overlap test for the discovery-level candidacy filter. An empty list on
/// either side is treated as "matches anything" (spec §4.3).
fn topics_overlap(mine: &[String], theirs: &[serde_json::Value]) -> bool {
    if mine.is_empty() || theirs.is_empty() {
        return true;
    }
    theirs
        .iter()
        .filter_map(|v| v.as_str())
        .any(|t| mine.iter().any(|m| m == t))
}

fn is_dial_candidate(endpoint_role: Role, opts: &EndpointOptions, node: &DiscoveryNode) -> bool {
    let Some(wanted) = endpoint_role.axon_role() else {
        return false;
    };
    let peer_axon_type = node
        .advertisement
        .get("axon_type")
        .and_then(|v| v.as_str())
        .and_then(AxonRole::parse);
    if peer_axon_type != Some(wanted.complement()) {
        return false;
    }

    let peer_namespace = node.advertisement.get("namespace").and_then(|v| v.as_str());
    if opts.namespace.as_deref() != peer_namespace {
        return false;
    }

    let peer_key = node.advertisement.get("key").and_then(|v| v.as_str()).unwrap_or("");
    if peer_key != opts.discovery.key {
        return false;
    }

    let peer_topics = node
        .advertisement
        .get("topics")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    match endpoint_role {
        Role::Sub => topics_overlap(&opts.subscribes_to, &peer_topics),
        Role::Req => topics_overlap(&opts.requests, &peer_topics),
        _ => true,
    }
}

fn node_dial_address(node: &DiscoveryNode) -> Option<String> {
    let port = node.advertisement.get("port")?.as_u64()?;
    Some(format!("{}:{port}", node.address))
}

async fn discovery_dispatch_loop(
    endpoint: Arc<Endpoint>,
    mut events: mpsc::UnboundedReceiver<DiscoveryEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            DiscoveryEvent::Added(node) => {
                // MON has no axon_role and forwards every discovered peer
                // unfiltered; it never dials anything.
                if endpoint.role == Role::Mon {
                    endpoint.emit("added", EndpointEvent::Added(node));
                    continue;
                }
                let opts = endpoint.options.lock().await.clone();
                if !is_dial_candidate(endpoint.role, &opts, &node) {
                    continue;
                }
                endpoint.emit("added", EndpointEvent::Added(node.clone()));
                let Some(addr) = node_dial_address(&node) else {
                    continue;
                };
                match endpoint.role {
                    Role::Sub => {
                        if let Some(sub) = endpoint.sub_emitter.lock().await.as_ref() {
                            sub.dial(addr).await;
                        }
                    }
                    Role::Req => {
                        if let Some(req) = endpoint.req_transport.lock().await.as_ref() {
                            req.dial(addr).await;
                        }
                    }
                    _ => {}
                }
            }
            DiscoveryEvent::Removed(node) => {
                if endpoint.role == Role::Mon {
                    endpoint.emit("removed", EndpointEvent::Removed(node));
                    continue;
                }
                let opts = endpoint.options.lock().await.clone();
                if is_dial_candidate(endpoint.role, &opts, &node) {
                    endpoint.emit("removed", EndpointEvent::Removed(node));
                }
            }
            DiscoveryEvent::Error(message) => endpoint.emit_error(message),
        }
    }
}

/// Strip the `message::[namespace::]` prefix, matching exactly what the
/// wire's topic-field pointer arithmetic does when no namespace is set.
fn strip_topic_prefix(full_topic: &str, namespace: Option<&str>) -> String {
    let without_message = full_topic.strip_prefix(TOPIC_PREFIX).unwrap_or(full_topic);
    match namespace {
        Some(ns) => {
            let ns_prefix = format!("{ns}::");
            without_message
                .strip_prefix(ns_prefix.as_str())
                .unwrap_or(without_message)
                .to_owned()
        }
        None => without_message.to_owned(),
    }
}

async fn sub_dispatch_loop(endpoint: Arc<Endpoint>, mut incoming: mpsc::UnboundedReceiver<SubMessage>) {
    while let Some(SubMessage { message, .. }) = incoming.recv().await {
        let Some(Field::Str(full_topic)) = message.first().cloned() else {
            endpoint.emit_error("received sub message with no leading topic field".to_owned());
            continue;
        };
        let namespace = endpoint.options.lock().await.namespace.clone();
        let topic = strip_topic_prefix(&full_topic, namespace.as_deref());
        let remaining_fields = &message.fields()[1..];
        endpoint.emit(
            "message",
            EndpointEvent::Message {
                topic: topic.clone(),
                fields: remaining_fields.to_vec(),
            },
        );
        endpoint
            .subscriptions
            .lock()
            .await
            .dispatch(&full_topic, &topic, remaining_fields);
    }
}

async fn rep_dispatch_loop(endpoint: Arc<Endpoint>, mut requests: mpsc::UnboundedReceiver<RepRequest>) {
    while let Some(request) = requests.recv().await {
        let topic = request
            .message
            .first()
            .and_then(|f| match f {
                Field::Json(v) => v.get("type").and_then(|t| t.as_str()),
                _ => None,
            })
            .unwrap_or_default()
            .to_owned();

        let replies = endpoint
            .subscriptions
            .lock()
            .await
            .dispatch(&topic, &topic, request.message.fields());

        let reply = replies.into_iter().next().unwrap_or_else(|| {
            Message::new(vec![Field::Json(serde_json::json!({
                "error": format!("no handler registered for '{topic}'"),
            }))])
            .expect("non-empty field list")
        });
        let _ = request.reply.send(reply);
    }
}
