//! Realtime channel abstractions for table synchronization.
//!
//! The channel is an external collaborator: it connects, emits named events
//! and delivers named events. Delivery is best-effort and at most once.

use elf_core::merge::overlay;
use elf_core::{MergeRegistry, StateMessage};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub const LINK_STATE: &str = "linkState";
pub const STATE_UPLOAD: &str = "stateUpload";
pub const STATE_CACHE: &str = "stateCache";
pub const STATE_DOWNLOAD: &str = "stateDownload";
pub const ERROR: &str = "error";

/// Full-state announcement for one table, sent when an element subscribes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinkState {
    pub table: String,
    pub id: String,
    pub data: Value,
}

/// A local write on its way to the peers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateUpload {
    pub id: String,
    pub data: StateMessage,
}

/// Full state pushed to a node for one table.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StateCache {
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Events a node emits.
#[derive(Clone, Debug, PartialEq)]
pub enum Outbound {
    LinkState(LinkState),
    StateUpload(StateUpload),
}

impl Outbound {
    /// Wire event name.
    pub fn event(&self) -> &'static str {
        match self {
            Outbound::LinkState(_) => LINK_STATE,
            Outbound::StateUpload(_) => STATE_UPLOAD,
        }
    }

    /// Wire payload.
    pub fn payload(&self) -> Result<Value, serde_json::Error> {
        match self {
            Outbound::LinkState(link) => serde_json::to_value(link),
            Outbound::StateUpload(upload) => serde_json::to_value(upload),
        }
    }

    pub fn table(&self) -> &str {
        match self {
            Outbound::LinkState(link) => &link.table,
            Outbound::StateUpload(upload) => &upload.data.table,
        }
    }
}

/// Events a node receives. Payloads stay raw JSON until the sync layer
/// decodes them.
#[derive(Clone, Debug)]
pub enum ChannelEvent {
    /// Handshake finished, or failed with a reason.
    Connected(Result<(), String>),
    StateCache(Value),
    StateDownload(Value),
    Error(String),
}

impl ChannelEvent {
    pub fn event(&self) -> &'static str {
        match self {
            ChannelEvent::Connected(_) => "connect",
            ChannelEvent::StateCache(_) => STATE_CACHE,
            ChannelEvent::StateDownload(_) => STATE_DOWNLOAD,
            ChannelEvent::Error(_) => ERROR,
        }
    }
}

/// Channel error type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelError {
    NotConnected,
    SendFailed(String),
    Closed,
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelError::NotConnected => write!(f, "Not connected"),
            ChannelError::SendFailed(e) => write!(f, "Send failed: {}", e),
            ChannelError::Closed => write!(f, "Channel closed"),
        }
    }
}

impl std::error::Error for ChannelError {}

/// Abstract realtime channel.
pub trait Channel: Send + Sync + 'static {
    /// Send an event. Must not block.
    fn emit(&self, message: Outbound) -> Result<(), ChannelError>;

    /// Take the stream of incoming events. Only the first call gets it.
    fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<ChannelEvent>>;
}

type NodeSender = mpsc::UnboundedSender<ChannelEvent>;

struct RelayNode {
    sender: NodeSender,
    connected: bool,
}

#[derive(Default)]
struct RelayInner {
    nodes: RwLock<HashMap<String, RelayNode>>,
    cache: RwLock<HashMap<String, Value>>,
    merges: MergeRegistry,
    history: Mutex<Vec<(String, Outbound)>>,
}

impl RelayInner {
    fn is_connected(&self, node: &str) -> bool {
        self.nodes
            .read()
            .get(node)
            .map(|n| n.connected)
            .unwrap_or(false)
    }

    fn send_to(&self, node: &str, event: ChannelEvent) {
        let sender = self.nodes.read().get(node).map(|n| n.sender.clone());
        if let Some(sender) = sender {
            let _ = sender.send(event);
        }
    }

    fn route(&self, from: &str, message: Outbound) -> Result<(), ChannelError> {
        if !self.is_connected(from) {
            return Err(ChannelError::NotConnected);
        }
        self.history.lock().push((from.to_string(), message.clone()));

        match message {
            Outbound::LinkState(link) => {
                let consensus = {
                    let mut cache = self.cache.write();
                    let current = cache.remove(&link.table).unwrap_or_else(|| json!({}));
                    let merged = overlay(&link.data, &current);
                    cache.insert(link.table.clone(), merged.clone());
                    merged
                };
                let reply = serde_json::to_value(StateCache {
                    table: Some(link.table),
                    data: Some(consensus),
                })
                .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
                self.send_to(from, ChannelEvent::StateCache(reply));
            }
            Outbound::StateUpload(upload) => {
                self.remember(&upload.data);
                let payload = serde_json::to_value(&upload.data)
                    .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
                let senders: Vec<NodeSender> = self
                    .nodes
                    .read()
                    .values()
                    .filter(|n| n.connected)
                    .map(|n| n.sender.clone())
                    .collect();
                for sender in senders {
                    let _ = sender.send(ChannelEvent::StateDownload(payload.clone()));
                }
            }
        }
        Ok(())
    }

    /// Fold an upload into the cached consensus for late joiners.
    fn remember(&self, message: &StateMessage) {
        match self.merges.resolve(&message.nuance()) {
            Ok(merge) => {
                let mut cache = self.cache.write();
                let current = cache.remove(&message.table).unwrap_or_else(|| json!({}));
                cache.insert(message.table.clone(), merge(&current, &message.knowledge));
            }
            Err(e) => {
                warn!(table = %message.table, error = %e, "relay cannot cache upload");
            }
        }
    }
}

/// In-process realtime server for tests and demos.
///
/// Uploads are rebroadcast to every connected node, the sender included, so
/// echo suppression is exercised. Linked state only fills fields the
/// per-table cache lacks; the cache is then pushed back to the linking node.
#[derive(Clone, Default)]
pub struct MemoryRelay {
    inner: Arc<RelayInner>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a channel attached to this relay. It is not connected yet.
    pub fn channel(&self, name: impl Into<String>) -> MemoryChannel {
        let name = name.into();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.nodes.write().insert(
            name.clone(),
            RelayNode {
                sender: tx,
                connected: false,
            },
        );
        MemoryChannel {
            name,
            relay: self.inner.clone(),
            events: Mutex::new(Some(rx)),
        }
    }

    /// Complete the handshake for a node.
    pub fn connect(&self, name: &str) {
        if let Some(node) = self.inner.nodes.write().get_mut(name) {
            node.connected = true;
        }
        debug!(node = name, "relay accepted connection");
        self.inner.send_to(name, ChannelEvent::Connected(Ok(())));
    }

    /// Fail the handshake for a node.
    pub fn refuse(&self, name: &str, reason: impl Into<String>) {
        self.inner
            .send_to(name, ChannelEvent::Connected(Err(reason.into())));
    }

    pub fn disconnect(&self, name: &str) {
        if let Some(node) = self.inner.nodes.write().get_mut(name) {
            node.connected = false;
        }
    }

    /// Push a raw event to one node, bypassing routing.
    pub fn inject(&self, name: &str, event: ChannelEvent) {
        self.inner.send_to(name, event);
    }

    /// Raw delta to every connected node.
    pub fn broadcast_download(&self, payload: Value) {
        let senders: Vec<NodeSender> = self
            .inner
            .nodes
            .read()
            .values()
            .filter(|n| n.connected)
            .map(|n| n.sender.clone())
            .collect();
        for sender in senders {
            let _ = sender.send(ChannelEvent::StateDownload(payload.clone()));
        }
    }

    /// Consensus state the relay holds for a table.
    pub fn cached(&self, table: &str) -> Option<Value> {
        self.inner.cache.read().get(table).cloned()
    }

    /// Every event routed so far, with the name of its emitter.
    pub fn history(&self) -> Vec<(String, Outbound)> {
        self.inner.history.lock().clone()
    }

    /// Routed events of one kind (`linkState` or `stateUpload`).
    pub fn emitted(&self, event: &str) -> Vec<(String, Outbound)> {
        self.history()
            .into_iter()
            .filter(|(_, message)| message.event() == event)
            .collect()
    }
}

/// A node's end of a [`MemoryRelay`].
pub struct MemoryChannel {
    name: String,
    relay: Arc<RelayInner>,
    events: Mutex<Option<mpsc::UnboundedReceiver<ChannelEvent>>>,
}

impl MemoryChannel {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_connected(&self) -> bool {
        self.relay.is_connected(&self.name)
    }
}

impl Channel for MemoryChannel {
    fn emit(&self, message: Outbound) -> Result<(), ChannelError> {
        debug!(
            node = %self.name,
            event = message.event(),
            table = message.table(),
            "emit"
        );
        self.relay.route(&self.name, message)
    }

    fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<ChannelEvent>> {
        self.events.lock().take()
    }
}

/// Create a relay with `count` attached, connected channels named
/// `node-0`, `node-1`, ...
pub fn create_network(count: usize) -> (MemoryRelay, Vec<MemoryChannel>) {
    let relay = MemoryRelay::new();
    let channels: Vec<_> = (0..count)
        .map(|i| relay.channel(format!("node-{}", i)))
        .collect();
    for channel in &channels {
        relay.connect(channel.name());
    }
    (relay, channels)
}
