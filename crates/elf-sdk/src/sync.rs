//! Synchronization layer: uploads local writes, applies peer writes.
//!
//! Outbound, every local `teach` on a bound table is serialized into a
//! [`StateMessage`] stamped with the local [`NodeId`] and emitted as
//! `stateUpload`. Inbound, a `stateDownload` for a bound table is first
//! merged into the store with the strategy the author named (our own echoes
//! are dropped), and only then handed to the table's download callbacks.
//!
//! Nothing is emitted before the channel reports a successful handshake:
//! bind requests made earlier are queued and replayed once, in order.

use crate::channel::{
    Channel, ChannelEvent, LinkState, Outbound, StateCache, StateUpload,
};
use crate::error::{Result, SdkError};
use elf_core::merge::overlay;
use elf_core::{
    has_table, CoreError, DownloadRegistry, MergeFn, NodeId, Nuance, StateMessage, Store,
    UploadRegistry,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// A deferred subscription action.
pub type Action = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct ConnectorState {
    ready: bool,
    pending: Vec<Action>,
}

/// Runs actions once the channel is ready, queueing them until then.
#[derive(Default)]
pub struct Connector {
    state: Mutex<ConnectorState>,
}

impl Connector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.state.lock().ready
    }

    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Run `action` now if ready, otherwise queue it.
    pub fn connect(&self, action: impl FnOnce() + Send + 'static) {
        let mut state = self.state.lock();
        if state.ready {
            drop(state);
            action();
        } else {
            state.pending.push(Box::new(action));
        }
    }

    /// Mark ready and flush the queue in enqueue order. Only the first call
    /// flushes anything; returns how many actions ran.
    pub fn ready(&self) -> usize {
        let pending = {
            let mut state = self.state.lock();
            if state.ready {
                return 0;
            }
            state.ready = true;
            std::mem::take(&mut state.pending)
        };
        let count = pending.len();
        for action in pending {
            action();
        }
        count
    }
}

/// The merge used for full-state pushes, whatever the table normally uses.
pub fn cache_merge() -> MergeFn {
    Arc::new(overlay)
}

/// Apply one received message to the store.
///
/// Returns `Ok(false)` for our own echoes, which are never re-applied.
pub fn apply_download(
    store: &Store,
    local: &NodeId,
    message: &StateMessage,
) -> std::result::Result<bool, CoreError> {
    if message.is_from(local) {
        debug!(table = %message.table, "discarding own echo");
        return Ok(false);
    }
    store.set(&message.table, &message.knowledge, &message.nuance())?;
    debug!(table = %message.table, sender = %message.sender_id, "applied peer update");
    Ok(true)
}

/// Per-node synchronization state.
pub struct SyncLayer {
    node_id: NodeId,
    channel: Arc<dyn Channel>,
    store: Arc<Store>,
    uploads: Arc<UploadRegistry>,
    downloads: Arc<DownloadRegistry>,
    connector: Connector,
    bound: Mutex<HashSet<String>>,
    this: Weak<SyncLayer>,
}

impl SyncLayer {
    pub fn new(
        node_id: NodeId,
        channel: Arc<dyn Channel>,
        store: Arc<Store>,
        uploads: Arc<UploadRegistry>,
        downloads: Arc<DownloadRegistry>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            node_id,
            channel,
            store,
            uploads,
            downloads,
            connector: Connector::new(),
            bound: Mutex::new(HashSet::new()),
            this: this.clone(),
        })
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn is_connected(&self) -> bool {
        self.connector.is_ready()
    }

    /// Bind requests waiting for the handshake.
    pub fn pending(&self) -> usize {
        self.connector.pending()
    }

    /// Whether `table` has its upload/download wiring installed.
    pub fn is_bound(&self, table: &str) -> bool {
        self.bound.lock().contains(table)
    }

    /// Subscribe an element to peer sync for `table`.
    ///
    /// Once connected this announces the table's full state tagged with the
    /// element id and, the first time a table is bound, installs its
    /// uploader and starts applying its downloads.
    pub fn bind(&self, table: &str, element_id: &str) {
        let this = self.this.clone();
        let table = table.to_string();
        let element_id = element_id.to_string();
        self.connector.connect(move || {
            if let Some(layer) = this.upgrade() {
                layer.link_state(&table, &element_id);
                layer.install(&table, &element_id);
            }
        });
    }

    /// Announce the table's entire current state.
    pub fn link_state(&self, table: &str, element_id: &str) {
        let message = Outbound::LinkState(LinkState {
            table: table.to_string(),
            id: element_id.to_string(),
            data: self.store.get(table),
        });
        if let Err(e) = self.channel.emit(message) {
            warn!(table, element = element_id, error = %e, "linkState failed");
        }
    }

    fn install(&self, table: &str, element_id: &str) {
        if !self.bound.lock().insert(table.to_string()) {
            return;
        }

        let channel = self.channel.clone();
        let sender = self.node_id.clone();
        let element = element_id.to_string();
        self.uploads
            .subscribe(table, move |table: &str, knowledge: &Value, nuance: &Nuance| {
                if let Err(e) = upload(channel.as_ref(), &sender, &element, table, knowledge, nuance)
                {
                    warn!(table, error = %e, "upload dropped");
                }
            });

        info!(table, element = element_id, node = %self.node_id, "table bound to channel");
    }

    /// Process one channel event. An error means the event was poison; the
    /// caller should log it and keep going.
    pub fn handle_event(&self, event: ChannelEvent) -> Result<()> {
        match event {
            ChannelEvent::Connected(Ok(())) => {
                let flushed = self.connector.ready();
                info!(node = %self.node_id, flushed, "channel connected");
            }
            ChannelEvent::Connected(Err(reason)) => {
                error!(node = %self.node_id, %reason, "channel connection failed");
            }
            ChannelEvent::StateCache(payload) => self.apply_cache(payload)?,
            ChannelEvent::StateDownload(payload) => self.download(payload)?,
            ChannelEvent::Error(reason) => {
                error!(node = %self.node_id, %reason, "channel error");
            }
        }
        Ok(())
    }

    /// Adopt a full-state push by shallow overlay.
    fn apply_cache(&self, payload: Value) -> Result<()> {
        let cache: StateCache = serde_json::from_value(payload)?;
        let (table, data) = match (cache.table, cache.data) {
            (Some(table), Some(data)) if !data.is_null() => (table, data),
            _ => return Ok(()),
        };
        self.store.apply(&table, &data, &cache_merge());
        debug!(table = %table, "adopted cached state");
        Ok(())
    }

    fn download(&self, payload: Value) -> Result<()> {
        if !has_table(&payload) {
            return Ok(());
        }
        let message = StateMessage::from_value(payload)?;
        if self.is_bound(&message.table) {
            apply_download(&self.store, &self.node_id, &message)?;
        }
        if let Err(e) = self.downloads.notify(&message) {
            warn!(table = %message.table, error = %e, "download subscriber failed");
        }
        Ok(())
    }

    /// Handle every event already queued on `events` without waiting.
    /// Returns how many events were taken.
    pub fn drain(&self, events: &mut mpsc::UnboundedReceiver<ChannelEvent>) -> usize {
        let mut count = 0;
        while let Ok(event) = events.try_recv() {
            self.process(event);
            count += 1;
        }
        count
    }

    /// Handle events until the channel closes.
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<ChannelEvent>) {
        while let Some(event) = events.recv().await {
            self.process(event);
        }
        debug!(node = %self.node_id, "channel closed, sync loop finished");
    }

    fn process(&self, event: ChannelEvent) {
        let name = event.event();
        if let Err(e) = self.handle_event(event) {
            warn!(node = %self.node_id, event = name, error = %e, "dropping poison message");
        }
    }
}

fn upload(
    channel: &dyn Channel,
    sender: &NodeId,
    element: &str,
    table: &str,
    knowledge: &Value,
    nuance: &Nuance,
) -> Result<()> {
    let serialized_merge = nuance.serialize().map_err(SdkError::from)?;
    let data = StateMessage::new(sender.clone(), table, knowledge.clone(), serialized_merge);
    channel.emit(Outbound::StateUpload(StateUpload {
        id: element.to_string(),
        data,
    }))?;
    Ok(())
}
