//! Event listeners filtered by selector.
//!
//! Handlers are registered for an event kind and a selector and run when an
//! event of that kind is dispatched at a matching element. The `create` kind
//! is special: listening for it marks the selector as observed, so newly
//! mounted elements matching it are brought to life.

use crate::element::{Element, Selector};
use crate::error::Result;
use elf_core::Insights;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Dispatched once per element when it first becomes reactive.
pub const CREATE: &str = "create";

pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Clone, Debug)]
pub struct Event {
    pub kind: String,
    pub target: Arc<Element>,
    pub detail: Value,
}

impl Event {
    pub fn new(kind: impl Into<String>, target: Arc<Element>) -> Self {
        Self {
            kind: kind.into(),
            target,
            detail: Value::Null,
        }
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = detail;
        self
    }
}

struct Entry {
    id: u64,
    kind: String,
    selector: Selector,
    handler: Handler,
}

/// Every registered listener, plus the selectors watched for `create`.
pub struct Listeners {
    entries: Mutex<Vec<Entry>>,
    observed: Mutex<Vec<Selector>>,
    next_id: AtomicU64,
    insights: Arc<Insights>,
}

impl Listeners {
    pub fn new(insights: Arc<Insights>) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            observed: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            insights,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Register `handler` for `kind` events on elements matching `selector`.
    pub fn listen(
        self: &Arc<Self>,
        kind: &str,
        selector: &str,
        handler: impl Fn(&Event) + Send + Sync + 'static,
    ) -> Result<Unlisten> {
        let selector = Selector::parse(selector)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let unlisten = Unlisten {
            listeners: Arc::downgrade(self),
            id,
            kind: kind.to_string(),
            selector: selector.as_str().to_string(),
        };
        self.entries.lock().push(Entry {
            id,
            kind: kind.to_string(),
            selector,
            handler: Arc::new(handler),
        });
        Ok(unlisten)
    }

    /// Run every handler whose kind and selector match. Handlers run in
    /// registration order; returns how many ran.
    pub fn dispatch(&self, event: &Event) -> usize {
        let matched: Vec<(String, Handler)> = self
            .entries
            .lock()
            .iter()
            .filter(|entry| entry.kind == event.kind && entry.selector.matches(&event.target))
            .map(|entry| (entry.selector.as_str().to_string(), entry.handler.clone()))
            .collect();

        for (selector, handler) in &matched {
            self.insights
                .record(&format!("elf:listen:{}", event.kind), selector);
            handler(event);
        }
        matched.len()
    }

    /// Watch `selector` for elements to create. Returns `false` if it was
    /// already watched.
    pub fn observe(&self, selector: &str) -> Result<bool> {
        let selector = Selector::parse(selector)?;
        let mut observed = self.observed.lock();
        if observed.iter().any(|s| s.as_str() == selector.as_str()) {
            return Ok(false);
        }
        debug!(selector = %selector, "observing selector");
        observed.push(selector);
        Ok(true)
    }

    pub fn disregard(&self, selector: &str) -> bool {
        let mut observed = self.observed.lock();
        let before = observed.len();
        observed.retain(|s| s.as_str() != selector.trim());
        observed.len() != before
    }

    /// Whether any observed selector matches `element`.
    pub fn is_observed(&self, element: &Element) -> bool {
        self.observed.lock().iter().any(|s| s.matches(element))
    }

    fn remove(&self, id: u64) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        entries.len() != before
    }
}

/// Handle returned by `listen`; removes the listener when called.
#[must_use = "dropping the handle keeps the listener registered"]
pub struct Unlisten {
    listeners: Weak<Listeners>,
    id: u64,
    kind: String,
    selector: String,
}

impl Unlisten {
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }

    /// Remove the listener. Removing a `create` listener also stops
    /// observing its selector.
    pub fn unlisten(self) -> bool {
        let listeners = match self.listeners.upgrade() {
            Some(listeners) => listeners,
            None => return false,
        };
        if self.kind == CREATE {
            listeners.disregard(&self.selector);
        }
        listeners.remove(self.id)
    }
}
