//! Notification bus: fires every listener after each store mutation.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Something the store tells about every table it changes.
pub trait Notify: Send + Sync {
    fn notify(&self, table: &str);
}

/// A listener on the bus, called with the mutated table's name.
pub type Listener = Arc<dyn Fn(&str) + Send + Sync>;

/// Registry of update listeners keyed by a caller-chosen token.
///
/// Registering twice under the same key keeps one slot. Listener order is
/// unspecified. A bus may also carry a dispatcher, which is not keyed and
/// so can be neither replaced nor removed.
#[derive(Default)]
pub struct NotificationBus {
    listeners: RwLock<HashMap<String, Listener>>,
    dispatcher: Option<Listener>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A bus that always runs `dispatcher` before its keyed listeners.
    pub fn with_dispatcher(dispatcher: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            dispatcher: Some(Arc::new(dispatcher)),
        }
    }

    /// Add a listener. Returns `true` if it replaced one under the same key.
    pub fn subscribe(
        &self,
        key: impl Into<String>,
        listener: impl Fn(&str) + Send + Sync + 'static,
    ) -> bool {
        self.listeners
            .write()
            .insert(key.into(), Arc::new(listener))
            .is_some()
    }

    /// Remove a listener. Returns `true` if one was registered.
    pub fn unsubscribe(&self, key: &str) -> bool {
        self.listeners.write().remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.listeners.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }
}

impl Notify for NotificationBus {
    fn notify(&self, table: &str) {
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher(table);
        }
        // Listeners may subscribe or unsubscribe while running.
        let listeners: Vec<Listener> = self.listeners.read().values().cloned().collect();
        for listener in listeners {
            listener(table);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_same_key_occupies_one_slot() {
        let bus = NotificationBus::new();
        let hits = Arc::new(Mutex::new(Vec::new()));

        let h = hits.clone();
        assert!(!bus.subscribe("log", move |table| h.lock().push(format!("first:{}", table))));
        let h = hits.clone();
        assert!(bus.subscribe("log", move |table| h.lock().push(format!("second:{}", table))));

        bus.notify("todo");
        assert_eq!(bus.len(), 1);
        assert_eq!(*hits.lock(), vec!["second:todo".to_string()]);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = NotificationBus::new();
        bus.subscribe("a", |_| {});
        assert!(bus.unsubscribe("a"));
        assert!(!bus.unsubscribe("a"));
        assert!(bus.is_empty());
    }

    #[test]
    fn test_listener_may_unsubscribe_itself() {
        let bus = Arc::new(NotificationBus::new());
        let inner = bus.clone();
        bus.subscribe("once", move |_| {
            inner.unsubscribe("once");
        });

        bus.notify("t");
        assert!(!bus.contains("once"));
    }

    #[test]
    fn test_dispatcher_survives_keyed_changes() {
        let hits = Arc::new(Mutex::new(0));
        let h = hits.clone();
        let bus = NotificationBus::with_dispatcher(move |_| *h.lock() += 1);

        assert!(!bus.unsubscribe("elf:react"));
        bus.subscribe("elf:react", |_| {});
        bus.unsubscribe("elf:react");
        assert!(bus.is_empty());

        bus.notify("t");
        bus.notify("u");
        assert_eq!(*hits.lock(), 2);
    }
}
