//! Reactive registry: per-table redraw callbacks keyed by subscriber id.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

pub type Redraw = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
pub struct ReactiveRegistry {
    tables: RwLock<HashMap<String, HashMap<String, Redraw>>>,
}

impl ReactiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the redraw for `(table, subscriber)`, replacing any previous
    /// one. Returns `true` if a callback was replaced.
    pub fn register(
        &self,
        table: &str,
        subscriber: impl Into<String>,
        redraw: impl Fn() + Send + Sync + 'static,
    ) -> bool {
        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .insert(subscriber.into(), Arc::new(redraw))
            .is_some()
    }

    pub fn remove(&self, table: &str, subscriber: &str) -> bool {
        let mut tables = self.tables.write();
        match tables.get_mut(table) {
            Some(subscribers) => subscribers.remove(subscriber).is_some(),
            None => false,
        }
    }

    /// Drop `subscriber` from every table. Returns how many entries went.
    pub fn forget(&self, subscriber: &str) -> usize {
        let mut removed = 0;
        for subscribers in self.tables.write().values_mut() {
            if subscribers.remove(subscriber).is_some() {
                removed += 1;
            }
        }
        removed
    }

    /// Subscriber ids registered for a table, sorted.
    pub fn subscribers(&self, table: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .tables
            .read()
            .get(table)
            .map(|subscribers| subscribers.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Run every redraw registered for `table` once. Returns how many ran.
    pub fn react(&self, table: &str) -> usize {
        let redraws: Vec<Redraw> = match self.tables.read().get(table) {
            Some(subscribers) => subscribers.values().cloned().collect(),
            None => return 0,
        };
        for redraw in &redraws {
            redraw();
        }
        redraws.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_react_runs_each_subscriber_once() {
        let registry = ReactiveRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));

        for id in ["a", "b"] {
            let c = count.clone();
            registry.register("todo", id, move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert_eq!(registry.react("todo"), 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(registry.react("other"), 0);
    }

    #[test]
    fn test_register_replaces_same_key() {
        let registry = ReactiveRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));

        registry.register("todo", "a", || {});
        let c = count.clone();
        assert!(registry.register("todo", "a", move || {
            c.fetch_add(10, Ordering::SeqCst);
        }));

        registry.react("todo");
        assert_eq!(count.load(Ordering::SeqCst), 10);
        assert_eq!(registry.subscribers("todo"), vec!["a".to_string()]);
    }

    #[test]
    fn test_remove() {
        let registry = ReactiveRegistry::new();
        registry.register("todo", "a", || {});
        assert!(registry.remove("todo", "a"));
        assert!(!registry.remove("todo", "a"));
        assert!(!registry.remove("missing", "a"));
    }

    #[test]
    fn test_forget_clears_all_tables() {
        let registry = ReactiveRegistry::new();
        registry.register("todo", "a", || {});
        registry.register("notes", "a", || {});
        registry.register("notes", "b", || {});

        assert_eq!(registry.forget("a"), 2);
        assert!(registry.subscribers("todo").is_empty());
        assert_eq!(registry.subscribers("notes"), vec!["b".to_string()]);
    }
}
