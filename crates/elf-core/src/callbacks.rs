//! Per-table upload and download callback lists.
//!
//! These are the seam between the store and table-specific sync wiring: a
//! table nobody registered for never synchronizes.

use crate::error::Result;
use crate::merge::Nuance;
use crate::message::StateMessage;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Called after a local write with `(table, knowledge, merge)`.
pub type UploadCallback = Arc<dyn Fn(&str, &Value, &Nuance) + Send + Sync>;

/// Called for every message received for a table, after any store write it
/// causes. An error stops the remaining callbacks for that message.
pub type DownloadCallback = Arc<dyn Fn(&StateMessage) -> Result<()> + Send + Sync>;

/// Append-only, per-table callback lists, invoked in registration order.
pub struct CallbackRegistry<C> {
    callbacks: RwLock<HashMap<String, Vec<C>>>,
}

pub type UploadRegistry = CallbackRegistry<UploadCallback>;
pub type DownloadRegistry = CallbackRegistry<DownloadCallback>;

impl<C: Clone> CallbackRegistry<C> {
    pub fn new() -> Self {
        Self {
            callbacks: RwLock::new(HashMap::new()),
        }
    }

    fn push(&self, table: &str, callback: C) {
        self.callbacks
            .write()
            .entry(table.to_string())
            .or_default()
            .push(callback);
    }

    fn snapshot(&self, table: &str) -> Vec<C> {
        self.callbacks
            .read()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn len(&self, table: &str) -> usize {
        self.callbacks.read().get(table).map_or(0, Vec::len)
    }

    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }
}

impl<C: Clone> Default for CallbackRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl CallbackRegistry<UploadCallback> {
    pub fn subscribe(
        &self,
        table: &str,
        callback: impl Fn(&str, &Value, &Nuance) + Send + Sync + 'static,
    ) {
        self.push(table, Arc::new(callback));
    }

    /// Tell every uploader of `table` about a local write.
    pub fn notify(&self, table: &str, knowledge: &Value, nuance: &Nuance) -> usize {
        let callbacks = self.snapshot(table);
        for callback in &callbacks {
            callback(table, knowledge, nuance);
        }
        callbacks.len()
    }
}

impl CallbackRegistry<DownloadCallback> {
    pub fn subscribe(
        &self,
        table: &str,
        callback: impl Fn(&StateMessage) -> Result<()> + Send + Sync + 'static,
    ) {
        self.push(table, Arc::new(callback));
    }

    /// Hand a received message to every downloader of its table. Stops at
    /// the first failing callback.
    pub fn notify(&self, message: &StateMessage) -> Result<usize> {
        let callbacks = self.snapshot(&message.table);
        for callback in &callbacks {
            callback(message)?;
        }
        Ok(callbacks.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CoreError, MergeError};
    use crate::merge::SerializedMerge;
    use crate::node::NodeId;
    use parking_lot::Mutex;
    use serde_json::json;

    fn message(table: &str) -> StateMessage {
        StateMessage::new(
            NodeId::new("peer"),
            table,
            json!({}),
            SerializedMerge::Named("overlay".to_string()),
        )
    }

    #[test]
    fn test_uploaders_run_in_registration_order() {
        let uploads = UploadRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let o = order.clone();
            uploads.subscribe("todo", move |_, _, _| o.lock().push(i));
        }

        assert_eq!(uploads.notify("todo", &json!({}), &Nuance::default()), 3);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_tables_are_isolated() {
        let uploads = UploadRegistry::new();
        uploads.subscribe("a", |_, _, _| {});

        assert_eq!(uploads.notify("b", &json!({}), &Nuance::default()), 0);
        assert!(uploads.is_empty("b"));
        assert_eq!(uploads.len("a"), 1);
    }

    #[test]
    fn test_downloader_error_stops_fan_out() {
        let downloads = DownloadRegistry::new();
        let reached = Arc::new(Mutex::new(false));

        downloads.subscribe("todo", |_| {
            Err(CoreError::Merge(MergeError::UnknownStrategy("x".into())))
        });
        let r = reached.clone();
        downloads.subscribe("todo", move |_| {
            *r.lock() = true;
            Ok(())
        });

        assert!(downloads.notify(&message("todo")).is_err());
        assert!(!*reached.lock());
        assert_eq!(downloads.notify(&message("other")).unwrap(), 0);
    }
}
