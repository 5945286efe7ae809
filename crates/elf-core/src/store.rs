//! The table store: one state value per table name.
//!
//! Every `set` replaces the whole state of one table with the result of the
//! merge and then notifies. Merges run while the table map is locked, so a
//! merge function must not call back into the store.

use crate::bus::Notify;
use crate::error::MergeError;
use crate::merge::{MergeFn, MergeRegistry, Nuance};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

struct Silent;

impl Notify for Silent {
    fn notify(&self, _table: &str) {}
}

/// The default state of a table nobody has written yet.
pub fn empty_state() -> Value {
    Value::Object(Map::new())
}

pub struct Store {
    tables: RwLock<HashMap<String, Value>>,
    merges: RwLock<MergeRegistry>,
    notifier: Arc<dyn Notify>,
}

impl Store {
    /// Create a store with the built-in merge strategies.
    pub fn new(notifier: Arc<dyn Notify>) -> Self {
        Self::with_registry(notifier, MergeRegistry::new())
    }

    pub fn with_registry(notifier: Arc<dyn Notify>, merges: MergeRegistry) -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            merges: RwLock::new(merges),
            notifier,
        }
    }

    /// A store that notifies nobody.
    pub fn detached() -> Self {
        Self::new(Arc::new(Silent))
    }

    /// Current state of `table`, or `{}` if it was never written.
    pub fn get(&self, table: &str) -> Value {
        self.tables
            .read()
            .get(table)
            .cloned()
            .unwrap_or_else(empty_state)
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.read().contains_key(table)
    }

    /// Names of every table written so far, sorted.
    pub fn tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Merge `knowledge` into `table` and notify.
    ///
    /// An unresolvable merge leaves the table untouched and fires nothing.
    pub fn set(&self, table: &str, knowledge: &Value, nuance: &Nuance) -> Result<Value, MergeError> {
        let merge = match self.resolve(nuance) {
            Ok(merge) => merge,
            Err(e) => {
                debug!(table, nuance = ?nuance, error = %e, "merge unresolved, table left unchanged");
                return Err(e);
            }
        };
        Ok(self.apply(table, knowledge, &merge))
    }

    /// Merge with an already-resolved function and notify.
    pub fn apply(&self, table: &str, knowledge: &Value, merge: &MergeFn) -> Value {
        let wisdom = {
            let mut tables = self.tables.write();
            let current = tables.get(table).cloned().unwrap_or_else(empty_state);
            let next = merge(&current, knowledge);
            tables.insert(table.to_string(), next.clone());
            next
        };
        trace!(table, "table state replaced");
        self.notifier.notify(table);
        wisdom
    }

    pub fn resolve(&self, nuance: &Nuance) -> Result<MergeFn, MergeError> {
        self.merges.read().resolve(nuance)
    }

    /// Add or replace a parameterised merge strategy.
    pub fn register_merge(
        &self,
        name: impl Into<String>,
        handler: impl Fn(&[Value]) -> Result<MergeFn, MergeError> + Send + Sync + 'static,
    ) {
        self.merges.write().register(name, handler);
    }

    /// Add or replace a parameterless merge strategy.
    pub fn register_merge_fn(
        &self,
        name: impl Into<String>,
        merge: impl Fn(&Value, &Value) -> Value + Send + Sync + 'static,
    ) {
        self.merges.write().register_fn(name, merge);
    }

    pub fn merge_names(&self) -> Vec<String> {
        self.merges.read().names()
    }
}
