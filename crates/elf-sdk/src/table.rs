//! Handle to one named table.

use crate::element::Element;
use crate::error::Result;
use crate::events::{Event, Unlisten};
use crate::elves::Elves;
use crate::render::Lifecycle;
use elf_core::Nuance;
use serde_json::Value;
use std::sync::Arc;

/// A table bound to its [`Elves`] context. Cheap to clone.
#[derive(Clone)]
pub struct Table {
    name: String,
    elves: Arc<Elves>,
}

impl Table {
    pub(crate) fn new(name: &str, elves: Arc<Elves>) -> Self {
        Self {
            name: name.to_string(),
            elves,
        }
    }

    /// The table name, which is also the selector its elements match.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn elves(&self) -> &Arc<Elves> {
        &self.elves
    }

    pub fn learn(&self) -> Value {
        self.elves.learn(&self.name)
    }

    pub fn teach(&self, knowledge: Value) -> Result<Value> {
        self.elves.teach(&self.name, knowledge)
    }

    pub fn teach_with(&self, knowledge: Value, nuance: Nuance) -> Result<Value> {
        self.elves.teach_with(&self.name, knowledge, nuance)
    }

    pub fn draw(
        &self,
        compositor: impl Fn(&Element, &Value) -> Option<String> + Send + Sync + 'static,
        lifecycle: Lifecycle,
    ) -> Result<Unlisten> {
        self.elves.draw(&self.name, compositor, lifecycle)
    }

    pub fn when(
        &self,
        kind: &str,
        handler: impl Fn(&Event) + Send + Sync + 'static,
    ) -> Result<Unlisten> {
        self.elves.when(&self.name, kind, None, handler)
    }

    /// Like [`Table::when`], for descendants matching `suffix`.
    pub fn when_within(
        &self,
        kind: &str,
        suffix: &str,
        handler: impl Fn(&Event) + Send + Sync + 'static,
    ) -> Result<Unlisten> {
        self.elves.when(&self.name, kind, Some(suffix), handler)
    }

    pub fn style(&self, stylesheet: &str) {
        self.elves.style(&self.name, stylesheet)
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table").field("name", &self.name).finish()
    }
}
