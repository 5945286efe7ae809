//! Rendering and styling collaborators.
//!
//! Elves never diffs markup itself. A [`Compositor`] turns table state into
//! markup for one element and a [`Renderer`] applies it; scoped stylesheets
//! go to a [`StyleSink`].

use crate::element::Element;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Builds markup for an element from the table's current state. `None`
/// leaves the element untouched.
pub type Compositor = Arc<dyn Fn(&Element, &Value) -> Option<String> + Send + Sync>;

pub type Hook = Arc<dyn Fn(&Element) + Send + Sync>;

/// Hooks run around every redraw.
#[derive(Clone, Default)]
pub struct Lifecycle {
    pub before_update: Option<Hook>,
    pub after_update: Option<Hook>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn before_update(mut self, hook: impl Fn(&Element) + Send + Sync + 'static) -> Self {
        self.before_update = Some(Arc::new(hook));
        self
    }

    pub fn after_update(mut self, hook: impl Fn(&Element) + Send + Sync + 'static) -> Self {
        self.after_update = Some(Arc::new(hook));
        self
    }
}

/// Applies markup to an element.
pub trait Renderer: Send + Sync {
    fn render(&self, target: &Element, markup: &str);
}

/// Renderer that records the latest markup per element id.
#[derive(Debug, Default)]
pub struct MarkupLog {
    latest: Mutex<HashMap<String, String>>,
    renders: Mutex<HashMap<String, usize>>,
}

impl MarkupLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn markup(&self, element_id: &str) -> Option<String> {
        self.latest.lock().get(element_id).cloned()
    }

    /// How many times markup was applied to the element.
    pub fn renders(&self, element_id: &str) -> usize {
        self.renders.lock().get(element_id).copied().unwrap_or(0)
    }
}

impl Renderer for MarkupLog {
    fn render(&self, target: &Element, markup: &str) {
        self.latest
            .lock()
            .insert(target.id().to_string(), markup.to_string());
        *self
            .renders
            .lock()
            .entry(target.id().to_string())
            .or_insert(0) += 1;
    }
}

/// Receives scoped stylesheet blocks.
pub trait StyleSink: Send + Sync {
    fn insert(&self, table: &str, block: String);
}

/// Style sink that keeps every block in memory, in insertion order.
#[derive(Debug, Default)]
pub struct StyleSheets {
    blocks: Mutex<Vec<(String, String)>>,
}

impl StyleSheets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_table(&self, table: &str) -> Vec<String> {
        self.blocks
            .lock()
            .iter()
            .filter(|(t, _)| t == table)
            .map(|(_, block)| block.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.blocks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.lock().is_empty()
    }
}

impl StyleSink for StyleSheets {
    fn insert(&self, table: &str, block: String) {
        self.blocks.lock().push((table.to_string(), block));
    }
}

/// Wrap `stylesheet` in a style block for `table`, with every `&` replaced
/// by the table name.
pub fn scope_stylesheet(table: &str, stylesheet: &str) -> String {
    format!(
        "<style type=\"text/css\" data-table=\"{}\">\n{}\n</style>",
        table,
        stylesheet.trim().replace('&', table)
    )
}
