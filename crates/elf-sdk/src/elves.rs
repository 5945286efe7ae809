//! The Elves context: one per process, shared by `Arc`.

use crate::channel::{Channel, ChannelEvent};
use crate::config::ElvesConfig;
use crate::element::{Element, Selector};
use crate::error::Result;
use crate::events::{Event, Listeners, Unlisten, CREATE};
use crate::render::{
    scope_stylesheet, Compositor, Lifecycle, MarkupLog, Renderer, StyleSheets, StyleSink,
};
use crate::sync::SyncLayer;
use crate::table::Table;
use elf_core::{
    DownloadRegistry, Insights, MergeError, MergeFn, NodeId, NotificationBus, Nuance,
    ReactiveRegistry, StateMessage, Store, UploadRegistry,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use ulid::Ulid;

struct Mounted {
    element: Arc<Element>,
    reactive: bool,
}

/// Owns the store, its notification fan-out, the sync layer and every
/// registry the public API touches.
///
/// # Example
///
/// ```rust
/// use elf_sdk::channel::MemoryRelay;
/// use elf_sdk::{Element, Elves, ElvesConfig, Lifecycle};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// let relay = MemoryRelay::new();
/// let elves = Elves::new(ElvesConfig::default(), Arc::new(relay.channel("local")));
///
/// let counter = elves.table("click-counter", json!({"count": 0})).unwrap();
/// let _draw = counter
///     .draw(
///         |_, state| Some(format!("<button>{}</button>", state["count"])),
///         Lifecycle::new(),
///     )
///     .unwrap();
/// elves.mount(Element::new("click-counter"));
///
/// counter.teach(json!({"count": 1})).unwrap();
/// assert_eq!(counter.learn(), json!({"count": 1}));
/// ```
pub struct Elves {
    config: ElvesConfig,
    node_id: NodeId,
    store: Arc<Store>,
    bus: Arc<NotificationBus>,
    reactive: Arc<ReactiveRegistry>,
    uploads: Arc<UploadRegistry>,
    downloads: Arc<DownloadRegistry>,
    insights: Arc<Insights>,
    listeners: Arc<Listeners>,
    sync: Arc<SyncLayer>,
    renderer: Arc<dyn Renderer>,
    styles: Arc<dyn StyleSink>,
    elements: Mutex<BTreeMap<String, Mounted>>,
    synced: Mutex<HashSet<(String, String)>>,
    events: Mutex<Option<mpsc::UnboundedReceiver<ChannelEvent>>>,
    this: Weak<Elves>,
}

impl Elves {
    /// Create a context that renders into a [`MarkupLog`] and keeps styles
    /// in [`StyleSheets`].
    pub fn new(config: ElvesConfig, channel: Arc<dyn Channel>) -> Arc<Self> {
        Self::with_collaborators(
            config,
            channel,
            Arc::new(MarkupLog::new()),
            Arc::new(StyleSheets::new()),
        )
    }

    pub fn with_collaborators(
        config: ElvesConfig,
        channel: Arc<dyn Channel>,
        renderer: Arc<dyn Renderer>,
        styles: Arc<dyn StyleSink>,
    ) -> Arc<Self> {
        let node_id = config
            .node_id
            .clone()
            .map(NodeId::new)
            .unwrap_or_else(NodeId::generate);

        let reactive = Arc::new(ReactiveRegistry::new());
        let dispatcher = reactive.clone();
        let bus = Arc::new(NotificationBus::with_dispatcher(move |table: &str| {
            dispatcher.react(table);
        }));

        let store = Arc::new(Store::new(bus.clone()));
        let uploads = Arc::new(UploadRegistry::new());
        let downloads = Arc::new(DownloadRegistry::new());
        let insights = Arc::new(Insights::new());

        let events = channel.subscribe();
        if events.is_none() {
            warn!(node = %node_id, "channel events already taken; peer updates will not arrive");
        }
        let sync = SyncLayer::new(
            node_id.clone(),
            channel,
            store.clone(),
            uploads.clone(),
            downloads.clone(),
        );

        info!(node = %node_id, endpoint = %config.endpoint(), sync = config.sync_enabled, "elves ready");

        Arc::new_cyclic(|this| Self {
            config,
            node_id,
            store,
            bus,
            reactive,
            uploads,
            downloads,
            listeners: Arc::new(Listeners::new(insights.clone())),
            insights,
            sync,
            renderer,
            styles,
            elements: Mutex::new(BTreeMap::new()),
            synced: Mutex::new(HashSet::new()),
            events: Mutex::new(events),
            this: this.clone(),
        })
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn config(&self) -> &ElvesConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn sync(&self) -> &Arc<SyncLayer> {
        &self.sync
    }

    pub fn is_connected(&self) -> bool {
        self.sync.is_connected()
    }

    /// Handle every channel event already received, without blocking.
    ///
    /// Not available once [`Elves::spawn_sync`] has taken the receiver.
    pub fn pump(&self) -> usize {
        let mut events = match self.events.lock().take() {
            Some(events) => events,
            None => return 0,
        };
        let count = self.sync.drain(&mut events);
        *self.events.lock() = Some(events);
        count
    }

    /// Move channel processing onto a tokio task.
    pub fn spawn_sync(&self) -> Option<JoinHandle<()>> {
        let events = self.events.lock().take()?;
        debug!(node = %self.node_id, "spawning sync loop");
        Some(tokio::spawn(self.sync.clone().run(events)))
    }

    // Tables

    /// Create (or reopen) a table, teaching it `initial` with the default
    /// merge.
    pub fn table(self: &Arc<Self>, name: &str, initial: Value) -> Result<Table> {
        self.insights.record("elf", name);
        self.teach(name, initial)?;
        Ok(Table::new(name, self.clone()))
    }

    pub fn learn(&self, table: &str) -> Value {
        self.insights.record("elf:learn", table);
        self.store.get(table)
    }

    pub fn teach(&self, table: &str, knowledge: Value) -> Result<Value> {
        let nuance = Nuance::named(self.config.default_merge.clone());
        self.teach_with(table, knowledge, nuance)
    }

    /// Merge `knowledge` into the table, then hand the write to every
    /// uploader. A merge that cannot be resolved changes nothing.
    pub fn teach_with(&self, table: &str, knowledge: Value, nuance: Nuance) -> Result<Value> {
        self.insights.record("elf:teach", table);
        let state = self.store.set(table, &knowledge, &nuance)?;
        self.uploads.notify(table, &knowledge, &nuance);
        Ok(state)
    }

    pub fn register_merge(
        &self,
        name: impl Into<String>,
        handler: impl Fn(&[Value]) -> std::result::Result<MergeFn, MergeError> + Send + Sync + 'static,
    ) {
        self.store.register_merge(name, handler);
    }

    pub fn register_merge_fn(
        &self,
        name: impl Into<String>,
        merge: impl Fn(&Value, &Value) -> Value + Send + Sync + 'static,
    ) {
        self.store.register_merge_fn(name, merge);
    }

    // Drawing

    /// Draw `table` into every element matching it, now and as they mount.
    pub fn draw(
        &self,
        table: &str,
        compositor: impl Fn(&Element, &Value) -> Option<String> + Send + Sync + 'static,
        lifecycle: Lifecycle,
    ) -> Result<Unlisten> {
        self.insights.record("elf:draw", table);
        let compositor: Compositor = Arc::new(compositor);
        let this = self.this.clone();
        let table_name = table.to_string();

        self.listen(CREATE, table, move |event: &Event| {
            let elves = match this.upgrade() {
                Some(elves) => elves,
                None => return,
            };
            elves.udp_sync(&table_name, &event.target);

            let weak = this.clone();
            let table = table_name.clone();
            let target = event.target.clone();
            let compositor = compositor.clone();
            let lifecycle = lifecycle.clone();
            let redraw = move || {
                if let Some(elves) = weak.upgrade() {
                    elves.update(&table, &target, &compositor, &lifecycle);
                }
            };
            elves
                .reactive
                .register(&table_name, event.target.id(), redraw.clone());
            redraw();
        })
    }

    /// Redraw one element from the table's current state.
    pub fn update(
        &self,
        table: &str,
        target: &Element,
        compositor: &Compositor,
        lifecycle: &Lifecycle,
    ) {
        self.insights.record("elf:update", table);
        if let Some(hook) = &lifecycle.before_update {
            hook(target);
        }
        let state = self.store.get(table);
        if let Some(markup) = compositor(target, &state) {
            self.renderer.render(target, &markup);
        }
        if let Some(hook) = &lifecycle.after_update {
            hook(target);
        }
    }

    pub fn style(&self, table: &str, stylesheet: &str) {
        self.insights.record("elf:style", table);
        self.styles.insert(table, scope_stylesheet(table, stylesheet));
    }

    // Events

    /// Listen for `kind` on the table's elements, or on their descendants
    /// matching `suffix`.
    pub fn when(
        &self,
        table: &str,
        kind: &str,
        suffix: Option<&str>,
        handler: impl Fn(&Event) + Send + Sync + 'static,
    ) -> Result<Unlisten> {
        let selector = match suffix {
            Some(suffix) => format!("{} {}", table, suffix),
            None => table.to_string(),
        };
        self.insights.record(&format!("elf:when:{}", kind), &selector);
        self.listen(kind, &selector, handler)
    }

    /// Listening for `create` also observes the selector.
    pub fn listen(
        &self,
        kind: &str,
        selector: &str,
        handler: impl Fn(&Event) + Send + Sync + 'static,
    ) -> Result<Unlisten> {
        let unlisten = self.listeners.listen(kind, selector, handler)?;
        if kind == CREATE {
            self.observe(selector)?;
        }
        Ok(unlisten)
    }

    pub fn dispatch(&self, event: Event) -> usize {
        self.listeners.dispatch(&event)
    }

    // Elements

    /// Mount an element, giving it an id if it has none. It becomes
    /// reactive right away if an observed selector matches it.
    pub fn mount(&self, element: Element) -> Arc<Element> {
        let element = if element.has_id() {
            element
        } else {
            element.with_id(Ulid::new().to_string())
        };

        let element = {
            let mut elements = self.elements.lock();
            match elements.get(element.id()) {
                Some(existing) => existing.element.clone(),
                None => {
                    let element = Arc::new(element);
                    elements.insert(
                        element.id().to_string(),
                        Mounted {
                            element: element.clone(),
                            reactive: false,
                        },
                    );
                    element
                }
            }
        };

        if self.listeners.is_observed(&element) {
            self.create(&element);
        }
        element
    }

    pub fn unmount(&self, id: &str) -> bool {
        let removed = self.elements.lock().remove(id).is_some();
        if removed {
            self.reactive.forget(id);
            self.synced.lock().retain(|(element, _)| element != id);
        }
        removed
    }

    pub fn element(&self, id: &str) -> Option<Arc<Element>> {
        self.elements.lock().get(id).map(|m| m.element.clone())
    }

    pub fn is_reactive(&self, id: &str) -> bool {
        self.elements.lock().get(id).map_or(false, |m| m.reactive)
    }

    /// Observe `selector` and create every mounted element it matches that
    /// is not reactive yet. Returns how many were created.
    pub fn observe(&self, selector: &str) -> Result<usize> {
        self.listeners.observe(selector)?;
        let selector = Selector::parse(selector)?;
        let pending: Vec<Arc<Element>> = self
            .elements
            .lock()
            .values()
            .filter(|m| !m.reactive && selector.matches(&m.element))
            .map(|m| m.element.clone())
            .collect();

        Ok(pending.iter().filter(|e| self.create(e)).count())
    }

    fn create(&self, element: &Arc<Element>) -> bool {
        {
            let mut elements = self.elements.lock();
            match elements.get_mut(element.id()) {
                Some(mounted) if !mounted.reactive => mounted.reactive = true,
                _ => return false,
            }
        }
        self.insights.record("elf:create", element.tag());
        self.listeners.dispatch(&Event::new(CREATE, element.clone()));
        true
    }

    /// Bind `target` to peer sync for `table`, at most once per pair.
    pub fn udp_sync(&self, table: &str, target: &Element) -> bool {
        if !self.config.sync_enabled || target.is_offline() {
            debug!(table, element = target.id(), "sync skipped");
            return false;
        }
        let fresh = self
            .synced
            .lock()
            .insert((target.id().to_string(), table.to_string()));
        if fresh {
            self.sync.bind(table, target.id());
        }
        fresh
    }

    // Callback registries and the bus

    pub fn subscribe_to_upload(
        &self,
        table: &str,
        callback: impl Fn(&str, &Value, &Nuance) + Send + Sync + 'static,
    ) {
        self.uploads.subscribe(table, callback);
    }

    pub fn subscribe_to_download(
        &self,
        table: &str,
        callback: impl Fn(&StateMessage) -> elf_core::Result<()> + Send + Sync + 'static,
    ) {
        self.downloads.subscribe(table, callback);
    }

    /// Add a store listener under `key`. Returns `true` if one was replaced.
    /// Redraws do not go through a key, so no key can stop them.
    pub fn subscribe(&self, key: &str, listener: impl Fn(&str) + Send + Sync + 'static) -> bool {
        self.bus.subscribe(key, listener)
    }

    pub fn unsubscribe(&self, key: &str) -> bool {
        self.bus.unsubscribe(key)
    }

    pub fn insights(&self) -> BTreeMap<String, u64> {
        self.insights.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryRelay;
    use crate::config::ElvesConfigBuilder;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn local() -> (Arc<Elves>, Arc<MarkupLog>, Arc<StyleSheets>) {
        let relay = MemoryRelay::new();
        let markup = Arc::new(MarkupLog::new());
        let styles = Arc::new(StyleSheets::new());
        let elves = Elves::with_collaborators(
            ElvesConfigBuilder::new().node_id("local").build(),
            Arc::new(relay.channel("local")),
            markup.clone(),
            styles.clone(),
        );
        (elves, markup, styles)
    }

    fn count_compositor(_: &Element, state: &Value) -> Option<String> {
        Some(format!("<b>{}</b>", state["n"]))
    }

    #[test]
    fn test_table_starts_with_initial_state() {
        let (elves, _, _) = local();
        let t = elves.table("t", json!({"a": 1})).unwrap();
        assert_eq!(t.learn(), json!({"a": 1}));
        assert_eq!(elves.learn("missing"), json!({}));
        assert_eq!(elves.node_id().as_str(), "local");
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let relay = MemoryRelay::new();
        let a = Elves::new(ElvesConfig::default(), Arc::new(relay.channel("a")));
        let b = Elves::new(ElvesConfig::default(), Arc::new(relay.channel("b")));
        assert_ne!(a.node_id(), b.node_id());
    }

    #[test]
    fn test_teach_with_unknown_strategy_changes_nothing() {
        let (elves, _, _) = local();
        let uploads = Arc::new(AtomicUsize::new(0));
        let u = uploads.clone();
        elves.subscribe_to_upload("t", move |_, _, _| {
            u.fetch_add(1, Ordering::SeqCst);
        });
        elves.teach("t", json!({"a": 1})).unwrap();

        assert!(elves
            .teach_with("t", json!({"a": 2}), Nuance::named("nope"))
            .is_err());
        assert_eq!(elves.learn("t"), json!({"a": 1}));
        assert_eq!(uploads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_mount_before_draw() {
        let (elves, markup, _) = local();
        elves.table("n-view", json!({"n": 1})).unwrap();
        let e = elves.mount(Element::new("n-view"));
        assert!(e.has_id());
        assert!(!elves.is_reactive(e.id()));

        let _draw = elves
            .draw("n-view", count_compositor, Lifecycle::new())
            .unwrap();
        assert!(elves.is_reactive(e.id()));
        assert_eq!(markup.markup(e.id()).as_deref(), Some("<b>1</b>"));
    }

    #[test]
    fn test_draw_before_mount_and_redraw_on_teach() {
        let (elves, markup, _) = local();
        let t = elves.table("n-view", json!({"n": 1})).unwrap();
        let _draw = t.draw(count_compositor, Lifecycle::new()).unwrap();

        let e = elves.mount(Element::new("n-view").with_id("v1"));
        assert_eq!(markup.renders("v1"), 1);

        t.teach(json!({"n": 2})).unwrap();
        assert_eq!(markup.markup(e.id()).as_deref(), Some("<b>2</b>"));
        assert_eq!(markup.renders("v1"), 2);

        // Mounting the same id again does not create it twice.
        elves.mount(Element::new("n-view").with_id("v1"));
        assert_eq!(markup.renders("v1"), 2);
    }

    #[test]
    fn test_lifecycle_hooks_wrap_render() {
        let (elves, _, _) = local();
        let order = Arc::new(Mutex::new(Vec::new()));
        let (before, after) = (order.clone(), order.clone());
        let seen = order.clone();

        let t = elves.table("h", json!({})).unwrap();
        let _draw = t
            .draw(
                move |_, _| {
                    seen.lock().push("compose");
                    None
                },
                Lifecycle::new()
                    .before_update(move |_| before.lock().push("before"))
                    .after_update(move |_| after.lock().push("after")),
            )
            .unwrap();
        elves.mount(Element::new("h"));

        assert_eq!(*order.lock(), vec!["before", "compose", "after"]);
    }

    #[test]
    fn test_compositor_none_skips_render() {
        let (elves, markup, _) = local();
        let t = elves.table("quiet", json!({})).unwrap();
        let _draw = t.draw(|_, _| None, Lifecycle::new()).unwrap();
        let e = elves.mount(Element::new("quiet"));
        assert_eq!(markup.renders(e.id()), 0);
    }

    #[test]
    fn test_unmount_stops_redraws() {
        let (elves, markup, _) = local();
        let t = elves.table("n-view", json!({"n": 1})).unwrap();
        let _draw = t.draw(count_compositor, Lifecycle::new()).unwrap();
        let e = elves.mount(Element::new("n-view"));

        assert!(elves.unmount(e.id()));
        t.teach(json!({"n": 5})).unwrap();
        assert_eq!(markup.renders(e.id()), 1);
        assert!(!elves.unmount(e.id()));
    }

    #[test]
    fn test_unlisten_draw_stops_creating() {
        let (elves, markup, _) = local();
        let t = elves.table("n-view", json!({"n": 1})).unwrap();
        let draw = t.draw(count_compositor, Lifecycle::new()).unwrap();
        draw.unlisten();

        let e = elves.mount(Element::new("n-view"));
        assert!(!elves.is_reactive(e.id()));
        assert_eq!(markup.renders(e.id()), 0);
    }

    #[test]
    fn test_when_scopes_to_table_descendants() {
        let (elves, _, _) = local();
        let t = elves.table("todo-list", json!({"items": []})).unwrap();
        let clicks = Arc::new(AtomicUsize::new(0));
        let c = clicks.clone();
        let _h = t
            .when_within("click", ".add", move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        let list = elves.mount(Element::new("todo-list"));
        let inside = Arc::new(Element::new("button").with_class("add").within(list));
        let outside = Arc::new(Element::new("button").with_class("add"));

        assert_eq!(elves.dispatch(Event::new("click", inside)), 1);
        assert_eq!(elves.dispatch(Event::new("click", outside)), 0);
        assert_eq!(clicks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_style_is_scoped() {
        let (elves, _, styles) = local();
        let t = elves.table("card", json!({})).unwrap();
        t.style("& { color: red }");
        assert_eq!(styles.for_table("card").len(), 1);
        assert!(styles.for_table("card")[0].contains("card { color: red }"));
    }

    #[test]
    fn test_insights_count_operations() {
        let (elves, _, _) = local();
        let t = elves.table("t", json!({})).unwrap();
        t.learn();
        t.teach(json!({"x": 1})).unwrap();
        let _d = t.draw(|_, _| None, Lifecycle::new()).unwrap();
        elves.mount(Element::new("t"));
        t.style("&{}");
        let _w = t.when("click", |_| {}).unwrap();

        let insights = elves.insights();
        assert_eq!(insights["elf:t"], 1);
        assert_eq!(insights["elf:teach:t"], 2);
        assert_eq!(insights["elf:learn:t"], 1);
        assert_eq!(insights["elf:draw:t"], 1);
        assert_eq!(insights["elf:create:t"], 1);
        assert_eq!(insights["elf:listen:create:t"], 1);
        assert_eq!(insights["elf:update:t"], 1);
        assert_eq!(insights["elf:style:t"], 1);
        assert_eq!(insights["elf:when:click:t"], 1);
    }

    #[test]
    fn test_bus_listener_sees_every_write() {
        let (elves, _, _) = local();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        assert!(!elves.subscribe("audit", move |table| s.lock().push(table.to_string())));

        elves.teach("a", json!({})).unwrap();
        elves.teach("b", json!({})).unwrap();
        assert!(elves.unsubscribe("audit"));
        elves.teach("c", json!({})).unwrap();

        assert_eq!(*seen.lock(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_bus_keys_cannot_silence_redraws() {
        let (elves, markup, _) = local();
        let t = elves.table("n-view", json!({"n": 1})).unwrap();
        let _draw = t.draw(count_compositor, Lifecycle::new()).unwrap();
        elves.mount(Element::new("n-view").with_id("v1"));

        assert!(!elves.unsubscribe("elf:react"));
        elves.subscribe("elf:react", |_| {});
        assert!(elves.unsubscribe("elf:react"));

        t.teach(json!({"n": 2})).unwrap();
        assert_eq!(markup.markup("v1").as_deref(), Some("<b>2</b>"));
    }

    #[test]
    fn test_sync_disabled_never_binds() {
        let relay = MemoryRelay::new();
        let elves = Elves::new(
            ElvesConfigBuilder::new().sync_enabled(false).build(),
            Arc::new(relay.channel("a")),
        );
        relay.connect("a");
        elves.pump();

        let t = elves.table("t", json!({})).unwrap();
        let _d = t.draw(|_, _| None, Lifecycle::new()).unwrap();
        elves.mount(Element::new("t"));

        assert!(relay.history().is_empty());
        assert!(!elves.sync().is_bound("t"));
    }

    #[test]
    fn test_redraw_may_teach_again() {
        let (elves, _, _) = local();
        let t = elves.table("echo", json!({"n": 0})).unwrap();
        let weak = Arc::downgrade(&elves);
        let _d = t
            .draw(
                move |_, state| {
                    if state["n"] == json!(1) {
                        if let Some(elves) = weak.upgrade() {
                            elves.teach("mirror", json!({"seen": true})).unwrap();
                        }
                    }
                    None
                },
                Lifecycle::new(),
            )
            .unwrap();
        elves.mount(Element::new("echo"));

        t.teach(json!({"n": 1})).unwrap();
        assert_eq!(elves.learn("mirror"), json!({"seen": true}));
    }
}
