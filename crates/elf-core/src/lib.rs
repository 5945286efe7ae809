//! # elf-core
//!
//! Replicated table store for Elves.
//!
//! This crate provides:
//! - [`Store`]: one JSON state value per named table, replaced on every write
//!   by a pluggable merge
//! - [`MergeRegistry`]: the closed set of named merge strategies peers agree on
//! - [`NotificationBus`] and [`ReactiveRegistry`]: synchronous fan-out after
//!   every write
//! - [`UploadRegistry`] / [`DownloadRegistry`]: per-table sync hooks
//! - [`StateMessage`] and [`NodeId`]: the sync payload and its sender identity
//!
//! ## Example
//!
//! ```rust
//! use elf_core::{NotificationBus, Nuance, Store};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let bus = Arc::new(NotificationBus::new());
//! let store = Store::new(bus.clone());
//! bus.subscribe("log", |table| println!("{} changed", table));
//!
//! store.set("counter", &json!({"n": 1}), &Nuance::default()).unwrap();
//! store.set("counter", &json!({"n": 2}), &Nuance::named("increment")).unwrap();
//! assert_eq!(store.get("counter"), json!({"n": 3}));
//! ```

pub mod bus;
pub mod callbacks;
pub mod error;
pub mod insights;
pub mod merge;
pub mod message;
pub mod node;
pub mod reactive;
pub mod store;

pub use bus::{Listener, NotificationBus, Notify};
pub use callbacks::{
    CallbackRegistry, DownloadCallback, DownloadRegistry, UploadCallback, UploadRegistry,
};
pub use error::{CoreError, MergeError, Result};
pub use insights::Insights;
pub use merge::{MergeFn, MergeHandler, MergeRegistry, Nuance, SerializedMerge};
pub use message::{has_table, StateMessage};
pub use node::NodeId;
pub use reactive::{ReactiveRegistry, Redraw};
pub use store::{empty_state, Store};
