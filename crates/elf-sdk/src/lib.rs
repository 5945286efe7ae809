//! Elves SDK - realtime shared-state tables
//!
//! Tables are named JSON values replicated across peers. Every local write
//! merges into the store, redraws the elements drawing that table, and is
//! uploaded over the realtime channel with the name of its merge strategy so
//! peers converge by applying the same merge.
//!
//! # Quick Start
//!
//! ```rust
//! use elf_sdk::channel::create_network;
//! use elf_sdk::prelude::*;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let (relay, mut channels) = create_network(2);
//! let bob = Elves::new(ElvesConfig::default(), Arc::new(channels.pop().unwrap()));
//! let alice = Elves::new(ElvesConfig::default(), Arc::new(channels.pop().unwrap()));
//!
//! for elves in [&alice, &bob] {
//!     let votes = elves.table("votes", json!({})).unwrap();
//!     let _draw = votes.draw(|_, state| Some(state.to_string()), Lifecycle::new()).unwrap();
//!     elves.mount(Element::new("votes"));
//!     elves.pump();
//! }
//!
//! alice
//!     .teach_with("votes", json!({"yes": 1}), Nuance::named("increment"))
//!     .unwrap();
//! bob.pump();
//! assert_eq!(bob.learn("votes"), json!({"yes": 1}));
//! # drop(relay);
//! ```
//!
//! # Architecture
//!
//! - [`elves`] - the context owning store, registries and sync
//! - [`table`] - per-table handle (`learn`, `teach`, `draw`, `when`, `style`)
//! - [`sync`] - upload/download protocol and the handshake queue
//! - [`channel`] - realtime channel abstraction and an in-memory relay
//! - [`element`] / [`events`] - mount points, selectors, listeners
//! - [`render`] - compositor, renderer and stylesheet contracts
//! - [`config`] / [`error`]

pub mod channel;
pub mod config;
pub mod element;
pub mod elves;
pub mod error;
pub mod events;
pub mod render;
pub mod sync;
pub mod table;

pub use channel::{Channel, ChannelError, ChannelEvent, MemoryChannel, MemoryRelay, Outbound};
pub use config::{ElvesConfig, ElvesConfigBuilder};
pub use element::{Element, Selector};
pub use elves::Elves;
pub use error::{Result, SdkError};
pub use events::{Event, Unlisten, CREATE};
pub use render::{Compositor, Lifecycle, MarkupLog, Renderer, StyleSheets, StyleSink};
pub use sync::{Connector, SyncLayer};
pub use table::Table;

pub use elf_core::{NodeId, Nuance, StateMessage};

/// Everything needed to create tables and draw them.
pub mod prelude {
    pub use crate::{
        Element, Elves, ElvesConfig, ElvesConfigBuilder, Event, Lifecycle, Nuance, Table,
        Unlisten,
    };
}
