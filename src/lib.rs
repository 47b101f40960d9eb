//! res_rs: a client for the RES protocol.
//!
//! The RES protocol synchronizes live, reference-linked resources (models
//! and collections) between a gateway and its clients over a single
//! WebSocket connection. This crate implements the client side:
//!
//! - **Resource cache**: every subscribed resource is materialized once and
//!   kept identity-stable; resources reference each other through the cache,
//!   so cyclic graphs work without ownership cycles.
//! - **Live synchronization**: server-pushed `change`, `add`, `remove` and
//!   `unsubscribe` events mutate the cache and surface on an event bus.
//! - **Reference counting**: resources stay cached while application
//!   listeners or inbound references anchor them; a two-pass graph
//!   classification decides what to evict, keep or demote to stale when an
//!   anchor disappears.
//! - **Recovery**: on connection loss every subscribed resource goes stale;
//!   reconnecting resubscribes them and reconciles cached state against
//!   fresh snapshots, emitting only the events the application missed.
//!
//! # Getting started
//!
//! ```no_run
//! use res_rs::{EventData, ResClient};
//! use std::sync::Arc;
//!
//! # async fn run() -> res_rs::Result<()> {
//! let client = ResClient::new("ws://localhost:8080");
//!
//! let book = client.get("library.book.1").await?;
//! let model = book.as_model().expect("a model");
//!
//! // Listen for changes; the listener also keeps the resource cached.
//! client.resource_on(
//!     "library.book.1",
//!     Some("change"),
//!     Arc::new(|event, data| {
//!         if let EventData::Change { old_values } = data {
//!             println!("{event}: was {old_values:?}");
//!         }
//!     }),
//! )?;
//!
//! client
//!     .set_model(
//!         "library.book.1",
//!         [("title".to_string(), Some("Dune".into()))],
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod bus;
mod cache;
pub mod client;
mod diff;
pub mod error;
pub mod resources;
pub mod transport;
pub mod types;

pub use bus::{default_bus, EventBus, EventData, Handler, HandlerId};
pub use client::{ClientConfig, OnConnect, ResClient};
pub use error::{Error, Result};
pub use resources::{
    Collection, CollectionData, CollectionFactory, Model, ModelData, ModelFactory, Resource,
    ResourceError, ResourceType,
};
pub use transport::{Connection, Transport, WsTransport};
pub use types::{ErrorPayload, Rid, Value};
