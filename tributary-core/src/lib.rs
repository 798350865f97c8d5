//! Tributary Core - MongoDB Change Streams to CloudEvents
//!
//! This crate provides the building blocks of the Tributary receive adapter: it
//! watches a MongoDB collection or database and republishes every change as a
//! CloudEvents 1.0 envelope.
//!
//! # Key Components
//!
//! - **Decoding**: [`event`] turns raw change records into typed [`event::ChangeObject`]s
//! - **Mapping**: [`envelope`] maps changes to [`envelope::EventEnvelope`]s
//! - **Consuming**: [`consumer`] drives the pull, decode, map, send loop
//! - **Bootstrap**: [`adapter`] wires configuration, MongoDB and the sink together
//! - **Seams**: [`stream::ChangeSource`] upstream and [`sink::EventSink`] downstream
//!
//! # Example
//!
//! ```rust
//! use tributary_core::event::{decode_change, OperationType};
//! use bson::doc;
//!
//! let change = decode_change(&doc! {
//!     "_id": { "_data": "8263A1" },
//!     "ns": { "db": "shop", "coll": "orders" },
//!     "operationType": "insert",
//!     "fullDocument": { "_id": "order-1", "total": 42 },
//! })
//! .unwrap();
//!
//! match change.operation {
//!     OperationType::Insert => println!("New document in {}", change.collection_name()),
//!     OperationType::Delete => println!("Document deleted"),
//!     _ => println!("Other operation"),
//! }
//! ```

pub mod adapter;
pub mod config;
pub mod consumer;
pub mod envelope;
pub mod event;
pub mod metrics;
pub mod sink;
pub mod stream;
pub mod watch_level;

pub use adapter::{Adapter, AdapterError};
pub use config::AdapterConfig;
pub use sink::{DeliveryResult, EventSink};
