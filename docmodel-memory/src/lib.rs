//! In-memory document storage backend for docmodel.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait.
//! It uses async-aware read-write locks for concurrent access and is ideal for development,
//! testing, and small-scale deployments.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using async-aware RwLock
//! - **MongoDB filter syntax** - Dotted paths, array matching, comparison, logical and regex operators
//! - **Update operators** - `$set`, `$unset`, `$inc`, `$push`, `$addToSet`, `$pull`, `$rename` and more
//! - **Unique indexes** - Duplicate keys fail with code `11000`, like MongoDB
//!
//! # Quick Start
//!
//! ```ignore
//! use docmodel::{memory::InMemoryStore, prelude::*};
//! use bson::doc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = InMemoryStore::builder().build().await?;
//!     let store = DocumentStore::new(backend);
//!
//!     let users = store
//!         .model(ModelDefinition::new("users", SchemaNode::object().property("name", SchemaNode::string())))
//!         .await?;
//!
//!     users.insert_one(doc! { "name": "Alice" }, None).await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmodel_memory;

pub mod store;
mod evaluator;
mod projection;
mod update;

pub use store::{InMemoryStore, InMemoryStoreBuilder};
