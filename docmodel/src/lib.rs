//! Main docmodel crate providing schema-aware models over pluggable document stores.
//!
//! This crate is the primary entry point for users of the docmodel framework. It re-exports
//! the core types from the sub-crates and gives access to the storage backends and the
//! standard plugins.
//!
//! # Features
//!
//! - **Schemas** - Declare document shapes in code or as `$jsonSchema`-like documents
//! - **Hooks** - Run pre/post callbacks around every operation, with batch fan-out
//! - **Plugins** - Defaults, timestamps, casting, validation, population and more
//! - **Multiple backends** - In-memory and MongoDB storage behind one trait
//!
//! # Quick Start
//!
//! ```ignore
//! use docmodel::{prelude::*, memory::InMemoryStore, plugins::standard_plugins};
//! use bson::doc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = DocumentStore::new(InMemoryStore::builder().build().await.unwrap());
//!
//!     let schema = SchemaNode::object()
//!         .property("name", SchemaNode::string().required().annotate("trim", true))
//!         .property("tags", SchemaNode::array(SchemaNode::string().annotate("trim", true)))
//!         .property("status", SchemaNode::string().annotate("default", "active"));
//!
//!     let users = store
//!         .model(ModelDefinition::new("users", schema).plugins(standard_plugins()))
//!         .await
//!         .unwrap();
//!
//!     users
//!         .insert_one(doc! { "name": " Ada ", "tags": [" math "] }, None)
//!         .await
//!         .unwrap();
//!
//!     let ada = users.find_one(doc! { "name": "Ada" }, None).await.unwrap();
//!     println!("Found user: {:?}", ada);
//!
//!     store.shutdown().await.unwrap();
//! }
//! ```
//!
//! # Custom Hooks
//!
//! Model-specific behavior is registered while the model is built. Pre-hooks may rewrite
//! the operation's arguments or abort it; post-hooks see the result.
//!
//! ```ignore
//! let orders = store
//!     .model(ModelDefinition::new("orders", schema).configure(|model| {
//!         model.pre_sync(HookName::Insert, |ctx| {
//!             ctx.ensure(ctx.document().is_some_and(|order| order.contains_key("total")), "orders need a total")
//!         });
//!         Ok(())
//!     }))
//!     .await?;
//! ```
//!
//! # Backends
//!
//! - [`memory`] - Fast in-memory storage for development and testing
//! - [`mongodb`] - Persistent MongoDB backend (requires `mongodb` feature)

pub mod prelude;

pub use docmodel_core::{
    backend, context, error, hooks, model, options, path, plugin, query, record, schema, store, walker,
};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docmodel_memory::{InMemoryStore, InMemoryStoreBuilder};
}

/// The standard plugin set.
pub mod plugins {
    pub use docmodel_plugins::*;
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docmodel_mongodb::{MongoDbStore, MongoDbStoreBuilder};
}
