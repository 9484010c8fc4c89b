//! A schema-aware document modeling layer with hooks and plugins over pluggable document stores.
//!
//! This crate is the core of the docmodel project and provides:
//!
//! - **Schemas** ([`schema`]) - Typed schema trees parsed from JSON-schema style declarations
//! - **Schema walking** ([`walker`]) - Canonical path enumeration over a schema
//! - **Path engine** ([`path`]) - Mapping and defaulting values at canonical paths
//! - **Hook registry** ([`hooks`]) - Ordered pre/post callbacks keyed by name
//! - **Operation context** ([`context`]) - Per-operation state shared by hooks
//! - **Models** ([`model`]) - The operation pipeline, statics and the model builder
//! - **Plugins** ([`plugin`]) - The plugin contract and plugin-owned path tables
//! - **Store backend abstraction** ([`backend`]) - Traits for implementing storage backends
//! - **Query and filtering API** ([`query`]) - Filter expressions convertible to and from filter documents
//! - **Records** ([`record`]) - Typed access to models through serde types
//! - **Document store** ([`store`]) - Backend ownership and the model registry
//! - **Error handling** ([`error`]) - Error types carrying backend codes
//!
//! # Example
//!
//! ```ignore
//! use docmodel::{schema::SchemaNode, store::{DocumentStore, ModelDefinition}, context::HookName};
//! use bson::doc;
//!
//! let schema = SchemaNode::object()
//!     .property("name", SchemaNode::string().required())
//!     .property("tags", SchemaNode::array(SchemaNode::string()));
//!
//! let users = store
//!     .model(ModelDefinition::new("users", schema).configure(|model| {
//!         model.pre_sync(HookName::Insert, |ctx| {
//!             ctx.locals_mut().insert("seen", true);
//!             Ok(())
//!         });
//!         Ok(())
//!     }))
//!     .await?;
//!
//! users.insert_one(doc! { "name": "Ada", "tags": ["math"] }, None).await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmodel_core;

pub mod backend;
pub mod context;
pub mod error;
pub mod hooks;
pub mod model;
pub mod options;
pub mod path;
pub mod plugin;
pub mod query;
pub mod record;
pub mod schema;
pub mod store;
pub mod walker;
