//! MongoDB backend implementation for docmodel.
//!
//! This crate provides a MongoDB-based implementation of the `StoreBackend` trait. Filters,
//! updates and pipelines produced by the model layer already use MongoDB syntax and are
//! forwarded to the driver unchanged; server error codes are preserved on
//! [`DocumentStoreError::Backend`](docmodel_core::error::DocumentStoreError::Backend) so error
//! hooks can recognise duplicate keys (`11000`) and validation failures (`121`).
//!
//! To use this backend, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! docmodel = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Example
//!
//! ```ignore
//! use docmodel::{mongodb::MongoDbStore, prelude::*};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = MongoDbStore::builder("mongodb://localhost:27017", "my_database")
//!         .app_name("billing")
//!         .build()
//!         .await?;
//!     let store = DocumentStore::new(backend);
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmodel_mongodb;

pub mod store;

pub use store::{MongoDbStore, MongoDbStoreBuilder};
