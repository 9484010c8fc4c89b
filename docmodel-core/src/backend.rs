//! Storage backend abstraction for models.
//!
//! This module defines the persistence collaborator the operation pipeline talks to. A
//! backend receives fully resolved arguments (after every pre-hook has run) and answers with
//! raw results or a structured error carrying the backend's numeric code.
//!
//! # Traits
//!
//! - [`StoreBackend`]: The core trait for storage backends
//! - [`StoreBackendBuilder`]: Factory trait for creating backend instances
//!
//! # Examples
//!
//! ```ignore
//! use docmodel::backend::{StoreBackend, StoreBackendBuilder};
//! use docmodel::memory::InMemoryStore;
//! use bson::doc;
//!
//! let backend = InMemoryStore::builder().build().await?;
//! let result = backend
//!     .insert_one("users", doc! { "name": "Alice" }, &Default::default())
//!     .await?;
//! ```

use async_trait::async_trait;
use bson::{Bson, Document};
use std::fmt::Debug;

use crate::{error::DocumentStoreResult, options::OperationOptions};

/// Result of a single insert.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertOneResult {
    /// The `_id` of the stored document.
    pub inserted_id: Bson,
    /// The document as stored, `_id` included.
    pub document: Document,
}

/// Result of a batch insert. Ids and documents are in input order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertManyResult {
    pub inserted_ids: Vec<Bson>,
    pub documents: Vec<Document>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateResult {
    pub matched_count: u64,
    pub modified_count: u64,
    /// Set when an upsert inserted a new document.
    pub upserted_id: Option<Bson>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteResult {
    pub deleted_count: u64,
}

/// Abstract interface for document storage backends.
///
/// Implementers provide concrete storage strategies for documents, from simple in-memory
/// stores to MongoDB deployments. Filters, updates and aggregation pipelines use MongoDB
/// syntax; backends that cannot execute part of it should fail with
/// [`DocumentStoreError::InvalidQuery`](crate::error::DocumentStoreError::InvalidQuery).
///
/// # Thread Safety
///
/// All implementations must be thread-safe. Models share a backend through an `Arc` and
/// may call it from many tasks at once.
///
/// # Error Handling
///
/// Backends report failures as
/// [`DocumentStoreError::Backend`](crate::error::DocumentStoreError::Backend) with the numeric
/// code of the underlying store when one exists, so that error hooks can classify them
/// (e.g. `11000` for duplicate keys, `121` for document validation).
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Inserts one document into a collection.
    ///
    /// A missing `_id` is generated by the backend.
    ///
    /// # Arguments
    ///
    /// * `collection` - The name of the collection. Created automatically if it doesn't exist.
    /// * `document` - The document to insert
    /// * `options` - Operation options
    ///
    /// # Returns
    ///
    /// The generated or supplied `_id` together with the stored document.
    async fn insert_one(
        &self,
        collection: &str,
        document: Document,
        options: &OperationOptions,
    ) -> DocumentStoreResult<InsertOneResult>;

    /// Inserts documents in order, stopping at the first failure.
    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
        options: &OperationOptions,
    ) -> DocumentStoreResult<InsertManyResult>;

    /// Applies an update document to the first document matching `filter`.
    ///
    /// # Arguments
    ///
    /// * `collection` - The name of the collection
    /// * `filter` - A MongoDB filter document
    /// * `update` - An update document made of update operators (`$set`, `$inc`, ...)
    /// * `options` - Operation options; `upsert` inserts a document when nothing matches
    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: &OperationOptions,
    ) -> DocumentStoreResult<UpdateResult>;

    /// Applies an update document to every document matching `filter`.
    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: &OperationOptions,
    ) -> DocumentStoreResult<UpdateResult>;

    /// Returns the first document matching `filter`, honoring sort, skip and projection.
    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
        options: &OperationOptions,
    ) -> DocumentStoreResult<Option<Document>>;

    /// Returns every document matching `filter`, honoring sort, skip, limit and projection.
    ///
    /// An unknown collection yields an empty list.
    async fn find_many(
        &self,
        collection: &str,
        filter: Document,
        options: &OperationOptions,
    ) -> DocumentStoreResult<Vec<Document>>;

    /// Atomically updates the first matching document and returns it.
    ///
    /// `options.return_document` selects the version returned.
    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: &OperationOptions,
    ) -> DocumentStoreResult<Option<Document>>;

    async fn delete_one(
        &self,
        collection: &str,
        filter: Document,
        options: &OperationOptions,
    ) -> DocumentStoreResult<DeleteResult>;

    async fn delete_many(
        &self,
        collection: &str,
        filter: Document,
        options: &OperationOptions,
    ) -> DocumentStoreResult<DeleteResult>;

    /// Runs an aggregation pipeline.
    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
        options: &OperationOptions,
    ) -> DocumentStoreResult<Vec<Document>>;

    /// Counts the documents matching `filter`.
    async fn count(
        &self,
        collection: &str,
        filter: Document,
        options: &OperationOptions,
    ) -> DocumentStoreResult<u64>;

    /// Returns the distinct values of `field` among documents matching `filter`.
    ///
    /// Array values contribute each of their elements.
    async fn distinct(
        &self,
        collection: &str,
        field: &str,
        filter: Document,
        options: &OperationOptions,
    ) -> DocumentStoreResult<Vec<Bson>>;

    /// Creates a collection, optionally with a `$jsonSchema` validator.
    ///
    /// Backends that cannot enforce validators may ignore `validator`.
    async fn create_collection(&self, name: &str, validator: Option<Document>) -> DocumentStoreResult<()>;

    /// Drops a collection and every document it contains.
    ///
    /// # Warning
    ///
    /// This operation is irreversible.
    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()>;

    /// Lists the names of all collections in the store.
    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>>;

    /// Creates an index over `keys` and returns its name.
    ///
    /// # Note
    ///
    /// If `unique` is true and existing documents violate the constraint, the backend
    /// returns a duplicate key error.
    async fn create_index(
        &self,
        collection: &str,
        keys: Document,
        unique: bool,
    ) -> DocumentStoreResult<String>;

    /// Drops an index by name.
    async fn drop_index(&self, collection: &str, name: &str) -> DocumentStoreResult<()>;

    /// Cleanly shuts down the backend, releasing all resources.
    ///
    /// The default implementation is a no-op.
    async fn shutdown(&self) -> DocumentStoreResult<()> {
        Ok(())
    }
}

#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> DocumentStoreResult<Self::Backend>;
}
