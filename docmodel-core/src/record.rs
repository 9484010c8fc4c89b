//! Typed records on top of untyped models.
//!
//! A [`Record`] is a serde type bound to a collection and a schema. [`TypedModel`] wraps a
//! [`Model`] and converts between the record type and BSON documents at the edges, so hooks
//! and plugins keep seeing plain documents.
//!
//! # Example
//!
//! ```ignore
//! use docmodel::{record::Record, schema::SchemaNode};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct User {
//!     pub name: String,
//!     pub email: String,
//! }
//!
//! impl Record for User {
//!     fn collection_name() -> &'static str {
//!         "users"
//!     }
//!
//!     fn schema() -> SchemaNode {
//!         SchemaNode::object()
//!             .property("name", SchemaNode::string().required())
//!             .property("email", SchemaNode::string().annotate("lowercase", true))
//!     }
//! }
//!
//! let users = store.typed_model::<User>().await?;
//! users.insert_one(&User { name: "Ada".into(), email: "ADA@EXAMPLE.COM".into() }).await?;
//! ```

use std::{marker::PhantomData, sync::Arc};

use bson::{Bson, Document, de::deserialize_from_bson, ser::serialize_to_bson};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, from_value, to_value};

use crate::{
    backend::{DeleteResult, UpdateResult},
    error::{DocumentStoreError, DocumentStoreResult},
    model::Model,
    options::OperationOptions,
    plugin::Plugin,
    schema::SchemaNode,
};

/// A serde type stored in a model's collection.
pub trait Record: Serialize + DeserializeOwned + Send + Sync + Clone + 'static {
    /// Returns the name of the collection this record belongs to.
    ///
    /// This is also the model name, so it should be a static identifier such as "users".
    fn collection_name() -> &'static str;

    /// The schema declared for this record.
    fn schema() -> SchemaNode;

    /// Plugins applied when the model for this record is first created.
    fn plugins() -> Vec<Arc<dyn Plugin>> {
        Vec::new()
    }
}

/// Conversion helpers implemented for every [`Record`].
pub trait RecordExt: Record {
    /// Converts this record to a BSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or the record does not serialize to a document.
    fn to_document(&self) -> DocumentStoreResult<Document>;

    fn from_document(document: Document) -> DocumentStoreResult<Self>;

    fn to_json(&self) -> DocumentStoreResult<Value>;

    fn from_json(value: Value) -> DocumentStoreResult<Self>;
}

impl<R: Record> RecordExt for R {
    fn to_document(&self) -> DocumentStoreResult<Document> {
        match serialize_to_bson(self)? {
            Bson::Document(document) => Ok(document),
            other => Err(DocumentStoreError::InvalidDocument(format!(
                "{} serialized to {:?}, expected a document",
                R::collection_name(),
                other.element_type()
            ))),
        }
    }

    fn from_document(document: Document) -> DocumentStoreResult<Self> {
        Ok(deserialize_from_bson(Bson::Document(document))?)
    }

    fn to_json(&self) -> DocumentStoreResult<Value> {
        Ok(to_value(self)?)
    }

    fn from_json(value: Value) -> DocumentStoreResult<Self> {
        Ok(from_value(value)?)
    }
}

/// A model whose documents decode to `R`.
#[derive(Debug)]
pub struct TypedModel<R: Record> {
    model: Model,
    _marker: PhantomData<fn() -> R>,
}

impl<R: Record> Clone for TypedModel<R> {
    fn clone(&self) -> Self {
        Self::new(self.model.clone())
    }
}

impl<R: Record> TypedModel<R> {
    pub fn new(model: Model) -> Self {
        Self {
            model,
            _marker: PhantomData,
        }
    }

    /// The untyped model underneath.
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Inserts a record and returns it as stored, after every hook has run.
    pub async fn insert_one(&self, record: &R) -> DocumentStoreResult<R> {
        let result = self
            .model
            .insert_one(record.to_document()?, None)
            .await?;

        R::from_document(result.document)
    }

    pub async fn insert_many(&self, records: &[R]) -> DocumentStoreResult<Vec<R>> {
        let documents = records
            .iter()
            .map(RecordExt::to_document)
            .collect::<DocumentStoreResult<Vec<_>>>()?;

        self.model
            .insert_many(documents, None)
            .await?
            .documents
            .into_iter()
            .map(R::from_document)
            .collect()
    }

    pub async fn find_one(&self, filter: Document) -> DocumentStoreResult<Option<R>> {
        self.model
            .find_one(filter, None)
            .await?
            .map(R::from_document)
            .transpose()
    }

    pub async fn find_many(
        &self,
        filter: Document,
        options: impl Into<Option<OperationOptions>>,
    ) -> DocumentStoreResult<Vec<R>> {
        self.model
            .find_many(filter, options)
            .await?
            .into_iter()
            .map(R::from_document)
            .collect()
    }

    pub async fn find_one_and_update(
        &self,
        filter: Document,
        update: Document,
        options: impl Into<Option<OperationOptions>>,
    ) -> DocumentStoreResult<Option<R>> {
        self.model
            .find_one_and_update(filter, update, options)
            .await?
            .map(R::from_document)
            .transpose()
    }

    pub async fn update_one(&self, filter: Document, update: Document) -> DocumentStoreResult<UpdateResult> {
        self.model
            .update_one(filter, update, None)
            .await
    }

    pub async fn update_many(&self, filter: Document, update: Document) -> DocumentStoreResult<UpdateResult> {
        self.model
            .update_many(filter, update, None)
            .await
    }

    pub async fn delete_one(&self, filter: Document) -> DocumentStoreResult<DeleteResult> {
        self.model
            .delete_one(filter, None)
            .await
    }

    pub async fn delete_many(&self, filter: Document) -> DocumentStoreResult<DeleteResult> {
        self.model
            .delete_many(filter, None)
            .await
    }

    pub async fn count(&self, filter: Document) -> DocumentStoreResult<u64> {
        self.model.count(filter, None).await
    }
}
