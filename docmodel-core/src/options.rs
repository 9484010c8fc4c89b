//! Per-call operation options.

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};

/// Which version of a document `find_one_and_update` returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReturnDocument {
    #[default]
    Before,
    After,
}

/// Options passed alongside an operation to hooks and to the backend.
///
/// Hooks may rewrite any field before the backend sees it; the select plugin, for instance,
/// fills in `projection`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperationOptions {
    /// Fields to include (`1`) or exclude (`0`) from returned documents.
    pub projection: Option<Document>,
    /// Sort specification, e.g. `{ createdAt: -1 }`.
    pub sort: Option<Document>,
    /// Maximum number of documents to return.
    pub limit: Option<i64>,
    /// Number of documents to skip.
    pub skip: Option<u64>,
    /// Insert a document when an update matches nothing.
    pub upsert: bool,
    pub return_document: ReturnDocument,
    /// Reference paths to replace with the referenced documents.
    pub populate: Vec<String>,
    /// Free-form options for plugins and backends.
    pub extra: Document,
}

impl OperationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> OperationOptionsBuilder {
        OperationOptionsBuilder::default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct OperationOptionsBuilder {
    options: OperationOptions,
}

impl OperationOptionsBuilder {
    pub fn projection(mut self, projection: Document) -> Self {
        self.options.projection = Some(projection);
        self
    }

    pub fn sort(mut self, sort: Document) -> Self {
        self.options.sort = Some(sort);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.options.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.options.skip = Some(skip);
        self
    }

    pub fn upsert(mut self, upsert: bool) -> Self {
        self.options.upsert = upsert;
        self
    }

    pub fn return_document(mut self, return_document: ReturnDocument) -> Self {
        self.options.return_document = return_document;
        self
    }

    /// Adds a reference path to populate.
    pub fn populate(mut self, path: impl Into<String>) -> Self {
        self.options.populate.push(path.into());
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.options.extra.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> OperationOptions {
        self.options
    }
}

impl From<OperationOptionsBuilder> for OperationOptions {
    fn from(builder: OperationOptionsBuilder) -> Self {
        builder.build()
    }
}
