//! In-memory storage implementation for models.
//!
//! This module provides a simple but complete in-memory backend that keeps every collection
//! as a vector of BSON documents behind an async-safe read-write lock.

use std::{cmp::Ordering, collections::HashMap, sync::Arc};
use async_trait::async_trait;
use mea::rwlock::RwLock;
use bson::{Bson, Document, doc, oid::ObjectId};
use tracing::{debug, trace};

use docmodel_core::{
    backend::{DeleteResult, InsertManyResult, InsertOneResult, StoreBackend, StoreBackendBuilder, UpdateResult},
    error::{DUPLICATE_KEY_ERROR_CODE, DocumentStoreError, DocumentStoreResult},
    options::{OperationOptions, ReturnDocument},
    path::{get_path_value, set_path_value},
    query::Expr,
};

use crate::{
    evaluator::{DocumentEvaluator, compare_values, lookup},
    projection::apply_projection,
    update::{apply_update, upsert_seed},
};

const ID_INDEX: &str = "_id_";
const NAMESPACE_NOT_FOUND: i32 = 26;
const INDEX_NOT_FOUND: i32 = 27;
const INVALID_OPTIONS: i32 = 72;
const INDEX_KEY_SPECS_CONFLICT: i32 = 86;

#[derive(Debug, Clone)]
struct IndexSpec {
    name: String,
    keys: Document,
    unique: bool,
}

#[derive(Debug, Clone, Default)]
struct Collection {
    documents: Vec<Document>,
    indexes: Vec<IndexSpec>,
    validator: Option<Document>,
}

type StoreMap = HashMap<String, Collection>;

impl Collection {
    /// Positions of the documents matching `expr`, in storage order.
    fn matching(&self, expr: &Expr) -> DocumentStoreResult<Vec<usize>> {
        let mut positions = Vec::new();

        for (idx, document) in self.documents.iter().enumerate() {
            if DocumentEvaluator::new(document).evaluate(expr)? {
                positions.push(idx);
            }
        }

        Ok(positions)
    }

    /// Matching positions ordered by `sort`, then windowed by skip and limit.
    fn select(&self, filter: &Document, options: &OperationOptions) -> DocumentStoreResult<Vec<usize>> {
        let expr = Expr::from_filter(filter)?;
        let mut positions = self.matching(&expr)?;

        if let Some(sort) = &options.sort {
            positions.sort_by(|left, right| sort_documents(&self.documents[*left], &self.documents[*right], sort));
        }

        Ok(window(positions, options.skip, options.limit))
    }

    /// Fails with a duplicate key error when `candidate` collides with another document on
    /// `_id` or on a unique index. The document at `skip` is not compared.
    fn check_unique(&self, collection: &str, candidate: &Document, skip: Option<usize>) -> DocumentStoreResult<()> {
        let others = self
            .documents
            .iter()
            .enumerate()
            .filter(|(idx, _)| Some(*idx) != skip)
            .map(|(_, document)| document);

        for other in others {
            if let (Some(id), Some(existing)) = (candidate.get("_id"), other.get("_id")) {
                if id == existing {
                    return Err(duplicate_key(collection, ID_INDEX, &doc! { "_id": id.clone() }));
                }
            }

            for index in self.indexes.iter().filter(|index| index.unique) {
                let key = index_key(candidate, &index.keys);

                if key == index_key(other, &index.keys) {
                    return Err(duplicate_key(collection, &index.name, &key));
                }
            }
        }

        Ok(())
    }

    fn insert(&mut self, collection: &str, document: Document) -> DocumentStoreResult<InsertOneResult> {
        let document = with_id(document);
        let inserted_id = document
            .get("_id")
            .cloned()
            .unwrap_or(Bson::Null);

        self.check_unique(collection, &document, None)?;
        self.documents.push(document.clone());

        Ok(InsertOneResult { inserted_id, document })
    }
}

/// Moves an existing `_id` to the front, or generates one.
fn with_id(document: Document) -> Document {
    let mut stored = Document::new();

    stored.insert(
        "_id",
        document
            .get("_id")
            .cloned()
            .unwrap_or_else(|| Bson::ObjectId(ObjectId::new())),
    );

    for (key, value) in document {
        if key != "_id" {
            stored.insert(key, value);
        }
    }

    stored
}

fn index_key(document: &Document, keys: &Document) -> Document {
    keys.keys()
        .map(|key| {
            (
                key.clone(),
                get_path_value(document, key)
                    .cloned()
                    .unwrap_or(Bson::Null),
            )
        })
        .collect()
}

fn index_name(keys: &Document) -> String {
    keys.iter()
        .map(|(key, direction)| match direction {
            Bson::String(kind) => format!("{key}_{kind}"),
            Bson::Double(value) => format!("{key}_{}", *value as i64),
            other => format!("{key}_{other}"),
        })
        .collect::<Vec<_>>()
        .join("_")
}

fn duplicate_key(collection: &str, index: &str, key: &Document) -> DocumentStoreError {
    DocumentStoreError::backend_with_code(
        DUPLICATE_KEY_ERROR_CODE,
        format!("E11000 duplicate key error collection: {collection} index: {index} dup key: {key}"),
    )
}

fn ascending(direction: &Bson) -> bool {
    match direction {
        Bson::Int32(value) => *value >= 0,
        Bson::Int64(value) => *value >= 0,
        Bson::Double(value) => *value >= 0.0,
        Bson::String(value) => !value.eq_ignore_ascii_case("desc"),
        _ => true,
    }
}

fn sort_documents(left: &Document, right: &Document, sort: &Document) -> Ordering {
    for (field, direction) in sort {
        let ordering = compare_values(
            lookup(left, field).first().copied(),
            lookup(right, field).first().copied(),
        );
        let ordering = match ascending(direction) {
            true => ordering,
            false => ordering.reverse(),
        };

        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    Ordering::Equal
}

fn window<T>(items: Vec<T>, skip: Option<u64>, limit: Option<i64>) -> Vec<T> {
    let limit = limit
        .map(|limit| limit.unsigned_abs() as usize)
        .filter(|limit| *limit > 0)
        .unwrap_or(usize::MAX);

    items
        .into_iter()
        .skip(skip.unwrap_or(0) as usize)
        .take(limit)
        .collect()
}

fn project(document: &Document, options: &OperationOptions) -> DocumentStoreResult<Document> {
    match &options.projection {
        Some(projection) => apply_projection(document, projection),
        None => Ok(document.clone()),
    }
}

/// Thread-safe in-memory document storage backend.
///
/// This struct implements the [`StoreBackend`] trait to provide a fully functional document
/// store that operates entirely in memory. Filters, update operators, projections and a
/// subset of aggregation stages follow MongoDB semantics, and `_id` plus unique indexes are
/// enforced with duplicate key errors (code `11000`).
///
/// # Thread Safety
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state, allowing it to be
/// safely shared across async tasks. Multiple clones of the same instance share the same
/// underlying data.
///
/// # Performance
///
/// Queries scan all documents in a collection. Indexes only enforce uniqueness. For larger
/// datasets, use the MongoDB backend.
///
/// # Example
///
/// ```ignore
/// use docmodel_memory::InMemoryStore;
/// use docmodel::backend::StoreBackend;
/// use bson::doc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = InMemoryStore::new();
///
///     store.insert_one("users", doc! { "name": "Alice", "age": 30 }, &Default::default()).await?;
///
///     let found = store.find_one("users", doc! { "age": { "$gte": 18 } }, &Default::default()).await?;
///     assert!(found.is_some());
///
///     Ok(())
/// }
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    /// collection name -> documents and indexes
    store: Arc<RwLock<StoreMap>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory document store.
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(StoreMap::new())),
        }
    }

    /// Creates a builder for constructing an `InMemoryStore`.
    ///
    /// ```ignore
    /// let store = InMemoryStore::builder().build().await.unwrap();
    /// ```
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    /// Returns the validator stored for a collection, if any.
    ///
    /// Validators are kept for inspection but not enforced.
    pub async fn validator(&self, collection: &str) -> Option<Document> {
        self.store
            .read()
            .await
            .get(collection)
            .and_then(|state| state.validator.clone())
    }

    /// Returns the names of the indexes on a collection, `_id_` first.
    pub async fn index_names(&self, collection: &str) -> DocumentStoreResult<Vec<String>> {
        let store = self.store.read().await;
        let state = store
            .get(collection)
            .ok_or_else(|| DocumentStoreError::CollectionNotFound(collection.to_string()))?;

        Ok(
            std::iter::once(ID_INDEX.to_string())
                .chain(state.indexes.iter().map(|index| index.name.clone()))
                .collect()
        )
    }

    async fn update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: &OperationOptions,
        many: bool,
    ) -> DocumentStoreResult<UpdateResult> {
        let expr = Expr::from_filter(&filter)?;
        let mut store = self.store.write().await;

        if !store.contains_key(collection) && !options.upsert {
            return Ok(UpdateResult::default());
        }

        let state = store
            .entry(collection.to_string())
            .or_default();
        let mut positions = state.matching(&expr)?;

        if !many {
            positions.truncate(1);
        }

        if positions.is_empty() {
            if !options.upsert {
                return Ok(UpdateResult::default());
            }

            let mut seed = upsert_seed(&filter)?;
            apply_update(&mut seed, &update, true)?;

            let inserted = state.insert(collection, seed)?;
            trace!(collection, id = %inserted.inserted_id, "upserted document");

            return Ok(UpdateResult {
                matched_count: 0,
                modified_count: 0,
                upserted_id: Some(inserted.inserted_id),
            });
        }

        let mut modified_count = 0;

        for position in &positions {
            let mut updated = state.documents[*position].clone();

            if apply_update(&mut updated, &update, false)? {
                state.check_unique(collection, &updated, Some(*position))?;
                state.documents[*position] = updated;
                modified_count += 1;
            }
        }

        Ok(UpdateResult {
            matched_count: positions.len() as u64,
            modified_count,
            upserted_id: None,
        })
    }

    async fn delete(&self, collection: &str, filter: Document, many: bool) -> DocumentStoreResult<DeleteResult> {
        let expr = Expr::from_filter(&filter)?;
        let mut store = self.store.write().await;
        let Some(state) = store.get_mut(collection) else {
            return Ok(DeleteResult::default());
        };

        let mut positions = state.matching(&expr)?;

        if !many {
            positions.truncate(1);
        }

        for position in positions.iter().rev() {
            state.documents.remove(*position);
        }

        Ok(DeleteResult { deleted_count: positions.len() as u64 })
    }
}

fn run_stage(documents: Vec<Document>, stage: &Document) -> DocumentStoreResult<Vec<Document>> {
    let (name, spec) = match (stage.len(), stage.iter().next()) {
        (1, Some(entry)) => entry,
        _ => return Err(DocumentStoreError::InvalidQuery(
            "a pipeline stage must have exactly one field".to_string(),
        )),
    };

    let number = |value: &Bson| match value {
        Bson::Int32(value) => Some(*value as i64),
        Bson::Int64(value) => Some(*value),
        Bson::Double(value) => Some(*value as i64),
        _ => None,
    };

    match (name.as_str(), spec) {
        ("$match", Bson::Document(filter)) => {
            let expr = Expr::from_filter(filter)?;
            let mut matched = Vec::new();

            for document in documents {
                if DocumentEvaluator::new(&document).evaluate(&expr)? {
                    matched.push(document);
                }
            }

            Ok(matched)
        }
        ("$sort", Bson::Document(sort)) => {
            let mut sorted = documents;
            sorted.sort_by(|left, right| sort_documents(left, right, sort));

            Ok(sorted)
        }
        ("$skip", value) => match number(value) {
            Some(skip) if skip >= 0 => Ok(window(documents, Some(skip as u64), None)),
            _ => Err(DocumentStoreError::InvalidQuery("`$skip` expects a non-negative number".to_string())),
        },
        ("$limit", value) => match number(value) {
            Some(limit) if limit > 0 => Ok(window(documents, None, Some(limit))),
            _ => Err(DocumentStoreError::InvalidQuery("`$limit` expects a positive number".to_string())),
        },
        ("$project", Bson::Document(projection)) => documents
            .iter()
            .map(|document| apply_projection(document, projection))
            .collect(),
        ("$unwind", value) => {
            let path = match value {
                Bson::String(path) => path.as_str(),
                Bson::Document(spec) => spec.get_str("path").unwrap_or_default(),
                _ => "",
            };
            let Some(path) = path.strip_prefix('$') else {
                return Err(DocumentStoreError::InvalidQuery("`$unwind` expects a `$`-prefixed path".to_string()));
            };
            let mut unwound = Vec::new();

            for document in documents {
                let items = match get_path_value(&document, path) {
                    Some(Bson::Array(items)) => items.clone(),
                    Some(Bson::Null) | None => continue,
                    Some(other) => vec![other.clone()],
                };

                for item in items {
                    let mut copy = document.clone();
                    set_path_value(&mut copy, path, item)?;
                    unwound.push(copy);
                }
            }

            Ok(unwound)
        }
        ("$count", Bson::String(field)) => {
            let total = i32::try_from(documents.len())
                .map(Bson::Int32)
                .unwrap_or(Bson::Int64(documents.len() as i64));
            let mut counted = Document::new();
            counted.insert(field.as_str(), total);

            Ok(vec![counted])
        }
        (other, _) => Err(DocumentStoreError::InvalidQuery(format!(
            "unsupported aggregation stage `{other}`"
        ))),
    }
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn insert_one(
        &self,
        collection: &str,
        document: Document,
        _options: &OperationOptions,
    ) -> DocumentStoreResult<InsertOneResult> {
        self.store
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(collection, document)
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
        _options: &OperationOptions,
    ) -> DocumentStoreResult<InsertManyResult> {
        let mut store = self.store.write().await;
        let state = store
            .entry(collection.to_string())
            .or_default();
        let mut result = InsertManyResult::default();

        for document in documents {
            let inserted = state.insert(collection, document)?;

            result.inserted_ids.push(inserted.inserted_id);
            result.documents.push(inserted.document);
        }

        Ok(result)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: &OperationOptions,
    ) -> DocumentStoreResult<UpdateResult> {
        self.update(collection, filter, update, options, false).await
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: &OperationOptions,
    ) -> DocumentStoreResult<UpdateResult> {
        self.update(collection, filter, update, options, true).await
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
        options: &OperationOptions,
    ) -> DocumentStoreResult<Option<Document>> {
        let store = self.store.read().await;
        let Some(state) = store.get(collection) else {
            return Ok(None);
        };

        let options = OperationOptions { limit: Some(1), ..options.clone() };

        state
            .select(&filter, &options)?
            .first()
            .map(|position| project(&state.documents[*position], &options))
            .transpose()
    }

    async fn find_many(
        &self,
        collection: &str,
        filter: Document,
        options: &OperationOptions,
    ) -> DocumentStoreResult<Vec<Document>> {
        let store = self.store.read().await;
        let Some(state) = store.get(collection) else {
            return Ok(vec![]);
        };

        state
            .select(&filter, options)?
            .into_iter()
            .map(|position| project(&state.documents[position], options))
            .collect()
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: &OperationOptions,
    ) -> DocumentStoreResult<Option<Document>> {
        let mut store = self.store.write().await;

        if !store.contains_key(collection) && !options.upsert {
            return Ok(None);
        }

        let state = store
            .entry(collection.to_string())
            .or_default();
        let selection = OperationOptions { skip: None, limit: Some(1), ..options.clone() };
        let position = state.select(&filter, &selection)?.first().copied();

        let Some(position) = position else {
            if !options.upsert {
                return Ok(None);
            }

            let mut seed = upsert_seed(&filter)?;
            apply_update(&mut seed, &update, true)?;

            let inserted = state.insert(collection, seed)?;

            return match options.return_document {
                ReturnDocument::Before => Ok(None),
                ReturnDocument::After => project(&inserted.document, options).map(Some),
            };
        };

        let before = state.documents[position].clone();
        let mut after = before.clone();

        if apply_update(&mut after, &update, false)? {
            state.check_unique(collection, &after, Some(position))?;
            state.documents[position] = after.clone();
        }

        match options.return_document {
            ReturnDocument::Before => project(&before, options).map(Some),
            ReturnDocument::After => project(&after, options).map(Some),
        }
    }

    async fn delete_one(
        &self,
        collection: &str,
        filter: Document,
        _options: &OperationOptions,
    ) -> DocumentStoreResult<DeleteResult> {
        self.delete(collection, filter, false).await
    }

    async fn delete_many(
        &self,
        collection: &str,
        filter: Document,
        _options: &OperationOptions,
    ) -> DocumentStoreResult<DeleteResult> {
        self.delete(collection, filter, true).await
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
        _options: &OperationOptions,
    ) -> DocumentStoreResult<Vec<Document>> {
        let mut documents = self
            .store
            .read()
            .await
            .get(collection)
            .map(|state| state.documents.clone())
            .unwrap_or_default();

        for stage in &pipeline {
            documents = run_stage(documents, stage)?;
        }

        Ok(documents)
    }

    async fn count(
        &self,
        collection: &str,
        filter: Document,
        options: &OperationOptions,
    ) -> DocumentStoreResult<u64> {
        let store = self.store.read().await;

        match store.get(collection) {
            Some(state) => Ok(state.select(&filter, options)?.len() as u64),
            None => Ok(0),
        }
    }

    async fn distinct(
        &self,
        collection: &str,
        field: &str,
        filter: Document,
        _options: &OperationOptions,
    ) -> DocumentStoreResult<Vec<Bson>> {
        let store = self.store.read().await;
        let Some(state) = store.get(collection) else {
            return Ok(vec![]);
        };

        let mut values: Vec<Bson> = Vec::new();

        for position in state.matching(&Expr::from_filter(&filter)?)? {
            for value in lookup(&state.documents[position], field) {
                let flattened = match value {
                    Bson::Array(items) => items.iter().collect::<Vec<_>>(),
                    other => vec![other],
                };

                for item in flattened {
                    if !values.contains(item) {
                        values.push(item.clone());
                    }
                }
            }
        }

        Ok(values)
    }

    async fn create_collection(&self, name: &str, validator: Option<Document>) -> DocumentStoreResult<()> {
        let mut store = self.store.write().await;
        let state = store
            .entry(name.to_string())
            .or_default();

        if validator.is_some() {
            debug!(collection = name, "storing collection validator; the in-memory store does not enforce it");
            state.validator = validator;
        }

        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        let mut store = self.store.write().await;

        if store.remove(name).is_none() {
            return Err(DocumentStoreError::CollectionNotFound(name.to_string()));
        }

        Ok(())
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        let mut names = self
            .store
            .read()
            .await
            .keys()
            .cloned()
            .collect::<Vec<_>>();

        names.sort();

        Ok(names)
    }

    async fn create_index(
        &self,
        collection: &str,
        keys: Document,
        unique: bool,
    ) -> DocumentStoreResult<String> {
        if keys.is_empty() {
            return Err(DocumentStoreError::InvalidQuery("index keys must not be empty".to_string()));
        }

        let name = index_name(&keys);
        let mut store = self.store.write().await;
        let state = store
            .entry(collection.to_string())
            .or_default();

        if let Some(existing) = state.indexes.iter().find(|index| index.name == name) {
            return match existing.unique == unique {
                true => Ok(name),
                false => Err(DocumentStoreError::backend_with_code(
                    INDEX_KEY_SPECS_CONFLICT,
                    format!("an index named `{name}` already exists with different options"),
                )),
            };
        }

        if unique {
            let mut seen: Vec<Document> = Vec::with_capacity(state.documents.len());

            for document in &state.documents {
                let key = index_key(document, &keys);

                if seen.contains(&key) {
                    return Err(duplicate_key(collection, &name, &key));
                }

                seen.push(key);
            }
        }

        debug!(collection, index = %name, unique, "created index");
        state.indexes.push(IndexSpec { name: name.clone(), keys, unique });

        Ok(name)
    }

    async fn drop_index(&self, collection: &str, name: &str) -> DocumentStoreResult<()> {
        if name == ID_INDEX {
            return Err(DocumentStoreError::backend_with_code(INVALID_OPTIONS, "cannot drop _id index"));
        }

        let mut store = self.store.write().await;
        let state = store.get_mut(collection).ok_or_else(|| {
            DocumentStoreError::backend_with_code(NAMESPACE_NOT_FOUND, format!("ns not found: {collection}"))
        })?;

        match state.indexes.iter().position(|index| index.name == name) {
            Some(position) => {
                state.indexes.remove(position);
                Ok(())
            }
            None => Err(DocumentStoreError::backend_with_code(
                INDEX_NOT_FOUND,
                format!("index not found with name [{name}]"),
            )),
        }
    }
}

/// Builder for constructing [`InMemoryStore`] instances.
///
/// ```ignore
/// use docmodel_memory::InMemoryStore;
/// use docmodel::backend::StoreBackendBuilder;
///
/// let store = InMemoryStore::builder().build().await.unwrap();
/// ```
#[derive(Default)]
pub struct InMemoryStoreBuilder;

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        Ok(InMemoryStore::new())
    }
}
