#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bson::{Bson, Document, doc, oid::ObjectId};

use docmodel_core::{
    backend::{DeleteResult, InsertManyResult, InsertOneResult, StoreBackend, UpdateResult},
    error::{DocumentStoreError, DocumentStoreResult},
    options::OperationOptions,
};

/// A backend that keeps one flat list of documents and records every call it receives.
///
/// Filters only support top-level equality and updates only `$set`.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    calls: Mutex<Vec<(String, Document)>>,
    documents: Mutex<Vec<Document>>,
    failure: Mutex<Option<DocumentStoreError>>,
}

impl RecordingBackend {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes the next backend call fail with `error`.
    pub fn fail_next(&self, error: DocumentStoreError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    pub fn seed(&self, documents: Vec<Document>) {
        self.documents
            .lock()
            .unwrap()
            .extend(documents);
    }

    pub fn calls(&self) -> Vec<(String, Document)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_names(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .map(|(name, _)| name)
            .collect()
    }

    pub fn stored(&self) -> Vec<Document> {
        self.documents.lock().unwrap().clone()
    }

    fn record(&self, name: &str, args: Document) -> DocumentStoreResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), args));

        match self.failure.lock().unwrap().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn matching(&self, filter: &Document) -> Vec<Document> {
        self.documents
            .lock()
            .unwrap()
            .iter()
            .filter(|document| matches(document, filter))
            .cloned()
            .collect()
    }

    fn store(&self, mut document: Document) -> InsertOneResult {
        if !document.contains_key("_id") {
            document.insert("_id", ObjectId::new());
        }

        let inserted_id = document.get("_id").cloned().unwrap_or(Bson::Null);
        self.documents
            .lock()
            .unwrap()
            .push(document.clone());

        InsertOneResult { inserted_id, document }
    }

    fn apply_set(&self, filter: &Document, update: &Document, limit: Option<usize>) -> UpdateResult {
        let mut documents = self.documents.lock().unwrap();
        let set = update.get_document("$set").cloned().unwrap_or_default();
        let mut result = UpdateResult::default();

        for document in documents.iter_mut().filter(|document| matches(document, filter)) {
            if limit.is_some_and(|limit| result.matched_count as usize >= limit) {
                break;
            }

            for (key, value) in &set {
                document.insert(key.clone(), value.clone());
            }

            result.matched_count += 1;
            result.modified_count += 1;
        }

        result
    }
}

fn matches(document: &Document, filter: &Document) -> bool {
    filter
        .iter()
        .all(|(key, value)| document.get(key) == Some(value))
}

#[async_trait]
impl StoreBackend for RecordingBackend {
    async fn insert_one(
        &self,
        _collection: &str,
        document: Document,
        _options: &OperationOptions,
    ) -> DocumentStoreResult<InsertOneResult> {
        self.record("insertOne", doc! { "document": document.clone() })?;

        Ok(self.store(document))
    }

    async fn insert_many(
        &self,
        _collection: &str,
        documents: Vec<Document>,
        _options: &OperationOptions,
    ) -> DocumentStoreResult<InsertManyResult> {
        self.record("insertMany", doc! { "documents": documents.clone() })?;

        let mut result = InsertManyResult::default();

        for document in documents {
            let inserted = self.store(document);
            result.inserted_ids.push(inserted.inserted_id);
            result.documents.push(inserted.document);
        }

        Ok(result)
    }

    async fn update_one(
        &self,
        _collection: &str,
        filter: Document,
        update: Document,
        _options: &OperationOptions,
    ) -> DocumentStoreResult<UpdateResult> {
        self.record("updateOne", doc! { "filter": filter.clone(), "update": update.clone() })?;

        Ok(self.apply_set(&filter, &update, Some(1)))
    }

    async fn update_many(
        &self,
        _collection: &str,
        filter: Document,
        update: Document,
        _options: &OperationOptions,
    ) -> DocumentStoreResult<UpdateResult> {
        self.record("updateMany", doc! { "filter": filter.clone(), "update": update.clone() })?;

        Ok(self.apply_set(&filter, &update, None))
    }

    async fn find_one(
        &self,
        _collection: &str,
        filter: Document,
        _options: &OperationOptions,
    ) -> DocumentStoreResult<Option<Document>> {
        self.record("findOne", doc! { "filter": filter.clone() })?;

        Ok(self.matching(&filter).into_iter().next())
    }

    async fn find_many(
        &self,
        _collection: &str,
        filter: Document,
        _options: &OperationOptions,
    ) -> DocumentStoreResult<Vec<Document>> {
        self.record("findMany", doc! { "filter": filter.clone() })?;

        Ok(self.matching(&filter))
    }

    async fn find_one_and_update(
        &self,
        _collection: &str,
        filter: Document,
        update: Document,
        _options: &OperationOptions,
    ) -> DocumentStoreResult<Option<Document>> {
        self.record("findOneAndUpdate", doc! { "filter": filter.clone(), "update": update.clone() })?;

        let before = self.matching(&filter).into_iter().next();
        self.apply_set(&filter, &update, Some(1));

        Ok(before)
    }

    async fn delete_one(
        &self,
        _collection: &str,
        filter: Document,
        _options: &OperationOptions,
    ) -> DocumentStoreResult<DeleteResult> {
        self.record("deleteOne", doc! { "filter": filter.clone() })?;

        let mut documents = self.documents.lock().unwrap();
        let position = documents
            .iter()
            .position(|document| matches(document, &filter));

        Ok(DeleteResult {
            deleted_count: position
                .map(|idx| documents.remove(idx))
                .map_or(0, |_| 1),
        })
    }

    async fn delete_many(
        &self,
        _collection: &str,
        filter: Document,
        _options: &OperationOptions,
    ) -> DocumentStoreResult<DeleteResult> {
        self.record("deleteMany", doc! { "filter": filter.clone() })?;

        let mut documents = self.documents.lock().unwrap();
        let before = documents.len();
        documents.retain(|document| !matches(document, &filter));

        Ok(DeleteResult {
            deleted_count: (before - documents.len()) as u64,
        })
    }

    async fn aggregate(
        &self,
        _collection: &str,
        pipeline: Vec<Document>,
        _options: &OperationOptions,
    ) -> DocumentStoreResult<Vec<Document>> {
        self.record("aggregate", doc! { "pipeline": pipeline })?;

        Ok(self.stored())
    }

    async fn count(
        &self,
        _collection: &str,
        filter: Document,
        _options: &OperationOptions,
    ) -> DocumentStoreResult<u64> {
        self.record("count", doc! { "filter": filter.clone() })?;

        Ok(self.matching(&filter).len() as u64)
    }

    async fn distinct(
        &self,
        _collection: &str,
        field: &str,
        filter: Document,
        _options: &OperationOptions,
    ) -> DocumentStoreResult<Vec<Bson>> {
        self.record("distinct", doc! { "field": field, "filter": filter.clone() })?;

        let mut values = Vec::new();

        for document in self.matching(&filter) {
            if let Some(value) = document.get(field) {
                if !values.contains(value) {
                    values.push(value.clone());
                }
            }
        }

        Ok(values)
    }

    async fn create_collection(&self, name: &str, _validator: Option<Document>) -> DocumentStoreResult<()> {
        self.record("createCollection", doc! { "name": name })
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.record("dropCollection", doc! { "name": name })
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        self.record("listCollections", Document::new())?;

        Ok(Vec::new())
    }

    async fn create_index(&self, collection: &str, keys: Document, unique: bool) -> DocumentStoreResult<String> {
        self.record("createIndex", doc! { "collection": collection, "keys": keys, "unique": unique })?;

        Ok("index".to_string())
    }

    async fn drop_index(&self, collection: &str, name: &str) -> DocumentStoreResult<()> {
        self.record("dropIndex", doc! { "collection": collection, "name": name })
    }
}

/// A shared log hooks append labels to.
#[derive(Debug, Clone, Default)]
pub struct HookLog(Arc<Mutex<Vec<String>>>);

impl HookLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}
