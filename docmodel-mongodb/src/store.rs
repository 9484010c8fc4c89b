use std::collections::HashMap;
use async_trait::async_trait;
use futures::TryStreamExt;
use bson::{Bson, Document, oid::ObjectId};
use mongodb::{
    Client, Collection as MongoCollection, Database, IndexModel,
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::{
        ClientOptions, CountOptions, FindOneAndUpdateOptions, FindOneOptions, FindOptions, IndexOptions,
        ReturnDocument as MongoReturnDocument,
    },
};
use tracing::{debug, warn};

use docmodel_core::{
    backend::{DeleteResult, InsertManyResult, InsertOneResult, StoreBackend, StoreBackendBuilder, UpdateResult},
    error::{DocumentStoreError, DocumentStoreResult},
    options::{OperationOptions, ReturnDocument},
};

/// Maps a driver error to a backend error, keeping the server's numeric code.
fn backend_error(error: MongoError) -> DocumentStoreError {
    let code = match error.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(failure)) => Some(failure.code),
        ErrorKind::Write(WriteFailure::WriteConcernError(failure)) => Some(failure.code),
        ErrorKind::Command(failure) => Some(failure.code),
        ErrorKind::InsertMany(failure) => failure
            .write_errors
            .as_ref()
            .and_then(|errors| errors.first())
            .map(|failure| failure.code),
        _ => None,
    };

    DocumentStoreError::Backend { code, message: error.to_string() }
}

/// Orders the driver's index-keyed ids by input position.
fn ordered_ids(ids: HashMap<usize, Bson>) -> Vec<Bson> {
    let mut ids = ids.into_iter().collect::<Vec<_>>();
    ids.sort_by_key(|(idx, _)| *idx);

    ids.into_iter()
        .map(|(_, id)| id)
        .collect()
}

/// Assigns an `_id` up front so the stored document can be returned as is.
fn with_id(mut document: Document) -> Document {
    if !document.contains_key("_id") {
        document.insert("_id", ObjectId::new());
    }

    document
}

fn find_options(options: &OperationOptions) -> FindOptions {
    let mut find = FindOptions::default();

    find.projection = options.projection.clone();
    find.sort = options.sort.clone();
    find.limit = options.limit;
    find.skip = options.skip;

    find
}

fn find_one_options(options: &OperationOptions) -> FindOneOptions {
    let mut find = FindOneOptions::default();

    find.projection = options.projection.clone();
    find.sort = options.sort.clone();
    find.skip = options.skip;

    find
}

#[derive(Debug, Clone)]
pub struct MongoDbStore {
    client: Client,
    database: String,
}

impl MongoDbStore {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, database)
    }

    fn database(&self) -> Database {
        self.client.database(&self.database)
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.database().collection(collection_name)
    }
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    async fn insert_one(
        &self,
        collection: &str,
        document: Document,
        _options: &OperationOptions,
    ) -> DocumentStoreResult<InsertOneResult> {
        let document = with_id(document);
        let result = self
            .get_collection(collection)
            .insert_one(&document)
            .await
            .map_err(backend_error)?;

        Ok(InsertOneResult { inserted_id: result.inserted_id, document })
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
        _options: &OperationOptions,
    ) -> DocumentStoreResult<InsertManyResult> {
        if documents.is_empty() {
            return Ok(InsertManyResult::default());
        }

        let documents = documents
            .into_iter()
            .map(with_id)
            .collect::<Vec<_>>();
        let result = self
            .get_collection(collection)
            .insert_many(&documents)
            .await
            .map_err(backend_error)?;

        Ok(InsertManyResult {
            inserted_ids: ordered_ids(result.inserted_ids),
            documents,
        })
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: &OperationOptions,
    ) -> DocumentStoreResult<UpdateResult> {
        let result = self
            .get_collection(collection)
            .update_one(filter, update)
            .upsert(options.upsert)
            .await
            .map_err(backend_error)?;

        Ok(UpdateResult {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: &OperationOptions,
    ) -> DocumentStoreResult<UpdateResult> {
        let result = self
            .get_collection(collection)
            .update_many(filter, update)
            .upsert(options.upsert)
            .await
            .map_err(backend_error)?;

        Ok(UpdateResult {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
        options: &OperationOptions,
    ) -> DocumentStoreResult<Option<Document>> {
        self.get_collection(collection)
            .find_one(filter)
            .with_options(find_one_options(options))
            .await
            .map_err(backend_error)
    }

    async fn find_many(
        &self,
        collection: &str,
        filter: Document,
        options: &OperationOptions,
    ) -> DocumentStoreResult<Vec<Document>> {
        self.get_collection(collection)
            .find(filter)
            .with_options(find_options(options))
            .await
            .map_err(backend_error)?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(backend_error)
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: &OperationOptions,
    ) -> DocumentStoreResult<Option<Document>> {
        let mut find = FindOneAndUpdateOptions::default();

        find.projection = options.projection.clone();
        find.sort = options.sort.clone();
        find.upsert = Some(options.upsert);
        find.return_document = Some(match options.return_document {
            ReturnDocument::Before => MongoReturnDocument::Before,
            ReturnDocument::After => MongoReturnDocument::After,
        });

        self.get_collection(collection)
            .find_one_and_update(filter, update)
            .with_options(find)
            .await
            .map_err(backend_error)
    }

    async fn delete_one(
        &self,
        collection: &str,
        filter: Document,
        _options: &OperationOptions,
    ) -> DocumentStoreResult<DeleteResult> {
        let result = self
            .get_collection(collection)
            .delete_one(filter)
            .await
            .map_err(backend_error)?;

        Ok(DeleteResult { deleted_count: result.deleted_count })
    }

    async fn delete_many(
        &self,
        collection: &str,
        filter: Document,
        _options: &OperationOptions,
    ) -> DocumentStoreResult<DeleteResult> {
        let result = self
            .get_collection(collection)
            .delete_many(filter)
            .await
            .map_err(backend_error)?;

        Ok(DeleteResult { deleted_count: result.deleted_count })
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
        _options: &OperationOptions,
    ) -> DocumentStoreResult<Vec<Document>> {
        self.get_collection(collection)
            .aggregate(pipeline)
            .await
            .map_err(backend_error)?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(backend_error)
    }

    async fn count(
        &self,
        collection: &str,
        filter: Document,
        options: &OperationOptions,
    ) -> DocumentStoreResult<u64> {
        let mut count = CountOptions::default();

        count.skip = options.skip;
        count.limit = options.limit.map(|limit| limit.unsigned_abs());

        self.get_collection(collection)
            .count_documents(filter)
            .with_options(count)
            .await
            .map_err(backend_error)
    }

    async fn distinct(
        &self,
        collection: &str,
        field: &str,
        filter: Document,
        _options: &OperationOptions,
    ) -> DocumentStoreResult<Vec<Bson>> {
        self.get_collection(collection)
            .distinct(field, filter)
            .await
            .map_err(backend_error)
    }

    async fn create_collection(&self, name: &str, validator: Option<Document>) -> DocumentStoreResult<()> {
        let database = self.database();
        let action = database.create_collection(name);
        let action = match validator {
            Some(validator) => action.validator(validator),
            None => action,
        };

        action.await.map_err(backend_error)?;
        debug!(collection = name, "created collection");

        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.get_collection(name)
            .drop()
            .await
            .map_err(backend_error)?;

        Ok(())
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        let mut names = self
            .database()
            .list_collection_names()
            .await
            .map_err(backend_error)?;

        names.sort();

        Ok(names)
    }

    async fn create_index(
        &self,
        collection: &str,
        keys: Document,
        unique: bool,
    ) -> DocumentStoreResult<String> {
        let result = self
            .get_collection(collection)
            .create_index(
                IndexModel::builder()
                .keys(keys)
                .options(
                    IndexOptions::builder()
                    .unique(unique)
                    .build()
                )
                .build()
            )
            .await
            .map_err(backend_error)?;

        Ok(result.index_name)
    }

    async fn drop_index(&self, collection: &str, name: &str) -> DocumentStoreResult<()> {
        self.get_collection(collection)
            .drop_index(name)
            .await
            .map_err(backend_error)?;

        Ok(())
    }

    async fn shutdown(&self) -> DocumentStoreResult<()> {
        warn!(database = %self.database, "shutting down MongoDB client");
        self.client.clone().shutdown().await;

        Ok(())
    }
}

pub struct MongoDbStoreBuilder {
    dsn: String,
    database: String,
    app_name: Option<String>,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
            app_name: None,
        }
    }

    /// Name reported to the server in connection handshakes.
    pub fn app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        let mut options = ClientOptions::parse(&self.dsn)
            .await
            .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?;

        if self.app_name.is_some() {
            options.app_name = self.app_name;
        }

        Ok(MongoDbStore::new(
            Client::with_options(options)
                .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?,
            self.database,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn orders_inserted_ids_by_position() {
        let ids = HashMap::from([(2, Bson::Int32(30)), (0, Bson::Int32(10)), (1, Bson::Int32(20))]);

        assert_eq!(ordered_ids(ids), vec![Bson::Int32(10), Bson::Int32(20), Bson::Int32(30)]);
    }

    #[test]
    fn keeps_supplied_ids_and_generates_missing_ones() {
        assert_eq!(with_id(doc! { "_id": 7 }).get("_id"), Some(&Bson::Int32(7)));
        assert!(matches!(with_id(doc! { "name": "Ada" }).get("_id"), Some(Bson::ObjectId(_))));
    }

    #[test]
    fn translates_operation_options() {
        let options = OperationOptions::builder()
            .sort(doc! { "age": -1 })
            .skip(5)
            .limit(10)
            .projection(doc! { "password": 0 })
            .build();

        let find = find_options(&options);
        let find_one = find_one_options(&options);

        assert_eq!(find.limit, Some(10));
        assert_eq!(find.skip, Some(5));
        assert_eq!(find_one.sort, Some(doc! { "age": -1 }));
        assert_eq!(find_one.projection, Some(doc! { "password": 0 }));
    }
}
