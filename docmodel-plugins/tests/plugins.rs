use std::{fmt, sync::Arc};

use bson::{Bson, DateTime, doc};
use futures::future::BoxFuture;
use mea::rwlock::RwLock;
use serde_json::json;

use docmodel_core::{
    context::Method,
    error::{DocumentStoreError, DocumentStoreResult},
    model::Model,
    options::OperationOptions,
    schema::SchemaNode,
    store::{DocumentStore, ModelDefinition},
};
use docmodel_memory::InMemoryStore;
use docmodel_plugins::{
    AuditEntry, AuditOutcome, AuditPlugin, AuditSink, TimestampsOptions, TimestampsPlugin, standard_plugins,
};

fn users_schema() -> SchemaNode {
    SchemaNode::object()
        .property("name", SchemaNode::string().required().annotate("trim", true))
        .property("email", SchemaNode::string().annotate("unique", true).annotate("caseTransform", "trim|lower"))
        .property("age", SchemaNode::int().annotate("minimum", 0))
        .property("status", SchemaNode::string().annotate("default", "active"))
        .property("password", SchemaNode::string().annotate("select", false))
        .property(
            "items",
            SchemaNode::array(
                SchemaNode::object()
                    .property("label", SchemaNode::string().annotate("trim", true).annotate("caseTransform", "lower"))
                    .property("qty", SchemaNode::int().annotate("default", 1)),
            ),
        )
}

async fn users(store: &DocumentStore) -> Model {
    store
        .model(ModelDefinition::new("users", users_schema()).plugins(standard_plugins()))
        .await
        .unwrap()
}

#[tokio::test]
async fn inserts_get_defaults_timestamps_and_normalized_strings() {
    let store = DocumentStore::new(InMemoryStore::new());
    let users = users(&store).await;
    let before = DateTime::now();

    let result = users
        .insert_one(doc! { "name": "  Ada ", "email": " ADA@Example.com", "items": [{ "label": " Pen " }] }, None)
        .await
        .unwrap();
    let stored = users
        .find_one(doc! { "_id": result.inserted_id }, None)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(stored.get_str("name").unwrap(), "Ada");
    assert_eq!(stored.get_str("email").unwrap(), "ada@example.com");
    assert_eq!(stored.get_str("status").unwrap(), "active");
    assert_eq!(stored.get_array("items").unwrap(), &vec![Bson::Document(doc! { "label": "pen", "qty": 1 })]);
    assert!(*stored.get_datetime("createdAt").unwrap() >= before);
    assert_eq!(stored.get("createdAt"), stored.get("updatedAt"));
}

#[tokio::test]
async fn updates_normalize_positional_keys_and_touch_updated_at() {
    let store = DocumentStore::new(InMemoryStore::new());
    let users = users(&store).await;

    users
        .insert_one(doc! { "name": "Ada", "items": [{ "label": "a" }, { "label": "b" }] }, None)
        .await
        .unwrap();
    let inserted = users.find_one(doc! { "name": "Ada" }, None).await.unwrap().unwrap();

    let result = users
        .update_one(doc! { "name": "Ada" }, doc! { "$set": { "items.1.label": "  Desk " } }, None)
        .await
        .unwrap();
    let updated = users.find_one(doc! { "name": "Ada" }, None).await.unwrap().unwrap();

    assert_eq!(result.modified_count, 1);
    assert_eq!(
        updated.get_array("items").unwrap()[1],
        Bson::Document(doc! { "label": "desk", "qty": 1 })
    );
    assert!(updated.get_datetime("updatedAt").unwrap() >= inserted.get_datetime("updatedAt").unwrap());
    assert_eq!(updated.get("createdAt"), inserted.get("createdAt"));
}

#[tokio::test]
async fn upserts_receive_defaults_through_set_on_insert() {
    let store = DocumentStore::new(InMemoryStore::new());
    let users = users(&store).await;

    let result = users
        .update_one(
            doc! { "email": "grace@example.com" },
            doc! { "$set": { "name": "Grace" } },
            OperationOptions::builder().upsert(true).build(),
        )
        .await
        .unwrap();
    let stored = users
        .find_one(doc! { "email": "grace@example.com" }, None)
        .await
        .unwrap()
        .unwrap();

    assert!(result.upserted_id.is_some());
    assert_eq!(stored.get_str("status").unwrap(), "active");
    assert!(stored.get_datetime("createdAt").is_ok());
    assert!(stored.get_datetime("updatedAt").is_ok());
}

#[tokio::test]
async fn upsert_defaults_skip_paths_the_update_already_touches() {
    let store = DocumentStore::new(InMemoryStore::new());
    let users = users(&store).await;

    users
        .update_one(
            doc! { "email": "ken@example.com" },
            doc! { "$set": { "name": "Ken" }, "$unset": { "status": "" } },
            OperationOptions::builder().upsert(true).build(),
        )
        .await
        .unwrap();
    let stored = users
        .find_one(doc! { "email": "ken@example.com" }, None)
        .await
        .unwrap()
        .unwrap();

    assert!(!stored.contains_key("status"));
    assert!(stored.get_datetime("createdAt").is_ok());
}

#[tokio::test]
async fn values_and_filters_are_cast_to_declared_types() {
    let store = DocumentStore::new(InMemoryStore::new());
    let users = users(&store).await;

    users
        .insert_one(doc! { "name": "Alan", "age": "41" }, None)
        .await
        .unwrap();

    let stored = users.find_one(doc! { "name": "Alan" }, None).await.unwrap().unwrap();
    assert_eq!(stored.get("age"), Some(&Bson::Int32(41)));

    assert_eq!(users.count(doc! { "age": { "$gte": "40" } }, None).await.unwrap(), 1);
    assert_eq!(users.count(doc! { "age": "12" }, None).await.unwrap(), 0);

    let error = users
        .insert_one(doc! { "name": "Bad", "age": "old" }, None)
        .await
        .unwrap_err();
    assert!(error.is_validation());
}

#[tokio::test]
async fn failed_validation_leaves_the_collection_untouched() {
    let store = DocumentStore::new(InMemoryStore::new());
    let users = users(&store).await;

    let missing = users.insert_one(doc! { "email": "x@y" }, None).await.unwrap_err();
    let negative = users.insert_one(doc! { "name": "Neg", "age": -3 }, None).await.unwrap_err();

    assert_eq!(missing, DocumentStoreError::validation("name", "is required"));
    assert_eq!(negative, DocumentStoreError::validation("age", "must be at least 0"));
    assert_eq!(users.count(doc! {}, None).await.unwrap(), 0);
    assert!(store.list_collections().await.unwrap().is_empty());
}

#[tokio::test]
async fn find_one_and_update_rejects_invalid_set_payloads() {
    let store = DocumentStore::new(InMemoryStore::new());
    let users = users(&store).await;

    users
        .insert_one(doc! { "name": "Ada", "age": 30 }, None)
        .await
        .unwrap();

    let error = users
        .find_one_and_update(doc! { "name": "Ada" }, doc! { "$set": { "age": -5 } }, None)
        .await
        .unwrap_err();
    let stored = users.find_one(doc! { "name": "Ada" }, None).await.unwrap().unwrap();

    assert_eq!(error, DocumentStoreError::validation("age", "must be at least 0"));
    assert_eq!(stored.get("age"), Some(&Bson::Int32(30)));
}

#[tokio::test]
async fn hidden_paths_are_excluded_unless_requested() {
    let store = DocumentStore::new(InMemoryStore::new());
    let users = users(&store).await;

    users
        .insert_one(doc! { "name": "Ada", "password": "s3cret" }, None)
        .await
        .unwrap();

    let hidden = users.find_one(doc! {}, None).await.unwrap().unwrap();
    let listed = users.find_many(doc! {}, None).await.unwrap();
    let shown = users
        .find_one(doc! {}, OperationOptions::builder().extra("includeHidden", true).build())
        .await
        .unwrap()
        .unwrap();
    let projected = users
        .find_one(doc! {}, OperationOptions::builder().projection(doc! { "name": 1 }).build())
        .await
        .unwrap()
        .unwrap();

    assert!(!hidden.contains_key("password"));
    assert!(!listed[0].contains_key("password"));
    assert_eq!(shown.get_str("password").unwrap(), "s3cret");
    assert_eq!(projected.keys().collect::<Vec<_>>(), vec!["_id", "name"]);
}

#[tokio::test]
async fn references_are_populated_on_request() {
    let store = DocumentStore::new(InMemoryStore::new());
    let users = users(&store).await;
    let posts = store
        .model(
            ModelDefinition::new(
                "posts",
                SchemaNode::object()
                    .property("title", SchemaNode::string())
                    .property("author", SchemaNode::object_id().annotate("ref", "users")),
            )
            .plugins(standard_plugins()),
        )
        .await
        .unwrap();

    let author_id = users
        .insert_one(doc! { "name": "Ada" }, None)
        .await
        .unwrap()
        .inserted_id;
    posts
        .insert_many(
            vec![
                doc! { "title": "Notes", "author": author_id.clone() },
                doc! { "title": "Sketch", "author": author_id.clone() },
            ],
            None,
        )
        .await
        .unwrap();

    let plain = posts.find_one(doc! { "title": "Notes" }, None).await.unwrap().unwrap();
    let populated = posts
        .find_many(doc! {}, OperationOptions::builder().populate("author").build())
        .await
        .unwrap();

    assert_eq!(plain.get("author"), Some(&author_id));
    assert_eq!(populated.len(), 2);

    for post in &populated {
        let author = post.get_document("author").unwrap();

        assert_eq!(author.get_str("name").unwrap(), "Ada");
        assert_eq!(author.get("_id"), Some(&author_id));
    }
}

#[tokio::test]
async fn unique_paths_report_duplicates_as_validation_errors() {
    let store = DocumentStore::new(InMemoryStore::new());
    let users = users(&store).await;

    let names = users.call_static("ensureIndexes", doc! {}).await.unwrap();
    assert_eq!(names, Bson::Array(vec![Bson::from("email_1")]));

    users
        .insert_one(doc! { "name": "Ada", "email": "ada@example.com" }, None)
        .await
        .unwrap();
    let error = users
        .insert_one(doc! { "name": "Imposter", "email": " ADA@example.com " }, None)
        .await
        .unwrap_err();

    assert_eq!(error, DocumentStoreError::validation("email", "must be unique"));
    assert_eq!(users.count(doc! {}, None).await.unwrap(), 1);
}

#[tokio::test]
async fn timestamp_fields_come_from_options() {
    let options: TimestampsOptions = serde_json::from_value(json!({ "createdAt": "created", "updatedAt": null })).unwrap();
    let store = DocumentStore::new(InMemoryStore::new());
    let notes = store
        .model(
            ModelDefinition::new("notes", SchemaNode::object().property("text", SchemaNode::string()))
                .plugin(TimestampsPlugin::new(options)),
        )
        .await
        .unwrap();

    let result = notes.insert_one(doc! { "text": "hi" }, None).await.unwrap();

    assert!(notes.schema().properties().unwrap().contains_key("created"));
    assert!(result.document.get_datetime("created").is_ok());
    assert!(!result.document.contains_key("updatedAt"));
}

struct RecordingSink {
    entries: RwLock<Vec<AuditEntry>>,
}

impl RecordingSink {
    fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }
}

impl fmt::Debug for RecordingSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingSink").finish_non_exhaustive()
    }
}

impl AuditSink for RecordingSink {
    fn record(&self, entry: AuditEntry) -> BoxFuture<'_, DocumentStoreResult<()>> {
        Box::pin(async move {
            self.entries.write().await.push(entry);
            Ok(())
        })
    }
}

#[tokio::test]
async fn audit_records_successes_and_backend_failures() {
    let sink = Arc::new(RecordingSink::new());
    let store = DocumentStore::new(InMemoryStore::new());
    let accounts = store
        .model(
            ModelDefinition::new("accounts", SchemaNode::object().property("email", SchemaNode::string()))
                .plugin(AuditPlugin::new(sink.clone())),
        )
        .await
        .unwrap();

    store
        .backend()
        .create_index("accounts", doc! { "email": 1 }, true)
        .await
        .unwrap();

    accounts.insert_one(doc! { "email": "a@b" }, None).await.unwrap();
    accounts.find_one(doc! { "email": "a@b" }, None).await.unwrap();
    accounts.insert_one(doc! { "email": "a@b" }, None).await.unwrap_err();

    let entries = sink.entries.read().await;
    let summary = entries
        .iter()
        .map(|entry| (entry.model.as_str(), entry.method, &entry.outcome))
        .collect::<Vec<_>>();

    assert_eq!(summary.len(), 3);
    assert_eq!(summary[0], ("accounts", Method::InsertOne, &AuditOutcome::Success));
    assert_eq!(summary[1], ("accounts", Method::FindOne, &AuditOutcome::Success));
    assert_eq!(summary[2].1, Method::InsertOne);
    assert!(matches!(summary[2].2, AuditOutcome::Failure(message) if message.contains("E11000")));
}
