use std::{
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use bson::{Bson, DateTime, doc};
use serde::{Deserialize, Serialize};

use docmodel::{
    memory::InMemoryStore,
    plugins::{DefaultsPlugin, defaults::NOW, standard_plugins},
    prelude::*,
};

fn store() -> DocumentStore {
    DocumentStore::new(InMemoryStore::new())
}

#[tokio::test]
async fn now_defaults_are_stamped_after_the_call_starts() {
    let store = store();
    let schema = SchemaNode::object()
        .property("name", SchemaNode::string())
        .property("createdAt", SchemaNode::date().annotate("default", NOW));
    let events = store
        .model(ModelDefinition::new("events", schema).plugin(DefaultsPlugin))
        .await
        .unwrap();

    let before = DateTime::now();
    thread::sleep(Duration::from_millis(5));

    let result = events.insert_one(doc! { "name": "a" }, None).await.unwrap();
    let stored = events
        .find_one(doc! { "_id": result.inserted_id }, None)
        .await
        .unwrap()
        .unwrap();

    assert!(*stored.get_datetime("createdAt").unwrap() > before);
}

#[tokio::test]
async fn array_items_are_normalized_on_insert_and_push() {
    let store = store();
    let schema = SchemaNode::object()
        .property("name", SchemaNode::string())
        .property("tags", SchemaNode::array(SchemaNode::string().annotate("trim", true)))
        .property(
            "items",
            SchemaNode::array(
                SchemaNode::object()
                    .property("label", SchemaNode::string().annotate("trim", true))
                    .property("qty", SchemaNode::int().annotate("default", 1)),
            ),
        );
    let lists = store
        .model(ModelDefinition::new("lists", schema).plugins(standard_plugins()))
        .await
        .unwrap();

    lists
        .insert_one(doc! { "name": "groceries", "tags": [" a ", "b "] }, None)
        .await
        .unwrap();
    lists
        .update_one(
            doc! { "name": "groceries" },
            doc! { "$push": { "tags": { "$each": [" c"] }, "items": { "label": " milk " } } },
            None,
        )
        .await
        .unwrap();

    let stored = lists.find_one(doc! { "name": "groceries" }, None).await.unwrap().unwrap();

    assert_eq!(stored.get_array("tags").unwrap(), &vec![Bson::from("a"), Bson::from("b"), Bson::from("c")]);
    assert_eq!(
        stored.get_array("items").unwrap(),
        &vec![Bson::Document(doc! { "label": "milk", "qty": 1 })]
    );
}

#[derive(Debug, Default, Clone)]
struct Calls(Arc<Mutex<Vec<String>>>);

impl Calls {
    fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

#[tokio::test]
async fn failed_validation_skips_post_hooks_and_persistence() {
    let store = store();
    let calls = Calls::default();
    let hooks = calls.clone();

    let notes = store
        .model(
            ModelDefinition::new("notes", SchemaNode::object().property("text", SchemaNode::string())).configure(
                move |model| {
                    model.pre_sync(HookName::Validate, |ctx| match ctx.document().and_then(|note| note.get("text")) {
                        Some(_) => Ok(()),
                        None => Err(DocumentStoreError::validation("text", "is required")),
                    });

                    for name in [HookName::Insert, HookName::Operation(Method::InsertOne)] {
                        let calls = hooks.clone();

                        model.post_sync(name, move |_| {
                            calls.push(format!("post:{name}"));
                            Ok(())
                        });
                    }

                    Ok(())
                },
            ),
        )
        .await
        .unwrap();

    let error = notes.insert_one(doc! { "title": "untitled" }, None).await.unwrap_err();

    assert!(error.is_validation());
    assert!(calls.entries().is_empty());
    assert_eq!(notes.count(doc! {}, None).await.unwrap(), 0);

    notes.insert_one(doc! { "text": "hello" }, None).await.unwrap();

    assert_eq!(calls.entries(), vec!["post:insert", "post:insertOne"]);
}

#[tokio::test]
async fn batches_fan_out_one_post_hook_per_item_in_order() {
    let store = store();
    let calls = Calls::default();
    let hooks = calls.clone();

    let numbers = store
        .model(
            ModelDefinition::new("numbers", SchemaNode::object().property("n", SchemaNode::int())).configure(
                move |model| {
                    for name in [HookName::Insert, HookName::Find] {
                        let calls = hooks.clone();

                        model.post_sync(name, move |ctx| {
                            let n = ctx
                                .result()
                                .and_then(OperationResult::document)
                                .and_then(|document| document.get_i32("n").ok());

                            calls.push(format!("{name}:{:?}:{n:?}", ctx.batch_index()));
                            Ok(())
                        });
                    }

                    Ok(())
                },
            ),
        )
        .await
        .unwrap();

    numbers
        .insert_many(vec![doc! { "n": 1 }, doc! { "n": 2 }, doc! { "n": 3 }], None)
        .await
        .unwrap();
    let found = numbers
        .find_many(doc! {}, OperationOptions::builder().sort(doc! { "n": -1 }).build())
        .await
        .unwrap();

    assert_eq!(found.len(), 3);
    assert_eq!(
        calls.entries(),
        vec![
            "insert:Some(0):Some(1)",
            "insert:Some(1):Some(2)",
            "insert:Some(2):Some(3)",
            "find:Some(0):Some(3)",
            "find:Some(1):Some(2)",
            "find:Some(2):Some(1)",
        ]
    );
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct User {
    name: String,
    email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<String>,
}

impl Record for User {
    fn collection_name() -> &'static str {
        "users"
    }

    fn schema() -> SchemaNode {
        SchemaNode::object()
            .property("name", SchemaNode::string().required())
            .property("email", SchemaNode::string().annotate("lowercase", true).annotate("unique", true))
            .property("status", SchemaNode::string().annotate("default", "active"))
    }

    fn plugins() -> Vec<Arc<dyn Plugin>> {
        standard_plugins()
    }
}

#[tokio::test]
async fn typed_models_round_trip_through_plugins() {
    let store = store();
    let users = store.typed_model::<User>().await.unwrap();

    users
        .model()
        .call_static("ensureIndexes", doc! {})
        .await
        .unwrap();

    let ada = users
        .insert_one(&User {
            name: "Ada".to_string(),
            email: "ADA@Example.com".to_string(),
            status: None,
        })
        .await
        .unwrap();

    assert_eq!(ada.email, "ada@example.com");
    assert_eq!(ada.status.as_deref(), Some("active"));
    assert_eq!(users.find_one(doc! { "name": "Ada" }).await.unwrap(), Some(ada.clone()));

    let duplicate = users.insert_one(&ada).await.unwrap_err();

    assert_eq!(duplicate, DocumentStoreError::validation("email", "must be unique"));
    assert_eq!(store.model_names().await, vec!["users"]);
}

#[tokio::test]
async fn declared_schemas_drive_the_same_plugins() {
    let store = store();
    let schema = SchemaNode::from_document(&doc! {
        "bsonType": "object",
        "required": ["sku"],
        "properties": {
            "sku": { "bsonType": "string", "caseTransform": "trim|upper", "index": true },
            "price": { "bsonType": "double", "minimum": 0 },
        },
    })
    .unwrap();
    let products = store
        .model(ModelDefinition::new("products", schema).plugins(standard_plugins()))
        .await
        .unwrap();

    let names = products.call_static("ensureIndexes", doc! {}).await.unwrap();
    let inserted = products
        .insert_one(doc! { "sku": " ab-1 ", "price": "9.5" }, None)
        .await
        .unwrap();

    assert_eq!(names, Bson::Array(vec![Bson::from("sku_1")]));
    assert_eq!(inserted.document.get_str("sku").unwrap(), "AB-1");
    assert_eq!(inserted.document.get_f64("price").unwrap(), 9.5);
    assert!(
        products
            .insert_one(doc! { "price": 1.0 }, None)
            .await
            .unwrap_err()
            .is_validation()
    );
}
