mod common;

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use bson::{Bson, doc};

use common::{HookLog, RecordingBackend};
use docmodel_core::{
    context::{HookName, Method, OperationResult, OperationState},
    error::{DocumentStoreError, DocumentStoreResult},
    model::{Model, ModelBuilder, properties},
    plugin::plugin_fn,
    schema::SchemaNode,
    store::{DocumentStore, ModelDefinition},
};

fn users_schema() -> SchemaNode {
    SchemaNode::object()
        .property("name", SchemaNode::string())
        .property("tags", SchemaNode::array(SchemaNode::string()))
}

async fn users_model<F>(backend: &Arc<RecordingBackend>, configure: F) -> Model
where
    F: Fn(&mut ModelBuilder) -> DocumentStoreResult<()> + Send + Sync + 'static,
{
    DocumentStore::from_shared(backend.clone())
        .model(ModelDefinition::new("users", users_schema()).configure(configure))
        .await
        .unwrap()
}

#[tokio::test]
async fn insert_hooks_run_in_order_around_the_backend_call() {
    let backend = RecordingBackend::shared();
    let log = HookLog::default();
    let hooks = log.clone();

    let users = users_model(&backend, move |model| {
        for name in [HookName::Insert, HookName::Operation(Method::InsertOne), HookName::Validate] {
            let log = hooks.clone();
            model.pre_sync(name, move |ctx| {
                log.push(format!("pre:{name}:{:?}", ctx.state()));
                Ok(())
            });
        }

        for name in [HookName::Insert, HookName::Operation(Method::InsertOne)] {
            let log = hooks.clone();
            model.post_sync(name, move |ctx| {
                log.push(format!("post:{name}:{:?}", ctx.state()));
                Ok(())
            });
        }

        Ok(())
    })
    .await;

    let result = users
        .insert_one(doc! { "name": "Ada" }, None)
        .await
        .unwrap();

    assert_eq!(
        log.entries(),
        vec![
            "pre:insert:PreHooks",
            "pre:insertOne:PreHooks",
            "pre:validate:PreHooks",
            "post:insert:PostHooks",
            "post:insertOne:PostHooks",
        ]
    );
    assert_eq!(backend.call_names(), vec!["insertOne"]);
    assert_eq!(result.document.get_str("name").unwrap(), "Ada");
    assert!(matches!(result.inserted_id, Bson::ObjectId(_)));
}

#[tokio::test]
async fn pre_hook_overrides_reach_the_backend_and_keep_the_original() {
    let backend = RecordingBackend::shared();
    let log = HookLog::default();
    let hooks = log.clone();

    let users = users_model(&backend, move |model| {
        model.pre_sync(HookName::Update, |ctx| {
            if let Some(filter) = ctx.filter_mut() {
                filter.insert("tenant", "acme");
            }
            Ok(())
        });

        let validated = hooks.clone();
        model.pre_sync(HookName::Validate, move |ctx| {
            validated.push(format!("validate:{}", ctx.method()));
            Ok(())
        });

        let original = hooks.clone();
        model.post_sync(HookName::Update, move |ctx| {
            original.push(format!("original:{}", ctx.filter_override().original().cloned().unwrap_or_default()));
            Ok(())
        });

        Ok(())
    })
    .await;

    users
        .update_one(doc! { "name": "Ada" }, doc! { "$set": { "name": "Ada L." } }, None)
        .await
        .unwrap();
    users
        .update_many(doc! { "name": "Ada" }, doc! { "$inc": { "visits": 1 } }, None)
        .await
        .unwrap();

    let calls = backend.calls();
    assert_eq!(
        calls[0],
        (
            "updateOne".to_string(),
            doc! {
                "filter": { "name": "Ada", "tenant": "acme" },
                "update": { "$set": { "name": "Ada L." } },
            }
        )
    );
    assert_eq!(
        calls[1].1.get_document("filter").unwrap(),
        &doc! { "name": "Ada", "tenant": "acme" }
    );

    let original = format!("original:{}", doc! { "name": "Ada" });
    assert_eq!(log.entries(), vec!["validate:updateOne".to_string(), original.clone(), original]);
}

#[tokio::test]
async fn insert_many_fans_out_per_item() {
    let backend = RecordingBackend::shared();
    let log = HookLog::default();
    let hooks = log.clone();

    let users = users_model(&backend, move |model| {
        model.pre_sync(HookName::Insert, |ctx| {
            let seq = ctx.batch_index().unwrap_or_default() as i32;

            if let Some(document) = ctx.document_mut() {
                document.insert("seq", seq);
            }
            Ok(())
        });

        let items = hooks.clone();
        model.post_sync(HookName::Insert, move |ctx| {
            items.push(format!("item:{}", ctx.batch_index().unwrap_or(usize::MAX)));

            if let Some(document) = ctx.result_mut().and_then(OperationResult::document_mut) {
                document.insert("seen", true);
            }
            Ok(())
        });

        let batch = hooks.clone();
        model.post_sync(HookName::Operation(Method::InsertMany), move |ctx| {
            let size = ctx
                .result()
                .and_then(OperationResult::documents)
                .map_or(0, Vec::len);

            batch.push(format!("insertMany:{size}"));
            Ok(())
        });

        Ok(())
    })
    .await;

    let result = users
        .insert_many(vec![doc! { "name": "a" }, doc! { "name": "b" }, doc! { "name": "c" }], None)
        .await
        .unwrap();

    assert_eq!(log.entries(), vec!["item:0", "item:1", "item:2", "insertMany:3"]);
    assert_eq!(result.inserted_ids.len(), 3);

    for (idx, document) in result.documents.iter().enumerate() {
        assert_eq!(document.get_i32("seq").unwrap(), idx as i32);
        assert_eq!(document.get_bool("seen").unwrap(), true);
    }

    let stored = backend.stored();
    assert_eq!(stored.len(), 3);
    assert_eq!(stored[2].get_i32("seq").unwrap(), 2);
    assert!(stored[2].get("seen").is_none());
}

#[tokio::test]
async fn find_post_hooks_run_per_document_and_may_drop_it() {
    let backend = RecordingBackend::shared();
    backend.seed(vec![doc! { "n": 1 }, doc! { "n": 2 }, doc! { "n": 3 }]);

    let users = users_model(&backend, |model| {
        model.post_sync(HookName::Find, |ctx| {
            let hidden = ctx
                .result()
                .and_then(OperationResult::document)
                .is_some_and(|document| document.get_i32("n").ok() == Some(2));

            if hidden {
                ctx.set_result(OperationResult::Document(None));
            }
            Ok(())
        });

        Ok(())
    })
    .await;

    let found = users.find_many(doc! {}, None).await.unwrap();

    assert_eq!(found, vec![doc! { "n": 1 }, doc! { "n": 3 }]);
    assert_eq!(users.find_one(doc! { "n": 2 }, None).await.unwrap(), None);
    assert_eq!(users.find_one(doc! { "n": 3 }, None).await.unwrap(), Some(doc! { "n": 3 }));
}

#[tokio::test]
async fn failing_validation_leaves_the_collection_untouched() {
    let backend = RecordingBackend::shared();
    let log = HookLog::default();
    let hooks = log.clone();

    let users = users_model(&backend, move |model| {
        model.pre_sync(HookName::Validate, |ctx| {
            let named = ctx
                .document()
                .is_some_and(|document| document.contains_key("name"));

            match named {
                true => Ok(()),
                false => Err(DocumentStoreError::validation("name", "Path `name` is required.")),
            }
        });

        let after = hooks.clone();
        model.post_sync(HookName::Insert, move |_| {
            after.push("post:insert");
            Ok(())
        });

        let errors = hooks.clone();
        model.post_sync(HookName::Error, move |_| {
            errors.push("error");
            Ok(())
        });

        Ok(())
    })
    .await;

    let error = users
        .insert_one(doc! { "tags": ["x"] }, None)
        .await
        .unwrap_err();

    assert!(error.is_validation());
    assert_eq!(error.code(), Some(121));
    assert!(backend.calls().is_empty());
    assert!(backend.stored().is_empty());
    assert!(log.entries().is_empty());

    let error = users
        .insert_many(vec![doc! { "name": "ok" }, doc! { "tags": [] }], None)
        .await
        .unwrap_err();

    assert!(error.is_validation());
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn error_hooks_see_the_backend_code_and_may_suppress_it() {
    let backend = RecordingBackend::shared();
    let log = HookLog::default();
    let hooks = log.clone();

    let users = users_model(&backend, move |model| {
        for name in [HookName::Error, HookName::InsertError, HookName::OperationError(Method::InsertOne)] {
            let log = hooks.clone();
            model.post_sync(name, move |ctx| {
                let code = ctx.error().and_then(DocumentStoreError::code).unwrap_or_default();

                log.push(format!("{name}:{code}:{:?}", ctx.state()));
                Ok(())
            });
        }

        model.post(HookName::OperationError(Method::InsertOne), |ctx| {
            Box::pin(async move {
                if ctx.error().is_some_and(DocumentStoreError::is_duplicate_key) {
                    ctx.clear_error();
                }
                Ok(())
            })
        });

        let after = hooks.clone();
        model.post_sync(HookName::Insert, move |_| {
            after.push("post:insert");
            Ok(())
        });

        Ok(())
    })
    .await;

    backend.fail_next(DocumentStoreError::backend_with_code(11000, "E11000 duplicate key error"));

    let result = users
        .insert_one(doc! { "name": "Ada" }, None)
        .await
        .unwrap();

    assert_eq!(result.inserted_id, Bson::Null);
    assert_eq!(
        log.entries(),
        vec![
            "error:11000:ErrorHandling",
            "insertError:11000:ErrorHandling",
            "insertOneError:11000:ErrorHandling",
            "post:insert",
        ]
    );
}

#[tokio::test]
async fn unsuppressed_backend_errors_propagate_unchanged() {
    let backend = RecordingBackend::shared();
    let log = HookLog::default();
    let hooks = log.clone();

    let users = users_model(&backend, move |model| {
        let errors = hooks.clone();
        model.post_sync(HookName::FindError, move |_| {
            errors.push("findError");
            Ok(())
        });

        let after = hooks.clone();
        model.post_sync(HookName::Find, move |_| {
            after.push("post:find");
            Ok(())
        });

        Ok(())
    })
    .await;

    backend.fail_next(DocumentStoreError::backend_with_code(13, "unauthorized"));

    let error = users
        .find_many(doc! {}, None)
        .await
        .unwrap_err();

    assert_eq!(error, DocumentStoreError::backend_with_code(13, "unauthorized"));
    assert_eq!(log.entries(), vec!["findError"]);
}

async fn model_failing_on_second_item(backend: &Arc<RecordingBackend>, log: &HookLog, suppress: bool) -> Model {
    let hooks = log.clone();

    users_model(backend, move |model| {
        let items = hooks.clone();
        model.post_sync(HookName::Find, move |ctx| {
            let n = ctx
                .result()
                .and_then(OperationResult::document)
                .and_then(|document| document.get_i32("n").ok())
                .unwrap_or_default();

            items.push(format!("find:{n}"));

            match n {
                2 => Err(DocumentStoreError::Unknown("boom".to_string())),
                _ => Ok(()),
            }
        });

        let errors = hooks.clone();
        model.post_sync(HookName::Error, move |ctx| {
            let failed = ctx
                .error()
                .is_some_and(|error| matches!(error, DocumentStoreError::Unknown(message) if message == "boom"));

            errors.push(format!("error:{failed}:{:?}", ctx.state()));

            if suppress {
                ctx.clear_error();
            }
            Ok(())
        });

        let batch = hooks.clone();
        model.post_sync(HookName::Operation(Method::FindMany), move |_| {
            batch.push("findMany");
            Ok(())
        });

        Ok(())
    })
    .await
}

#[tokio::test]
async fn failing_fan_out_item_stops_the_batch_and_reaches_error_hooks() {
    let backend = RecordingBackend::shared();
    backend.seed(vec![doc! { "n": 1 }, doc! { "n": 2 }, doc! { "n": 3 }]);

    let log = HookLog::default();
    let users = model_failing_on_second_item(&backend, &log, false).await;

    let error = users
        .find_many(doc! {}, None)
        .await
        .unwrap_err();

    assert_eq!(error, DocumentStoreError::Unknown("boom".to_string()));
    assert_eq!(log.entries(), vec!["find:1", "find:2", "error:true:ErrorHandling"]);
}

#[tokio::test]
async fn error_hooks_may_suppress_a_failing_fan_out_item() {
    let backend = RecordingBackend::shared();
    backend.seed(vec![doc! { "n": 1 }, doc! { "n": 2 }, doc! { "n": 3 }]);

    let log = HookLog::default();
    let users = model_failing_on_second_item(&backend, &log, true).await;

    let found = users.find_many(doc! {}, None).await.unwrap();

    assert_eq!(found, vec![doc! { "n": 1 }, doc! { "n": 2 }, doc! { "n": 3 }]);
    assert_eq!(log.entries(), vec!["find:1", "find:2", "error:true:ErrorHandling"]);
}

#[tokio::test]
async fn find_one_and_update_validates_set_updates() {
    let backend = RecordingBackend::shared();
    backend.seed(vec![doc! { "name": "Ada", "visits": 1 }]);

    let users = users_model(&backend, |model| {
        model.pre_sync(HookName::Validate, |ctx| {
            let negative = ctx
                .update()
                .and_then(|update| update.get_document("$set").ok())
                .and_then(|set| set.get_i32("visits").ok())
                .is_some_and(|visits| visits < 0);

            match negative {
                true => Err(DocumentStoreError::validation("visits", "must be at least 0")),
                false => Ok(()),
            }
        });

        Ok(())
    })
    .await;

    let error = users
        .find_one_and_update(doc! { "name": "Ada" }, doc! { "$set": { "visits": -1 } }, None)
        .await
        .unwrap_err();

    assert_eq!(error, DocumentStoreError::validation("visits", "must be at least 0"));
    assert!(backend.calls().is_empty());
    assert_eq!(backend.stored()[0].get_i32("visits").unwrap(), 1);

    users
        .find_one_and_update(doc! { "name": "Ada" }, doc! { "$set": { "visits": 2 } }, None)
        .await
        .unwrap();

    assert_eq!(backend.call_names(), vec!["findOneAndUpdate"]);
}

#[tokio::test]
async fn find_one_and_update_uses_update_pre_and_find_post_hooks() {
    let backend = RecordingBackend::shared();
    backend.seed(vec![doc! { "name": "Ada", "visits": 1 }]);

    let log = HookLog::default();
    let hooks = log.clone();

    let users = users_model(&backend, move |model| {
        for name in [
            HookName::Update,
            HookName::Find,
            HookName::Operation(Method::FindOneAndUpdate),
            HookName::Operation(Method::Count),
            HookName::Operation(Method::Distinct),
            HookName::Operation(Method::DeleteMany),
            HookName::Delete,
        ] {
            let pre = hooks.clone();
            model.pre_sync(name, move |_| {
                pre.push(format!("pre:{name}"));
                Ok(())
            });

            let post = hooks.clone();
            model.post_sync(name, move |_| {
                post.push(format!("post:{name}"));
                Ok(())
            });
        }

        Ok(())
    })
    .await;

    let before = users
        .find_one_and_update(doc! { "name": "Ada" }, doc! { "$set": { "visits": 2 } }, None)
        .await
        .unwrap();

    assert_eq!(before.unwrap().get_i32("visits").unwrap(), 1);
    assert_eq!(
        log.entries(),
        vec![
            "pre:update",
            "pre:findOneAndUpdate",
            "post:find",
            "post:findOneAndUpdate",
        ]
    );

    assert_eq!(users.count(doc! {}, None).await.unwrap(), 1);
    assert_eq!(users.distinct("name", doc! {}, None).await.unwrap(), vec![Bson::String("Ada".into())]);
    assert_eq!(users.delete_many(doc! {}, None).await.unwrap().deleted_count, 1);

    assert_eq!(
        log.entries()[4..],
        [
            "pre:count",
            "post:count",
            "pre:distinct",
            "post:distinct",
            "pre:delete",
            "pre:deleteMany",
            "post:delete",
            "post:deleteMany",
        ]
    );
}

#[tokio::test]
async fn execute_reports_the_final_state() {
    let backend = RecordingBackend::shared();
    let users = users_model(&backend, |_| Ok(())).await;

    let ctx = users
        .execute(
            docmodel_core::context::OperationContext::new(Method::Count, "users")
                .with_filter(doc! {}),
        )
        .await
        .unwrap();

    assert_eq!(ctx.state(), OperationState::Completed);
    assert_eq!(ctx.result(), Some(&OperationResult::Count(0)));
}

#[tokio::test]
async fn path_tables_are_filled_once_the_model_is_built() {
    let backend = RecordingBackend::shared();
    let plugin = plugin_fn("paths", |model: &mut ModelBuilder| {
        model.add_schema_properties(properties([("createdAt", SchemaNode::date())]))?;

        let table = model.on_schema_path(|event| Ok(event.is_leaf.then(|| event.node.bson_type())));

        if !table.is_empty() {
            return Err(DocumentStoreError::Unknown("table filled before build".to_string()));
        }

        model.pre_sync(HookName::Insert, move |ctx| {
            let paths = table.paths().collect::<Vec<_>>();

            if let Some(document) = ctx.document_mut() {
                document.insert("paths", paths);
            }
            Ok(())
        });

        Ok(())
    });

    let users = DocumentStore::from_shared(backend.clone())
        .model(ModelDefinition::new("users", users_schema()).plugin(plugin))
        .await
        .unwrap();

    users.insert_one(doc! {}, None).await.unwrap();

    assert_eq!(users.plugins(), &["paths"]);
    assert_eq!(
        backend.stored()[0].get_array("paths").unwrap(),
        &vec![Bson::from("name"), Bson::from("tags[]"), Bson::from("createdAt")]
    );
}

#[tokio::test]
async fn models_are_built_once_per_name() {
    let backend = RecordingBackend::shared();
    let store = DocumentStore::from_shared(backend.clone());
    let applied = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        let applied = applied.clone();
        let definition = ModelDefinition::new("users", users_schema()).configure(move |_| {
            applied.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        store.model(definition).await.unwrap();
    }

    assert_eq!(applied.load(Ordering::SeqCst), 1);
    assert_eq!(store.model_names().await, vec!["users"]);
    assert!(store.get_model("users").await.is_some());
    assert!(store.get_model("orders").await.is_none());
}

#[tokio::test]
async fn schema_extensions_require_an_object_root() {
    let backend = RecordingBackend::shared();
    let definition = ModelDefinition::new("scalars", SchemaNode::string()).configure(|model| {
        model.add_schema_properties(properties([("createdAt", SchemaNode::date())]))?;
        Ok(())
    });

    let error = DocumentStore::from_shared(backend)
        .model(definition)
        .await
        .unwrap_err();

    assert!(matches!(error, DocumentStoreError::InvalidSchema(_)));
}

#[tokio::test]
async fn statics_receive_the_model() {
    let backend = RecordingBackend::shared();
    let users = users_model(&backend, |model| {
        model.add_static("greet", |model, args| {
            Box::pin(async move {
                let who = args.get_str("who").unwrap_or("nobody").to_string();
                Ok(Bson::String(format!("{}:{who}", model.name())))
            })
        });
        Ok(())
    })
    .await;

    assert_eq!(
        users.call_static("greet", doc! { "who": "ada" }).await.unwrap(),
        Bson::String("users:ada".into())
    );
    assert!(users.call_static("missing", doc! {}).await.is_err());
    assert!(users.has_static("greet"));
}
