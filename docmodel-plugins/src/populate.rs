//! Reference population for paths annotated with `ref: "<collection>"`.
//!
//! A read populates a reference path only when the caller lists it in
//! [`OperationOptions::populate`], by canonical path (`friends[]`) or dot notation
//! (`friends`). Ids without a matching document are left as they are.

use std::sync::Arc;

use bson::{Bson, Document, doc};
use tracing::trace;

use docmodel_core::{
    backend::StoreBackend,
    context::{HookName, OperationResult},
    error::{DocumentStoreError, DocumentStoreResult},
    model::ModelBuilder,
    options::OperationOptions,
    path::{collect_path_values, map_path_values, to_dotted},
    plugin::Plugin,
};

fn is_requested(options: &OperationOptions, path: &str) -> bool {
    let dotted = to_dotted(path);

    options
        .populate
        .iter()
        .any(|requested| requested == path || *requested == dotted)
}

/// Replaces the ids found at `path` with the matching documents of `collection`.
pub async fn populate_path(
    backend: &dyn StoreBackend,
    document: &mut Document,
    path: &str,
    collection: &str,
) -> DocumentStoreResult<()> {
    let ids = collect_path_values(document, path)?
        .into_iter()
        .filter(|value| !matches!(value, Bson::Null | Bson::Document(_)))
        .collect::<Vec<_>>();

    if ids.is_empty() {
        return Ok(());
    }

    let found = backend
        .find_many(collection, doc! { "_id": { "$in": ids } }, &OperationOptions::default())
        .await?;

    trace!(path, collection, found = found.len(), "populating references");

    map_path_values(document, path, |value| {
        Ok(found
            .iter()
            .find(|candidate| candidate.get("_id") == Some(&value))
            .map_or(value, |referenced| Bson::Document(referenced.clone())))
    })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PopulatePlugin;

impl Plugin for PopulatePlugin {
    fn name(&self) -> &'static str {
        "populate"
    }

    fn apply(&self, model: &mut ModelBuilder) -> DocumentStoreResult<()> {
        let references = model.on_schema_path(|event| match event.node.annotation("ref") {
            Some(Bson::String(collection)) => Ok(Some(collection.clone())),
            Some(_) => Err(DocumentStoreError::InvalidSchema(format!(
                "`ref` of `{}` must be a collection name",
                event.path
            ))),
            None => Ok(None),
        });
        let backend: Arc<dyn StoreBackend> = model.backend().clone();

        model.post(HookName::Find, move |ctx| {
            let references = references.clone();
            let backend = backend.clone();

            Box::pin(async move {
                let requested = references
                    .entries()
                    .iter()
                    .filter(|(path, _)| is_requested(ctx.options(), path))
                    .cloned()
                    .collect::<Vec<_>>();

                if requested.is_empty() {
                    return Ok(());
                }

                let Some(document) = ctx.result_mut().and_then(OperationResult::document_mut) else {
                    return Ok(());
                };

                for (path, collection) in &requested {
                    populate_path(backend.as_ref(), document, path, collection).await?;
                }

                Ok(())
            })
        });

        Ok(())
    }
}
