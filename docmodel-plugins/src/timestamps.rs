//! Creation and modification times.

use serde::{Deserialize, Serialize};

use docmodel_core::{
    context::HookName,
    error::DocumentStoreResult,
    model::ModelBuilder,
    plugin::Plugin,
    schema::SchemaNode,
};

use crate::support::{is_operator_update, now, operator_payload, touches};

/// Field names used by [`TimestampsPlugin`]. `None` disables a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimestampsOptions {
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl Default for TimestampsOptions {
    fn default() -> Self {
        Self {
            created_at: Some("createdAt".to_string()),
            updated_at: Some("updatedAt".to_string()),
        }
    }
}

/// Declares `createdAt`/`updatedAt` date properties and stamps them on writes.
///
/// Inserts get both fields unless the caller supplied them. Updates set `updatedAt`, and
/// upserts additionally set `createdAt` through `$setOnInsert`.
#[derive(Debug, Clone, Default)]
pub struct TimestampsPlugin {
    options: TimestampsOptions,
}

impl TimestampsPlugin {
    pub fn new(options: TimestampsOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &TimestampsOptions {
        &self.options
    }
}

impl Plugin for TimestampsPlugin {
    fn name(&self) -> &'static str {
        "timestamps"
    }

    fn apply(&self, model: &mut ModelBuilder) -> DocumentStoreResult<()> {
        let fields = [self.options.created_at.clone(), self.options.updated_at.clone()];

        model.add_schema_properties(
            fields
                .iter()
                .flatten()
                .map(|field| (field.clone(), SchemaNode::date())),
        )?;

        let [created_at, updated_at] = fields;
        let (insert_created, insert_updated) = (created_at.clone(), updated_at.clone());

        model
            .pre_sync(HookName::Insert, move |ctx| {
                let Some(document) = ctx.document_mut() else {
                    return Ok(());
                };
                let stamp = now();

                for field in [&insert_created, &insert_updated].into_iter().flatten() {
                    if document.get(field).is_none_or(|value| value.as_null().is_some()) {
                        document.insert(field.as_str(), stamp.clone());
                    }
                }

                Ok(())
            })
            .pre_sync(HookName::Update, move |ctx| {
                let upsert = ctx.options().upsert;
                let Some(update) = ctx.update_mut() else {
                    return Ok(());
                };

                if !is_operator_update(update) {
                    return Ok(());
                }

                let stamp = now();

                if let Some(field) = &updated_at {
                    let written = update
                        .get_document("$set")
                        .is_ok_and(|set| touches(set, field));

                    if !written {
                        if let Some(set) = operator_payload(update, "$set") {
                            set.insert(field.as_str(), stamp.clone());
                        }
                    }
                }

                if let (Some(field), true) = (&created_at, upsert) {
                    let written = ["$set", "$setOnInsert"]
                        .iter()
                        .filter_map(|operator| update.get_document(operator).ok())
                        .any(|payload| touches(payload, field));

                    if !written {
                        if let Some(set_on_insert) = operator_payload(update, "$setOnInsert") {
                            set_on_insert.insert(field.as_str(), stamp);
                        }
                    }
                }

                Ok(())
            });

        Ok(())
    }
}
