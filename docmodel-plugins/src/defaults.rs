//! Default values declared with the `default` annotation.
//!
//! Defaults fill missing values of inserted documents and of elements pushed onto arrays. On
//! upserts, defaults for plain (non-array) paths that the update does not write are added to
//! `$setOnInsert` so the inserted document gets them too.
//!
//! A default may be a literal value or one of the sentinels [`NOW`], [`UUID`] and
//! [`OBJECTID`], which are resolved freshly for every value filled.

use bson::{Bson, oid::ObjectId};
use uuid::Uuid;

use docmodel_core::{
    context::HookName,
    error::DocumentStoreResult,
    model::ModelBuilder,
    path::{default_path_values, to_dotted},
    plugin::Plugin,
};

use crate::support::{TOUCHING_OPERATORS, is_operator_update, now, operator_payload, touches};

/// The current time as a BSON date.
pub const NOW: &str = "$$NOW";
/// A random v4 UUID string.
pub const UUID: &str = "$$UUID";
/// A fresh ObjectId.
pub const OBJECTID: &str = "$$OBJECTID";

/// Resolves a declared default into the value to store.
pub fn resolve_default(default: &Bson) -> Bson {
    match default.as_str() {
        Some(NOW) => now(),
        Some(UUID) => Bson::String(Uuid::new_v4().to_string()),
        Some(OBJECTID) => Bson::ObjectId(ObjectId::new()),
        _ => default.clone(),
    }
}

/// The dotted key of the array a canonical path iterates first, e.g. `items` for
/// `items[].qty`.
fn array_root(path: &str) -> Option<String> {
    path.find('[')
        .map(|idx| to_dotted(&path[..idx]))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultsPlugin;

impl Plugin for DefaultsPlugin {
    fn name(&self) -> &'static str {
        "defaults"
    }

    fn apply(&self, model: &mut ModelBuilder) -> DocumentStoreResult<()> {
        let defaults = model.on_schema_path(|event| Ok(event.node.annotation("default").cloned()));
        let inserted = defaults.clone();

        model
            .pre_sync(HookName::Insert, move |ctx| {
                let Some(document) = ctx.document_mut() else {
                    return Ok(());
                };

                for (path, default) in inserted.entries() {
                    default_path_values(document, path, || resolve_default(default))?;
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

                for (path, default) in defaults.entries() {
                    if let Some(root) = array_root(path) {
                        for operator in ["$push", "$addToSet"] {
                            if let Ok(payload) = update.get_document_mut(operator) {
                                if payload.contains_key(&root) {
                                    default_path_values(payload, path, || resolve_default(default))?;
                                }
                            }
                        }

                        continue;
                    }

                    if !upsert {
                        continue;
                    }

                    let written = TOUCHING_OPERATORS
                        .iter()
                        .filter_map(|operator| update.get_document(operator).ok())
                        .any(|payload| touches(payload, path));

                    if written {
                        continue;
                    }

                    if let Some(payload) = operator_payload(update, "$setOnInsert") {
                        payload.insert(path.as_str(), resolve_default(default));
                    }
                }

                Ok(())
            });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_sentinels_freshly() {
        assert!(matches!(resolve_default(&Bson::from(NOW)), Bson::DateTime(_)));
        assert!(matches!(resolve_default(&Bson::from(OBJECTID)), Bson::ObjectId(_)));
        assert_ne!(resolve_default(&Bson::from(UUID)), resolve_default(&Bson::from(UUID)));
        assert_eq!(resolve_default(&Bson::from("plain")), Bson::from("plain"));
    }

    #[test]
    fn finds_the_array_root_of_a_path() {
        assert_eq!(array_root("items[].qty").as_deref(), Some("items"));
        assert_eq!(array_root("profile.tags[]").as_deref(), Some("profile.tags"));
        assert_eq!(array_root("status"), None);
    }
}
