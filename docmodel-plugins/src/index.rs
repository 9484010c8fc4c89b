//! Indexes declared with `index: true` or `unique: true`.
//!
//! The plugin adds an `ensureIndexes` static that creates one single-field index per
//! declared path and returns the index names. Duplicate key errors on a unique path are
//! turned into validation errors for that path.

use bson::{Bson, Document};
use tracing::debug;

use docmodel_core::{
    context::HookName,
    error::{DocumentStoreError, DocumentStoreResult},
    model::ModelBuilder,
    path::to_dotted,
    plugin::Plugin,
};

/// Name of the static that creates the declared indexes.
pub const ENSURE_INDEXES: &str = "ensureIndexes";

/// The name backends give a single-field ascending index.
pub fn index_name(path: &str) -> String {
    format!("{}_1", to_dotted(path))
}

/// Finds the unique path whose index a duplicate key message refers to.
fn violated_path<'a>(message: &str, unique: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
    unique
        .into_iter()
        .find(|path| message.contains(&format!("index: {} ", index_name(path))))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IndexPlugin;

impl Plugin for IndexPlugin {
    fn name(&self) -> &'static str {
        "index"
    }

    fn apply(&self, model: &mut ModelBuilder) -> DocumentStoreResult<()> {
        let indexed = model.on_schema_path(|event| {
            let unique = event.node.flag("unique");

            Ok((event.is_leaf && (unique || event.node.flag("index"))).then_some(unique))
        });
        let ensured = indexed.clone();

        model.add_static(ENSURE_INDEXES, move |model, _| {
            let indexed = ensured.clone();

            Box::pin(async move {
                let mut names = Vec::with_capacity(indexed.len());

                for (path, unique) in indexed.entries() {
                    let mut keys = Document::new();
                    keys.insert(to_dotted(path), 1);

                    let name = model
                        .backend()
                        .create_index(model.name(), keys, *unique)
                        .await?;

                    debug!(model = %model.name(), index = %name, unique, "ensured index");
                    names.push(Bson::String(name));
                }

                Ok(Bson::Array(names))
            })
        });

        model.post_sync(HookName::Error, move |ctx| {
            let Some(error) = ctx.error().filter(|error| error.is_duplicate_key()) else {
                return Ok(());
            };

            let unique = indexed
                .entries()
                .iter()
                .filter(|(_, unique)| *unique)
                .map(|(path, _)| path.as_str());

            if let Some(path) = violated_path(&error.to_string(), unique) {
                ctx.set_error(DocumentStoreError::validation(path, "must be unique"));
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
    fn matches_duplicate_key_messages_to_paths() {
        let message = "E11000 duplicate key error collection: app.users index: profile.email_1 dup key: { profile.email: \"a\" }";

        assert_eq!(index_name("profile.email"), "profile.email_1");
        assert_eq!(violated_path(message, ["email", "profile.email"]), Some("profile.email"));
        assert_eq!(violated_path(message, ["email"]), None);
    }
}
