//! Whitespace trimming for paths annotated with `trim: true`.

use bson::Bson;

use docmodel_core::{
    context::HookName,
    error::DocumentStoreResult,
    model::ModelBuilder,
    plugin::Plugin,
};

use crate::support::map_write_values;

fn trim(value: Bson) -> DocumentStoreResult<Bson> {
    Ok(match value {
        Bson::String(text) if text.trim().len() != text.len() => Bson::String(text.trim().to_string()),
        other => other,
    })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TrimPlugin;

impl Plugin for TrimPlugin {
    fn name(&self) -> &'static str {
        "trim"
    }

    fn apply(&self, model: &mut ModelBuilder) -> DocumentStoreResult<()> {
        let paths = model.on_schema_path(|event| Ok((event.is_leaf && event.node.flag("trim")).then_some(())));

        for name in [HookName::Insert, HookName::Update] {
            let paths = paths.clone();

            model.pre_sync(name, move |ctx| {
                for path in paths.paths() {
                    map_write_values(ctx, path, trim)?;
                }

                Ok(())
            });
        }

        Ok(())
    }
}
