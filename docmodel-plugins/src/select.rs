//! Hidden fields declared with `select: false`.
//!
//! Reads exclude hidden paths unless the caller asked for an inclusion projection or set
//! the `includeHidden` extra option.

use bson::{Bson, Document};

use docmodel_core::{
    context::{HookName, Method, OperationContext},
    error::DocumentStoreResult,
    model::ModelBuilder,
    path::to_dotted,
    plugin::Plugin,
};

/// Extra option that disables the plugin for one call.
pub const INCLUDE_HIDDEN: &str = "includeHidden";

fn is_inclusion(projection: &Document) -> bool {
    projection.iter().any(|(key, value)| {
        key != "_id"
            && match value {
                Bson::Boolean(flag) => *flag,
                Bson::Int32(value) => *value != 0,
                Bson::Int64(value) => *value != 0,
                Bson::Double(value) => *value != 0.0,
                _ => true,
            }
    })
}

fn hide(ctx: &mut OperationContext, hidden: &[String]) {
    if hidden.is_empty() || ctx.options().extra.get_bool(INCLUDE_HIDDEN).unwrap_or(false) {
        return;
    }

    let options = ctx.options_mut();
    let projection = options.projection.get_or_insert_with(Document::new);

    if is_inclusion(projection) {
        return;
    }

    for dotted in hidden {
        if !projection.contains_key(dotted) {
            projection.insert(dotted.as_str(), 0);
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SelectPlugin;

impl Plugin for SelectPlugin {
    fn name(&self) -> &'static str {
        "select"
    }

    fn apply(&self, model: &mut ModelBuilder) -> DocumentStoreResult<()> {
        let hidden = model.on_schema_path(|event| {
            let hidden = matches!(event.node.annotation("select"), Some(Bson::Boolean(false)));

            Ok(hidden.then(|| to_dotted(&event.path)))
        });

        for name in [HookName::Find, HookName::Operation(Method::FindOneAndUpdate)] {
            let hidden = hidden.clone();

            model.pre_sync(name, move |ctx| {
                let dotted = hidden
                    .entries()
                    .iter()
                    .map(|(_, dotted)| dotted.clone())
                    .collect::<Vec<_>>();

                hide(ctx, &dotted);
                Ok(())
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use docmodel_core::options::OperationOptions;

    fn context(options: OperationOptions) -> OperationContext {
        OperationContext::new(Method::FindOne, "users").with_options(options)
    }

    #[test]
    fn excludes_hidden_paths_by_default() {
        let mut ctx = context(OperationOptions::default());

        hide(&mut ctx, &["password".to_string(), "tokens.secret".to_string()]);

        assert_eq!(ctx.options().projection, Some(doc! { "password": 0, "tokens.secret": 0 }));
    }

    #[test]
    fn leaves_inclusion_projections_alone() {
        let mut ctx = context(OperationOptions::builder().projection(doc! { "name": 1 }).build());

        hide(&mut ctx, &["password".to_string()]);

        assert_eq!(ctx.options().projection, Some(doc! { "name": 1 }));
    }

    #[test]
    fn honors_include_hidden() {
        let mut ctx = context(OperationOptions::builder().extra(INCLUDE_HIDDEN, true).build());

        hide(&mut ctx, &["password".to_string()]);

        assert_eq!(ctx.options().projection, None);
    }
}
