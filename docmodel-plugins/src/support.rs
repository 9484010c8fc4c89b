use bson::{Bson, DateTime, Document};
use chrono::Utc;

use docmodel_core::{
    context::OperationContext,
    error::DocumentStoreResult,
    path::map_path_values,
};

/// Update operators whose payload holds values written to the document.
pub(crate) const VALUE_OPERATORS: [&str; 4] = ["$set", "$setOnInsert", "$push", "$addToSet"];

/// Update operators that change the value at a path, removals and increments included.
pub(crate) const TOUCHING_OPERATORS: [&str; 6] = ["$set", "$setOnInsert", "$unset", "$inc", "$push", "$addToSet"];

/// Applies `transform` to every value at `path` that the operation is about to write: the
/// inserted document and the payloads of value-writing update operators.
pub(crate) fn map_write_values<F>(ctx: &mut OperationContext, path: &str, mut transform: F) -> DocumentStoreResult<()>
where
    F: FnMut(Bson) -> DocumentStoreResult<Bson>,
{
    if let Some(document) = ctx.document_mut() {
        map_path_values(document, path, &mut transform)?;
    }

    if let Some(update) = ctx.update_mut() {
        for operator in VALUE_OPERATORS {
            if let Ok(payload) = update.get_document_mut(operator) {
                map_path_values(payload, path, &mut transform)?;
            }
        }
    }

    Ok(())
}

/// Returns the payload of an update operator, creating it when missing. A malformed payload
/// yields `None`.
pub(crate) fn operator_payload<'a>(update: &'a mut Document, operator: &str) -> Option<&'a mut Document> {
    if !update.contains_key(operator) {
        update.insert(operator, Document::new());
    }

    update.get_document_mut(operator).ok()
}

/// True when `payload` already writes `dotted` or one of its parents or children.
pub(crate) fn touches(payload: &Document, dotted: &str) -> bool {
    payload.keys().any(|key| {
        key == dotted
            || dotted.starts_with(&format!("{key}."))
            || key.starts_with(&format!("{dotted}."))
    })
}

pub(crate) fn now() -> Bson {
    Bson::DateTime(DateTime::from_chrono(Utc::now()))
}

/// True for updates made only of operators, as opposed to replacement documents.
pub(crate) fn is_operator_update(update: &Document) -> bool {
    !update.is_empty() && update.keys().all(|key| key.starts_with('$'))
}

/// Stringifies a value the way transform chains expect their input.
pub(crate) fn stringify(value: &Bson) -> String {
    match value {
        Bson::String(text) => text.clone(),
        Bson::ObjectId(id) => id.to_hex(),
        other => other.to_string(),
    }
}
