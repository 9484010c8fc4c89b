//! Update operator application for stored documents.

use bson::{Bson, DateTime, Document, doc};

use docmodel_core::{
    error::{DocumentStoreError, DocumentStoreResult},
    path::{get_path_value, remove_path_value, set_path_value},
};

use crate::evaluator::{DocumentEvaluator, compare_values};

const BAD_VALUE: i32 = 2;
const FAILED_TO_PARSE: i32 = 9;
const TYPE_MISMATCH: i32 = 14;
const IMMUTABLE_FIELD: i32 = 66;

/// Applies an operator update to `document` and reports whether it changed.
///
/// `$setOnInsert` only takes effect when `is_insert` is set, i.e. while building an upserted
/// document.
pub(crate) fn apply_update(document: &mut Document, update: &Document, is_insert: bool) -> DocumentStoreResult<bool> {
    if update.is_empty() || update.keys().any(|key| !key.starts_with('$')) {
        return Err(DocumentStoreError::backend_with_code(
            FAILED_TO_PARSE,
            "update document requires atomic operators",
        ));
    }

    let before = document.clone();

    for (operator, spec) in update {
        let Bson::Document(spec) = spec else {
            return Err(DocumentStoreError::backend_with_code(
                FAILED_TO_PARSE,
                format!("Modifiers operate on fields but we found type {:?} instead", spec.element_type()),
            ));
        };

        for (path, value) in spec {
            for path in expand_positional(document, path)? {
                apply_operator(document, operator, &path, value, is_insert)?;
            }
        }
    }

    if before.contains_key("_id") && before.get("_id") != document.get("_id") {
        return Err(DocumentStoreError::backend_with_code(
            IMMUTABLE_FIELD,
            "Performing an update on the path '_id' would modify the immutable field '_id'",
        ));
    }

    Ok(before != *document)
}

/// Builds the starting document of an upsert from the equality conditions of `filter`.
pub(crate) fn upsert_seed(filter: &Document) -> DocumentStoreResult<Document> {
    let mut seed = Document::new();

    seed_into(&mut seed, filter)?;

    Ok(seed)
}

fn seed_into(seed: &mut Document, filter: &Document) -> DocumentStoreResult<()> {
    for (key, value) in filter {
        if key == "$and" {
            for clause in value.as_array().into_iter().flatten() {
                if let Bson::Document(clause) = clause {
                    seed_into(seed, clause)?;
                }
            }
            continue;
        }

        if key.starts_with('$') {
            continue;
        }

        match value {
            Bson::Document(condition) if condition.keys().any(|op| op.starts_with('$')) => {
                if let Some(expected) = condition.get("$eq") {
                    set_path_value(seed, key, expected.clone())?;
                }
            }
            other => set_path_value(seed, key, other.clone())?,
        }
    }

    Ok(())
}

/// Replaces every `$[]` segment by the concrete indexes of the array it addresses.
fn expand_positional(document: &Document, path: &str) -> DocumentStoreResult<Vec<String>> {
    if !path.split('.').any(|token| token.starts_with('$')) {
        return Ok(vec![path.to_string()]);
    }

    let mut prefixes = vec![String::new()];

    for token in path.split('.') {
        match token {
            "$[]" => {
                let mut expanded = Vec::new();

                for prefix in &prefixes {
                    match get_path_value(document, prefix) {
                        Some(Bson::Array(items)) => {
                            expanded.extend((0..items.len()).map(|idx| join(prefix, &idx.to_string())));
                        }
                        None => {}
                        Some(_) => return Err(DocumentStoreError::backend_with_code(
                            BAD_VALUE,
                            format!("cannot apply array updates to non-array element at `{prefix}`"),
                        )),
                    }
                }

                prefixes = expanded;
            }
            positional if positional.starts_with('$') => {
                return Err(DocumentStoreError::InvalidQuery(format!(
                    "positional operator `{positional}` in `{path}` is not supported"
                )));
            }
            key => {
                for prefix in prefixes.iter_mut() {
                    *prefix = join(prefix, key);
                }
            }
        }
    }

    Ok(prefixes)
}

fn join(prefix: &str, token: &str) -> String {
    match prefix.is_empty() {
        true => token.to_string(),
        false => format!("{prefix}.{token}"),
    }
}

fn apply_operator(
    document: &mut Document,
    operator: &str,
    path: &str,
    value: &Bson,
    is_insert: bool,
) -> DocumentStoreResult<()> {
    match operator {
        "$set" => set_path_value(document, path, value.clone()),
        "$setOnInsert" if is_insert => set_path_value(document, path, value.clone()),
        "$setOnInsert" => Ok(()),
        "$unset" => {
            remove_path_value(document, path);
            Ok(())
        }
        "$inc" | "$mul" => {
            let current = get_path_value(document, path)
                .cloned()
                .unwrap_or(Bson::Int32(0));
            let next = arithmetic(operator, &current, value).ok_or_else(|| {
                DocumentStoreError::backend_with_code(
                    TYPE_MISMATCH,
                    format!("Cannot apply {operator} to a value of non-numeric type at `{path}`"),
                )
            })?;

            set_path_value(document, path, next)
        }
        "$min" | "$max" => {
            let replace = match get_path_value(document, path) {
                None => true,
                Some(current) => {
                    let ordering = compare_values(Some(value), Some(current));

                    match operator {
                        "$min" => ordering.is_lt(),
                        _ => ordering.is_gt(),
                    }
                }
            };

            match replace {
                true => set_path_value(document, path, value.clone()),
                false => Ok(()),
            }
        }
        "$currentDate" => set_path_value(document, path, Bson::DateTime(DateTime::now())),
        "$push" | "$addToSet" => {
            let items = match value {
                Bson::Document(modifiers) if modifiers.contains_key("$each") => match modifiers.get("$each") {
                    Some(Bson::Array(items)) => items.clone(),
                    _ => return Err(DocumentStoreError::backend_with_code(
                        BAD_VALUE,
                        "The argument to $each must be an array",
                    )),
                },
                other => vec![other.clone()],
            };
            let mut array = match get_path_value(document, path) {
                None => Vec::new(),
                Some(Bson::Array(existing)) => existing.clone(),
                Some(_) => return Err(DocumentStoreError::backend_with_code(
                    BAD_VALUE,
                    format!("The field '{path}' must be an array"),
                )),
            };

            for item in items {
                if operator == "$addToSet" && array.contains(&item) {
                    continue;
                }

                array.push(item);
            }

            set_path_value(document, path, Bson::Array(array))
        }
        "$pull" => {
            let kept = match get_path_value(document, path) {
                Some(Bson::Array(existing)) => {
                    let mut kept = Vec::with_capacity(existing.len());

                    for item in existing {
                        if !pull_matches(item, value)? {
                            kept.push(item.clone());
                        }
                    }

                    Some(kept)
                }
                _ => None,
            };

            match kept {
                Some(kept) => set_path_value(document, path, Bson::Array(kept)),
                None => Ok(()),
            }
        }
        "$rename" => {
            let Some(target) = value.as_str() else {
                return Err(DocumentStoreError::backend_with_code(
                    BAD_VALUE,
                    format!("The 'to' field for $rename must be a string at `{path}`"),
                ));
            };

            match remove_path_value(document, path) {
                Some(moved) => set_path_value(document, target, moved),
                None => Ok(()),
            }
        }
        unknown => Err(DocumentStoreError::backend_with_code(
            FAILED_TO_PARSE,
            format!("Unknown modifier: {unknown}"),
        )),
    }
}

fn pull_matches(item: &Bson, condition: &Bson) -> DocumentStoreResult<bool> {
    match (item, condition) {
        (_, Bson::Document(operators)) if operators.keys().all(|key| key.starts_with('$')) => {
            DocumentEvaluator::matches(&doc! { "v": item.clone() }, &doc! { "v": operators.clone() })
        }
        (Bson::Document(element), Bson::Document(condition)) => DocumentEvaluator::matches(element, condition),
        _ => Ok(item == condition),
    }
}

fn arithmetic(operator: &str, current: &Bson, operand: &Bson) -> Option<Bson> {
    let multiply = operator == "$mul";

    match (current, operand) {
        (Bson::Int32(left), Bson::Int32(right)) => {
            let exact = match multiply {
                true => left.checked_mul(*right),
                false => left.checked_add(*right),
            };

            exact
                .map(Bson::Int32)
                .or_else(|| integer(multiply, *left as i64, *right as i64))
        }
        (Bson::Int32(_) | Bson::Int64(_), Bson::Int32(_) | Bson::Int64(_)) => {
            integer(multiply, as_i64(current)?, as_i64(operand)?)
        }
        (Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_), Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_)) => {
            let (left, right) = (as_f64(current)?, as_f64(operand)?);

            Some(Bson::Double(match multiply {
                true => left * right,
                false => left + right,
            }))
        }
        _ => None,
    }
}

fn integer(multiply: bool, left: i64, right: i64) -> Option<Bson> {
    let exact = match multiply {
        true => left.checked_mul(right),
        false => left.checked_add(right),
    };

    Some(match exact {
        Some(value) => Bson::Int64(value),
        None if multiply => Bson::Double(left as f64 * right as f64),
        None => Bson::Double(left as f64 + right as f64),
    })
}

fn as_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(value) => Some(*value as i64),
        Bson::Int64(value) => Some(*value),
        _ => None,
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(value) => Some(*value as f64),
        Bson::Int64(value) => Some(*value as f64),
        Bson::Double(value) => Some(*value),
        _ => None,
    }
}
