//! Schema validation on the `validate` hook.
//!
//! Inserted documents are checked in full. Updates are checked through their `$set`
//! payload, where a null on a required path fails, and through `$unset`, which may not
//! remove a required path.
//!
//! | Rule | Declared as |
//! |---|---|
//! | required | `required` on the node or in the parent's `required` list |
//! | type | the node's `bsonType` |
//! | pattern | `pattern: "<regex>"`, strings only |
//! | enum | `enum: [..]` |
//! | range | `minimum` / `maximum`, numbers only |
//! | length | `minLength` / `maxLength`, strings and arrays |

use bson::{Bson, Document};
use regex::Regex;

use docmodel_core::{
    context::HookName,
    error::{DocumentStoreError, DocumentStoreResult},
    model::ModelBuilder,
    path::{collect_path_values, default_path_values, get_path_value, to_dotted},
    plugin::Plugin,
    schema::{BsonType, SchemaNode},
};

/// Validation rules of one schema path.
#[derive(Debug, Clone, Default)]
pub struct Rules {
    pub required: bool,
    pub bson_type: Option<BsonType>,
    pub pattern: Option<Regex>,
    pub choices: Option<Vec<Bson>>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
}

fn number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(value) => Some(*value as f64),
        Bson::Int64(value) => Some(*value as f64),
        Bson::Double(value) => Some(*value),
        _ => None,
    }
}

fn number_annotation(node: &SchemaNode, key: &str) -> DocumentStoreResult<Option<f64>> {
    node.annotation(key)
        .map(|value| {
            number(value).ok_or_else(|| DocumentStoreError::InvalidSchema(format!("`{key}` must be a number")))
        })
        .transpose()
}

fn length_annotation(node: &SchemaNode, key: &str) -> DocumentStoreResult<Option<usize>> {
    number_annotation(node, key)?
        .map(|value| match value >= 0.0 && value.fract() == 0.0 {
            true => Ok(value as usize),
            false => Err(DocumentStoreError::InvalidSchema(format!(
                "`{key}` must be a non-negative integer"
            ))),
        })
        .transpose()
}

impl Rules {
    /// Reads the rules declared on `node`. Returns `None` when nothing needs checking.
    pub fn from_node(node: &SchemaNode) -> DocumentStoreResult<Option<Self>> {
        let pattern = match node.annotation("pattern") {
            Some(Bson::String(pattern)) => Some(Regex::new(pattern).map_err(|error| {
                DocumentStoreError::InvalidSchema(format!("invalid pattern `{pattern}`: {error}"))
            })?),
            Some(_) => return Err(DocumentStoreError::InvalidSchema("`pattern` must be a string".to_string())),
            None => None,
        };
        let choices = match node.annotation("enum") {
            Some(Bson::Array(choices)) => Some(choices.clone()),
            Some(_) => return Err(DocumentStoreError::InvalidSchema("`enum` must be an array".to_string())),
            None => None,
        };
        let bson_type = node.bson_type();
        let rules = Rules {
            required: node.required,
            bson_type: (bson_type != BsonType::Any).then_some(bson_type),
            pattern,
            choices,
            minimum: number_annotation(node, "minimum")?,
            maximum: number_annotation(node, "maximum")?,
            min_length: length_annotation(node, "minLength")?,
            max_length: length_annotation(node, "maxLength")?,
        };

        Ok((!rules.is_empty()).then_some(rules))
    }

    fn is_empty(&self) -> bool {
        !self.required
            && self.bson_type.is_none()
            && self.pattern.is_none()
            && self.choices.is_none()
            && self.minimum.is_none()
            && self.maximum.is_none()
            && self.min_length.is_none()
            && self.max_length.is_none()
    }

    /// Checks one present value.
    pub fn check(&self, path: &str, value: &Bson) -> DocumentStoreResult<()> {
        if let Bson::Null = value {
            return match self.required {
                true => Err(DocumentStoreError::validation(path, "is required")),
                false => Ok(()),
            };
        }

        if let Some(bson_type) = self.bson_type {
            if !bson_type.matches(value) {
                return Err(DocumentStoreError::validation(
                    path,
                    format!("expected {bson_type}, found {:?}", value.element_type()),
                ));
            }
        }

        if let (Some(pattern), Bson::String(text)) = (&self.pattern, value) {
            if !pattern.is_match(text) {
                return Err(DocumentStoreError::validation(
                    path,
                    format!("does not match pattern `{}`", pattern.as_str()),
                ));
            }
        }

        if let Some(choices) = &self.choices {
            if !choices.contains(value) {
                return Err(DocumentStoreError::validation(path, format!("must be one of {}", Bson::Array(choices.clone()))));
            }
        }

        if let Some(number) = number(value) {
            if let Some(minimum) = self.minimum.filter(|minimum| number < *minimum) {
                return Err(DocumentStoreError::validation(path, format!("must be at least {minimum}")));
            }

            if let Some(maximum) = self.maximum.filter(|maximum| number > *maximum) {
                return Err(DocumentStoreError::validation(path, format!("must be at most {maximum}")));
            }
        }

        let length = match value {
            Bson::String(text) => Some(text.chars().count()),
            Bson::Array(items) => Some(items.len()),
            _ => None,
        };

        if let Some(length) = length {
            if self.min_length.is_some_and(|min| length < min) {
                return Err(DocumentStoreError::validation(path, "is too short"));
            }

            if self.max_length.is_some_and(|max| length > max) {
                return Err(DocumentStoreError::validation(path, "is too long"));
            }
        }

        Ok(())
    }
}

/// True when the object holding the last segment of `path` is absent. Required paths
/// inside an absent optional object are not enforced.
fn parent_missing(document: &Document, path: &str) -> bool {
    match path.rsplit_once('.') {
        Some((parent, _)) if !parent.contains('[') => {
            get_path_value(document, parent).is_none_or(|value| matches!(value, Bson::Null))
        }
        _ => false,
    }
}

/// Validates a whole document against every path's rules.
pub fn validate_document(document: &Document, rules: &[(String, Rules)]) -> DocumentStoreResult<()> {
    for (path, rule) in rules {
        if rule.required && !parent_missing(document, path) {
            let mut filled = document.clone();

            default_path_values(&mut filled, path, || Bson::Null)?;

            if collect_path_values(&filled, path)?
                .iter()
                .any(|value| matches!(value, Bson::Null))
            {
                return Err(DocumentStoreError::validation(path.as_str(), "is required"));
            }
        }

        for value in collect_path_values(document, path)? {
            rule.check(path, &value)?;
        }
    }

    Ok(())
}

/// Validates the `$set` and `$unset` payloads of an update.
pub fn validate_update(update: &Document, rules: &[(String, Rules)]) -> DocumentStoreResult<()> {
    let set = update.get_document("$set").ok();
    let unset = update.get_document("$unset").ok();

    for (path, rule) in rules {
        if let Some(set) = set {
            for value in collect_path_values(set, path)? {
                rule.check(path, &value)?;
            }
        }

        if let (true, Some(unset)) = (rule.required, unset) {
            if unset.contains_key(to_dotted(path)) {
                return Err(DocumentStoreError::validation(path.as_str(), "is required and cannot be unset"));
            }
        }
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationPlugin;

impl Plugin for ValidationPlugin {
    fn name(&self) -> &'static str {
        "validation"
    }

    fn apply(&self, model: &mut ModelBuilder) -> DocumentStoreResult<()> {
        let rules = model.on_schema_path(|event| Rules::from_node(&event.node));

        model.pre_sync(HookName::Validate, move |ctx| {
            if let Some(document) = ctx.document() {
                return validate_document(document, rules.entries());
            }

            match ctx.update() {
                Some(update) => validate_update(update, rules.entries()),
                None => Ok(()),
            }
        });

        Ok(())
    }
}
