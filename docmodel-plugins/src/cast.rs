//! Casting of written and queried values to their declared leaf type.
//!
//! Inserted documents and update payloads are cast in place. Filters are cast too: equality
//! values, operator operands and `$in`/`$nin` lists, recursing into `$and`, `$or` and `$nor`.
//! A value that cannot be cast fails the operation with a validation error.

use bson::{Bson, DateTime, Document, oid::ObjectId};
use chrono::DateTime as ChronoDateTime;

use docmodel_core::{
    context::{HookName, Method},
    error::{DocumentStoreError, DocumentStoreResult},
    model::ModelBuilder,
    path::to_dotted,
    plugin::Plugin,
    schema::BsonType,
};

use crate::support::map_write_values;

/// Operators whose operand is a single comparable value.
const COMPARISON_OPERATORS: [&str; 6] = ["$eq", "$ne", "$gt", "$gte", "$lt", "$lte"];
const LIST_OPERATORS: [&str; 3] = ["$in", "$nin", "$all"];

fn failure(path: &str, target: BsonType, value: &Bson) -> DocumentStoreError {
    DocumentStoreError::validation(path, format!("cannot cast {value} to {target}"))
}

fn is_castable(target: BsonType) -> bool {
    matches!(
        target,
        BsonType::String
            | BsonType::Int
            | BsonType::Long
            | BsonType::Double
            | BsonType::Number
            | BsonType::Bool
            | BsonType::Date
            | BsonType::ObjectId
    )
}

fn integral(value: f64) -> Option<i64> {
    (value.fract() == 0.0 && value >= i64::MIN as f64 && value <= i64::MAX as f64).then_some(value as i64)
}

fn to_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(value) => Some(*value as i64),
        Bson::Int64(value) => Some(*value),
        Bson::Double(value) => integral(*value),
        Bson::Boolean(value) => Some(*value as i64),
        Bson::String(text) => text
            .trim()
            .parse::<i64>()
            .ok()
            .or_else(|| text.trim().parse::<f64>().ok().and_then(integral)),
        _ => None,
    }
}

fn to_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(value) => Some(*value as f64),
        Bson::Int64(value) => Some(*value as f64),
        Bson::Double(value) => Some(*value),
        Bson::Boolean(value) => Some(*value as i64 as f64),
        Bson::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Casts one value to `target`.
pub fn cast_value(path: &str, target: BsonType, value: Bson) -> DocumentStoreResult<Bson> {
    if target.matches(&value) || matches!(value, Bson::Null) {
        return Ok(value);
    }

    let cast = match target {
        BsonType::String => match &value {
            Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Boolean(_) => Some(Bson::String(value.to_string())),
            Bson::ObjectId(id) => Some(Bson::String(id.to_hex())),
            Bson::DateTime(date) => date.try_to_rfc3339_string().ok().map(Bson::String),
            _ => None,
        },
        BsonType::Int => to_i64(&value)
            .and_then(|number| i32::try_from(number).ok())
            .map(Bson::Int32),
        BsonType::Long => to_i64(&value).map(Bson::Int64),
        BsonType::Double => to_f64(&value).map(Bson::Double),
        BsonType::Number => match &value {
            Bson::String(text) => {
                let text = text.trim();

                text.parse::<i32>()
                    .map(Bson::Int32)
                    .or_else(|_| text.parse::<i64>().map(Bson::Int64))
                    .or_else(|_| text.parse::<f64>().map(Bson::Double))
                    .ok()
            }
            Bson::Boolean(flag) => Some(Bson::Int32(*flag as i32)),
            _ => None,
        },
        BsonType::Bool => match &value {
            Bson::String(text) => match text.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" => Some(Bson::Boolean(true)),
                "false" | "0" | "no" => Some(Bson::Boolean(false)),
                _ => None,
            },
            Bson::Int32(0) | Bson::Int64(0) => Some(Bson::Boolean(false)),
            Bson::Int32(1) | Bson::Int64(1) => Some(Bson::Boolean(true)),
            _ => None,
        },
        BsonType::Date => match &value {
            Bson::String(text) => ChronoDateTime::parse_from_rfc3339(text.trim())
                .ok()
                .map(|date| Bson::DateTime(DateTime::from_chrono(date))),
            Bson::Int64(millis) => Some(Bson::DateTime(DateTime::from_millis(*millis))),
            Bson::Int32(millis) => Some(Bson::DateTime(DateTime::from_millis(*millis as i64))),
            _ => None,
        },
        BsonType::ObjectId => match &value {
            Bson::String(text) => ObjectId::parse_str(text.trim()).ok().map(Bson::ObjectId),
            _ => None,
        },
        _ => Some(value.clone()),
    };

    cast.ok_or_else(|| failure(path, target, &value))
}

/// Casts the operands of one filter condition.
fn cast_condition(path: &str, target: BsonType, condition: &mut Bson) -> DocumentStoreResult<()> {
    match condition {
        Bson::Document(operators) if operators.keys().next().is_some_and(|key| key.starts_with('$')) => {
            for (operator, operand) in operators.iter_mut() {
                if COMPARISON_OPERATORS.contains(&operator.as_str()) {
                    *operand = cast_value(path, target, operand.clone())?;
                } else if LIST_OPERATORS.contains(&operator.as_str()) {
                    if let Bson::Array(items) = operand {
                        for item in items.iter_mut() {
                            *item = cast_value(path, target, item.clone())?;
                        }
                    }
                } else if operator == "$not" {
                    cast_condition(path, target, operand)?;
                }
            }

            Ok(())
        }
        Bson::RegularExpression(_) => Ok(()),
        other => {
            *other = cast_value(path, target, other.clone())?;
            Ok(())
        }
    }
}

/// Casts every condition of `filter` that targets one of `paths`.
pub fn cast_filter(filter: &mut Document, paths: &[(String, BsonType)]) -> DocumentStoreResult<()> {
    for (key, condition) in filter.iter_mut() {
        match key.as_str() {
            "$and" | "$or" | "$nor" => {
                if let Bson::Array(clauses) = condition {
                    for clause in clauses.iter_mut() {
                        if let Bson::Document(clause) = clause {
                            cast_filter(clause, paths)?;
                        }
                    }
                }
            }
            field => {
                if let Some((path, target)) = paths.iter().find(|(path, _)| to_dotted(path) == field) {
                    cast_condition(path, *target, condition)?;
                }
            }
        }
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CastPlugin;

impl Plugin for CastPlugin {
    fn name(&self) -> &'static str {
        "cast"
    }

    fn apply(&self, model: &mut ModelBuilder) -> DocumentStoreResult<()> {
        let targets = model.on_schema_path(|event| {
            let target = event.node.bson_type();

            Ok((event.is_leaf && is_castable(target)).then_some(target))
        });

        for name in [HookName::Insert, HookName::Update] {
            let targets = targets.clone();

            model.pre_sync(name, move |ctx| {
                for (path, target) in targets.entries() {
                    map_write_values(ctx, path, |value| cast_value(path, *target, value))?;
                }

                Ok(())
            });
        }

        let filtered = [
            HookName::Update,
            HookName::Find,
            HookName::Delete,
            HookName::Operation(Method::Count),
            HookName::Operation(Method::Distinct),
        ];

        for name in filtered {
            let targets = targets.clone();

            model.pre_sync(name, move |ctx| match ctx.filter_mut() {
                Some(filter) => cast_filter(filter, targets.entries()),
                None => Ok(()),
            });
        }

        Ok(())
    }
}
