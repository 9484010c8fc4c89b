//! Filter evaluation for in-memory documents.
//!
//! Filters are parsed into [`Expr`] trees once per operation and evaluated against each
//! document with [`DocumentEvaluator`]. Field names are dotted paths; a path crossing an
//! array reaches into every element, and a condition holds when any reached value satisfies
//! it, the way MongoDB matches arrays.

use std::{cmp::Ordering, collections::HashMap};

use bson::{Bson, Document, datetime::DateTime, oid::ObjectId};
use regex::RegexBuilder;

use docmodel_core::{
    error::{DocumentStoreError, DocumentStoreResult},
    query::{Expr, FieldOp, QueryVisitor},
};

/// Comparable view of a BSON value. Numbers are normalized to `f64`.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    Number(f64),
    DateTime(DateTime),
    String(&'a str),
    ObjectId(ObjectId),
    Array(Vec<Comparable<'a>>),
    Map(HashMap<&'a str, Comparable<'a>>),
    Other(&'a Bson),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null | Bson::Undefined => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::Array(arr) => Comparable::Array(
                arr
                    .iter()
                    .map(Comparable::from)
                    .collect::<Vec<_>>()
            ),
            Bson::Document(doc) => Comparable::Map(
                doc
                    .iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect::<HashMap<_, _>>()
            ),
            other => Comparable::Other(other),
        }
    }
}

impl Comparable<'_> {
    /// Position of the value's type in MongoDB's cross-type sort order.
    fn rank(&self) -> u8 {
        match self {
            Comparable::Null => 1,
            Comparable::Number(_) => 2,
            Comparable::String(_) => 3,
            Comparable::Map(_) => 4,
            Comparable::Array(_) => 5,
            Comparable::ObjectId(_) => 7,
            Comparable::Bool(_) => 8,
            Comparable::DateTime(_) => 9,
            Comparable::Other(_) => 10,
        }
    }
}

impl PartialEq for Comparable<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            (Comparable::Other(a), Comparable::Other(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialOrd for Comparable<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.bytes().partial_cmp(&b.bytes()),
            _ => None,
        }
    }
}

/// Orders two values for sorting. Values of different types order by type.
pub(crate) fn compare_values(left: Option<&Bson>, right: Option<&Bson>) -> Ordering {
    let left = left.map_or(Comparable::Null, Comparable::from);
    let right = right.map_or(Comparable::Null, Comparable::from);

    left.partial_cmp(&right)
        .unwrap_or_else(|| left.rank().cmp(&right.rank()))
}

/// Collects every value reached by a dotted path.
///
/// Arrays on the way are descended element by element, and numeric segments index into them.
pub(crate) fn lookup<'a>(document: &'a Document, field: &str) -> Vec<&'a Bson> {
    let tokens = field.split('.').collect::<Vec<_>>();
    let mut found = Vec::new();

    if let Some((first, rest)) = tokens.split_first() {
        if let Some(value) = document.get(*first) {
            descend(value, rest, &mut found);
        }
    }

    found
}

fn descend<'a>(value: &'a Bson, tokens: &[&str], found: &mut Vec<&'a Bson>) {
    let Some((token, rest)) = tokens.split_first() else {
        found.push(value);
        return;
    };

    match value {
        Bson::Document(document) => {
            if let Some(child) = document.get(*token) {
                descend(child, rest, found);
            }
        }
        Bson::Array(items) => {
            if let Some(item) = token.parse::<usize>().ok().and_then(|idx| items.get(idx)) {
                descend(item, rest, found);
            }

            for item in items.iter().filter(|item| matches!(item, Bson::Document(_))) {
                descend(item, tokens, found);
            }
        }
        _ => {}
    }
}

/// Reached values plus the elements of reached arrays.
fn candidates<'a>(reached: &[&'a Bson]) -> Vec<&'a Bson> {
    let mut expanded = Vec::with_capacity(reached.len());

    for value in reached {
        expanded.push(*value);

        if let Bson::Array(items) = value {
            expanded.extend(items.iter());
        }
    }

    expanded
}

fn compile_regex(value: &Bson) -> DocumentStoreResult<regex::Regex> {
    let (pattern, options) = match value {
        Bson::RegularExpression(regex) => (regex.pattern.as_str(), regex.options.as_str()),
        Bson::String(pattern) => (pattern.as_str(), ""),
        _ => return Err(DocumentStoreError::InvalidQuery("`$regex` expects a pattern".to_string())),
    };

    RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .ignore_whitespace(options.contains('x'))
        .build()
        .map_err(|err| DocumentStoreError::InvalidQuery(format!("invalid regex `{pattern}`: {err}")))
}

pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    pub fn evaluate(&mut self, expr: &Expr) -> DocumentStoreResult<bool> {
        self.visit_expr(expr)
    }

    /// Parses `filter` and evaluates it against one document.
    pub fn matches(document: &Document, filter: &Document) -> DocumentStoreResult<bool> {
        DocumentEvaluator::new(document).evaluate(&Expr::from_filter(filter)?)
    }

    fn equals_any(candidates: &[&Bson], value: &Bson) -> bool {
        let expected = Comparable::from(value);

        candidates
            .iter()
            .any(|candidate| Comparable::from(*candidate) == expected)
    }

    fn compare(&self, field: &str, value: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
        let expected = Comparable::from(value);

        candidates(&lookup(self.document, field))
            .into_iter()
            .filter_map(|candidate| Comparable::from(candidate).partial_cmp(&expected))
            .any(accept)
    }

    fn any_of(&self, field: &str, value: &Bson) -> DocumentStoreResult<bool> {
        let reached = lookup(self.document, field);
        let expanded = candidates(&reached);
        let options = match value {
            Bson::Array(options) => options,
            _ => return Err(DocumentStoreError::InvalidQuery("`$in` and `$nin` expect an array".to_string())),
        };

        for option in options {
            let hit = match option {
                Bson::Null => reached.is_empty() || DocumentEvaluator::equals_any(&expanded, option),
                Bson::RegularExpression(_) => {
                    let regex = compile_regex(option)?;

                    expanded
                        .iter()
                        .filter_map(|candidate| candidate.as_str())
                        .any(|text| regex.is_match(text))
                }
                _ => DocumentEvaluator::equals_any(&expanded, option),
            };

            if hit {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn equals(&self, field: &str, value: &Bson) -> bool {
        let reached = lookup(self.document, field);

        match value {
            Bson::Null => reached.is_empty() || DocumentEvaluator::equals_any(&candidates(&reached), value),
            _ => DocumentEvaluator::equals_any(&candidates(&reached), value),
        }
    }
}

impl QueryVisitor for DocumentEvaluator<'_> {
    type Output = bool;
    type Error = DocumentStoreError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if !self.visit_expr(expr)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if self.visit_expr(expr)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(!self.visit_expr(expr)?)
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(!lookup(self.document, field).is_empty() == should_exist)
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        Ok(match op {
            FieldOp::Eq => self.equals(field, value),
            FieldOp::Ne => !self.equals(field, value),
            FieldOp::Gt => self.compare(field, value, |ordering| ordering == Ordering::Greater),
            FieldOp::Gte => self.compare(field, value, |ordering| ordering != Ordering::Less),
            FieldOp::Lt => self.compare(field, value, |ordering| ordering == Ordering::Less),
            FieldOp::Lte => self.compare(field, value, |ordering| ordering != Ordering::Greater),
            FieldOp::Contains | FieldOp::NotContains => {
                let expanded = candidates(&lookup(self.document, field));
                let contained = match value {
                    Bson::Array(required) => !required.is_empty()
                        && required
                            .iter()
                            .all(|item| DocumentEvaluator::equals_any(&expanded, item)),
                    Bson::String(needle) => {
                        let needle = needle.to_lowercase();

                        expanded
                            .iter()
                            .filter_map(|candidate| candidate.as_str())
                            .any(|text| text.to_lowercase().contains(&needle))
                    }
                    other => DocumentEvaluator::equals_any(&expanded, other),
                };

                contained == matches!(op, FieldOp::Contains)
            }
            FieldOp::StartsWith | FieldOp::EndsWith => {
                let Some(affix) = value.as_str() else {
                    return Ok(false);
                };

                candidates(&lookup(self.document, field))
                    .into_iter()
                    .filter_map(Bson::as_str)
                    .any(|text| match op {
                        FieldOp::StartsWith => text.starts_with(affix),
                        _ => text.ends_with(affix),
                    })
            }
            FieldOp::AnyOf => self.any_of(field, value)?,
            FieldOp::NoneOf => !self.any_of(field, value)?,
            FieldOp::Matches => {
                let regex = compile_regex(value)?;

                candidates(&lookup(self.document, field))
                    .into_iter()
                    .filter_map(Bson::as_str)
                    .any(|text| regex.is_match(text))
            }
        })
    }
}
