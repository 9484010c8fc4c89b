//! Typed filter expressions.
//!
//! Model operations take MongoDB filter documents. This module offers a typed alternative
//! and the bridge between both forms: [`Filter`] builds [`Expr`] trees, [`Expr::to_filter`]
//! renders them as filter documents and [`Expr::from_filter`] parses a filter document back
//! into an expression so that backends can evaluate it with a [`QueryVisitor`].
//!
//! # Filter Expression API
//!
//! The [`Filter`] struct provides a collection of static methods for building filter expressions:
//!
//! - Comparison: `eq`, `ne`, `gt`, `gte`, `lt`, `lte`
//! - String: `starts_with`, `ends_with`, `contains`, `not_contains`, `matches`
//! - Existence: `exists`, `not_exists`
//! - Array: `any_of`, `none_of`
//! - Logical: `and`, `or`
//!
//! ```ignore
//! use docmodel::query::Filter;
//!
//! let filter = Filter::eq("status", "active")
//!     .and(Filter::gt("age", 18))
//!     .to_filter()?;
//!
//! let adults = users.find_many(filter, None).await?;
//! ```

use bson::{Bson, Document, Regex, doc, raw::CString};

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// Field comparison operators for filter expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    /// Equal to. Array fields match when any element is equal.
    Eq,
    /// Not equal to.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal to.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal to.
    Lte,
    /// String contains the value, or array contains the value (every value, for an array).
    Contains,
    /// String or array does not contain value.
    NotContains,
    /// String starts with value.
    StartsWith,
    /// String ends with value.
    EndsWith,
    /// Field equals, or array field contains, any of the values.
    AnyOf,
    /// Field equals, and array field contains, none of the values.
    NoneOf,
    /// String matches a regular expression.
    Matches,
}

/// A filter expression for querying documents.
///
/// Expressions can be combined using logical operators (`And`, `Or`, `Not`)
/// to build complex filter predicates.
///
/// # Example
///
/// ```ignore
/// use docmodel::query::{Expr, Filter, FieldOp};
///
/// // Simple equality check
/// let expr1 = Filter::eq("status", "active");
///
/// // Complex nested expression
/// let expr2 = Filter::and(vec![
///     Filter::eq("status", "active"),
///     Filter::gt("age", 18)
/// ]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Logical AND of multiple expressions (all must match).
    And(Vec<Expr>),
    /// Logical OR of multiple expressions (any must match).
    Or(Vec<Expr>),
    /// Logical NOT of an expression (inverts the result).
    Not(Box<Expr>),
    /// Checks if a field exists or doesn't exist.
    Exists(String, bool),
    /// Field comparison expression.
    Field {
        /// The field name to compare.
        field: String,
        /// The comparison operator.
        op: FieldOp,
        /// The value to compare against.
        value: Bson,
    },
}

impl Expr {
    /// Creates a field comparison expression.
    pub fn field(field: String, op: FieldOp, value: Bson) -> Self {
        Expr::Field { field, op, value }
    }

    /// Combines this expression with another using logical AND.
    ///
    /// If this expression is already an AND, the other expression is appended
    /// to the list. Otherwise, a new AND expression is created.
    pub fn and(self, other: Expr) -> Self {
        match self {
            Expr::And(mut list) => {
                list.push(other);
                Expr::And(list)
            }
            _ => Expr::And(vec![self, other]),
        }
    }

    /// Combines this expression with another using logical OR.
    ///
    /// If this expression is already an OR, the other expression is appended
    /// to the list. Otherwise, a new OR expression is created.
    pub fn or(self, other: Expr) -> Self {
        match self {
            Expr::Or(mut list) => {
                list.push(other);
                Expr::Or(list)
            }
            _ => Expr::Or(vec![self, other]),
        }
    }

    /// Negates this expression (logical NOT).
    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    /// Renders this expression as a MongoDB filter document.
    pub fn to_filter(&self) -> DocumentStoreResult<Document> {
        FilterRenderer.visit_expr(self)
    }

    /// Parses a MongoDB filter document.
    ///
    /// Supports `$and`, `$or`, `$nor`, the comparison operators, `$in`, `$nin`, `$exists`,
    /// `$not`, `$all` and `$regex`. Anything else is rejected with
    /// [`DocumentStoreError::InvalidQuery`]. An empty filter matches every document.
    pub fn from_filter(filter: &Document) -> DocumentStoreResult<Self> {
        let mut exprs = filter
            .iter()
            .map(|(key, value)| parse_entry(key, value))
            .collect::<DocumentStoreResult<Vec<_>>>()?;

        Ok(match exprs.len() {
            1 => exprs.remove(0),
            _ => Expr::And(exprs),
        })
    }
}

fn parse_list(operator: &str, value: &Bson) -> DocumentStoreResult<Vec<Expr>> {
    match value {
        Bson::Array(items) => items
            .iter()
            .map(|item| match item {
                Bson::Document(filter) => Expr::from_filter(filter),
                _ => Err(DocumentStoreError::InvalidQuery(format!("`{operator}` expects an array of documents"))),
            })
            .collect(),
        _ => Err(DocumentStoreError::InvalidQuery(format!("`{operator}` expects an array"))),
    }
}

fn parse_entry(key: &str, value: &Bson) -> DocumentStoreResult<Expr> {
    match key {
        "$and" => Ok(Expr::And(parse_list(key, value)?)),
        "$or" => Ok(Expr::Or(parse_list(key, value)?)),
        "$nor" => Ok(Expr::Or(parse_list(key, value)?).not()),
        _ if key.starts_with('$') => Err(DocumentStoreError::InvalidQuery(format!("unsupported operator `{key}`"))),
        field => match value {
            Bson::Document(operators) if is_operator_document(operators) => parse_operators(field, operators),
            Bson::RegularExpression(_) => Ok(Expr::field(field.to_string(), FieldOp::Matches, value.clone())),
            _ => Ok(Expr::field(field.to_string(), FieldOp::Eq, value.clone())),
        },
    }
}

fn is_operator_document(document: &Document) -> bool {
    document
        .keys()
        .next()
        .is_some_and(|key| key.starts_with('$'))
}

fn parse_operators(field: &str, operators: &Document) -> DocumentStoreResult<Expr> {
    let mut exprs = Vec::new();

    for (operator, value) in operators {
        let simple = |op: FieldOp| Expr::field(field.to_string(), op, value.clone());

        exprs.push(match operator.as_str() {
            "$eq" => simple(FieldOp::Eq),
            "$ne" => simple(FieldOp::Ne),
            "$gt" => simple(FieldOp::Gt),
            "$gte" => simple(FieldOp::Gte),
            "$lt" => simple(FieldOp::Lt),
            "$lte" => simple(FieldOp::Lte),
            "$in" => simple(FieldOp::AnyOf),
            "$nin" => simple(FieldOp::NoneOf),
            "$all" => simple(FieldOp::Contains),
            "$exists" => Expr::Exists(field.to_string(), truthy(value)),
            "$regex" => {
                let pattern = match value {
                    Bson::String(pattern) => pattern.clone(),
                    Bson::RegularExpression(regex) => regex.pattern.as_str().to_string(),
                    _ => return Err(DocumentStoreError::InvalidQuery("`$regex` expects a string".to_string())),
                };
                let options = operators
                    .get_str("$options")
                    .unwrap_or_default();

                Expr::field(
                    field.to_string(),
                    FieldOp::Matches,
                    Bson::RegularExpression(regex(&pattern, options)?),
                )
            }
            "$options" => continue,
            "$not" => match value {
                Bson::Document(inner) => parse_operators(field, inner)?.not(),
                Bson::RegularExpression(_) => Expr::field(field.to_string(), FieldOp::Matches, value.clone()).not(),
                _ => return Err(DocumentStoreError::InvalidQuery("`$not` expects a document or regex".to_string())),
            },
            other => return Err(DocumentStoreError::InvalidQuery(format!("unsupported operator `{other}`"))),
        });
    }

    Ok(match exprs.len() {
        1 => exprs.remove(0),
        _ => Expr::And(exprs),
    })
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(flag) => *flag,
        Bson::Int32(n) => *n != 0,
        Bson::Int64(n) => *n != 0,
        Bson::Double(n) => *n != 0.0,
        Bson::Null => false,
        _ => true,
    }
}

fn escape_regex(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());

    for ch in value.chars() {
        if "\\.+*?()|[]{}^$".contains(ch) {
            escaped.push('\\');
        }
        escaped.push(ch);
    }

    escaped
}

/// Helper struct for constructing filter expressions.
///
/// Provides static methods to construct common filter expressions in a type-safe manner.
/// All methods accept field names and values as `Into<String>` and `Into<Bson>` for ergonomics.
pub struct Filter;

impl Filter {
    /// Matches documents where the field equals the specified value.
    pub fn eq(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Eq, value.into())
    }

    /// Matches documents where the field does not equal the specified value.
    pub fn ne(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Ne, value.into())
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Gt, value.into())
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Gte, value.into())
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Lt, value.into())
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Lte, value.into())
    }

    /// Matches documents where the string field starts with the specified value.
    pub fn starts_with(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::StartsWith, value.into())
    }

    /// Matches documents where the string field ends with the specified value.
    pub fn ends_with(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::EndsWith, value.into())
    }

    /// Matches documents where the field (string or array) contains the specified value.
    pub fn contains(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Contains, value.into())
    }

    pub fn not_contains(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::NotContains, value.into())
    }

    /// Matches documents where the string field matches `pattern`.
    pub fn matches(field: impl Into<String>, pattern: &str, options: &str) -> DocumentStoreResult<Expr> {
        Ok(Expr::field(
            field.into(),
            FieldOp::Matches,
            Bson::RegularExpression(regex(pattern, options)?),
        ))
    }

    /// Matches documents where the field exists.
    pub fn exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), true)
    }

    /// Matches documents where the field does not exist.
    pub fn not_exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), false)
    }

    pub fn and(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::And(exprs.into_iter().collect())
    }

    pub fn or(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::Or(exprs.into_iter().collect())
    }

    /// Matches documents where the field (or one of its elements) is any of the values.
    pub fn any_of(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::AnyOf, value.into())
    }

    /// Matches documents where the field (and each of its elements) is none of the values.
    pub fn none_of(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::NoneOf, value.into())
    }
}

pub trait QueryVisitor {
    type Output;
    type Error: Into<DocumentStoreError>;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error>;
    fn visit_exists(
        &mut self,
        field: &str,
        should_exist: bool,
    ) -> Result<Self::Output, Self::Error>;
    fn visit_field(
        &mut self,
        field: &str,
        op: &FieldOp,
        value: &Bson,
    ) -> Result<Self::Output, Self::Error>;

    fn visit_expr(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        match expr {
            Expr::And(exprs) => self.visit_and(exprs),
            Expr::Or(exprs) => self.visit_or(exprs),
            Expr::Not(expr) => self.visit_not(expr),
            Expr::Exists(field, should_exist) => self.visit_exists(field, *should_exist),
            Expr::Field { field, op, value } => self.visit_field(field, op, value),
        }
    }
}

/// Renders expressions as MongoDB filter documents.
struct FilterRenderer;

impl QueryVisitor for FilterRenderer {
    type Output = Document;
    type Error = DocumentStoreError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        if exprs.is_empty() {
            return Ok(Document::new());
        }

        Ok(doc! {
            "$and": exprs
                .iter()
                .map(|expr| self.visit_expr(expr))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$or": exprs
                .iter()
                .map(|expr| self.visit_expr(expr))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$nor": [self.visit_expr(expr)?],
        })
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            field: { "$exists": should_exist },
        })
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        let contains = |s: &str| doc! { "$regex": format!(".*{}.*", escape_regex(s)), "$options": "i" };

        Ok(doc! {
            field: match op {
                FieldOp::Eq => doc! { "$eq": value },
                FieldOp::Ne => doc! { "$ne": value },
                FieldOp::Gt => doc! { "$gt": value },
                FieldOp::Gte => doc! { "$gte": value },
                FieldOp::Lt => doc! { "$lt": value },
                FieldOp::Lte => doc! { "$lte": value },
                FieldOp::Contains => match value {
                    Bson::String(s) => contains(s),
                    Bson::Array(arr) => doc! { "$all": arr },
                    other => doc! { "$all": [other] },
                },
                FieldOp::NotContains => match value {
                    Bson::String(s) => doc! { "$not": contains(s) },
                    Bson::Array(arr) => doc! { "$nin": arr },
                    other => doc! { "$nin": [other] },
                },
                FieldOp::StartsWith => match value {
                    Bson::String(s) => doc! { "$regex": format!("^{}", escape_regex(s)), "$options": "i" },
                    _ => return Err(DocumentStoreError::InvalidQuery("StartsWith operator requires a string value".to_string())),
                },
                FieldOp::EndsWith => match value {
                    Bson::String(s) => doc! { "$regex": format!("{}$", escape_regex(s)), "$options": "i" },
                    _ => return Err(DocumentStoreError::InvalidQuery("EndsWith operator requires a string value".to_string())),
                },
                FieldOp::AnyOf => doc! { "$in": as_list(value) },
                FieldOp::NoneOf => doc! { "$nin": as_list(value) },
                FieldOp::Matches => match value {
                    Bson::RegularExpression(regex) => doc! { "$regex": regex.pattern.as_str(), "$options": regex.options.as_str() },
                    Bson::String(pattern) => doc! { "$regex": pattern },
                    _ => return Err(DocumentStoreError::InvalidQuery("Matches operator requires a regular expression".to_string())),
                },
            }
        })
    }
}

fn as_list(value: &Bson) -> Bson {
    match value {
        Bson::Array(_) => value.clone(),
        other => Bson::Array(vec![other.clone()]),
    }
}

/// Builds a BSON regex, storing the option flags in the sorted order BSON requires.
fn regex(pattern: &str, options: &str) -> DocumentStoreResult<Regex> {
    let mut flags = options.chars().collect::<Vec<_>>();
    flags.sort_unstable();

    Ok(Regex {
        pattern: CString::try_from(pattern)?,
        options: CString::try_from(flags.into_iter().collect::<String>())?,
    })
}
