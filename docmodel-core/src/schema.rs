//! Declarative schema trees for models.
//!
//! A schema is a recursive [`SchemaNode`]: each node is either a leaf carrying a storage
//! type, an object with ordered named properties, or an array with a uniform or tuple item
//! schema. Annotations (`default`, `ref`, `select`, `trim`, ...) are an open map that is
//! orthogonal to the structure; plugins read the annotations they own and ignore the rest.
//!
//! # Example
//!
//! ```ignore
//! use docmodel::schema::{SchemaNode, BsonType};
//!
//! let schema = SchemaNode::object()
//!     .property("name", SchemaNode::string().required().annotate("trim", true))
//!     .property("tags", SchemaNode::array(SchemaNode::string()))
//!     .property("createdAt", SchemaNode::date().annotate("default", "$$NOW"));
//! ```

use std::fmt::{self, Display};

use bson::{Bson, Document, ser::serialize_to_bson};
use indexmap::IndexMap;
use serde_json::Value;

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// Storage type tags understood by the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BsonType {
    String,
    Int,
    Long,
    Double,
    Decimal,
    /// Any numeric type.
    Number,
    Bool,
    Date,
    ObjectId,
    Object,
    Array,
    BinData,
    Null,
    /// No type constraint.
    Any,
}

impl BsonType {
    /// Parses a type tag as written in a schema declaration.
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "string" => BsonType::String,
            "int" => BsonType::Int,
            "long" => BsonType::Long,
            "double" => BsonType::Double,
            "decimal" => BsonType::Decimal,
            "number" => BsonType::Number,
            "bool" | "boolean" => BsonType::Bool,
            "date" => BsonType::Date,
            "objectId" => BsonType::ObjectId,
            "object" => BsonType::Object,
            "array" => BsonType::Array,
            "binData" => BsonType::BinData,
            "null" => BsonType::Null,
            "any" | "mixed" => BsonType::Any,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BsonType::String => "string",
            BsonType::Int => "int",
            BsonType::Long => "long",
            BsonType::Double => "double",
            BsonType::Decimal => "decimal",
            BsonType::Number => "number",
            BsonType::Bool => "bool",
            BsonType::Date => "date",
            BsonType::ObjectId => "objectId",
            BsonType::Object => "object",
            BsonType::Array => "array",
            BsonType::BinData => "binData",
            BsonType::Null => "null",
            BsonType::Any => "any",
        }
    }

    /// Returns true if `value` is stored with this type.
    pub fn matches(&self, value: &Bson) -> bool {
        match (self, value) {
            (BsonType::Any, _) => true,
            (BsonType::String, Bson::String(_)) => true,
            (BsonType::Int, Bson::Int32(_)) => true,
            (BsonType::Long, Bson::Int64(_)) => true,
            (BsonType::Double, Bson::Double(_)) => true,
            (BsonType::Decimal, Bson::Decimal128(_)) => true,
            (
                BsonType::Number,
                Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_),
            ) => true,
            (BsonType::Bool, Bson::Boolean(_)) => true,
            (BsonType::Date, Bson::DateTime(_)) => true,
            (BsonType::ObjectId, Bson::ObjectId(_)) => true,
            (BsonType::Object, Bson::Document(_)) => true,
            (BsonType::Array, Bson::Array(_)) => true,
            (BsonType::BinData, Bson::Binary(_)) => true,
            (BsonType::Null, Bson::Null) => true,
            _ => false,
        }
    }
}

impl Display for BsonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Item schema of an array node.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayItems {
    /// Items are unconstrained.
    Any,
    /// Every item follows the same schema.
    Uniform(Box<SchemaNode>),
    /// Item `i` follows schema `i`.
    Tuple(Vec<SchemaNode>),
}

/// The structural part of a schema node. Exactly one variant governs traversal.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaKind {
    Leaf(BsonType),
    Object(IndexMap<String, SchemaNode>),
    Array(ArrayItems),
}

/// A node of a schema tree.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaNode {
    pub kind: SchemaKind,
    pub required: bool,
    pub annotations: Document,
}

impl SchemaNode {
    pub fn new(kind: SchemaKind) -> Self {
        Self {
            kind,
            required: false,
            annotations: Document::new(),
        }
    }

    pub fn leaf(bson_type: BsonType) -> Self {
        Self::new(SchemaKind::Leaf(bson_type))
    }

    pub fn string() -> Self {
        Self::leaf(BsonType::String)
    }

    pub fn int() -> Self {
        Self::leaf(BsonType::Int)
    }

    pub fn long() -> Self {
        Self::leaf(BsonType::Long)
    }

    pub fn double() -> Self {
        Self::leaf(BsonType::Double)
    }

    pub fn number() -> Self {
        Self::leaf(BsonType::Number)
    }

    pub fn bool() -> Self {
        Self::leaf(BsonType::Bool)
    }

    pub fn date() -> Self {
        Self::leaf(BsonType::Date)
    }

    pub fn object_id() -> Self {
        Self::leaf(BsonType::ObjectId)
    }

    pub fn any() -> Self {
        Self::leaf(BsonType::Any)
    }

    /// An object node without properties.
    pub fn object() -> Self {
        Self::new(SchemaKind::Object(IndexMap::new()))
    }

    /// An array whose items all follow `items`.
    pub fn array(items: SchemaNode) -> Self {
        Self::new(SchemaKind::Array(ArrayItems::Uniform(Box::new(items))))
    }

    /// An array with positional item schemas.
    pub fn tuple(items: impl IntoIterator<Item = SchemaNode>) -> Self {
        Self::new(SchemaKind::Array(ArrayItems::Tuple(items.into_iter().collect())))
    }

    /// An array with unconstrained items.
    pub fn array_any() -> Self {
        Self::new(SchemaKind::Array(ArrayItems::Any))
    }

    /// Adds a property, turning the node into an object node if it is not one already.
    pub fn property(mut self, name: impl Into<String>, node: SchemaNode) -> Self {
        if !matches!(self.kind, SchemaKind::Object(_)) {
            self.kind = SchemaKind::Object(IndexMap::new());
        }

        if let SchemaKind::Object(properties) = &mut self.kind {
            properties.insert(name.into(), node);
        }

        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn annotate(mut self, key: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn annotation(&self, key: &str) -> Option<&Bson> {
        self.annotations.get(key)
    }

    /// Returns true when the annotation is present and set to `true`.
    pub fn flag(&self, key: &str) -> bool {
        matches!(self.annotations.get(key), Some(Bson::Boolean(true)))
    }

    pub fn properties(&self) -> Option<&IndexMap<String, SchemaNode>> {
        match &self.kind {
            SchemaKind::Object(properties) => Some(properties),
            _ => None,
        }
    }

    pub fn properties_mut(&mut self) -> Option<&mut IndexMap<String, SchemaNode>> {
        match &mut self.kind {
            SchemaKind::Object(properties) => Some(properties),
            _ => None,
        }
    }

    /// The storage type this node declares.
    pub fn bson_type(&self) -> BsonType {
        match &self.kind {
            SchemaKind::Leaf(bson_type) => *bson_type,
            SchemaKind::Object(_) => BsonType::Object,
            SchemaKind::Array(_) => BsonType::Array,
        }
    }

    /// Returns true when the node has nested structure the walker descends into.
    pub fn is_nested(&self) -> bool {
        match &self.kind {
            SchemaKind::Leaf(_) => false,
            SchemaKind::Object(properties) => !properties.is_empty(),
            SchemaKind::Array(items) => !matches!(items, ArrayItems::Any),
        }
    }

    /// Parses a `$jsonSchema`-like declaration.
    ///
    /// `bsonType` (or `type`) selects the leaf type, `properties` and `items` select the
    /// structure, `required` is either a boolean on the node itself or a list of property
    /// names on the parent. Every other key is kept as an annotation.
    pub fn from_document(declaration: &Document) -> DocumentStoreResult<Self> {
        let mut annotations = Document::new();
        let mut bson_type = None;
        let mut properties = None;
        let mut items = None;
        let mut required = false;
        let mut required_names: Vec<String> = Vec::new();

        for (key, value) in declaration {
            match key.as_str() {
                "bsonType" | "type" => bson_type = Some(parse_type(value, &mut annotations)?),
                "properties" => properties = Some(
                    value
                        .as_document()
                        .ok_or_else(|| DocumentStoreError::InvalidSchema(
                            "`properties` must be a document".to_string(),
                        ))?
                ),
                "items" => items = Some(value),
                "required" => match value {
                    Bson::Boolean(flag) => required = *flag,
                    Bson::Array(names) => required_names = names
                        .iter()
                        .filter_map(|name| name.as_str().map(str::to_string))
                        .collect(),
                    _ => return Err(DocumentStoreError::InvalidSchema(
                        "`required` must be a boolean or an array of names".to_string(),
                    )),
                },
                _ => {
                    annotations.insert(key.clone(), value.clone());
                }
            }
        }

        let kind = if let Some(properties) = properties {
            let mut parsed = IndexMap::new();

            for (name, child) in properties {
                let child = child
                    .as_document()
                    .ok_or_else(|| DocumentStoreError::InvalidSchema(
                        format!("property `{name}` must be a document"),
                    ))?;
                let mut node = SchemaNode::from_document(child)?;

                if required_names.iter().any(|required| required == name) {
                    node.required = true;
                }

                parsed.insert(name.clone(), node);
            }

            SchemaKind::Object(parsed)
        } else if let Some(items) = items {
            match items {
                Bson::Document(item) => SchemaKind::Array(ArrayItems::Uniform(Box::new(
                    SchemaNode::from_document(item)?,
                ))),
                Bson::Array(list) => SchemaKind::Array(ArrayItems::Tuple(
                    list
                        .iter()
                        .map(|item| match item {
                            Bson::Document(item) => SchemaNode::from_document(item),
                            _ => Err(DocumentStoreError::InvalidSchema(
                                "tuple items must be documents".to_string(),
                            )),
                        })
                        .collect::<DocumentStoreResult<Vec<_>>>()?,
                )),
                _ => return Err(DocumentStoreError::InvalidSchema(
                    "`items` must be a document or an array".to_string(),
                )),
            }
        } else {
            match bson_type.unwrap_or(BsonType::Any) {
                BsonType::Object => SchemaKind::Object(IndexMap::new()),
                BsonType::Array => SchemaKind::Array(ArrayItems::Any),
                other => SchemaKind::Leaf(other),
            }
        };

        Ok(Self { kind, required, annotations })
    }

    /// Parses a declaration given as JSON.
    pub fn from_json(declaration: &Value) -> DocumentStoreResult<Self> {
        match serialize_to_bson(declaration)? {
            Bson::Document(document) => SchemaNode::from_document(&document),
            _ => Err(DocumentStoreError::InvalidSchema(
                "schema declaration must be an object".to_string(),
            )),
        }
    }
}

fn parse_type(value: &Bson, annotations: &mut Document) -> DocumentStoreResult<BsonType> {
    let unknown = |name: &str| DocumentStoreError::InvalidSchema(format!("unknown type `{name}`"));

    match value {
        Bson::String(name) => BsonType::parse(name).ok_or_else(|| unknown(name)),
        Bson::Array(names) => {
            let mut selected = None;

            for name in names.iter().filter_map(Bson::as_str) {
                match BsonType::parse(name).ok_or_else(|| unknown(name))? {
                    BsonType::Null => {
                        annotations.insert("nullable", true);
                    }
                    other if selected.is_none() => selected = Some(other),
                    _ => {}
                }
            }

            Ok(selected.unwrap_or(BsonType::Null))
        }
        _ => Err(DocumentStoreError::InvalidSchema(
            "`bsonType` must be a string or an array of strings".to_string(),
        )),
    }
}
