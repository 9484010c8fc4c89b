//! Field projection for returned documents.

use std::collections::HashMap;

use bson::{Bson, Document};

use docmodel_core::error::{DocumentStoreError, DocumentStoreResult};

#[derive(Debug, Default)]
struct FieldTree {
    leaf: bool,
    children: HashMap<String, FieldTree>,
}

impl FieldTree {
    fn insert(&mut self, path: &str) {
        let mut node = self;

        for token in path.split('.') {
            node = node
                .children
                .entry(token.to_string())
                .or_default();
        }

        node.leaf = true;
    }
}

fn included(path: &str, value: &Bson) -> DocumentStoreResult<bool> {
    match value {
        Bson::Boolean(flag) => Ok(*flag),
        Bson::Int32(flag) => Ok(*flag != 0),
        Bson::Int64(flag) => Ok(*flag != 0),
        Bson::Double(flag) => Ok(*flag != 0.0),
        other => Err(DocumentStoreError::InvalidQuery(format!(
            "unsupported projection value for `{path}`: {other}"
        ))),
    }
}

/// Applies an inclusion or exclusion projection.
///
/// `_id` is kept unless excluded explicitly. Mixing inclusion and exclusion for other fields
/// is rejected.
pub(crate) fn apply_projection(document: &Document, projection: &Document) -> DocumentStoreResult<Document> {
    let mut include_id = true;
    let mut inclusion = None;
    let mut tree = FieldTree::default();

    for (path, value) in projection {
        let include = included(path, value)?;

        if path == "_id" {
            include_id = include;
            continue;
        }

        match inclusion {
            Some(mode) if mode != include => {
                return Err(DocumentStoreError::InvalidQuery(
                    "projection cannot mix inclusion and exclusion".to_string(),
                ));
            }
            _ => inclusion = Some(include),
        }

        tree.insert(path);
    }

    let mut projected = match inclusion {
        Some(true) => include_fields(document, &tree),
        Some(false) => exclude_fields(document, &tree),
        None => document.clone(),
    };

    match include_id {
        true => {
            if let (Some(id), false) = (document.get("_id"), projected.contains_key("_id")) {
                let mut with_id = Document::new();
                with_id.insert("_id", id.clone());

                for (key, value) in projected {
                    with_id.insert(key, value);
                }

                projected = with_id;
            }
        }
        false => {
            projected.remove("_id");
        }
    }

    Ok(projected)
}

fn include_fields(document: &Document, tree: &FieldTree) -> Document {
    let mut projected = Document::new();

    for (key, value) in document {
        let Some(node) = tree.children.get(key) else {
            continue;
        };

        if node.leaf {
            projected.insert(key, value.clone());
            continue;
        }

        match value {
            Bson::Document(nested) => {
                projected.insert(key, include_fields(nested, node));
            }
            Bson::Array(items) => {
                let items = items
                    .iter()
                    .filter_map(|item| match item {
                        Bson::Document(nested) => Some(Bson::Document(include_fields(nested, node))),
                        _ => None,
                    })
                    .collect::<Vec<_>>();

                projected.insert(key, items);
            }
            _ => {}
        }
    }

    projected
}

fn exclude_fields(document: &Document, tree: &FieldTree) -> Document {
    let mut projected = Document::new();

    for (key, value) in document {
        let node = match tree.children.get(key) {
            Some(node) if node.leaf => continue,
            Some(node) => node,
            None => {
                projected.insert(key, value.clone());
                continue;
            }
        };

        let value = match value {
            Bson::Document(nested) => Bson::Document(exclude_fields(nested, node)),
            Bson::Array(items) => Bson::Array(
                items
                    .iter()
                    .map(|item| match item {
                        Bson::Document(nested) => Bson::Document(exclude_fields(nested, node)),
                        other => other.clone(),
                    })
                    .collect(),
            ),
            other => other.clone(),
        };

        projected.insert(key, value);
    }

    projected
}
