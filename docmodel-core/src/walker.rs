//! Schema traversal and canonical path assignment.
//!
//! [`walk`] visits a schema tree in declaration order and emits one [`SchemaPathEvent`] per
//! resolvable path. Object properties extend the path with `.key`, uniform array items with
//! `[]` and tuple positions with `[idx]`. Container nodes are reported with
//! `is_leaf == false` before their children; every leaf is reported exactly once.
//!
//! ```ignore
//! // { tags: [string], items: [{ label: string }] }
//! assert_eq!(canonical_paths(&schema), vec!["tags[]", "items[].label"]);
//! ```

use crate::schema::{ArrayItems, SchemaKind, SchemaNode};

/// One path discovered while walking a schema.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaPathEvent {
    /// Canonical path of the node.
    pub path: String,
    /// The schema node found at `path`.
    pub node: SchemaNode,
    /// True for leaves, false for containers that are descended into.
    pub is_leaf: bool,
}

/// Build-time events dispatched to schema subscribers.
#[derive(Debug, Clone)]
pub enum SchemaEvent {
    /// A path was discovered.
    Path(SchemaPathEvent),
    /// The walk finished; every path has been reported.
    Complete,
}

/// Walks `node`, reporting every path below it relative to `prefix`.
///
/// The root itself is never reported.
pub fn walk(node: &SchemaNode, prefix: &str, visit: &mut dyn FnMut(SchemaPathEvent)) {
    match &node.kind {
        SchemaKind::Object(properties) => {
            for (key, child) in properties {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };

                visit_node(child, path, visit);
            }
        }
        SchemaKind::Array(ArrayItems::Uniform(item)) => {
            let path = format!("{prefix}[]");

            if item.is_nested() {
                walk(item, &path, visit);
            } else {
                visit(SchemaPathEvent {
                    path,
                    node: item.as_ref().clone(),
                    is_leaf: true,
                });
            }
        }
        SchemaKind::Array(ArrayItems::Tuple(items)) => {
            for (idx, item) in items.iter().enumerate() {
                visit_node(item, format!("{prefix}[{idx}]"), visit);
            }
        }
        SchemaKind::Array(ArrayItems::Any) | SchemaKind::Leaf(_) => {}
    }
}

fn visit_node(node: &SchemaNode, path: String, visit: &mut dyn FnMut(SchemaPathEvent)) {
    if node.is_nested() {
        visit(SchemaPathEvent {
            path: path.clone(),
            node: node.clone(),
            is_leaf: false,
        });
        walk(node, &path, visit);
    } else {
        visit(SchemaPathEvent {
            path,
            node: node.clone(),
            is_leaf: true,
        });
    }
}

/// Returns the canonical leaf paths of a schema in walk order.
pub fn canonical_paths(schema: &SchemaNode) -> Vec<String> {
    let mut paths = Vec::new();

    walk(schema, "", &mut |event| {
        if event.is_leaf {
            paths.push(event.path);
        }
    });

    paths
}
