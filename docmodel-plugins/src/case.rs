//! Case transform chains declared with the `caseTransform` annotation.
//!
//! The annotation is either a list of operation names or a single string of names separated
//! by `|`, `,` or whitespace. Operations apply left to right to the stringified value. The
//! boolean annotations `lowercase` and `uppercase` are shorthands for one-step chains.

use std::str::FromStr;

use bson::Bson;

use docmodel_core::{
    context::HookName,
    error::{DocumentStoreError, DocumentStoreResult},
    model::ModelBuilder,
    plugin::Plugin,
    schema::SchemaNode,
};

use crate::support::{map_write_values, stringify};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseOp {
    Lower,
    Upper,
    Trim,
    Capitalize,
    Title,
    Camel,
    Snake,
    Kebab,
}

impl FromStr for CaseOp {
    type Err = DocumentStoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "lower" | "lowercase" => CaseOp::Lower,
            "upper" | "uppercase" => CaseOp::Upper,
            "trim" => CaseOp::Trim,
            "capitalize" => CaseOp::Capitalize,
            "title" => CaseOp::Title,
            "camel" => CaseOp::Camel,
            "snake" => CaseOp::Snake,
            "kebab" => CaseOp::Kebab,
            other => return Err(DocumentStoreError::InvalidSchema(format!("unknown case transform `{other}`"))),
        })
    }
}

impl CaseOp {
    pub fn apply(&self, text: &str) -> String {
        match self {
            CaseOp::Lower => text.to_lowercase(),
            CaseOp::Upper => text.to_uppercase(),
            CaseOp::Trim => text.trim().to_string(),
            CaseOp::Capitalize => capitalize(text),
            CaseOp::Title => text
                .split_whitespace()
                .map(capitalize)
                .collect::<Vec<_>>()
                .join(" "),
            CaseOp::Camel => words(text)
                .iter()
                .enumerate()
                .map(|(idx, word)| match idx {
                    0 => word.to_lowercase(),
                    _ => capitalize(word),
                })
                .collect(),
            CaseOp::Snake => join_lower(text, "_"),
            CaseOp::Kebab => join_lower(text, "-"),
        }
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();

    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.as_str().to_lowercase().chars())
            .collect(),
        None => String::new(),
    }
}

/// Splits on non-alphanumeric characters and on lower-to-upper case humps.
fn words(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut previous: Option<char> = None;

    for ch in text.chars() {
        if !ch.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
        } else {
            let hump = ch.is_uppercase() && previous.is_some_and(|prev| prev.is_lowercase() || prev.is_ascii_digit());

            if hump && !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }

            current.push(ch);
        }

        previous = Some(ch);
    }

    if !current.is_empty() {
        words.push(current);
    }

    words
}

fn join_lower(text: &str, separator: &str) -> String {
    words(text)
        .iter()
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join(separator)
}

/// Parses the chain declared on a schema node, if any.
pub fn parse_chain(node: &SchemaNode) -> DocumentStoreResult<Option<Vec<CaseOp>>> {
    let names = match node.annotation("caseTransform") {
        Some(Bson::String(names)) => names
            .split(|ch: char| ch == '|' || ch == ',' || ch.is_whitespace())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>(),
        Some(Bson::Array(names)) => names
            .iter()
            .map(|name| {
                name.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| DocumentStoreError::InvalidSchema("caseTransform entries must be strings".to_string()))
            })
            .collect::<DocumentStoreResult<Vec<_>>>()?,
        Some(_) => {
            return Err(DocumentStoreError::InvalidSchema(
                "caseTransform must be a string or a list of strings".to_string(),
            ));
        }
        None if node.flag("lowercase") => vec!["lower".to_string()],
        None if node.flag("uppercase") => vec!["upper".to_string()],
        None => return Ok(None),
    };

    names
        .iter()
        .map(|name| name.parse())
        .collect::<DocumentStoreResult<Vec<_>>>()
        .map(Some)
}

/// Runs a chain over a value. Nulls never reach the chain.
pub fn apply_chain(chain: &[CaseOp], value: &Bson) -> Bson {
    let text = chain
        .iter()
        .fold(stringify(value), |text, op| op.apply(&text));

    Bson::String(text)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CaseTransformPlugin;

impl Plugin for CaseTransformPlugin {
    fn name(&self) -> &'static str {
        "case-transform"
    }

    fn apply(&self, model: &mut ModelBuilder) -> DocumentStoreResult<()> {
        let chains = model.on_schema_path(|event| match event.is_leaf {
            true => parse_chain(&event.node),
            false => Ok(None),
        });

        for name in [HookName::Insert, HookName::Update] {
            let chains = chains.clone();

            model.pre_sync(name, move |ctx| {
                for (path, chain) in chains.entries() {
                    map_write_values(ctx, path, |value| Ok(apply_chain(chain, &value)))?;
                }

                Ok(())
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_each_operation() {
        let cases = [
            (CaseOp::Lower, "Hello World", "hello world"),
            (CaseOp::Upper, "Hello", "HELLO"),
            (CaseOp::Trim, "  padded ", "padded"),
            (CaseOp::Capitalize, "hELLO", "Hello"),
            (CaseOp::Title, "the  quick fox", "The Quick Fox"),
            (CaseOp::Camel, "user_first-name", "userFirstName"),
            (CaseOp::Snake, "userFirstName", "user_first_name"),
            (CaseOp::Kebab, "User First Name", "user-first-name"),
        ];

        for (op, input, expected) in cases {
            assert_eq!(op.apply(input), expected, "{op:?}");
        }
    }

    #[test]
    fn chains_run_left_to_right_on_stringified_input() {
        let node = SchemaNode::string().annotate("caseTransform", "trim|upper");
        let chain = parse_chain(&node).unwrap().unwrap();

        assert_eq!(apply_chain(&chain, &Bson::from("  ada ")), Bson::from("ADA"));
        assert_eq!(apply_chain(&chain, &Bson::Int32(42)), Bson::from("42"));
    }

    #[test]
    fn rejects_unknown_operations() {
        let node = SchemaNode::string().annotate("caseTransform", vec!["lower", "shout"]);

        assert!(matches!(parse_chain(&node), Err(DocumentStoreError::InvalidSchema(_))));
        assert_eq!(parse_chain(&SchemaNode::string()).unwrap(), None);
    }
}
