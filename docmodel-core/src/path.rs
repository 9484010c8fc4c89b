//! Value resolution at canonical schema paths.
//!
//! Canonical paths are produced by the [walker](crate::walker): dotted object keys, `[]` for
//! every item of an array and `[idx]` for a tuple position. The functions in this module locate
//! the values such a path designates inside an arbitrary document and rewrite them in place.
//!
//! Resolution at each document level prefers the longest literal key, so a `$set` payload
//! such as `{ "profile.name": .. }` is matched by the path `profile.name` just like the nested
//! form `{ profile: { name: .. } }`. When an array segment cannot be resolved, keys holding
//! positional indexes (`items.1.label`, `items.$.label`, `items.$[].label`) are scanned
//! instead; this only happens for paths with at least three components in key form, where
//! `items[].label` counts as `items.$.label`. A value that is not an array where `[]` is
//! expected is treated as a single item, which covers `$push` payloads, and `{ $each: [..] }`
//! modifiers are unwrapped.
//!
//! Missing values and nulls are left alone. A scalar found where a document is required
//! fails with [`DocumentStoreError::Resolution`].

use bson::{Bson, Document};

use crate::error::{DocumentStoreError, DocumentStoreResult};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
    Each,
}

impl Segment {
    fn render(&self) -> String {
        match self {
            Segment::Key(key) => key.clone(),
            Segment::Index(idx) => idx.to_string(),
            Segment::Each => "[]".to_string(),
        }
    }
}

fn parse_path(path: &str) -> DocumentStoreResult<Vec<Segment>> {
    let mut segments = Vec::new();

    for token in path.split('.').filter(|token| !token.is_empty()) {
        if token.starts_with('$') {
            segments.push(Segment::Key(token.to_string()));
            continue;
        }

        let (name, mut brackets) = match token.find('[') {
            Some(start) => (&token[..start], &token[start..]),
            None => (token, ""),
        };

        if !name.is_empty() {
            segments.push(Segment::Key(name.to_string()));
        }

        while !brackets.is_empty() {
            let close = match (brackets.starts_with('['), brackets.find(']')) {
                (true, Some(close)) => close,
                _ => return Err(DocumentStoreError::resolution(path, "malformed bracket segment")),
            };
            let inner = &brackets[1..close];

            segments.push(if inner.is_empty() {
                Segment::Each
            } else {
                Segment::Index(
                    inner
                        .parse::<usize>()
                        .map_err(|_| DocumentStoreError::resolution(path, format!("invalid index `{inner}`")))?,
                )
            });

            brackets = &brackets[close + 1..];
        }
    }

    Ok(segments)
}

fn join_segments(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(Segment::render)
        .collect::<Vec<_>>()
        .join(".")
}

/// Positional keys are only considered for paths with at least three components once
/// written in key form, where each `[]` or `[idx]` marker stands for one positional segment:
/// `items[].label` reads as `items.$.label`, while `tags[]` reads as `tags.$`.
fn allows_positional(segments: &[Segment]) -> bool {
    segments.len() >= 3
}

fn keyed_prefix(segments: &[Segment]) -> usize {
    segments
        .iter()
        .take_while(|segment| !matches!(segment, Segment::Each))
        .count()
}

fn is_index(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|byte| byte.is_ascii_digit())
}

/// Returns true for segments that address array elements in update keys: digits, `$`,
/// `$[]` and `$[identifier]`.
pub fn is_positional_segment(token: &str) -> bool {
    is_index(token) || token == "$" || (token.starts_with("$[") && token.ends_with(']'))
}

/// Converts a canonical path into MongoDB dot notation.
///
/// `items[].label` becomes `items.label` and `pair[1]` becomes `pair.1`.
pub fn to_dotted(path: &str) -> String {
    path
        .replace("[]", "")
        .replace('[', ".")
        .replace(']', "")
}

/// Matches a positional key against the path, returning how many segments it consumed.
fn match_positional(key: &str, segments: &[Segment]) -> Option<usize> {
    let mut consumed = 0;
    let mut wildcard = false;

    for token in key.split('.') {
        let matched = match segments.get(consumed)? {
            Segment::Key(name) => name == token,
            Segment::Index(idx) => is_index(token) && token.parse::<usize>().ok() == Some(*idx),
            Segment::Each => {
                wildcard = true;
                is_positional_segment(token)
            }
        };

        if !matched {
            return None;
        }

        consumed += 1;
    }

    wildcard.then_some(consumed)
}

fn each_items(value: &mut Bson) -> Option<&mut Vec<Bson>> {
    match value {
        Bson::Array(items) => Some(items),
        Bson::Document(document) => match document.get_mut("$each") {
            Some(Bson::Array(items)) => Some(items),
            _ => None,
        },
        _ => None,
    }
}

fn mismatch(path: &str, segment: &Segment, found: &Bson) -> DocumentStoreError {
    DocumentStoreError::resolution(
        path,
        format!(
            "expected a document or array at `{}`, found {:?}",
            segment.render(),
            found.element_type(),
        ),
    )
}

struct Mapper<'f> {
    path: &'f str,
    positional: bool,
    skip_null: bool,
    transform: &'f mut dyn FnMut(Bson) -> DocumentStoreResult<Bson>,
}

impl Mapper<'_> {
    fn apply(&mut self, value: &mut Bson) -> DocumentStoreResult<()> {
        if self.skip_null && matches!(value, Bson::Null) {
            return Ok(());
        }

        *value = (self.transform)(value.clone())?;

        Ok(())
    }

    fn value(&mut self, value: &mut Bson, segments: &[Segment]) -> DocumentStoreResult<()> {
        let Some((first, rest)) = segments.split_first() else {
            return self.apply(value);
        };

        if matches!(value, Bson::Null) {
            return Ok(());
        }

        match first {
            Segment::Each => {
                if let Some(items) = each_items(value) {
                    return self.each(items, rest);
                }

                self.value(value, rest)
            }
            Segment::Key(_) | Segment::Index(_) => match value {
                Bson::Document(document) => self.document(document, segments),
                Bson::Array(items) => self.array(items, segments),
                other => Err(mismatch(self.path, first, other)),
            },
        }
    }

    fn each(&mut self, items: &mut [Bson], rest: &[Segment]) -> DocumentStoreResult<()> {
        for item in items.iter_mut() {
            self.value(item, rest)?;
        }

        Ok(())
    }

    fn array(&mut self, items: &mut Vec<Bson>, segments: &[Segment]) -> DocumentStoreResult<()> {
        let (first, rest) = match segments.split_first() {
            Some(split) => split,
            None => return Ok(()),
        };

        match first {
            Segment::Index(idx) => match items.get_mut(*idx) {
                Some(item) => self.value(item, rest),
                None => Ok(()),
            },
            Segment::Key(key) if is_index(key) => match key.parse::<usize>().ok().and_then(|idx| items.get_mut(idx)) {
                Some(item) => self.value(item, rest),
                None => Ok(()),
            },
            Segment::Key(key) if is_positional_segment(key) => self.each(items, rest),
            Segment::Key(_) => self.each(items, segments),
            Segment::Each => self.each(items, rest),
        }
    }

    fn document(&mut self, document: &mut Document, segments: &[Segment]) -> DocumentStoreResult<()> {
        let keyed = keyed_prefix(segments);

        for len in (1..=keyed).rev() {
            if let Some(value) = document.get_mut(join_segments(&segments[..len])) {
                return self.value(value, &segments[len..]);
            }
        }

        if self.positional && keyed < segments.len() {
            let matches = document
                .keys()
                .filter_map(|key| match_positional(key, segments).map(|consumed| (key.clone(), consumed)))
                .collect::<Vec<_>>();

            for (key, consumed) in matches {
                if let Some(value) = document.get_mut(&key) {
                    self.value(value, &segments[consumed..])?;
                }
            }
        }

        Ok(())
    }
}

/// Rewrites every value located at `path` with `transform`.
///
/// The transform receives a copy of the current value and its result replaces it. Missing
/// values and nulls are skipped. The first error returned by the transform aborts the walk.
pub fn map_path_values<F>(document: &mut Document, path: &str, mut transform: F) -> DocumentStoreResult<()>
where
    F: FnMut(Bson) -> DocumentStoreResult<Bson>,
{
    let segments = parse_path(path)?;

    if keyed_prefix(&segments) == 0 {
        return Ok(());
    }

    Mapper {
        path,
        positional: allows_positional(&segments),
        skip_null: true,
        transform: &mut transform,
    }
    .document(document, &segments)
}

/// Returns copies of every value located at `path`, nulls included, in document order.
pub fn collect_path_values(document: &Document, path: &str) -> DocumentStoreResult<Vec<Bson>> {
    let segments = parse_path(path)?;
    let mut values = Vec::new();

    if keyed_prefix(&segments) == 0 {
        return Ok(values);
    }

    let mut scratch = document.clone();
    let mut collect = |value: Bson| -> DocumentStoreResult<Bson> {
        values.push(value.clone());
        Ok(value)
    };

    Mapper {
        path,
        positional: allows_positional(&segments),
        skip_null: false,
        transform: &mut collect,
    }
    .document(&mut scratch, &segments)?;

    Ok(values)
}

struct Defaulter<'f> {
    path: &'f str,
    supplier: &'f mut dyn FnMut() -> Bson,
}

impl Defaulter<'_> {
    fn value(&mut self, value: &mut Bson, segments: &[Segment]) -> DocumentStoreResult<()> {
        let Some((first, rest)) = segments.split_first() else {
            return Ok(());
        };

        if matches!(value, Bson::Null) {
            return Ok(());
        }

        match first {
            Segment::Each => {
                if let Some(items) = each_items(value) {
                    return self.each(items, rest);
                }

                match value {
                    Bson::Document(_) if !rest.is_empty() => self.value(value, rest),
                    _ if rest.is_empty() => Ok(()),
                    other => Err(mismatch(self.path, first, other)),
                }
            }
            Segment::Key(_) | Segment::Index(_) => match value {
                Bson::Document(document) => self.document(document, segments),
                Bson::Array(items) => self.array(items, segments),
                other => Err(mismatch(self.path, first, other)),
            },
        }
    }

    fn fill(&mut self, item: &mut Bson, rest: &[Segment]) -> DocumentStoreResult<()> {
        if rest.is_empty() {
            if matches!(item, Bson::Null) {
                *item = (self.supplier)();
            }

            return Ok(());
        }

        self.value(item, rest)
    }

    fn each(&mut self, items: &mut [Bson], rest: &[Segment]) -> DocumentStoreResult<()> {
        for item in items.iter_mut() {
            self.fill(item, rest)?;
        }

        Ok(())
    }

    fn array(&mut self, items: &mut Vec<Bson>, segments: &[Segment]) -> DocumentStoreResult<()> {
        let (first, rest) = match segments.split_first() {
            Some(split) => split,
            None => return Ok(()),
        };

        match first {
            Segment::Index(idx) => match items.get_mut(*idx) {
                Some(item) => self.fill(item, rest),
                None => Ok(()),
            },
            Segment::Key(key) if is_index(key) => match key.parse::<usize>().ok().and_then(|idx| items.get_mut(idx)) {
                Some(item) => self.fill(item, rest),
                None => Ok(()),
            },
            Segment::Key(key) if is_positional_segment(key) => self.each(items, rest),
            Segment::Key(_) => {
                for item in items.iter_mut() {
                    self.value(item, segments)?;
                }

                Ok(())
            }
            Segment::Each => self.each(items, rest),
        }
    }

    fn document(&mut self, document: &mut Document, segments: &[Segment]) -> DocumentStoreResult<()> {
        let keyed = keyed_prefix(segments);

        for len in (1..=keyed).rev() {
            if let Some(value) = document.get_mut(join_segments(&segments[..len])) {
                return self.value(value, &segments[len..]);
            }
        }

        let Some(first) = segments.first() else {
            return Ok(());
        };
        let key = first.render();

        match segments.get(1) {
            None => {
                document.insert(key, (self.supplier)());
            }
            Some(Segment::Each | Segment::Index(_)) => {
                document.insert(key, Bson::Array(Vec::new()));
            }
            Some(Segment::Key(_)) => {
                document.insert(key.clone(), Document::new());

                if let Some(value) = document.get_mut(&key) {
                    self.value(value, &segments[1..])?;
                }
            }
        }

        Ok(())
    }
}

/// Fills the value at `path` with `supplier()` wherever it is missing.
///
/// A missing final key is set to the supplied value, missing parent objects are created on
/// the way, and a missing array on the path becomes an empty array. Existing arrays are
/// descended into item by item; null items are filled when the path ends at the item.
pub fn default_path_values<F>(document: &mut Document, path: &str, mut supplier: F) -> DocumentStoreResult<()>
where
    F: FnMut() -> Bson,
{
    let segments = parse_path(path)?;

    if keyed_prefix(&segments) == 0 {
        return Ok(());
    }

    Defaulter {
        path,
        supplier: &mut supplier,
    }
    .document(document, &segments)
}

/// Looks up a dotted path, preferring a literal key, then nested documents and array indexes.
pub fn get_path_value<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    if let Some(value) = document.get(path) {
        return Some(value);
    }

    let mut tokens = path.split('.');
    let mut current = document.get(tokens.next()?)?;

    for token in tokens {
        current = match current {
            Bson::Document(nested) => nested.get(token)?,
            Bson::Array(items) if is_index(token) => items.get(token.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Sets a dotted path, creating missing parent documents and padding arrays with nulls.
pub fn set_path_value(document: &mut Document, path: &str, value: Bson) -> DocumentStoreResult<()> {
    let tokens = path.split('.').collect::<Vec<_>>();

    set_in_document(document, &tokens, value, path)
}

fn set_in_document(document: &mut Document, tokens: &[&str], value: Bson, path: &str) -> DocumentStoreResult<()> {
    let Some((token, rest)) = tokens.split_first() else {
        return Ok(());
    };

    if rest.is_empty() {
        document.insert(*token, value);
        return Ok(());
    }

    if !document.contains_key(*token) {
        document.insert(*token, Document::new());
    }

    match document.get_mut(*token) {
        Some(child) => set_in_value(child, rest, value, path),
        None => Ok(()),
    }
}

fn set_in_value(target: &mut Bson, tokens: &[&str], value: Bson, path: &str) -> DocumentStoreResult<()> {
    match target {
        Bson::Document(document) => set_in_document(document, tokens, value, path),
        Bson::Array(items) => {
            let Some((token, rest)) = tokens.split_first() else {
                return Ok(());
            };
            let idx = match is_index(token) {
                true => token
                    .parse::<usize>()
                    .map_err(|_| DocumentStoreError::resolution(path, format!("invalid index `{token}`")))?,
                false => return Err(DocumentStoreError::resolution(
                    path,
                    format!("cannot create field `{token}` in an array"),
                )),
            };

            while items.len() <= idx {
                items.push(Bson::Null);
            }

            if rest.is_empty() {
                items[idx] = value;
                return Ok(());
            }

            if matches!(items[idx], Bson::Null) {
                items[idx] = Bson::Document(Document::new());
            }

            set_in_value(&mut items[idx], rest, value, path)
        }
        other => Err(DocumentStoreError::resolution(
            path,
            format!("cannot create field in {:?}", other.element_type()),
        )),
    }
}

/// Removes the value at a dotted path. Array elements are replaced by null.
pub fn remove_path_value(document: &mut Document, path: &str) -> Option<Bson> {
    if document.contains_key(path) {
        return document.remove(path);
    }

    let (parent, last) = path.rsplit_once('.')?;
    let mut tokens = parent.split('.');
    let mut current = document.get_mut(tokens.next()?)?;

    for token in tokens {
        current = match current {
            Bson::Document(nested) => nested.get_mut(token)?,
            Bson::Array(items) if is_index(token) => items.get_mut(token.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    match current {
        Bson::Document(nested) => nested.remove(last),
        Bson::Array(items) if is_index(last) => items
            .get_mut(last.parse::<usize>().ok()?)
            .map(|item| std::mem::replace(item, Bson::Null)),
        _ => None,
    }
}
