//! The per-operation context shared by hooks.
//!
//! Every model operation creates a fresh [`OperationContext`] seeded with its [`Method`] and
//! natural arguments. Hooks of that operation receive the same context by mutable reference,
//! in order. Arguments are wrapped in [`Override`] so that a pre-hook rewriting the filter,
//! document or update replaces the caller's value for the persistence call while the caller's
//! original stays observable.

use std::{fmt::{self, Display}, str::FromStr};

use bson::{Bson, Document};

use crate::{
    backend::{DeleteResult, InsertManyResult, InsertOneResult, UpdateResult},
    error::{DocumentStoreError, DocumentStoreResult},
    options::OperationOptions,
};

/// The operations a model exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    InsertOne,
    InsertMany,
    UpdateOne,
    UpdateMany,
    FindOne,
    FindMany,
    FindOneAndUpdate,
    DeleteOne,
    DeleteMany,
    Aggregate,
    Count,
    Distinct,
}

impl Method {
    pub const ALL: [Method; 12] = [
        Method::InsertOne,
        Method::InsertMany,
        Method::UpdateOne,
        Method::UpdateMany,
        Method::FindOne,
        Method::FindMany,
        Method::FindOneAndUpdate,
        Method::DeleteOne,
        Method::DeleteMany,
        Method::Aggregate,
        Method::Count,
        Method::Distinct,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::InsertOne => "insertOne",
            Method::InsertMany => "insertMany",
            Method::UpdateOne => "updateOne",
            Method::UpdateMany => "updateMany",
            Method::FindOne => "findOne",
            Method::FindMany => "findMany",
            Method::FindOneAndUpdate => "findOneAndUpdate",
            Method::DeleteOne => "deleteOne",
            Method::DeleteMany => "deleteMany",
            Method::Aggregate => "aggregate",
            Method::Count => "count",
            Method::Distinct => "distinct",
        }
    }

    /// The family hook that runs before this method, if any.
    pub fn family(&self) -> Option<HookName> {
        match self {
            Method::InsertOne | Method::InsertMany => Some(HookName::Insert),
            Method::UpdateOne | Method::UpdateMany | Method::FindOneAndUpdate => Some(HookName::Update),
            Method::FindOne | Method::FindMany => Some(HookName::Find),
            Method::DeleteOne | Method::DeleteMany => Some(HookName::Delete),
            Method::Aggregate | Method::Count | Method::Distinct => None,
        }
    }

    /// The family error hook for this method, if any.
    pub fn error_family(&self) -> Option<HookName> {
        self.family()
            .and_then(|family| match family {
                HookName::Insert => Some(HookName::InsertError),
                HookName::Update => Some(HookName::UpdateError),
                HookName::Find => Some(HookName::FindError),
                HookName::Delete => Some(HookName::DeleteError),
                _ => None,
            })
    }

    /// Methods whose backend call writes documents.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Method::InsertOne
                | Method::InsertMany
                | Method::UpdateOne
                | Method::UpdateMany
                | Method::FindOneAndUpdate
                | Method::DeleteOne
                | Method::DeleteMany
        )
    }

    /// Methods that take a filter.
    pub fn has_filter(&self) -> bool {
        !matches!(self, Method::InsertOne | Method::InsertMany | Method::Aggregate)
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = DocumentStoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .into_iter()
            .find(|method| method.as_str() == value)
            .ok_or_else(|| DocumentStoreError::Unknown(format!("unknown method `{value}`")))
    }
}

/// The closed set of hook names a model dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookName {
    Insert,
    Update,
    Find,
    Delete,
    Validate,
    Operation(Method),
    Error,
    InsertError,
    UpdateError,
    FindError,
    DeleteError,
    OperationError(Method),
}

impl Display for HookName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookName::Insert => f.write_str("insert"),
            HookName::Update => f.write_str("update"),
            HookName::Find => f.write_str("find"),
            HookName::Delete => f.write_str("delete"),
            HookName::Validate => f.write_str("validate"),
            HookName::Operation(method) => f.write_str(method.as_str()),
            HookName::Error => f.write_str("error"),
            HookName::InsertError => f.write_str("insertError"),
            HookName::UpdateError => f.write_str("updateError"),
            HookName::FindError => f.write_str("findError"),
            HookName::DeleteError => f.write_str("deleteError"),
            HookName::OperationError(method) => write!(f, "{}Error", method.as_str()),
        }
    }
}

impl FromStr for HookName {
    type Err = DocumentStoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "insert" => HookName::Insert,
            "update" => HookName::Update,
            "find" => HookName::Find,
            "delete" => HookName::Delete,
            "validate" => HookName::Validate,
            "error" => HookName::Error,
            "insertError" => HookName::InsertError,
            "updateError" => HookName::UpdateError,
            "findError" => HookName::FindError,
            "deleteError" => HookName::DeleteError,
            other => match other.strip_suffix("Error") {
                Some(method) => HookName::OperationError(method.parse()?),
                None => HookName::Operation(other.parse()?),
            },
        })
    }
}

impl From<Method> for HookName {
    fn from(method: Method) -> Self {
        HookName::Operation(method)
    }
}

/// A caller-supplied argument that hooks may replace.
///
/// Reads see the replacement when there is one. Mutable access copies the original into the
/// replacement first, so the caller's value is never modified.
#[derive(Debug, Clone, PartialEq)]
pub struct Override<T> {
    original: Option<T>,
    replacement: Option<T>,
}

impl<T: Clone> Override<T> {
    pub fn new(original: Option<T>) -> Self {
        Self {
            original,
            replacement: None,
        }
    }

    /// The effective value.
    pub fn get(&self) -> Option<&T> {
        self.replacement
            .as_ref()
            .or(self.original.as_ref())
    }

    /// Mutable access to the effective value, copying the original on first use.
    pub fn get_mut(&mut self) -> Option<&mut T> {
        if self.replacement.is_none() {
            self.replacement = self.original.clone();
        }

        self.replacement.as_mut()
    }

    pub fn set(&mut self, value: T) {
        self.replacement = Some(value);
    }

    /// The value the caller passed.
    pub fn original(&self) -> Option<&T> {
        self.original.as_ref()
    }

    pub fn is_overridden(&self) -> bool {
        self.replacement.is_some()
    }

    pub fn into_effective(self) -> Option<T> {
        self.replacement.or(self.original)
    }
}

impl<T> Default for Override<T> {
    fn default() -> Self {
        Self {
            original: None,
            replacement: None,
        }
    }
}

/// Lifecycle of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Created,
    PreHooks,
    Persisting,
    Persisted,
    ErrorHandling,
    PostHooks,
    FanOut,
    Completed,
    Failed,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationState::Completed | OperationState::Failed)
    }
}

/// The raw outcome of a backend call, as seen by post-hooks.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationResult {
    InsertOne(InsertOneResult),
    InsertMany(InsertManyResult),
    Update(UpdateResult),
    Delete(DeleteResult),
    Document(Option<Document>),
    Documents(Vec<Document>),
    Count(u64),
    Values(Vec<Bson>),
}

impl OperationResult {
    /// The result reported when an error hook suppressed a failure without supplying one.
    pub fn empty_for(method: Method) -> Self {
        match method {
            Method::InsertOne => OperationResult::InsertOne(InsertOneResult {
                inserted_id: Bson::Null,
                document: Document::new(),
            }),
            Method::InsertMany => OperationResult::InsertMany(InsertManyResult::default()),
            Method::UpdateOne | Method::UpdateMany => OperationResult::Update(UpdateResult::default()),
            Method::DeleteOne | Method::DeleteMany => OperationResult::Delete(DeleteResult::default()),
            Method::FindOne | Method::FindOneAndUpdate => OperationResult::Document(None),
            Method::FindMany | Method::Aggregate => OperationResult::Documents(Vec::new()),
            Method::Count => OperationResult::Count(0),
            Method::Distinct => OperationResult::Values(Vec::new()),
        }
    }

    /// The single document carried by this result, if any.
    pub fn document(&self) -> Option<&Document> {
        match self {
            OperationResult::InsertOne(result) => Some(&result.document),
            OperationResult::Document(document) => document.as_ref(),
            _ => None,
        }
    }

    pub fn document_mut(&mut self) -> Option<&mut Document> {
        match self {
            OperationResult::InsertOne(result) => Some(&mut result.document),
            OperationResult::Document(document) => document.as_mut(),
            _ => None,
        }
    }

    /// The batch of documents carried by this result, if any.
    pub fn documents(&self) -> Option<&Vec<Document>> {
        match self {
            OperationResult::InsertMany(result) => Some(&result.documents),
            OperationResult::Documents(documents) => Some(documents),
            _ => None,
        }
    }

    pub fn documents_mut(&mut self) -> Option<&mut Vec<Document>> {
        match self {
            OperationResult::InsertMany(result) => Some(&mut result.documents),
            OperationResult::Documents(documents) => Some(documents),
            _ => None,
        }
    }
}

/// State carried through the hooks and backend call of one operation.
#[derive(Debug, Clone)]
pub struct OperationContext {
    method: Method,
    collection: String,
    state: OperationState,
    batch_index: Option<usize>,
    filter: Override<Document>,
    document: Override<Document>,
    documents: Override<Vec<Document>>,
    update: Override<Document>,
    pipeline: Override<Vec<Document>>,
    field: Option<String>,
    options: OperationOptions,
    result: Option<OperationResult>,
    error: Option<DocumentStoreError>,
    locals: Document,
}

impl OperationContext {
    pub fn new(method: Method, collection: impl Into<String>) -> Self {
        Self {
            method,
            collection: collection.into(),
            state: OperationState::Created,
            batch_index: None,
            filter: Override::default(),
            document: Override::default(),
            documents: Override::default(),
            update: Override::default(),
            pipeline: Override::default(),
            field: None,
            options: OperationOptions::default(),
            result: None,
            error: None,
            locals: Document::new(),
        }
    }

    pub fn with_filter(mut self, filter: Document) -> Self {
        self.filter = Override::new(Some(filter));
        self
    }

    pub fn with_document(mut self, document: Document) -> Self {
        self.document = Override::new(Some(document));
        self
    }

    pub fn with_documents(mut self, documents: Vec<Document>) -> Self {
        self.documents = Override::new(Some(documents));
        self
    }

    pub fn with_update(mut self, update: Document) -> Self {
        self.update = Override::new(Some(update));
        self
    }

    pub fn with_pipeline(mut self, pipeline: Vec<Document>) -> Self {
        self.pipeline = Override::new(Some(pipeline));
        self
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_options(mut self, options: OperationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// Name of the collection the operation targets.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn state(&self) -> OperationState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: OperationState) {
        self.state = state;
    }

    /// Position of this context within a batch fan-out, `None` for the operation itself.
    pub fn batch_index(&self) -> Option<usize> {
        self.batch_index
    }

    pub fn filter(&self) -> Option<&Document> {
        self.filter.get()
    }

    pub fn filter_mut(&mut self) -> Option<&mut Document> {
        self.filter.get_mut()
    }

    pub fn set_filter(&mut self, filter: Document) {
        self.filter.set(filter);
    }

    pub fn filter_override(&self) -> &Override<Document> {
        &self.filter
    }

    pub fn document(&self) -> Option<&Document> {
        self.document.get()
    }

    pub fn document_mut(&mut self) -> Option<&mut Document> {
        self.document.get_mut()
    }

    pub fn set_document(&mut self, document: Document) {
        self.document.set(document);
    }

    pub fn document_override(&self) -> &Override<Document> {
        &self.document
    }

    pub fn documents(&self) -> Option<&Vec<Document>> {
        self.documents.get()
    }

    pub fn documents_mut(&mut self) -> Option<&mut Vec<Document>> {
        self.documents.get_mut()
    }

    pub fn set_documents(&mut self, documents: Vec<Document>) {
        self.documents.set(documents);
    }

    pub fn update(&self) -> Option<&Document> {
        self.update.get()
    }

    pub fn update_mut(&mut self) -> Option<&mut Document> {
        self.update.get_mut()
    }

    pub fn set_update(&mut self, update: Document) {
        self.update.set(update);
    }

    pub fn update_override(&self) -> &Override<Document> {
        &self.update
    }

    pub fn pipeline(&self) -> Option<&Vec<Document>> {
        self.pipeline.get()
    }

    pub fn pipeline_mut(&mut self) -> Option<&mut Vec<Document>> {
        self.pipeline.get_mut()
    }

    pub fn set_pipeline(&mut self, pipeline: Vec<Document>) {
        self.pipeline.set(pipeline);
    }

    /// The field name of a `distinct` operation.
    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }

    pub fn options(&self) -> &OperationOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut OperationOptions {
        &mut self.options
    }

    pub fn result(&self) -> Option<&OperationResult> {
        self.result.as_ref()
    }

    pub fn result_mut(&mut self) -> Option<&mut OperationResult> {
        self.result.as_mut()
    }

    pub fn set_result(&mut self, result: OperationResult) {
        self.result = Some(result);
    }

    pub fn take_result(&mut self) -> Option<OperationResult> {
        self.result.take()
    }

    /// The pending error while error hooks run.
    pub fn error(&self) -> Option<&DocumentStoreError> {
        self.error.as_ref()
    }

    pub fn set_error(&mut self, error: DocumentStoreError) {
        self.error = Some(error);
    }

    /// Suppresses the pending error. The operation then completes with the current result.
    pub fn clear_error(&mut self) -> Option<DocumentStoreError> {
        self.error.take()
    }

    /// Scratch space shared by the hooks of one operation.
    pub fn locals(&self) -> &Document {
        &self.locals
    }

    pub fn locals_mut(&mut self) -> &mut Document {
        &mut self.locals
    }

    /// Returns true when the update document carries the given operator.
    pub fn has_update_operator(&self, operator: &str) -> bool {
        self.update()
            .is_some_and(|update| update.contains_key(operator))
    }

    /// Clones this context for one item of a batch.
    ///
    /// Every key is copied; `result` is replaced by the item's sub-result and, when given,
    /// `document` by the item itself.
    pub fn fork(&self, index: usize, result: Option<OperationResult>, document: Option<Document>) -> Self {
        let mut fork = self.clone();
        fork.batch_index = Some(index);
        fork.result = result;

        if let Some(document) = document {
            fork.document = Override::new(Some(document));
        }

        fork
    }

    /// Fails with [`DocumentStoreError::Precondition`] unless `condition` holds.
    pub fn ensure(&self, condition: bool, message: impl Into<String>) -> DocumentStoreResult<()> {
        match condition {
            true => Ok(()),
            false => Err(DocumentStoreError::Precondition(message.into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn hook_names_round_trip_through_strings() {
        for name in [
            HookName::Validate,
            HookName::Operation(Method::FindOneAndUpdate),
            HookName::OperationError(Method::InsertMany),
            HookName::DeleteError,
        ] {
            assert_eq!(name.to_string().parse::<HookName>().unwrap(), name);
        }

        assert_eq!(HookName::OperationError(Method::UpdateOne).to_string(), "updateOneError");
        assert!("bogus".parse::<HookName>().is_err());
    }

    #[test]
    fn override_copies_on_write() {
        let mut filter = Override::new(Some(doc! { "a": 1 }));

        filter
            .get_mut()
            .unwrap()
            .insert("b", 2);

        assert_eq!(filter.original(), Some(&doc! { "a": 1 }));
        assert_eq!(filter.get(), Some(&doc! { "a": 1, "b": 2 }));
        assert!(filter.is_overridden());
    }

    #[test]
    fn fork_replaces_result_and_keeps_other_keys() {
        let mut context = OperationContext::new(Method::FindMany, "users")
            .with_filter(doc! { "active": true });
        context.set_result(OperationResult::Documents(vec![doc! { "n": 1 }, doc! { "n": 2 }]));

        let fork = context.fork(1, Some(OperationResult::Document(Some(doc! { "n": 2 }))), None);

        assert_eq!(fork.batch_index(), Some(1));
        assert_eq!(fork.filter(), Some(&doc! { "active": true }));
        assert_eq!(fork.result().and_then(OperationResult::document), Some(&doc! { "n": 2 }));
    }
}
