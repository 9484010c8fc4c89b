//! Error types and result types for model operations.
//!
//! Every fallible operation in the workspace returns [`DocumentStoreResult<T>`]. The error
//! enum is `Clone` so that the operation context can hand a copy of a pending error to each
//! error hook and batch item.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Classification code carried by validation failures.
pub const VALIDATION_ERROR_CODE: i32 = 121;

/// Code reported by storage backends for unique constraint violations.
pub const DUPLICATE_KEY_ERROR_CODE: i32 = 11000;

/// Represents all possible errors that can occur when working with models and their backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DocumentStoreError {
    /// Serialization/deserialization error when converting between document formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during store initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// The schema declaration is malformed or a plugin could not be applied to it.
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),
    /// A filter, update or pipeline could not be interpreted.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
    /// The requested collection does not exist in the store.
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),
    /// The document has an invalid structure.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// A pre-hook rejected the operation before anything reached the backend.
    #[error("Precondition failed: {0}")]
    Precondition(String),
    /// A document failed validation against the model schema.
    #[error("Validation failed at '{path}': {message}")]
    Validation {
        /// Canonical path of the offending value.
        path: String,
        /// Human readable reason.
        message: String,
    },
    /// A path could not be resolved against a malformed document.
    #[error("Cannot resolve path '{path}': {message}")]
    Resolution {
        /// The path being resolved.
        path: String,
        /// What was found instead of the expected structure.
        message: String,
    },
    /// An error occurred in the underlying storage backend.
    #[error("Backend error: {message}")]
    Backend {
        /// Numeric code reported by the backend, when it reports one.
        code: Option<i32>,
        /// Backend error message.
        message: String,
    },
    /// No model is registered under the given name.
    #[error("Model not found: {0}")]
    ModelNotFound(String),
    /// An unknown error occurred.
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl DocumentStoreError {
    /// Creates a backend error without a code.
    pub fn backend(message: impl Into<String>) -> Self {
        DocumentStoreError::Backend { code: None, message: message.into() }
    }

    /// Creates a backend error carrying a numeric code.
    pub fn backend_with_code(code: i32, message: impl Into<String>) -> Self {
        DocumentStoreError::Backend { code: Some(code), message: message.into() }
    }

    /// Creates a validation error for the given path.
    pub fn validation(path: impl Into<String>, message: impl Into<String>) -> Self {
        DocumentStoreError::Validation { path: path.into(), message: message.into() }
    }

    /// Creates a path resolution error.
    pub fn resolution(path: impl Into<String>, message: impl Into<String>) -> Self {
        DocumentStoreError::Resolution { path: path.into(), message: message.into() }
    }

    /// Returns the numeric classification code of this error, if it has one.
    pub fn code(&self) -> Option<i32> {
        match self {
            DocumentStoreError::Validation { .. } => Some(VALIDATION_ERROR_CODE),
            DocumentStoreError::Backend { code, .. } => *code,
            _ => None,
        }
    }

    /// Returns true for validation failures, including backend-side document validation.
    pub fn is_validation(&self) -> bool {
        self.code() == Some(VALIDATION_ERROR_CODE)
    }

    /// Returns true when the backend rejected a write because of a unique constraint.
    pub fn is_duplicate_key(&self) -> bool {
        self.code() == Some(DUPLICATE_KEY_ERROR_CODE)
    }
}

/// A specialized `Result` type for model operations.
pub type DocumentStoreResult<T> = Result<T, DocumentStoreError>;

impl From<BsonError> for DocumentStoreError {
    fn from(err: BsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DocumentStoreError {
    fn from(err: SerdeJsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}
