//! Convenient re-exports of commonly used types from docmodel.
//!
//! Import this prelude module to quickly access the most frequently used types
//! and traits without needing to import from multiple sub-modules:
//!
//! ```ignore
//! use docmodel::prelude::*;
//! ```
//!
//! This provides access to:
//! - Schemas, models and the model builder
//! - Operation contexts, hook names and options
//! - Store backends and builders
//! - Plugins and typed records
//! - Query construction and error types

pub use docmodel_core::{
    backend::{StoreBackend, StoreBackendBuilder},
    context::{HookName, Method, OperationContext, OperationResult},
    error::{DocumentStoreError, DocumentStoreResult},
    model::{Model, ModelBuilder},
    options::{OperationOptions, ReturnDocument},
    plugin::{PathTable, Plugin, plugin_fn},
    query::{Expr, FieldOp, Filter, QueryVisitor},
    record::{Record, RecordExt, TypedModel},
    schema::{BsonType, SchemaNode},
    store::{DocumentStore, ModelDefinition},
};
