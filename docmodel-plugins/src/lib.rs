//! The standard plugin set for docmodel models.
//!
//! Every plugin is configured through schema annotations and registers ordinary hooks, so
//! each one can be applied on its own or replaced by a custom [`Plugin`]:
//!
//! - [`DefaultsPlugin`] fills `default` values on inserts, pushes and upserts
//! - [`TimestampsPlugin`] maintains `createdAt` and `updatedAt`
//! - [`TrimPlugin`] and [`CaseTransformPlugin`] normalize strings
//! - [`CastPlugin`] casts written and queried values to their declared type
//! - [`ValidationPlugin`] enforces required, type and value rules on `validate`
//! - [`SelectPlugin`] hides `select: false` paths from reads
//! - [`PopulatePlugin`] replaces `ref` ids with the referenced documents on request
//! - [`IndexPlugin`] creates declared indexes and reports duplicate keys per path
//! - [`AuditPlugin`] records one entry per operation
//!
//! # Example
//!
//! ```ignore
//! use docmodel_plugins::standard_plugins;
//!
//! let users = store
//!     .model(ModelDefinition::new("users", schema).plugins(standard_plugins()))
//!     .await?;
//!
//! users.call_static("ensureIndexes", doc! {}).await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmodel_plugins;

mod support;

pub mod audit;
pub mod case;
pub mod cast;
pub mod defaults;
pub mod index;
pub mod populate;
pub mod select;
pub mod timestamps;
pub mod trim;
pub mod validation;

use std::sync::Arc;

use docmodel_core::plugin::Plugin;

pub use audit::{AuditEntry, AuditOptions, AuditOutcome, AuditPlugin, AuditSink, TracingSink};
pub use case::{CaseOp, CaseTransformPlugin};
pub use cast::CastPlugin;
pub use defaults::DefaultsPlugin;
pub use index::IndexPlugin;
pub use populate::PopulatePlugin;
pub use select::SelectPlugin;
pub use timestamps::{TimestampsOptions, TimestampsPlugin};
pub use trim::TrimPlugin;
pub use validation::ValidationPlugin;

/// Every standard plugin with default options.
///
/// Normalizing plugins come before [`CastPlugin`], which comes before [`ValidationPlugin`],
/// so the validator sees the values that will be stored.
pub fn standard_plugins() -> Vec<Arc<dyn Plugin>> {
    vec![
        Arc::new(DefaultsPlugin),
        Arc::new(TimestampsPlugin::default()),
        Arc::new(TrimPlugin),
        Arc::new(CaseTransformPlugin),
        Arc::new(CastPlugin),
        Arc::new(ValidationPlugin),
        Arc::new(SelectPlugin),
        Arc::new(PopulatePlugin),
        Arc::new(IndexPlugin),
        Arc::new(AuditPlugin::default()),
    ]
}
