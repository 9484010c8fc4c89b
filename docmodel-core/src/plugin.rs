//! The plugin contract and plugin-owned path tables.
//!
//! A [`Plugin`] is applied once per model while the model is being built. It may register
//! operation hooks, add schema properties and statics, and subscribe to the schema walk
//! through [`ModelBuilder::on_schema_path`], which hands back a [`PathTable`] that is filled
//! exactly once when the model is built and never changes afterwards.
//!
//! # Example
//!
//! ```ignore
//! use docmodel::{model::ModelBuilder, plugin::plugin_fn, context::HookName};
//!
//! let shout = plugin_fn("shout", |model: &mut ModelBuilder| {
//!     let paths = model.on_schema_path(|event| Ok(event.node.flag("shout").then_some(())));
//!
//!     model.pre_sync(HookName::Insert, move |ctx| {
//!         for (path, _) in paths.entries() {
//!             if let Some(document) = ctx.document_mut() {
//!                 map_path_values(document, path, |value| Ok(uppercase(value)))?;
//!             }
//!         }
//!         Ok(())
//!     });
//!
//!     Ok(())
//! });
//! ```

use std::{
    fmt::{self, Debug},
    sync::{Arc, Mutex, OnceLock},
};

use crate::{
    error::{DocumentStoreError, DocumentStoreResult},
    model::ModelBuilder,
};

/// A reusable behavior attached to models.
pub trait Plugin: Send + Sync {
    /// A short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Registers the plugin's hooks, schema subscriptions and statics on `model`.
    fn apply(&self, model: &mut ModelBuilder) -> DocumentStoreResult<()>;
}

impl<P: Plugin + ?Sized> Plugin for Arc<P> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn apply(&self, model: &mut ModelBuilder) -> DocumentStoreResult<()> {
        (**self).apply(model)
    }
}

/// A plugin defined by a closure.
pub struct FnPlugin<F> {
    name: &'static str,
    apply: F,
}

impl<F> Plugin for FnPlugin<F>
where
    F: Fn(&mut ModelBuilder) -> DocumentStoreResult<()> + Send + Sync,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn apply(&self, model: &mut ModelBuilder) -> DocumentStoreResult<()> {
        (self.apply)(model)
    }
}

pub fn plugin_fn<F>(name: &'static str, apply: F) -> FnPlugin<F>
where
    F: Fn(&mut ModelBuilder) -> DocumentStoreResult<()> + Send + Sync,
{
    FnPlugin { name, apply }
}

struct PathTableInner<T> {
    staging: Mutex<Vec<(String, T)>>,
    frozen: OnceLock<Vec<(String, T)>>,
}

/// Values a plugin selected for schema paths, in walk order.
///
/// Empty until the owning model is built.
pub struct PathTable<T> {
    inner: Arc<PathTableInner<T>>,
}

impl<T> PathTable<T> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(PathTableInner {
                staging: Mutex::new(Vec::new()),
                frozen: OnceLock::new(),
            }),
        }
    }

    pub(crate) fn stage(&self, path: String, value: T) -> DocumentStoreResult<()> {
        self.inner
            .staging
            .lock()
            .map_err(|_| DocumentStoreError::Unknown("path table lock poisoned".to_string()))?
            .push((path, value));

        Ok(())
    }

    pub(crate) fn freeze(&self) -> DocumentStoreResult<()> {
        let entries = std::mem::take(
            &mut *self.inner
                .staging
                .lock()
                .map_err(|_| DocumentStoreError::Unknown("path table lock poisoned".to_string()))?,
        );

        self.inner
            .frozen
            .set(entries)
            .map_err(|_| DocumentStoreError::InvalidSchema("path table built twice".to_string()))
    }

    pub fn entries(&self) -> &[(String, T)] {
        self.inner
            .frozen
            .get()
            .map_or(&[], Vec::as_slice)
    }

    pub fn get(&self, path: &str) -> Option<&T> {
        self.entries()
            .iter()
            .find(|(candidate, _)| candidate == path)
            .map(|(_, value)| value)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries()
            .iter()
            .map(|(path, _)| path.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

impl<T> Clone for PathTable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Debug> Debug for PathTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries())
            .finish()
    }
}
