//! Named, ordered callback registries.
//!
//! A [`Hooks`] registry keeps two maps from hook name to callback list, one per [`Phase`].
//! Callbacks run sequentially in registration order and each one is awaited before the next
//! starts; the first error aborts the run and is returned to the caller. [`SyncHooks`] is the
//! blocking counterpart used while models are being built.
//!
//! # Example
//!
//! ```ignore
//! use docmodel::hooks::{Hooks, Phase};
//!
//! let mut hooks: Hooks<Vec<String>> = Hooks::new();
//!
//! hooks.pre("save", |log| Box::pin(async move {
//!     log.push("first".to_string());
//!     Ok(())
//! }));
//!
//! let mut log = Vec::new();
//! hooks.exec(Phase::Pre, "save", &mut log).await?;
//! ```

use std::{collections::HashMap, fmt::{self, Debug}, sync::Arc};

use futures::future::BoxFuture;

use crate::error::DocumentStoreResult;

/// Which side of an operation a callback is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Pre,
    Post,
}

/// An asynchronous callback borrowing its argument for the duration of the returned future.
pub type HookFn<A, R> =
    Arc<dyn for<'a> Fn(&'a mut A) -> BoxFuture<'a, DocumentStoreResult<R>> + Send + Sync>;

/// A synchronous callback.
pub type SyncHookFn<A, R> = Arc<dyn Fn(&mut A) -> DocumentStoreResult<R> + Send + Sync>;

/// Asynchronous hook registry.
pub struct Hooks<A, R = ()> {
    pre: HashMap<String, Vec<HookFn<A, R>>>,
    post: HashMap<String, Vec<HookFn<A, R>>>,
}

impl<A, R> Hooks<A, R> {
    pub fn new() -> Self {
        Self {
            pre: HashMap::new(),
            post: HashMap::new(),
        }
    }

    /// Appends a callback to the `pre` list of `name`.
    pub fn pre<F>(&mut self, name: impl Into<String>, callback: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut A) -> BoxFuture<'a, DocumentStoreResult<R>> + Send + Sync + 'static,
    {
        self.register(Phase::Pre, name, Arc::new(callback))
    }

    /// Appends a callback to the `post` list of `name`.
    pub fn post<F>(&mut self, name: impl Into<String>, callback: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut A) -> BoxFuture<'a, DocumentStoreResult<R>> + Send + Sync + 'static,
    {
        self.register(Phase::Post, name, Arc::new(callback))
    }

    /// Appends an already shared callback. Registering under an empty name does nothing.
    pub fn register(&mut self, phase: Phase, name: impl Into<String>, callback: HookFn<A, R>) -> &mut Self {
        let name = name.into();

        if !name.is_empty() {
            self.callbacks_mut(phase)
                .entry(name)
                .or_default()
                .push(callback);
        }

        self
    }

    /// Number of callbacks registered under `name` for `phase`.
    pub fn count(&self, phase: Phase, name: &str) -> usize {
        self.callbacks(phase)
            .get(name)
            .map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.pre.is_empty() && self.post.is_empty()
    }

    /// Runs every callback registered under `name`, in order, collecting their results.
    pub async fn exec(&self, phase: Phase, name: &str, args: &mut A) -> DocumentStoreResult<Vec<R>> {
        let Some(callbacks) = self.callbacks(phase).get(name) else {
            return Ok(Vec::new());
        };
        let mut results = Vec::with_capacity(callbacks.len());

        for callback in callbacks {
            results.push((**callback)(&mut *args).await?);
        }

        Ok(results)
    }

    /// Runs [`exec`](Self::exec) for each name in order with the same argument.
    pub async fn exec_many<S>(&self, phase: Phase, names: &[S], args: &mut A) -> DocumentStoreResult<Vec<R>>
    where
        S: AsRef<str>,
    {
        let mut results = Vec::new();

        for name in names {
            results.extend(self.exec(phase, name.as_ref(), &mut *args).await?);
        }

        Ok(results)
    }

    /// Runs [`exec`](Self::exec) once per item, sequentially and in input order.
    pub async fn exec_each(&self, phase: Phase, name: &str, items: &mut [A]) -> DocumentStoreResult<Vec<Vec<R>>> {
        let mut results = Vec::with_capacity(items.len());

        for item in items.iter_mut() {
            results.push(self.exec(phase, name, item).await?);
        }

        Ok(results)
    }

    fn callbacks(&self, phase: Phase) -> &HashMap<String, Vec<HookFn<A, R>>> {
        match phase {
            Phase::Pre => &self.pre,
            Phase::Post => &self.post,
        }
    }

    fn callbacks_mut(&mut self, phase: Phase) -> &mut HashMap<String, Vec<HookFn<A, R>>> {
        match phase {
            Phase::Pre => &mut self.pre,
            Phase::Post => &mut self.post,
        }
    }
}

impl<A, R> Default for Hooks<A, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A, R> Clone for Hooks<A, R> {
    fn clone(&self) -> Self {
        Self {
            pre: self.pre.clone(),
            post: self.post.clone(),
        }
    }
}

impl<A, R> Debug for Hooks<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let summary = |map: &HashMap<String, Vec<HookFn<A, R>>>| {
            map.iter()
                .map(|(name, callbacks)| (name.clone(), callbacks.len()))
                .collect::<HashMap<_, _>>()
        };

        f.debug_struct("Hooks")
            .field("pre", &summary(&self.pre))
            .field("post", &summary(&self.post))
            .finish()
    }
}

/// Synchronous hook registry with the same ordering and error rules as [`Hooks`].
pub struct SyncHooks<A, R = ()> {
    pre: HashMap<String, Vec<SyncHookFn<A, R>>>,
    post: HashMap<String, Vec<SyncHookFn<A, R>>>,
}

impl<A, R> SyncHooks<A, R> {
    pub fn new() -> Self {
        Self {
            pre: HashMap::new(),
            post: HashMap::new(),
        }
    }

    pub fn pre<F>(&mut self, name: impl Into<String>, callback: F) -> &mut Self
    where
        F: Fn(&mut A) -> DocumentStoreResult<R> + Send + Sync + 'static,
    {
        self.register(Phase::Pre, name, Arc::new(callback))
    }

    pub fn post<F>(&mut self, name: impl Into<String>, callback: F) -> &mut Self
    where
        F: Fn(&mut A) -> DocumentStoreResult<R> + Send + Sync + 'static,
    {
        self.register(Phase::Post, name, Arc::new(callback))
    }

    pub fn register(&mut self, phase: Phase, name: impl Into<String>, callback: SyncHookFn<A, R>) -> &mut Self {
        let name = name.into();

        if !name.is_empty() {
            let callbacks = match phase {
                Phase::Pre => &mut self.pre,
                Phase::Post => &mut self.post,
            };

            callbacks
                .entry(name)
                .or_default()
                .push(callback);
        }

        self
    }

    pub fn exec(&self, phase: Phase, name: &str, args: &mut A) -> DocumentStoreResult<Vec<R>> {
        let callbacks = match phase {
            Phase::Pre => self.pre.get(name),
            Phase::Post => self.post.get(name),
        };
        let Some(callbacks) = callbacks else {
            return Ok(Vec::new());
        };

        callbacks
            .iter()
            .map(|callback| (**callback)(&mut *args))
            .collect()
    }

    pub fn exec_many<S>(&self, phase: Phase, names: &[S], args: &mut A) -> DocumentStoreResult<Vec<R>>
    where
        S: AsRef<str>,
    {
        let mut results = Vec::new();

        for name in names {
            results.extend(self.exec(phase, name.as_ref(), args)?);
        }

        Ok(results)
    }

    pub fn exec_each(&self, phase: Phase, name: &str, items: &mut [A]) -> DocumentStoreResult<Vec<Vec<R>>> {
        items
            .iter_mut()
            .map(|item| self.exec(phase, name, item))
            .collect()
    }
}

impl<A, R> Default for SyncHooks<A, R> {
    fn default() -> Self {
        Self::new()
    }
}
