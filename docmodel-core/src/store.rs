//! Main document store interface.
//!
//! A [`DocumentStore`] owns a backend and a registry of models built on top of it. Models are
//! created from a [`ModelDefinition`] the first time they are requested and reused afterwards,
//! so plugins run once per model and path tables are computed once.
//!
//! # Example
//!
//! ```ignore
//! use docmodel::store::{DocumentStore, ModelDefinition};
//! use docmodel::plugins::TrimPlugin;
//!
//! let store = DocumentStore::new(backend);
//! let users = store
//!     .model(ModelDefinition::new("users", schema).plugin(TrimPlugin::default()))
//!     .await?;
//! ```

use std::{collections::HashMap, fmt, sync::Arc};

use bson::Document;
use mea::rwlock::RwLock;
use tracing::debug;

use crate::{
    backend::StoreBackend,
    error::DocumentStoreResult,
    model::{Model, ModelBuilder},
    plugin::{Plugin, plugin_fn},
    record::{Record, TypedModel},
    schema::SchemaNode,
};

/// Everything needed to build a model: its name, schema and plugins in application order.
#[derive(Clone)]
pub struct ModelDefinition {
    name: String,
    schema: SchemaNode,
    plugins: Vec<Arc<dyn Plugin>>,
}

impl ModelDefinition {
    pub fn new(name: impl Into<String>, schema: SchemaNode) -> Self {
        Self {
            name: name.into(),
            schema,
            plugins: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends a plugin.
    pub fn plugin(mut self, plugin: impl Plugin + 'static) -> Self {
        self.plugins.push(Arc::new(plugin));
        self
    }

    pub fn plugins(mut self, plugins: impl IntoIterator<Item = Arc<dyn Plugin>>) -> Self {
        self.plugins.extend(plugins);
        self
    }

    /// Appends model-specific hooks or statics, applied in order with the plugins.
    pub fn configure<F>(self, configure: F) -> Self
    where
        F: Fn(&mut ModelBuilder) -> DocumentStoreResult<()> + Send + Sync + 'static,
    {
        self.plugin(plugin_fn("configure", configure))
    }

    /// Applies every plugin and builds the model.
    pub fn build(self, backend: Arc<dyn StoreBackend>) -> DocumentStoreResult<Model> {
        let mut builder = ModelBuilder::new(self.name, self.schema, backend);

        for plugin in &self.plugins {
            builder.apply(plugin.as_ref())?;
        }

        builder.build()
    }
}

impl fmt::Debug for ModelDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDefinition")
            .field("name", &self.name)
            .field(
                "plugins",
                &self
                    .plugins
                    .iter()
                    .map(|plugin| plugin.name())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Name-keyed registry of built models.
///
/// [`get_or_try_init`](ModelRegistry::get_or_try_init) is single-flight: concurrent callers
/// asking for the same missing name build it once and all receive the same model.
#[derive(Clone, Default)]
pub struct ModelRegistry {
    models: Arc<RwLock<HashMap<String, Model>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the model registered under `name`, running `init` only if there is none.
    ///
    /// `init` runs while the registry is write-locked and is not retried on failure; a
    /// failed initialization leaves the name unregistered.
    pub async fn get_or_try_init<F>(&self, name: &str, init: F) -> DocumentStoreResult<Model>
    where
        F: FnOnce() -> DocumentStoreResult<Model>,
    {
        if let Some(model) = self.models.read().await.get(name) {
            return Ok(model.clone());
        }

        let mut models = self.models.write().await;

        if let Some(model) = models.get(name) {
            return Ok(model.clone());
        }

        let model = init()?;

        debug!(model = %name, "registered model");
        models.insert(name.to_string(), model.clone());

        Ok(model)
    }

    pub async fn get(&self, name: &str) -> Option<Model> {
        self.models
            .read()
            .await
            .get(name)
            .cloned()
    }

    /// Registered names, sorted.
    pub async fn names(&self) -> Vec<String> {
        let mut names = self
            .models
            .read()
            .await
            .keys()
            .cloned()
            .collect::<Vec<_>>();

        names.sort();
        names
    }
}

/// A document store bound to a backend.
///
/// Clones share the backend and the model registry.
#[derive(Clone)]
pub struct DocumentStore {
    backend: Arc<dyn StoreBackend>,
    models: ModelRegistry,
}

impl DocumentStore {
    /// Creates a new document store with the given backend.
    pub fn new(backend: impl StoreBackend + 'static) -> Self {
        Self::from_shared(Arc::new(backend))
    }

    pub fn from_shared(backend: Arc<dyn StoreBackend>) -> Self {
        Self {
            backend,
            models: ModelRegistry::new(),
        }
    }

    pub fn backend(&self) -> &Arc<dyn StoreBackend> {
        &self.backend
    }

    /// Returns the model named by `definition`, building it on first use.
    ///
    /// Later calls with the same name return the existing model and ignore the definition.
    ///
    /// # Errors
    ///
    /// Returns an error if a plugin fails to apply or the schema walk fails.
    pub async fn model(&self, definition: ModelDefinition) -> DocumentStoreResult<Model> {
        let name = definition.name().to_string();
        let backend = self.backend.clone();

        self.models
            .get_or_try_init(&name, move || definition.build(backend))
            .await
    }

    /// Returns a model registered earlier.
    pub async fn get_model(&self, name: &str) -> Option<Model> {
        self.models.get(name).await
    }

    pub async fn model_names(&self) -> Vec<String> {
        self.models.names().await
    }

    /// Returns the typed model for `R`, building it from the record's schema and plugins.
    pub async fn typed_model<R: Record>(&self) -> DocumentStoreResult<TypedModel<R>> {
        let definition = ModelDefinition::new(R::collection_name(), R::schema())
            .plugins(R::plugins());

        Ok(TypedModel::new(self.model(definition).await?))
    }

    /// Creates a new collection, optionally with a validator.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection already exists or creation fails.
    pub async fn create_collection(&self, name: &str, validator: Option<Document>) -> DocumentStoreResult<()> {
        self.backend
            .create_collection(name, validator)
            .await
    }

    /// Drops (deletes) a collection with the given name.
    pub async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.backend.drop_collection(name).await
    }

    /// Lists all collections in the store.
    pub async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        self.backend.list_collections().await
    }

    /// Shuts down the store and releases backend resources.
    pub async fn shutdown(self) -> DocumentStoreResult<()> {
        self.backend.shutdown().await
    }
}

impl fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentStore")
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}
