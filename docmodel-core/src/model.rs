//! Models and the operation pipeline.
//!
//! A [`Model`] binds a collection name, a schema, a backend and a hook registry. Every
//! operation it exposes runs through the same pipeline:
//!
//! 1. A fresh [`OperationContext`] is seeded with the method and the caller's arguments.
//! 2. Pre-hooks run for the method's family name, then its own name (and `validate` for
//!    inserts and `$set` updates). The first failure aborts the operation before the backend
//!    is touched.
//! 3. The backend is called with the effective arguments, which are whatever the pre-hooks
//!    left in the context.
//! 4. On a backend failure the error hooks (`error`, `<family>Error`, `<method>Error`) run as
//!    post-hooks with the error in the context. A hook that clears the error suppresses it.
//! 5. Post-hooks run. Batch results (`findMany`, `insertMany`) are fanned out first: the
//!    singular post-hooks (`find`, `insert`) run once per item on a forked context, in order,
//!    and the items are written back before the batch's own post-hooks run.
//!
//! Models are cheap to clone and immutable once built. Use [`ModelBuilder`] (usually through
//! [`DocumentStore::model`](crate::store::DocumentStore::model)) to create one.

use std::{
    collections::HashMap,
    fmt::{self, Debug},
    sync::Arc,
};

use bson::{Bson, Document};
use futures::future::{self, BoxFuture};
use indexmap::IndexMap;
use tracing::{debug, trace, warn};

use crate::{
    backend::{DeleteResult, InsertManyResult, InsertOneResult, StoreBackend, UpdateResult},
    context::{HookName, Method, OperationContext, OperationResult, OperationState},
    error::{DocumentStoreError, DocumentStoreResult},
    hooks::{Hooks, Phase, SyncHooks},
    options::OperationOptions,
    plugin::{PathTable, Plugin},
    schema::{SchemaKind, SchemaNode},
    walker::{SchemaEvent, SchemaPathEvent, walk},
};

/// A model-level function invoked by name through [`Model::call_static`].
pub type StaticFn =
    Arc<dyn Fn(Model, Document) -> BoxFuture<'static, DocumentStoreResult<Bson>> + Send + Sync>;

const SCHEMA_PATH_HOOK: &str = "path";
const SCHEMA_COMPLETE_HOOK: &str = "complete";

struct ModelInner {
    name: String,
    schema: SchemaNode,
    backend: Arc<dyn StoreBackend>,
    hooks: Hooks<OperationContext>,
    statics: HashMap<String, StaticFn>,
    plugins: Vec<&'static str>,
}

/// A collection bound to a schema, a backend and hooks.
#[derive(Clone)]
pub struct Model {
    inner: Arc<ModelInner>,
}

impl Model {
    pub fn builder(name: impl Into<String>, schema: SchemaNode, backend: Arc<dyn StoreBackend>) -> ModelBuilder {
        ModelBuilder::new(name, schema, backend)
    }

    /// The model name, which is also the collection name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The schema after every plugin has extended it.
    pub fn schema(&self) -> &SchemaNode {
        &self.inner.schema
    }

    pub fn backend(&self) -> &Arc<dyn StoreBackend> {
        &self.inner.backend
    }

    pub fn hooks(&self) -> &Hooks<OperationContext> {
        &self.inner.hooks
    }

    /// Names of the plugins applied to this model, in application order.
    pub fn plugins(&self) -> &[&'static str] {
        &self.inner.plugins
    }

    pub fn has_static(&self, name: &str) -> bool {
        self.inner.statics.contains_key(name)
    }

    /// Inserts one document.
    ///
    /// Runs `insert`, `insertOne` and `validate` pre-hooks, then `insert` and `insertOne`
    /// post-hooks.
    pub async fn insert_one(
        &self,
        document: Document,
        options: impl Into<Option<OperationOptions>>,
    ) -> DocumentStoreResult<InsertOneResult> {
        let ctx = self
            .context(Method::InsertOne, options)
            .with_document(document);

        match self.execute(ctx).await?.take_result() {
            Some(OperationResult::InsertOne(result)) => Ok(result),
            other => Err(unexpected_result(Method::InsertOne, other)),
        }
    }

    /// Inserts a batch of documents.
    ///
    /// Every item goes through the `insert` and `validate` pre-hooks on its own forked
    /// context, and through the `insert` post-hooks after the backend call.
    pub async fn insert_many(
        &self,
        documents: Vec<Document>,
        options: impl Into<Option<OperationOptions>>,
    ) -> DocumentStoreResult<InsertManyResult> {
        let ctx = self
            .context(Method::InsertMany, options)
            .with_documents(documents);

        match self.execute(ctx).await?.take_result() {
            Some(OperationResult::InsertMany(result)) => Ok(result),
            other => Err(unexpected_result(Method::InsertMany, other)),
        }
    }

    pub async fn update_one(
        &self,
        filter: Document,
        update: Document,
        options: impl Into<Option<OperationOptions>>,
    ) -> DocumentStoreResult<UpdateResult> {
        self.update(Method::UpdateOne, filter, update, options.into()).await
    }

    pub async fn update_many(
        &self,
        filter: Document,
        update: Document,
        options: impl Into<Option<OperationOptions>>,
    ) -> DocumentStoreResult<UpdateResult> {
        self.update(Method::UpdateMany, filter, update, options.into()).await
    }

    pub async fn find_one(
        &self,
        filter: Document,
        options: impl Into<Option<OperationOptions>>,
    ) -> DocumentStoreResult<Option<Document>> {
        let ctx = self.context(Method::FindOne, options).with_filter(filter);

        match self.execute(ctx).await?.take_result() {
            Some(OperationResult::Document(document)) => Ok(document),
            other => Err(unexpected_result(Method::FindOne, other)),
        }
    }

    /// Finds every matching document.
    ///
    /// `find` post-hooks run once per returned document. A hook that sets the item's result
    /// to `Document(None)` drops it from the batch.
    pub async fn find_many(
        &self,
        filter: Document,
        options: impl Into<Option<OperationOptions>>,
    ) -> DocumentStoreResult<Vec<Document>> {
        let ctx = self.context(Method::FindMany, options).with_filter(filter);

        match self.execute(ctx).await?.take_result() {
            Some(OperationResult::Documents(documents)) => Ok(documents),
            other => Err(unexpected_result(Method::FindMany, other)),
        }
    }

    /// Updates the first matching document and returns it.
    ///
    /// Runs `update` pre-hooks, plus `validate` when the update carries `$set`, and `find`
    /// post-hooks, since the result is a document.
    pub async fn find_one_and_update(
        &self,
        filter: Document,
        update: Document,
        options: impl Into<Option<OperationOptions>>,
    ) -> DocumentStoreResult<Option<Document>> {
        let ctx = self
            .context(Method::FindOneAndUpdate, options)
            .with_filter(filter)
            .with_update(update);

        match self.execute(ctx).await?.take_result() {
            Some(OperationResult::Document(document)) => Ok(document),
            other => Err(unexpected_result(Method::FindOneAndUpdate, other)),
        }
    }

    pub async fn delete_one(
        &self,
        filter: Document,
        options: impl Into<Option<OperationOptions>>,
    ) -> DocumentStoreResult<DeleteResult> {
        self.delete(Method::DeleteOne, filter, options.into()).await
    }

    pub async fn delete_many(
        &self,
        filter: Document,
        options: impl Into<Option<OperationOptions>>,
    ) -> DocumentStoreResult<DeleteResult> {
        self.delete(Method::DeleteMany, filter, options.into()).await
    }

    pub async fn aggregate(
        &self,
        pipeline: Vec<Document>,
        options: impl Into<Option<OperationOptions>>,
    ) -> DocumentStoreResult<Vec<Document>> {
        let ctx = self
            .context(Method::Aggregate, options)
            .with_pipeline(pipeline);

        match self.execute(ctx).await?.take_result() {
            Some(OperationResult::Documents(documents)) => Ok(documents),
            other => Err(unexpected_result(Method::Aggregate, other)),
        }
    }

    pub async fn count(
        &self,
        filter: Document,
        options: impl Into<Option<OperationOptions>>,
    ) -> DocumentStoreResult<u64> {
        let ctx = self.context(Method::Count, options).with_filter(filter);

        match self.execute(ctx).await?.take_result() {
            Some(OperationResult::Count(count)) => Ok(count),
            other => Err(unexpected_result(Method::Count, other)),
        }
    }

    pub async fn distinct(
        &self,
        field: &str,
        filter: Document,
        options: impl Into<Option<OperationOptions>>,
    ) -> DocumentStoreResult<Vec<Bson>> {
        let ctx = self
            .context(Method::Distinct, options)
            .with_filter(filter)
            .with_field(field);

        match self.execute(ctx).await?.take_result() {
            Some(OperationResult::Values(values)) => Ok(values),
            other => Err(unexpected_result(Method::Distinct, other)),
        }
    }

    /// Invokes a static registered on the model by a plugin or by the caller.
    pub async fn call_static(&self, name: &str, args: Document) -> DocumentStoreResult<Bson> {
        let callback = self
            .inner
            .statics
            .get(name)
            .cloned()
            .ok_or_else(|| {
                DocumentStoreError::Unknown(format!("model `{}` has no static `{name}`", self.name()))
            })?;

        debug!(model = %self.name(), name, "calling static");

        callback(self.clone(), args).await
    }

    /// Runs a prepared context through the pipeline and returns it in its final state.
    pub async fn execute(&self, mut ctx: OperationContext) -> DocumentStoreResult<OperationContext> {
        let method = ctx.method();

        debug!(model = %self.name(), %method, "executing operation");

        ctx.set_state(OperationState::PreHooks);

        if let Err(error) = self.run_pre_hooks(&mut ctx).await {
            debug!(model = %self.name(), %method, %error, "pre-hook aborted operation");
            ctx.set_state(OperationState::Failed);
            return Err(error);
        }

        ctx.set_state(OperationState::Persisting);

        match self.persist(&ctx).await {
            Ok(result) => {
                ctx.set_result(result);
                ctx.set_state(OperationState::Persisted);
            }
            Err(error) => {
                warn!(model = %self.name(), %method, %error, "backend call failed");
                self.handle_error(&mut ctx, error).await?;
            }
        }

        if let Err(error) = self.run_post_hooks(&mut ctx).await {
            debug!(model = %self.name(), %method, %error, "post-hook failed");
            self.handle_error(&mut ctx, error).await?;
        }

        ctx.set_state(OperationState::Completed);

        Ok(ctx)
    }

    /// Runs the error hooks for a persistence or post-hook failure.
    ///
    /// The error is returned unless a hook cleared it from the context.
    async fn handle_error(&self, ctx: &mut OperationContext, error: DocumentStoreError) -> DocumentStoreResult<()> {
        let method = ctx.method();

        ctx.set_error(error);
        ctx.set_state(OperationState::ErrorHandling);

        if let Err(error) = self.run(Phase::Post, &error_hook_names(method), ctx).await {
            ctx.set_state(OperationState::Failed);
            return Err(error);
        }

        if let Some(error) = ctx.clear_error() {
            ctx.set_state(OperationState::Failed);
            return Err(error);
        }

        debug!(model = %self.name(), %method, "error suppressed by error hook");

        if ctx.result().is_none() {
            ctx.set_result(OperationResult::empty_for(method));
        }

        Ok(())
    }

    fn context(&self, method: Method, options: impl Into<Option<OperationOptions>>) -> OperationContext {
        OperationContext::new(method, self.name())
            .with_options(options.into().unwrap_or_default())
    }

    async fn update(
        &self,
        method: Method,
        filter: Document,
        update: Document,
        options: Option<OperationOptions>,
    ) -> DocumentStoreResult<UpdateResult> {
        let ctx = self
            .context(method, options)
            .with_filter(filter)
            .with_update(update);

        match self.execute(ctx).await?.take_result() {
            Some(OperationResult::Update(result)) => Ok(result),
            other => Err(unexpected_result(method, other)),
        }
    }

    async fn delete(
        &self,
        method: Method,
        filter: Document,
        options: Option<OperationOptions>,
    ) -> DocumentStoreResult<DeleteResult> {
        let ctx = self.context(method, options).with_filter(filter);

        match self.execute(ctx).await?.take_result() {
            Some(OperationResult::Delete(result)) => Ok(result),
            other => Err(unexpected_result(method, other)),
        }
    }

    async fn run(&self, phase: Phase, names: &[HookName], ctx: &mut OperationContext) -> DocumentStoreResult<()> {
        let names = names
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();

        self.inner
            .hooks
            .exec_many(phase, &names, ctx)
            .await?;

        Ok(())
    }

    fn has_hooks(&self, phase: Phase, name: HookName) -> bool {
        self.inner
            .hooks
            .count(phase, &name.to_string())
            > 0
    }

    async fn run_pre_hooks(&self, ctx: &mut OperationContext) -> DocumentStoreResult<()> {
        let method = ctx.method();

        match method {
            Method::InsertOne => {
                self.run(
                    Phase::Pre,
                    &[HookName::Insert, HookName::Operation(method), HookName::Validate],
                    ctx,
                )
                .await
            }
            Method::InsertMany => {
                self.run(Phase::Pre, &[HookName::Operation(method)], ctx).await?;

                let per_item = [HookName::Insert, HookName::Validate];

                if !per_item.iter().any(|name| self.has_hooks(Phase::Pre, *name)) {
                    return Ok(());
                }

                let documents = ctx
                    .documents()
                    .cloned()
                    .unwrap_or_default();
                let mut prepared = Vec::with_capacity(documents.len());

                trace!(model = %self.name(), items = documents.len(), "fanning out insert pre-hooks");

                for (index, document) in documents.into_iter().enumerate() {
                    let mut item = ctx.fork(index, None, Some(document));

                    self.run(Phase::Pre, &per_item, &mut item).await?;

                    prepared.push(
                        item.document()
                            .cloned()
                            .unwrap_or_default(),
                    );
                }

                ctx.set_documents(prepared);

                Ok(())
            }
            Method::UpdateOne | Method::UpdateMany | Method::FindOneAndUpdate => {
                self.run(Phase::Pre, &[HookName::Update, HookName::Operation(method)], ctx).await?;

                if ctx.has_update_operator("$set") {
                    self.run(Phase::Pre, &[HookName::Validate], ctx).await?;
                }

                Ok(())
            }
            _ => {
                let names = method
                    .family()
                    .into_iter()
                    .chain([HookName::Operation(method)])
                    .collect::<Vec<_>>();

                self.run(Phase::Pre, &names, ctx).await
            }
        }
    }

    async fn run_post_hooks(&self, ctx: &mut OperationContext) -> DocumentStoreResult<()> {
        let method = ctx.method();

        ctx.set_state(OperationState::PostHooks);

        match method {
            Method::FindMany => {
                self.fan_out_found(ctx).await?;
                self.run(Phase::Post, &[HookName::Operation(method)], ctx).await
            }
            Method::InsertMany => {
                self.fan_out_inserted(ctx).await?;
                self.run(Phase::Post, &[HookName::Operation(method)], ctx).await
            }
            Method::FindOneAndUpdate => {
                self.run(Phase::Post, &[HookName::Find, HookName::Operation(method)], ctx).await
            }
            _ => {
                let names = method
                    .family()
                    .into_iter()
                    .chain([HookName::Operation(method)])
                    .collect::<Vec<_>>();

                self.run(Phase::Post, &names, ctx).await
            }
        }
    }

    async fn fan_out_found(&self, ctx: &mut OperationContext) -> DocumentStoreResult<()> {
        if !self.has_hooks(Phase::Post, HookName::Find) {
            return Ok(());
        }

        let Some(OperationResult::Documents(documents)) = ctx.take_result() else {
            return Ok(());
        };

        ctx.set_state(OperationState::FanOut);
        trace!(model = %self.name(), items = documents.len(), "fanning out find post-hooks");

        let mut items = documents
            .into_iter()
            .enumerate()
            .map(|(index, document)| ctx.fork(index, Some(OperationResult::Document(Some(document))), None))
            .collect::<Vec<_>>();

        let outcome = self
            .inner
            .hooks
            .exec_each(Phase::Post, &HookName::Find.to_string(), &mut items)
            .await;

        let documents = items
            .iter_mut()
            .filter_map(|item| match item.take_result() {
                Some(OperationResult::Document(document)) => document,
                _ => None,
            })
            .collect();

        ctx.set_result(OperationResult::Documents(documents));
        ctx.set_state(OperationState::PostHooks);

        outcome.map(|_| ())
    }

    async fn fan_out_inserted(&self, ctx: &mut OperationContext) -> DocumentStoreResult<()> {
        if !self.has_hooks(Phase::Post, HookName::Insert) {
            return Ok(());
        }

        let Some(OperationResult::InsertMany(result)) = ctx.take_result() else {
            return Ok(());
        };

        ctx.set_state(OperationState::FanOut);
        trace!(model = %self.name(), items = result.documents.len(), "fanning out insert post-hooks");

        let mut items = result
            .inserted_ids
            .into_iter()
            .zip(result.documents)
            .enumerate()
            .map(|(index, (inserted_id, document))| {
                ctx.fork(
                    index,
                    Some(OperationResult::InsertOne(InsertOneResult {
                        inserted_id,
                        document: document.clone(),
                    })),
                    Some(document),
                )
            })
            .collect::<Vec<_>>();

        let outcome = self
            .inner
            .hooks
            .exec_each(Phase::Post, &HookName::Insert.to_string(), &mut items)
            .await;

        let mut merged = InsertManyResult::default();

        for item in items.iter_mut() {
            if let Some(OperationResult::InsertOne(inserted)) = item.take_result() {
                merged.inserted_ids.push(inserted.inserted_id);
                merged.documents.push(inserted.document);
            }
        }

        ctx.set_result(OperationResult::InsertMany(merged));
        ctx.set_state(OperationState::PostHooks);

        outcome.map(|_| ())
    }

    async fn persist(&self, ctx: &OperationContext) -> DocumentStoreResult<OperationResult> {
        let backend = &self.inner.backend;
        let collection = self.name();
        let options = ctx.options();
        let filter = || ctx.filter().cloned().unwrap_or_default();
        let update = || {
            ctx.update()
                .cloned()
                .ok_or_else(|| DocumentStoreError::InvalidQuery(format!("{} requires an update", ctx.method())))
        };

        trace!(model = %collection, method = %ctx.method(), "calling backend");

        Ok(match ctx.method() {
            Method::InsertOne => {
                let document = ctx
                    .document()
                    .cloned()
                    .ok_or_else(|| DocumentStoreError::InvalidDocument("insertOne requires a document".to_string()))?;

                OperationResult::InsertOne(backend.insert_one(collection, document, options).await?)
            }
            Method::InsertMany => {
                let documents = ctx
                    .documents()
                    .cloned()
                    .unwrap_or_default();

                OperationResult::InsertMany(backend.insert_many(collection, documents, options).await?)
            }
            Method::UpdateOne => {
                OperationResult::Update(backend.update_one(collection, filter(), update()?, options).await?)
            }
            Method::UpdateMany => {
                OperationResult::Update(backend.update_many(collection, filter(), update()?, options).await?)
            }
            Method::FindOne => OperationResult::Document(backend.find_one(collection, filter(), options).await?),
            Method::FindMany => OperationResult::Documents(backend.find_many(collection, filter(), options).await?),
            Method::FindOneAndUpdate => OperationResult::Document(
                backend
                    .find_one_and_update(collection, filter(), update()?, options)
                    .await?,
            ),
            Method::DeleteOne => OperationResult::Delete(backend.delete_one(collection, filter(), options).await?),
            Method::DeleteMany => OperationResult::Delete(backend.delete_many(collection, filter(), options).await?),
            Method::Aggregate => {
                let pipeline = ctx
                    .pipeline()
                    .cloned()
                    .unwrap_or_default();

                OperationResult::Documents(backend.aggregate(collection, pipeline, options).await?)
            }
            Method::Count => OperationResult::Count(backend.count(collection, filter(), options).await?),
            Method::Distinct => {
                let field = ctx
                    .field()
                    .ok_or_else(|| DocumentStoreError::InvalidQuery("distinct requires a field".to_string()))?;

                OperationResult::Values(backend.distinct(collection, field, filter(), options).await?)
            }
        })
    }
}

impl Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.inner.name)
            .field("backend", &self.inner.backend)
            .field("hooks", &self.inner.hooks)
            .field("statics", &self.inner.statics.keys().collect::<Vec<_>>())
            .field("plugins", &self.inner.plugins)
            .finish()
    }
}

fn error_hook_names(method: Method) -> Vec<HookName> {
    [HookName::Error]
        .into_iter()
        .chain(method.error_family())
        .chain([HookName::OperationError(method)])
        .collect()
}

fn unexpected_result(method: Method, result: Option<OperationResult>) -> DocumentStoreError {
    DocumentStoreError::Unknown(format!("{method} completed with an unexpected result: {result:?}"))
}

/// Assembles a [`Model`]: schema extensions, hooks, statics and plugin subscriptions.
///
/// The schema is walked exactly once, in [`build`](Self::build), after every plugin has been
/// applied. Path tables requested through [`on_schema_path`](Self::on_schema_path) are filled
/// during that walk.
pub struct ModelBuilder {
    name: String,
    schema: SchemaNode,
    backend: Arc<dyn StoreBackend>,
    hooks: Hooks<OperationContext>,
    schema_hooks: SyncHooks<SchemaEvent>,
    statics: HashMap<String, StaticFn>,
    plugins: Vec<&'static str>,
}

impl ModelBuilder {
    pub fn new(name: impl Into<String>, schema: SchemaNode, backend: Arc<dyn StoreBackend>) -> Self {
        Self {
            name: name.into(),
            schema,
            backend,
            hooks: Hooks::new(),
            schema_hooks: SyncHooks::new(),
            statics: HashMap::new(),
            plugins: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &SchemaNode {
        &self.schema
    }

    pub fn backend(&self) -> &Arc<dyn StoreBackend> {
        &self.backend
    }

    /// Registers an asynchronous pre-hook.
    pub fn pre<F>(&mut self, name: impl Into<HookName>, callback: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut OperationContext) -> BoxFuture<'a, DocumentStoreResult<()>> + Send + Sync + 'static,
    {
        self.hooks.pre(name.into().to_string(), callback);
        self
    }

    /// Registers an asynchronous post-hook.
    pub fn post<F>(&mut self, name: impl Into<HookName>, callback: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut OperationContext) -> BoxFuture<'a, DocumentStoreResult<()>> + Send + Sync + 'static,
    {
        self.hooks.post(name.into().to_string(), callback);
        self
    }

    /// Registers a pre-hook that completes without awaiting anything.
    pub fn pre_sync<F>(&mut self, name: impl Into<HookName>, callback: F) -> &mut Self
    where
        F: Fn(&mut OperationContext) -> DocumentStoreResult<()> + Send + Sync + 'static,
    {
        self.hooks.pre(name.into().to_string(), move |ctx| Box::pin(future::ready(callback(ctx))));
        self
    }

    pub fn post_sync<F>(&mut self, name: impl Into<HookName>, callback: F) -> &mut Self
    where
        F: Fn(&mut OperationContext) -> DocumentStoreResult<()> + Send + Sync + 'static,
    {
        self.hooks.post(name.into().to_string(), move |ctx| Box::pin(future::ready(callback(ctx))));
        self
    }

    /// Adds top-level properties to an object schema. Existing properties are kept.
    pub fn add_schema_properties(
        &mut self,
        properties: impl IntoIterator<Item = (String, SchemaNode)>,
    ) -> DocumentStoreResult<&mut Self> {
        let existing = match &mut self.schema.kind {
            SchemaKind::Object(existing) => existing,
            _ => {
                return Err(DocumentStoreError::InvalidSchema(format!(
                    "cannot add properties to non-object schema of model `{}`",
                    self.name
                )));
            }
        };

        for (name, node) in properties {
            existing.entry(name).or_insert(node);
        }

        Ok(self)
    }

    pub fn add_static<F>(&mut self, name: impl Into<String>, callback: F) -> &mut Self
    where
        F: Fn(Model, Document) -> BoxFuture<'static, DocumentStoreResult<Bson>> + Send + Sync + 'static,
    {
        self.statics.insert(name.into(), Arc::new(callback));
        self
    }

    pub fn add_statics(&mut self, statics: impl IntoIterator<Item = (String, StaticFn)>) -> &mut Self {
        self.statics.extend(statics);
        self
    }

    /// Subscribes to the schema walk.
    ///
    /// `select` sees every path event once, in walk order, and keeps the path when it returns
    /// a value. The returned table is empty until [`build`](Self::build) completes.
    pub fn on_schema_path<T, F>(&mut self, select: F) -> PathTable<T>
    where
        T: Send + Sync + 'static,
        F: Fn(&SchemaPathEvent) -> DocumentStoreResult<Option<T>> + Send + Sync + 'static,
    {
        let table = PathTable::new();
        let staging = table.clone();
        let complete = table.clone();

        self.schema_hooks
            .post(SCHEMA_PATH_HOOK, move |event: &mut SchemaEvent| {
                let SchemaEvent::Path(event) = event else {
                    return Ok(());
                };

                match select(event)? {
                    Some(value) => staging.stage(event.path.clone(), value),
                    None => Ok(()),
                }
            })
            .post(SCHEMA_COMPLETE_HOOK, move |_: &mut SchemaEvent| complete.freeze());

        table
    }

    pub fn apply(&mut self, plugin: &dyn Plugin) -> DocumentStoreResult<&mut Self> {
        debug!(model = %self.name, plugin = plugin.name(), "applying plugin");

        plugin.apply(self)?;
        self.plugins.push(plugin.name());

        Ok(self)
    }

    /// Walks the schema, fills the path tables and freezes the model.
    pub fn build(self) -> DocumentStoreResult<Model> {
        let mut events = Vec::new();

        walk(&self.schema, "", &mut |event| events.push(SchemaEvent::Path(event)));
        events.push(SchemaEvent::Complete);

        trace!(model = %self.name, paths = events.len() - 1, "walked schema");

        for mut event in events {
            let name = match event {
                SchemaEvent::Path(_) => SCHEMA_PATH_HOOK,
                SchemaEvent::Complete => SCHEMA_COMPLETE_HOOK,
            };

            self.schema_hooks
                .exec(Phase::Post, name, &mut event)?;
        }

        debug!(model = %self.name, plugins = ?self.plugins, "built model");

        Ok(Model {
            inner: Arc::new(ModelInner {
                name: self.name,
                schema: self.schema,
                backend: self.backend,
                hooks: self.hooks,
                statics: self.statics,
                plugins: self.plugins,
            }),
        })
    }
}

impl Debug for ModelBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelBuilder")
            .field("name", &self.name)
            .field("hooks", &self.hooks)
            .field("plugins", &self.plugins)
            .finish()
    }
}

/// Builds an ordered property map, e.g. for [`ModelBuilder::add_schema_properties`].
pub fn properties<K, I>(entries: I) -> IndexMap<String, SchemaNode>
where
    K: Into<String>,
    I: IntoIterator<Item = (K, SchemaNode)>,
{
    entries
        .into_iter()
        .map(|(name, node)| (name.into(), node))
        .collect()
}
