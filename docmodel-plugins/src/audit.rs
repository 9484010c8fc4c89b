//! Operation auditing.
//!
//! Every completed operation produces one [`AuditEntry`] with a success outcome. Backend
//! failures produce a failure entry from the `error` hook; when another error hook suppresses
//! the failure, the operation completes and a success entry follows. Failures raised by
//! pre-hooks never reach the backend and are not audited.
//!
//! Entries go to an [`AuditSink`]. [`TracingSink`] emits them as `info` events; sink
//! failures are logged and never fail the audited operation.

use std::{fmt::Debug, sync::Arc};

use bson::Document;
use chrono::{DateTime, Utc};
use futures::future::{self, BoxFuture};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use docmodel_core::{
    context::{HookName, Method, OperationContext},
    error::DocumentStoreResult,
    model::ModelBuilder,
    plugin::Plugin,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditOutcome {
    Success,
    Failure(String),
}

/// One audited operation.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub model: String,
    pub method: Method,
    pub outcome: AuditOutcome,
    /// The effective filter, when [`AuditOptions::include_filter`] is set.
    pub filter: Option<Document>,
    pub at: DateTime<Utc>,
}

/// Destination of audit entries.
pub trait AuditSink: Send + Sync + Debug {
    fn record(&self, entry: AuditEntry) -> BoxFuture<'_, DocumentStoreResult<()>>;
}

/// Emits every entry as a `tracing` event at `info` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, entry: AuditEntry) -> BoxFuture<'_, DocumentStoreResult<()>> {
        match &entry.outcome {
            AuditOutcome::Success => {
                info!(model = %entry.model, method = %entry.method, at = %entry.at, "operation succeeded")
            }
            AuditOutcome::Failure(error) => {
                info!(model = %entry.model, method = %entry.method, at = %entry.at, %error, "operation failed")
            }
        }

        Box::pin(future::ready(Ok(())))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuditOptions {
    /// Attach the effective filter to each entry.
    pub include_filter: bool,
    /// Record failure entries from the `error` hook.
    pub failures: bool,
}

impl Default for AuditOptions {
    fn default() -> Self {
        Self {
            include_filter: false,
            failures: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditPlugin {
    sink: Arc<dyn AuditSink>,
    options: AuditOptions,
}

impl Default for AuditPlugin {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink))
    }
}

impl AuditPlugin {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self {
            sink,
            options: AuditOptions::default(),
        }
    }

    pub fn with_options(mut self, options: AuditOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &AuditOptions {
        &self.options
    }
}

fn entry(model: &str, ctx: &OperationContext, outcome: AuditOutcome, include_filter: bool) -> AuditEntry {
    AuditEntry {
        model: model.to_string(),
        method: ctx.method(),
        outcome,
        filter: include_filter.then(|| ctx.filter().cloned()).flatten(),
        at: Utc::now(),
    }
}

async fn record(sink: Arc<dyn AuditSink>, entry: AuditEntry) -> DocumentStoreResult<()> {
    let (model, method) = (entry.model.clone(), entry.method);

    if let Err(error) = sink.record(entry).await {
        warn!(%model, %method, %error, "audit sink failed");
    }

    Ok(())
}

impl Plugin for AuditPlugin {
    fn name(&self) -> &'static str {
        "audit"
    }

    fn apply(&self, model: &mut ModelBuilder) -> DocumentStoreResult<()> {
        let name = model.name().to_string();
        let include_filter = self.options.include_filter;

        for method in Method::ALL {
            let sink = self.sink.clone();
            let name = name.clone();

            model.post(method, move |ctx| {
                let audited = entry(&name, ctx, AuditOutcome::Success, include_filter);

                Box::pin(record(sink.clone(), audited))
            });
        }

        if self.options.failures {
            let sink = self.sink.clone();

            model.post(HookName::Error, move |ctx| {
                let outcome = AuditOutcome::Failure(
                    ctx.error()
                        .map(ToString::to_string)
                        .unwrap_or_default(),
                );
                let audited = entry(&name, ctx, outcome, include_filter);

                Box::pin(record(sink.clone(), audited))
            });
        }

        Ok(())
    }
}
