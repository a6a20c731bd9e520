//! Entry points.
//!
//! The synchronous functions build a multi-threaded tokio runtime and block
//! on it, so they must not be called from inside a runtime; async callers use
//! the `_async` variants. Nothing is persisted between calls: a re-run with
//! the same run tag resumes from what the platform reports.

use std::sync::Arc;

use chrono::Utc;
use tokio::runtime::{Builder, Runtime};
use tracing::info;

use crate::cancellation::CancellationToken;
use crate::config::ReconflowConfig;
use crate::core::{DesiredSpec, ResourceState};
use crate::errors::{ReconcileError, ReconflowError};
use crate::events::{EventSink, LoggingEventSink};
use crate::pipeline::PipelineReport;
use crate::platform::Platform;
use crate::reconcile::{ReconcileOptions, Reconciler};
use crate::stages::build_ml_pipeline;
use crate::utils::timestamp_run_tag;

fn build_runtime() -> Result<Runtime, std::io::Error> {
    Builder::new_multi_thread().enable_all().build()
}

/// Returns the configured run tag, or a UTC timestamp tag.
#[must_use]
pub fn resolve_run_tag(config: &ReconflowConfig) -> String {
    config
        .run_tag
        .clone()
        .unwrap_or_else(|| timestamp_run_tag(Utc::now()))
}

/// Runs the ML pipeline on the current runtime.
///
/// Stage failures are reported in the returned [`PipelineReport`]; only an
/// invalid configuration or pipeline definition is an `Err`.
pub async fn run_pipeline_async(
    config: &ReconflowConfig,
    platform: Arc<dyn Platform>,
    events: Arc<dyn EventSink>,
    cancel: Arc<CancellationToken>,
) -> Result<PipelineReport, ReconflowError> {
    config.validate()?;
    let graph = build_ml_pipeline(config, platform, events.clone())?;
    let run_tag = resolve_run_tag(config);
    info!(pipeline = %config.pipeline_name, run_tag = %run_tag, "Running pipeline");
    Ok(graph.run(&run_tag, cancel, events).await)
}

/// Runs the ML pipeline to completion on a fresh runtime, logging events
/// through `tracing`.
///
/// # Panics
///
/// Panics if called from within a tokio runtime.
pub fn run_pipeline(
    config: &ReconflowConfig,
    platform: Arc<dyn Platform>,
) -> Result<PipelineReport, ReconflowError> {
    let runtime = build_runtime()?;
    runtime.block_on(run_pipeline_async(
        config,
        platform,
        Arc::new(LoggingEventSink::default()),
        Arc::new(CancellationToken::new()),
    ))
}

/// Reconciles a single resource with `reconciler`.
pub async fn reconcile_one_async(
    reconciler: &Reconciler,
    desired: &DesiredSpec,
    options: ReconcileOptions,
    cancel: &CancellationToken,
) -> Result<ResourceState, ReconcileError> {
    reconciler.reconcile(desired, options, cancel).await
}

/// Reconciles a single resource to `Active` on a fresh runtime with default
/// poll timing.
///
/// # Panics
///
/// Panics if called from within a tokio runtime.
pub fn reconcile_one(
    platform: Arc<dyn Platform>,
    desired: &DesiredSpec,
    options: ReconcileOptions,
) -> Result<ResourceState, ReconflowError> {
    let reconciler = Reconciler::new(platform).with_events(Arc::new(LoggingEventSink::default()));
    let runtime = build_runtime()?;
    let state = runtime.block_on(reconcile_one_async(
        &reconciler,
        desired,
        options,
        &CancellationToken::new(),
    ))?;
    Ok(state)
}
