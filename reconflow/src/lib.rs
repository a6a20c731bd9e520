//! # Reconflow
//!
//! Idempotent lifecycle reconciliation for resources on a managed ML
//! platform: feature groups, training jobs, model packages, models, endpoints
//! and batch transform jobs.
//!
//! Reconflow provides:
//!
//! - **Reconciliation**: drive a resource to its desired spec, deleting and
//!   recreating conflicting resources only after the delete is observed
//! - **Bounded polling**: every wait has a terminal predicate, a timeout and
//!   prompt cancellation
//! - **Version resolution**: pick "the latest approved model package" from a
//!   paginated collection, deterministically
//! - **Pipeline sequencing**: run stages over a DAG, halting only the
//!   dependents of a failed stage
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use reconflow::prelude::*;
//!
//! let config = ReconflowConfig::from_file("reconflow.json")?;
//! init_tracing_with(&config.logging);
//!
//! let report = run_pipeline(&config, platform)?;
//! println!("{}", report.to_json()?);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod platform;
pub mod reconcile;
pub mod runtime;
pub mod stages;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{ApprovalPolicy, ConfigError, ReconflowConfig};
    pub use crate::core::{
        ApprovalStatus, DesiredSpec, Phase, PipelineStageResult, ResourceRef, ResourceState,
        ResourceSummary, ResourceType,
    };
    pub use crate::errors::{
        ContractErrorInfo, CycleDetectedError, ErrorKind, PipelineValidationError,
        ReconcileError, ReconflowError,
    };
    pub use crate::events::{
        CollectingEventSink, EventSink, LifecycleEvent, LoggingEventSink, NoOpEventSink,
    };
    pub use crate::observability::{init_tracing, init_tracing_with, LogFormat, LoggingConfig};
    pub use crate::pipeline::{PipelineBuilder, PipelineReport, StageContext, StageGraph, StageSpec};
    pub use crate::platform::{ListPage, ListQuery, Platform, PlatformError};
    pub use crate::reconcile::{
        poll, PollConfig, ReconcileOptions, Reconciler, VersionResolver, VersionSelector,
    };
    pub use crate::runtime::{reconcile_one, reconcile_one_async, run_pipeline, run_pipeline_async};
    pub use crate::stages::{build_ml_pipeline, Stage};
}
