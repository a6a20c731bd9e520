//! Pipeline building and execution.
//!
//! This module provides:
//! - Stage specifications
//! - Pipeline builder with validation
//! - DAG execution with fail-fast on dependent stages
//! - The aggregate run report

mod builder;
mod context;
mod dag;
mod report;
mod spec;

pub use builder::PipelineBuilder;
pub use context::StageContext;
pub use dag::StageGraph;
pub use report::{PipelineReport, SkipReason, StageFailure, StageOutcome, StageRecord};
pub use spec::StageSpec;
