//! Error types for reconflow.
//!
//! Reconciliation errors are structured: every failure carries an
//! [`ErrorKind`], the resource involved, the last observed state and the
//! elapsed time, so an operator can remediate by hand. Callers branch on the
//! kind, never on the message.

use crate::config::ConfigError;
use crate::core::{Phase, ResourceRef, ResourceState};
use crate::platform::PlatformError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// The top-level error type for reconflow entry points.
#[derive(Debug, Error)]
pub enum ReconflowError {
    /// Reconciling a resource failed.
    #[error("{0}")]
    Reconcile(#[from] ReconcileError),

    /// The pipeline definition is invalid.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// The configuration is invalid.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// IO error, e.g. while building the runtime.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Classification of reconciliation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The resource does not exist. Often expected.
    NotFound,
    /// Polling exceeded its bound. Retryable by the caller.
    Timeout,
    /// The platform reported a terminal failure phase.
    OperationFailed,
    /// A delete was never observed completing. Create must not follow.
    DeleteTimeout,
    /// The resource reached `Failed` after create.
    CreateFailed,
    /// The caller cancelled the operation.
    Cancelled,
    /// No upstream candidate satisfied the selector.
    UpstreamUnresolved,
    /// A conflicting resource can be neither deleted nor updated.
    Conflict,
    /// A platform call failed outright.
    Platform,
    /// The desired spec was rejected before any remote call.
    InvalidSpec,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotFound => "not_found",
            Self::Timeout => "timeout",
            Self::OperationFailed => "operation_failed",
            Self::DeleteTimeout => "delete_timeout",
            Self::CreateFailed => "create_failed",
            Self::Cancelled => "cancelled",
            Self::UpstreamUnresolved => "upstream_unresolved",
            Self::Conflict => "conflict",
            Self::Platform => "platform",
            Self::InvalidSpec => "invalid_spec",
        };
        f.write_str(name)
    }
}

impl ErrorKind {
    /// Returns true if re-running the same operation later may succeed.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Timeout | Self::DeleteTimeout | Self::Platform)
    }

    /// Returns true if the failure should be reported as a pipeline failure.
    /// Cancellation is reported separately.
    #[must_use]
    pub fn is_failure(self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

/// A structured reconciliation failure.
#[derive(Debug, Clone, Error)]
#[error("{kind}{}: {detail}", .resource.as_ref().map(|r| format!(" on {r}")).unwrap_or_default())]
pub struct ReconcileError {
    /// What went wrong.
    pub kind: ErrorKind,
    /// Human-readable detail.
    pub detail: String,
    /// The resource involved, if known.
    pub resource: Option<ResourceRef>,
    /// The last state observed before the failure.
    pub last_state: Option<ResourceState>,
    /// Time spent before failing.
    pub elapsed: Option<Duration>,
}

impl ReconcileError {
    /// Creates a new error.
    #[must_use]
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            resource: None,
            last_state: None,
            elapsed: None,
        }
    }

    /// Creates a `Cancelled` error.
    #[must_use]
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, reason)
    }

    /// Creates an `UpstreamUnresolved` error.
    #[must_use]
    pub fn upstream_unresolved(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::UpstreamUnresolved, detail)
    }

    /// Sets the resource.
    #[must_use]
    pub fn with_resource(mut self, resource: ResourceRef) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Sets the last observed state, and the resource if not yet set.
    #[must_use]
    pub fn with_state(mut self, state: ResourceState) -> Self {
        if self.resource.is_none() {
            self.resource = Some(state.reference.clone());
        }
        self.last_state = Some(state);
        self
    }

    /// Sets the elapsed time.
    #[must_use]
    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = Some(elapsed);
        self
    }

    /// Re-classifies the error, keeping its context.
    #[must_use]
    pub fn into_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }

    /// Returns the last observed phase, if any.
    #[must_use]
    pub fn phase(&self) -> Option<Phase> {
        self.last_state.as_ref().map(|s| s.phase)
    }

    /// Returns true for "nothing there" outcomes: a missing resource or an
    /// unresolved upstream version.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, ErrorKind::NotFound | ErrorKind::UpstreamUnresolved)
    }

    /// Returns true if the caller cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }
}

impl From<PlatformError> for ReconcileError {
    fn from(err: PlatformError) -> Self {
        match err {
            PlatformError::NotFound(resource) => {
                Self::new(ErrorKind::NotFound, "resource not found").with_resource(resource)
            }
            PlatformError::ResourceInUse(resource) => {
                Self::new(ErrorKind::Platform, "resource in use").with_resource(resource)
            }
            PlatformError::Validation(message) => Self::new(ErrorKind::InvalidSpec, message),
            other => Self::new(ErrorKind::Platform, other.to_string()),
        }
    }
}

/// Metadata about a pipeline definition error.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "PIPELINE-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when a pipeline definition is invalid.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }
}

/// Error raised when a cycle is detected in the stage graph.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected in pipeline: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of stages forming the cycle.
    pub cycle_path: Vec<String>,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        let info = ContractErrorInfo::new(
            "PIPELINE-CYCLE",
            format!("Pipeline contains a dependency cycle: {}", cycle_path.join(" -> ")),
        )
        .with_fix_hint("Remove one of the dependencies in the cycle to break it.");

        Self {
            cycle_path,
            error_info: info,
        }
    }
}

impl From<CycleDetectedError> for PipelineValidationError {
    fn from(err: CycleDetectedError) -> Self {
        Self {
            message: err.to_string(),
            stages: err.cycle_path.clone(),
            error_info: Some(err.error_info),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ResourceType;

    #[test]
    fn test_reconcile_error_display() {
        let err = ReconcileError::new(ErrorKind::DeleteTimeout, "still deleting after 30000ms")
            .with_resource(ResourceRef::new(ResourceType::FeatureGroup, "fg"));
        assert_eq!(
            err.to_string(),
            "delete_timeout on FeatureGroup/fg: still deleting after 30000ms"
        );

        let bare = ReconcileError::cancelled("user abort");
        assert_eq!(bare.to_string(), "cancelled: user abort");
    }

    #[test]
    fn test_with_state_sets_resource_and_phase() {
        let r = ResourceRef::new(ResourceType::Endpoint, "ep");
        let err = ReconcileError::new(ErrorKind::Timeout, "slow")
            .with_state(ResourceState::observed(r.clone(), Phase::Creating))
            .with_elapsed(Duration::from_millis(250));

        assert_eq!(err.resource, Some(r));
        assert_eq!(err.phase(), Some(Phase::Creating));
        assert_eq!(err.elapsed, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_not_found_classification() {
        assert!(ReconcileError::new(ErrorKind::NotFound, "x").is_not_found());
        assert!(ReconcileError::upstream_unresolved("x").is_not_found());
        assert!(!ReconcileError::new(ErrorKind::Timeout, "x").is_not_found());
    }

    #[test]
    fn test_kind_flags() {
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(!ErrorKind::CreateFailed.is_retryable());
        assert!(!ErrorKind::Cancelled.is_failure());
        assert!(ErrorKind::UpstreamUnresolved.is_failure());
    }

    #[test]
    fn test_platform_error_conversion() {
        let r = ResourceRef::new(ResourceType::Model, "m");
        let err: ReconcileError = PlatformError::NotFound(r.clone()).into();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_eq!(err.resource, Some(r));

        let err: ReconcileError = PlatformError::Throttled("rate exceeded".into()).into();
        assert_eq!(err.kind, ErrorKind::Platform);

        let err: ReconcileError = PlatformError::Validation("bad role".into()).into();
        assert_eq!(err.kind, ErrorKind::InvalidSpec);
    }

    #[test]
    fn test_cycle_detected_error() {
        let err = CycleDetectedError::new(vec![
            "a".to_string(),
            "b".to_string(),
            "a".to_string(),
        ]);

        assert!(err.to_string().contains("a -> b -> a"));
        let validation: PipelineValidationError = err.into();
        assert_eq!(validation.code(), Some("PIPELINE-CYCLE"));
        assert_eq!(validation.stages.len(), 3);
    }
}
