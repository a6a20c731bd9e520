//! Aggregate outcome of a pipeline run.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::{Phase, PipelineStageResult, ResourceRef};
use crate::errors::{ErrorKind, ReconcileError};

/// Why a stage never ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SkipReason {
    /// An upstream stage failed or was skipped.
    UpstreamFailed {
        /// The stage that blocked this one.
        stage: String,
    },
    /// The pipeline was cancelled before the stage was scheduled.
    PipelineCancelled,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UpstreamFailed { stage } => write!(f, "upstream stage '{stage}' did not succeed"),
            Self::PipelineCancelled => write!(f, "pipeline cancelled"),
        }
    }
}

/// How one stage ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StageOutcome {
    /// The stage produced its resource.
    Succeeded {
        /// The stage result.
        result: PipelineStageResult,
    },
    /// The stage failed.
    Failed {
        /// Failure classification.
        kind: ErrorKind,
        /// Failure detail.
        detail: String,
        /// The resource involved, if known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resource: Option<ResourceRef>,
        /// Its last observed phase, if known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        phase: Option<Phase>,
        /// Time spent on the failing operation, if measured.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        elapsed_ms: Option<u64>,
    },
    /// The stage was running when the pipeline was cancelled.
    Cancelled {
        /// The cancellation reason.
        reason: String,
    },
    /// The stage never ran.
    Skipped {
        /// Why.
        reason: SkipReason,
    },
}

impl StageOutcome {
    /// Builds the outcome of a stage that returned an error.
    #[must_use]
    pub fn from_error(err: &ReconcileError) -> Self {
        if err.is_cancelled() {
            return Self::Cancelled {
                reason: err.detail.clone(),
            };
        }
        Self::Failed {
            kind: err.kind,
            detail: err.detail.clone(),
            resource: err.resource.clone(),
            phase: err.phase(),
            elapsed_ms: err.elapsed.map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
        }
    }

    /// Returns true if the stage succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    /// Returns true if the stage ran at all.
    #[must_use]
    pub fn ran(&self) -> bool {
        !matches!(self, Self::Skipped { .. })
    }

    /// Returns the short label used in logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Succeeded { .. } => "succeeded",
            Self::Failed { .. } => "failed",
            Self::Cancelled { .. } => "cancelled",
            Self::Skipped { .. } => "skipped",
        }
    }
}

/// One stage's entry in the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    /// Stage name.
    pub stage: String,
    /// How it ended.
    #[serde(flatten)]
    pub outcome: StageOutcome,
    /// Wall time, zero for skipped stages.
    pub duration_ms: f64,
}

/// The first failure of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    /// The failing stage.
    pub stage: String,
    /// Failure classification.
    pub kind: ErrorKind,
    /// Failure detail.
    pub detail: String,
    /// The resource involved, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceRef>,
    /// Its last observed phase, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    /// Time spent on the failing operation, if measured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
}

impl StageFailure {
    /// Builds the failure entry of `stage` from its outcome, if it failed.
    #[must_use]
    pub fn from_outcome(stage: &str, outcome: &StageOutcome) -> Option<Self> {
        match outcome {
            StageOutcome::Failed {
                kind,
                detail,
                resource,
                phase,
                elapsed_ms,
            } => Some(Self {
                stage: stage.to_string(),
                kind: *kind,
                detail: detail.clone(),
                resource: resource.clone(),
                phase: *phase,
                elapsed_ms: *elapsed_ms,
            }),
            _ => None,
        }
    }
}

/// Aggregate report of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    /// Pipeline name.
    pub pipeline: String,
    /// Run tag used for unique names.
    pub run_tag: String,
    /// Unique id of this invocation.
    pub run_id: Uuid,
    /// Per-stage records in completion order.
    pub records: Vec<StageRecord>,
    /// The first stage failure, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_failure: Option<StageFailure>,
    /// Whether the run was cancelled.
    pub cancelled: bool,
    /// Total wall time.
    pub duration_ms: f64,
}

impl PipelineReport {
    /// Returns true if every stage succeeded.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        !self.cancelled && self.records.iter().all(|r| r.outcome.is_success())
    }

    /// Returns the record of a stage.
    #[must_use]
    pub fn record(&self, stage: &str) -> Option<&StageRecord> {
        self.records.iter().find(|r| r.stage == stage)
    }

    /// Returns the outcome of a stage.
    #[must_use]
    pub fn outcome(&self, stage: &str) -> Option<&StageOutcome> {
        self.record(stage).map(|r| &r.outcome)
    }

    /// Returns the result of a successful stage.
    #[must_use]
    pub fn result(&self, stage: &str) -> Option<&PipelineStageResult> {
        match self.outcome(stage) {
            Some(StageOutcome::Succeeded { result }) => Some(result),
            _ => None,
        }
    }

    /// Names of stages that ran.
    #[must_use]
    pub fn ran(&self) -> Vec<&str> {
        self.names(StageOutcome::ran)
    }

    /// Names of stages that succeeded.
    #[must_use]
    pub fn succeeded_stages(&self) -> Vec<&str> {
        self.names(StageOutcome::is_success)
    }

    /// Names of stages that never ran.
    #[must_use]
    pub fn skipped(&self) -> Vec<&str> {
        self.names(|o| !o.ran())
    }

    /// Serializes the report as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns the serializer error.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    fn names(&self, keep: impl Fn(&StageOutcome) -> bool) -> Vec<&str> {
        self.records
            .iter()
            .filter(|r| keep(&r.outcome))
            .map(|r| r.stage.as_str())
            .collect()
    }
}
