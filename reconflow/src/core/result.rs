//! Stage results handed from one pipeline stage to the next.

use super::ResourceRef;
use crate::errors::{ErrorKind, ReconcileError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Terminal status of a pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// The stage produced a usable resource.
    Success,
    /// The stage did not produce a usable resource.
    Failed,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// The output of one stage: the resource it produced and where its outputs
/// live. This is the only thing a downstream stage sees of its upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStageResult {
    /// The stage that produced this result.
    pub stage_name: String,
    /// The resource the stage produced.
    pub produced_ref: ResourceRef,
    /// Stage status.
    pub status: StageStatus,
    /// Output locations keyed by artifact name.
    #[serde(default)]
    pub artifacts: BTreeMap<String, String>,
}

impl PipelineStageResult {
    /// Creates a successful result.
    #[must_use]
    pub fn success(stage_name: impl Into<String>, produced_ref: ResourceRef) -> Self {
        Self {
            stage_name: stage_name.into(),
            produced_ref,
            status: StageStatus::Success,
            artifacts: BTreeMap::new(),
        }
    }

    /// Creates a failed result.
    #[must_use]
    pub fn failed(stage_name: impl Into<String>, produced_ref: ResourceRef) -> Self {
        Self {
            status: StageStatus::Failed,
            ..Self::success(stage_name, produced_ref)
        }
    }

    /// Adds an artifact location.
    #[must_use]
    pub fn with_artifact(mut self, key: impl Into<String>, location: impl Into<String>) -> Self {
        self.artifacts.insert(key.into(), location.into());
        self
    }

    /// Returns true if the stage succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == StageStatus::Success
    }

    /// Returns an artifact location.
    #[must_use]
    pub fn artifact(&self, key: &str) -> Option<&str> {
        self.artifacts.get(key).map(String::as_str)
    }

    /// Returns an artifact location or fails with `UpstreamUnresolved`.
    ///
    /// # Errors
    ///
    /// Returns `UpstreamUnresolved` if the upstream stage did not publish `key`.
    pub fn require_artifact(&self, key: &str) -> Result<&str, ReconcileError> {
        self.artifact(key).ok_or_else(|| {
            ReconcileError::new(
                ErrorKind::UpstreamUnresolved,
                format!("stage '{}' did not publish artifact '{key}'", self.stage_name),
            )
            .with_resource(self.produced_ref.clone())
        })
    }
}
