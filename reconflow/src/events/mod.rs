//! Typed lifecycle events.
//!
//! The reconciler and the sequencer report every observation, mutating call
//! and stage transition as a [`LifecycleEvent`]. Sinks are passed in
//! explicitly; there is no process-wide sink.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use crate::core::{Phase, ResourceRef, ResourceType};
use crate::errors::ErrorKind;
use serde::{Deserialize, Serialize};

/// Something that happened during a reconciliation or pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// A stage was scheduled.
    StageStarted {
        /// Stage name.
        stage: String,
    },
    /// A stage produced its resource.
    StageSucceeded {
        /// Stage name.
        stage: String,
        /// The produced resource.
        produced: ResourceRef,
        /// Stage wall time.
        duration_ms: f64,
    },
    /// A stage failed.
    StageFailed {
        /// Stage name.
        stage: String,
        /// Failure classification.
        kind: ErrorKind,
        /// Failure detail.
        detail: String,
    },
    /// A stage was cancelled while running.
    StageCancelled {
        /// Stage name.
        stage: String,
    },
    /// A stage never ran.
    StageSkipped {
        /// Stage name.
        stage: String,
        /// Why it was skipped.
        reason: String,
    },
    /// A resource's current phase was observed at the start of reconciliation.
    Observed {
        /// The resource.
        resource: ResourceRef,
        /// Its phase.
        phase: Phase,
    },
    /// The resource already matched its desired spec.
    Unchanged {
        /// The resource.
        resource: ResourceRef,
    },
    /// A delete request was issued.
    DeleteIssued {
        /// The resource.
        resource: ResourceRef,
    },
    /// A delete was observed completing.
    Deleted {
        /// The resource.
        resource: ResourceRef,
    },
    /// A create request was issued.
    CreateIssued {
        /// The resource.
        resource: ResourceRef,
    },
    /// An in-place update request was issued.
    UpdateIssued {
        /// The resource.
        resource: ResourceRef,
    },
    /// A wait finished in a terminal phase.
    Settled {
        /// The resource.
        resource: ResourceRef,
        /// The terminal phase.
        phase: Phase,
    },
    /// A version selector resolved to a resource.
    Resolved {
        /// The collection searched.
        collection: ResourceType,
        /// The winning candidate.
        resource: ResourceRef,
    },
}

impl LifecycleEvent {
    /// Returns the dotted event name, e.g. `"resource.delete_issued"`.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::StageStarted { .. } => "stage.started",
            Self::StageSucceeded { .. } => "stage.succeeded",
            Self::StageFailed { .. } => "stage.failed",
            Self::StageCancelled { .. } => "stage.cancelled",
            Self::StageSkipped { .. } => "stage.skipped",
            Self::Observed { .. } => "resource.observed",
            Self::Unchanged { .. } => "resource.unchanged",
            Self::DeleteIssued { .. } => "resource.delete_issued",
            Self::Deleted { .. } => "resource.deleted",
            Self::CreateIssued { .. } => "resource.create_issued",
            Self::UpdateIssued { .. } => "resource.update_issued",
            Self::Settled { .. } => "resource.settled",
            Self::Resolved { .. } => "version.resolved",
        }
    }

    /// Returns the resource the event concerns, if any.
    #[must_use]
    pub fn resource(&self) -> Option<&ResourceRef> {
        match self {
            Self::StageSucceeded { produced, .. } => Some(produced),
            Self::Observed { resource, .. }
            | Self::Unchanged { resource }
            | Self::DeleteIssued { resource }
            | Self::Deleted { resource }
            | Self::CreateIssued { resource }
            | Self::UpdateIssued { resource }
            | Self::Settled { resource, .. }
            | Self::Resolved { resource, .. } => Some(resource),
            Self::StageStarted { .. }
            | Self::StageFailed { .. }
            | Self::StageCancelled { .. }
            | Self::StageSkipped { .. } => None,
        }
    }

    /// Returns the stage the event concerns, if any.
    #[must_use]
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::StageStarted { stage }
            | Self::StageSucceeded { stage, .. }
            | Self::StageFailed { stage, .. }
            | Self::StageCancelled { stage }
            | Self::StageSkipped { stage, .. } => Some(stage),
            _ => None,
        }
    }
}
