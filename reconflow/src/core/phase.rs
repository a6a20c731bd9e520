//! Lifecycle phases and approval states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle phase of a remote resource as last observed.
///
/// Platform adapters map their native statuses onto these phases. Jobs map
/// `Completed` onto [`Phase::Active`], endpoints map `InService` onto it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// The platform reported a status with no mapping.
    Unknown,
    /// The resource does not exist.
    Absent,
    /// Creation is in progress.
    Creating,
    /// The resource is usable (or the job has completed).
    Active,
    /// An in-place update is in progress.
    Updating,
    /// Deletion is in progress.
    Deleting,
    /// The platform reports a terminal failure.
    Failed,
}

impl Default for Phase {
    fn default() -> Self {
        Self::Unknown
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Absent => write!(f, "absent"),
            Self::Creating => write!(f, "creating"),
            Self::Active => write!(f, "active"),
            Self::Updating => write!(f, "updating"),
            Self::Deleting => write!(f, "deleting"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl Phase {
    /// Returns true if no further platform-internal transition happens from
    /// this phase without external action.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Active | Self::Absent | Self::Failed)
    }

    /// Returns true for phases that are still converging towards `Active` or
    /// `Failed`.
    #[must_use]
    pub fn is_settling(&self) -> bool {
        matches!(self, Self::Creating | Self::Updating | Self::Unknown)
    }

    /// Returns true if a downstream stage may consume a resource in this phase.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Active)
    }
}

/// Approval state of a registered model package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApprovalStatus {
    /// Cleared for deployment.
    Approved,
    /// Registered but awaiting review. The registry's default.
    PendingManualApproval,
    /// Rejected by a reviewer.
    Rejected,
}

impl Default for ApprovalStatus {
    fn default() -> Self {
        Self::PendingManualApproval
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Approved => write!(f, "Approved"),
            Self::PendingManualApproval => write!(f, "PendingManualApproval"),
            Self::Rejected => write!(f, "Rejected"),
        }
    }
}
