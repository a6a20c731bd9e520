//! Observed resource state.

use super::{ApprovalStatus, Phase, ResourceRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single observation of a remote resource.
///
/// Observations are only valid for the reconciliation cycle that produced
/// them. Nothing in the crate caches a `ResourceState` across cycles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceState {
    /// The resource observed.
    #[serde(rename = "ref")]
    pub reference: ResourceRef,
    /// The observed phase.
    pub phase: Phase,
    /// Platform-supplied detail, typically a failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Fingerprint of the configuration the platform reports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    /// When the observation was made.
    pub observed_at: DateTime<Utc>,
}

impl ResourceState {
    /// Creates an observation stamped with the current time.
    #[must_use]
    pub fn observed(reference: ResourceRef, phase: Phase) -> Self {
        Self {
            reference,
            phase,
            detail: None,
            fingerprint: None,
            observed_at: Utc::now(),
        }
    }

    /// Creates an observation of a resource that does not exist.
    #[must_use]
    pub fn absent(reference: ResourceRef) -> Self {
        Self::observed(reference, Phase::Absent)
    }

    /// Sets the detail.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Sets the configuration fingerprint.
    #[must_use]
    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    /// Returns true if the resource is `Active`.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.phase == Phase::Active
    }

    /// Returns true if the resource does not exist.
    #[must_use]
    pub fn is_absent(&self) -> bool {
        self.phase == Phase::Absent
    }
}

/// One entry of a collection listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSummary {
    /// The listed resource.
    #[serde(rename = "ref")]
    pub reference: ResourceRef,
    /// Its phase at listing time.
    pub phase: Phase,
    /// Approval status, for model packages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApprovalStatus>,
    /// Creation time reported by the platform.
    pub created_at: DateTime<Utc>,
    /// Fingerprint of the resource configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

impl ResourceSummary {
    /// Creates a summary entry.
    #[must_use]
    pub fn new(reference: ResourceRef, phase: Phase, created_at: DateTime<Utc>) -> Self {
        Self {
            reference,
            phase,
            approval: None,
            created_at,
            fingerprint: None,
        }
    }

    /// Sets the approval status.
    #[must_use]
    pub fn with_approval(mut self, approval: ApprovalStatus) -> Self {
        self.approval = Some(approval);
        self
    }

    /// Sets the fingerprint.
    #[must_use]
    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }
}
