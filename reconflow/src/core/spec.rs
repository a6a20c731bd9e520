//! Desired resource specifications.

use super::{ResourceRef, ResourceState, ResourceType};
use crate::errors::{ErrorKind, ReconcileError};
use crate::utils::validate_resource_name;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The configuration a resource should converge to.
///
/// Two specs are compatible when their configuration fingerprints match.
/// `serde_json` keeps object keys sorted, so the fingerprint does not depend
/// on the order in which the configuration was assembled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredSpec {
    /// The kind of resource.
    pub resource_type: ResourceType,
    /// The logical name. For platform-named resources this is the parent
    /// collection name.
    pub name: String,
    /// Owning collection, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// The configuration document sent to the platform.
    pub config: serde_json::Value,
}

impl DesiredSpec {
    /// Creates a desired spec.
    #[must_use]
    pub fn new(resource_type: ResourceType, name: impl Into<String>, config: serde_json::Value) -> Self {
        Self {
            resource_type,
            name: name.into(),
            parent: None,
            config,
        }
    }

    /// Sets the owning collection.
    #[must_use]
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Returns the reference this spec reconciles.
    #[must_use]
    pub fn reference(&self) -> ResourceRef {
        ResourceRef::new(self.resource_type, &self.name)
    }

    /// Returns the SHA-256 fingerprint of the configuration, hex encoded.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.config.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Returns true if the observed resource was created from an equivalent
    /// configuration.
    #[must_use]
    pub fn matches(&self, state: &ResourceState) -> bool {
        state.fingerprint.as_deref() == Some(self.fingerprint().as_str())
    }

    /// Validates the spec before any remote call is made.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSpec` for a malformed name or a non-object configuration.
    pub fn validate(&self) -> Result<(), ReconcileError> {
        if let Err(reason) = validate_resource_name(&self.name) {
            return Err(ReconcileError::new(ErrorKind::InvalidSpec, reason)
                .with_resource(self.reference()));
        }
        if !self.config.is_object() {
            return Err(ReconcileError::new(
                ErrorKind::InvalidSpec,
                "configuration must be a JSON object",
            )
            .with_resource(self.reference()));
        }
        Ok(())
    }
}
