//! Resource handles and per-type capabilities.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kinds of remote resources the reconciler manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceType {
    /// A feature store feature group.
    FeatureGroup,
    /// A versioned collection of model packages.
    ModelPackageGroup,
    /// One registered model version inside a group.
    ModelPackage,
    /// A deployable model bound to a container.
    Model,
    /// Hosting configuration for an endpoint.
    EndpointConfig,
    /// A real-time inference endpoint.
    Endpoint,
    /// A batch transform job.
    TransformJob,
    /// A training job.
    TrainingJob,
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FeatureGroup => "FeatureGroup",
            Self::ModelPackageGroup => "ModelPackageGroup",
            Self::ModelPackage => "ModelPackage",
            Self::Model => "Model",
            Self::EndpointConfig => "EndpointConfig",
            Self::Endpoint => "Endpoint",
            Self::TransformJob => "TransformJob",
            Self::TrainingJob => "TrainingJob",
        };
        f.write_str(name)
    }
}

/// How a conflicting resource is brought to the desired configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStrategy {
    /// Delete, wait for `Absent`, then create.
    Recreate,
    /// Issue an in-place update and wait for `Active`.
    InPlace,
}

/// The verbs a resource type supports, bound into the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Whether the platform can delete this resource. Jobs cannot be deleted.
    pub deletable: bool,
    /// How to converge a resource whose configuration conflicts.
    pub update: UpdateStrategy,
    /// Resources owned by this one that must be deleted first.
    pub children: Option<ResourceType>,
}

impl ResourceType {
    /// All resource types, in pipeline order.
    pub const ALL: [Self; 8] = [
        Self::FeatureGroup,
        Self::TrainingJob,
        Self::ModelPackageGroup,
        Self::ModelPackage,
        Self::Model,
        Self::EndpointConfig,
        Self::Endpoint,
        Self::TransformJob,
    ];

    /// Returns the capability set for this resource type.
    #[must_use]
    pub fn capabilities(self) -> Capabilities {
        match self {
            Self::ModelPackageGroup => Capabilities {
                deletable: true,
                update: UpdateStrategy::Recreate,
                children: Some(Self::ModelPackage),
            },
            Self::Endpoint => Capabilities {
                deletable: true,
                update: UpdateStrategy::InPlace,
                children: None,
            },
            Self::TrainingJob | Self::TransformJob => Capabilities {
                deletable: false,
                update: UpdateStrategy::Recreate,
                children: None,
            },
            Self::FeatureGroup | Self::ModelPackage | Self::Model | Self::EndpointConfig => {
                Capabilities {
                    deletable: true,
                    update: UpdateStrategy::Recreate,
                    children: None,
                }
            }
        }
    }

    /// Returns true for run-to-completion jobs, whose `Active` phase means
    /// `Completed`.
    #[must_use]
    pub fn is_job(self) -> bool {
        matches!(self, Self::TrainingJob | Self::TransformJob)
    }

    /// Returns true when the platform assigns the name (a versioned ARN)
    /// rather than the caller.
    #[must_use]
    pub fn is_platform_named(self) -> bool {
        matches!(self, Self::ModelPackage)
    }
}

/// Identifies one remote resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceRef {
    /// The kind of resource.
    pub resource_type: ResourceType,
    /// The resource name, or its ARN for platform-named resources.
    pub name_or_arn: String,
}

impl ResourceRef {
    /// Creates a new resource reference.
    #[must_use]
    pub fn new(resource_type: ResourceType, name_or_arn: impl Into<String>) -> Self {
        Self {
            resource_type,
            name_or_arn: name_or_arn.into(),
        }
    }

    /// Returns the name or ARN.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name_or_arn
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_type, self.name_or_arn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_ref_display() {
        let r = ResourceRef::new(ResourceType::Endpoint, "creditcard-endpoint");
        assert_eq!(r.to_string(), "Endpoint/creditcard-endpoint");
        assert_eq!(r.name(), "creditcard-endpoint");
    }

    #[test]
    fn test_jobs_are_not_deletable() {
        assert!(!ResourceType::TrainingJob.capabilities().deletable);
        assert!(!ResourceType::TransformJob.capabilities().deletable);
        assert!(ResourceType::TrainingJob.is_job());
        assert!(!ResourceType::Model.is_job());
    }

    #[test]
    fn test_group_owns_packages() {
        let caps = ResourceType::ModelPackageGroup.capabilities();
        assert_eq!(caps.children, Some(ResourceType::ModelPackage));
        assert_eq!(caps.update, UpdateStrategy::Recreate);
    }

    #[test]
    fn test_endpoint_updates_in_place() {
        assert_eq!(
            ResourceType::Endpoint.capabilities().update,
            UpdateStrategy::InPlace
        );
    }

    #[test]
    fn test_every_type_has_capabilities() {
        for ty in ResourceType::ALL {
            let caps = ty.capabilities();
            if ty.is_job() {
                assert!(!caps.deletable, "{ty} should not be deletable");
            } else {
                assert!(caps.deletable, "{ty} should be deletable");
            }
        }
    }
}
