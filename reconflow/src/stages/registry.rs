//! Model registration.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use super::training::MODEL_DATA_URL;
use super::{Stage, StageEnv, REGISTER, TRAIN};
use crate::config::ReconflowConfig;
use crate::core::{DesiredSpec, Phase, PipelineStageResult, ResourceRef, ResourceType};
use crate::errors::ReconcileError;
use crate::pipeline::StageContext;
use crate::reconcile::{select, CandidateFilter, ReconcileOptions, VersionSelector};

/// Artifact key of the model package group name.
pub const MODEL_PACKAGE_GROUP: &str = "model_package_group";
/// Artifact key of the registered package ARN.
pub const MODEL_PACKAGE_ARN: &str = "model_package_arn";

/// Ensures the model package group exists and registers the trained model
/// in it.
///
/// Packages are platform-named, so the stage looks for an `Active` package
/// with the same fingerprint before creating one. Re-running the stage for
/// the same model therefore registers nothing new. With
/// `registry.reset_group` set, every package is deleted and the group is
/// recreated first.
#[derive(Debug)]
pub struct RegisterStage {
    env: Arc<StageEnv>,
}

impl RegisterStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(env: Arc<StageEnv>) -> Self {
        Self { env }
    }

    /// Returns the desired model package group.
    #[must_use]
    pub fn desired_group(config: &ReconflowConfig) -> DesiredSpec {
        let registry = &config.registry;
        DesiredSpec::new(
            ResourceType::ModelPackageGroup,
            &registry.group_name,
            json!({
                "ModelPackageGroupName": registry.group_name,
                "ModelPackageGroupDescription": registry.group_description,
            }),
        )
    }

    /// Returns the desired model package for an archive at `model_data_url`.
    #[must_use]
    pub fn desired_package(config: &ReconflowConfig, model_data_url: &str) -> DesiredSpec {
        let registry = &config.registry;
        DesiredSpec::new(
            ResourceType::ModelPackage,
            &registry.group_name,
            json!({
                "ModelPackageGroupName": registry.group_name,
                "ModelPackageDescription": "XGBoost model for credit card fraud detection",
                "InferenceSpecification": {
                    "Containers": [{
                        "Image": config.training.image_for(&config.platform.region),
                        "ModelDataUrl": model_data_url,
                    }],
                    "SupportedContentTypes": ["text/csv"],
                    "SupportedResponseMIMETypes": ["text/csv"],
                },
                "ModelApprovalStatus": registry.approval_status,
            }),
        )
        .with_parent(&registry.group_name)
    }

    async fn existing_package(&self, desired: &DesiredSpec) -> Result<Option<ResourceRef>, ReconcileError> {
        let selector = VersionSelector::new(ResourceType::ModelPackage)
            .in_parent(&desired.name)
            .with_filter(CandidateFilter::Phase(Phase::Active));
        let snapshot = self.env.resolver().snapshot(&selector).await?;
        let fingerprint = desired.fingerprint();
        Ok(select(&snapshot, &selector)
            .into_iter()
            .find(|c| c.fingerprint.as_deref() == Some(fingerprint.as_str()))
            .map(|c| c.reference.clone()))
    }
}

#[async_trait]
impl Stage for RegisterStage {
    fn name(&self) -> &str {
        REGISTER
    }

    async fn run(&self, ctx: &StageContext) -> Result<PipelineStageResult, ReconcileError> {
        let model_data_url = ctx.require_input(TRAIN)?.require_artifact(MODEL_DATA_URL)?;
        let config = self.env.config();
        let reconciler = self.env.reconciler();

        let options = ReconcileOptions {
            force_recreate: config.registry.reset_group,
        };
        let group = reconciler
            .reconcile(&Self::desired_group(config), options, ctx.cancel())
            .await?;

        let desired = Self::desired_package(config, model_data_url);
        let package = match self.existing_package(&desired).await? {
            Some(existing) => {
                info!(stage = REGISTER, resource = %existing, "Model already registered");
                existing
            }
            None => {
                let state = reconciler.create_new(&desired, ctx.cancel()).await?;
                info!(
                    stage = REGISTER,
                    resource = %state.reference,
                    approval = %config.registry.approval_status,
                    "Registered model package"
                );
                state.reference
            }
        };

        Ok(PipelineStageResult::success(REGISTER, package.clone())
            .with_artifact(MODEL_PACKAGE_GROUP, group.reference.name())
            .with_artifact(MODEL_PACKAGE_ARN, package.name()))
    }
}
