//! Real-time endpoint deployment.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use super::{Stage, StageEnv, DEPLOY, REGISTER};
use crate::config::ReconflowConfig;
use crate::core::{DesiredSpec, PipelineStageResult, ResourceRef, ResourceType};
use crate::errors::ReconcileError;
use crate::pipeline::StageContext;
use crate::reconcile::ReconcileOptions;

/// Artifact key of the serving model name.
pub const MODEL_NAME: &str = "model_name";
/// Artifact key of the endpoint configuration name.
pub const ENDPOINT_CONFIG_NAME: &str = "endpoint_config_name";
/// Artifact key of the endpoint name.
pub const ENDPOINT_NAME: &str = "endpoint_name";

/// Serves the selected model package from the fixed-name endpoint.
///
/// The model and endpoint configuration are run-tagged; the endpoint is
/// switched to the new configuration in place.
#[derive(Debug)]
pub struct DeployStage {
    env: Arc<StageEnv>,
}

/// Returns the desired model serving `package`.
pub(super) fn desired_model(config: &ReconflowConfig, name: &str, package: &ResourceRef) -> DesiredSpec {
    DesiredSpec::new(
        ResourceType::Model,
        name,
        json!({
            "ModelName": name,
            "ExecutionRoleArn": config.platform.role_arn,
            "Containers": [{"ModelPackageName": package.name()}],
        }),
    )
}

impl DeployStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(env: Arc<StageEnv>) -> Self {
        Self { env }
    }

    fn desired_endpoint_config(config: &ReconflowConfig, name: &str, model: &str) -> DesiredSpec {
        let deployment = &config.deployment;
        DesiredSpec::new(
            ResourceType::EndpointConfig,
            name,
            json!({
                "EndpointConfigName": name,
                "ProductionVariants": [{
                    "VariantName": deployment.variant_name,
                    "ModelName": model,
                    "InstanceType": deployment.instance_type,
                    "InitialInstanceCount": deployment.instance_count,
                }],
            }),
        )
    }

    fn desired_endpoint(config: &ReconflowConfig, endpoint_config: &str) -> DesiredSpec {
        let name = &config.deployment.endpoint_name;
        DesiredSpec::new(
            ResourceType::Endpoint,
            name,
            json!({
                "EndpointName": name,
                "EndpointConfigName": endpoint_config,
            }),
        )
    }
}

#[async_trait]
impl Stage for DeployStage {
    fn name(&self) -> &str {
        DEPLOY
    }

    async fn run(&self, ctx: &StageContext) -> Result<PipelineStageResult, ReconcileError> {
        ctx.require_input(REGISTER)?;
        let config = self.env.config();
        let reconciler = self.env.reconciler();
        let cancel = ctx.cancel();
        let options = ReconcileOptions::default();

        let package = self
            .env
            .resolve_package(config.deployment.approval_policy)
            .await?;

        let model_name = self
            .env
            .resource_name(ResourceType::Model, &config.deployment.model_prefix, ctx.run_tag());
        let model = reconciler
            .reconcile(&desired_model(config, &model_name, &package), options, cancel)
            .await?;

        let endpoint_config_name = format!("{model_name}-config");
        let endpoint_config = reconciler
            .reconcile(
                &Self::desired_endpoint_config(config, &endpoint_config_name, model.reference.name()),
                options,
                cancel,
            )
            .await?;

        let endpoint = reconciler
            .reconcile(
                &Self::desired_endpoint(config, endpoint_config.reference.name()),
                options,
                cancel,
            )
            .await?;
        info!(
            stage = DEPLOY,
            resource = %endpoint.reference,
            package = %package.name(),
            "Endpoint in service"
        );

        Ok(PipelineStageResult::success(DEPLOY, endpoint.reference.clone())
            .with_artifact(MODEL_NAME, model.reference.name())
            .with_artifact(ENDPOINT_CONFIG_NAME, endpoint_config.reference.name())
            .with_artifact(ENDPOINT_NAME, endpoint.reference.name())
            .with_artifact(super::registry::MODEL_PACKAGE_ARN, package.name()))
    }
}
