//! Batch inference over the held-out data set.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use super::deploy::desired_model;
use super::{Stage, StageEnv, BATCH_INFER, REGISTER};
use crate::config::ReconflowConfig;
use crate::core::{DesiredSpec, PipelineStageResult, ResourceType};
use crate::errors::ReconcileError;
use crate::pipeline::StageContext;
use crate::reconcile::ReconcileOptions;

/// Artifact key of the transform output location.
pub const OUTPUT_URI: &str = "output_uri";

/// Runs a run-tagged transform job against the selected model package.
///
/// The stage returns once the job has been observed completing; a job that
/// ends `Failed` fails the stage with `CreateFailed`.
#[derive(Debug)]
pub struct BatchInferenceStage {
    env: Arc<StageEnv>,
}

impl BatchInferenceStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(env: Arc<StageEnv>) -> Self {
        Self { env }
    }

    fn desired_job(config: &ReconflowConfig, name: &str, model: &str) -> DesiredSpec {
        let batch = &config.batch;
        DesiredSpec::new(
            ResourceType::TransformJob,
            name,
            json!({
                "TransformJobName": name,
                "ModelName": model,
                "TransformInput": {
                    "DataSource": {"S3DataSource": {
                        "S3DataType": "S3Prefix",
                        "S3Uri": config.platform.s3_uri(&batch.input_key),
                    }},
                    "ContentType": batch.content_type,
                    "SplitType": batch.split_type,
                },
                "TransformOutput": {"S3OutputPath": config.platform.s3_uri(&batch.output_prefix)},
                "TransformResources": {
                    "InstanceType": batch.instance_type,
                    "InstanceCount": batch.instance_count,
                },
            }),
        )
    }
}

#[async_trait]
impl Stage for BatchInferenceStage {
    fn name(&self) -> &str {
        BATCH_INFER
    }

    async fn run(&self, ctx: &StageContext) -> Result<PipelineStageResult, ReconcileError> {
        ctx.require_input(REGISTER)?;
        let config = self.env.config();
        let reconciler = self.env.reconciler();
        let options = ReconcileOptions::default();

        let package = self.env.resolve_package(config.batch.approval_policy).await?;
        let model_name = self
            .env
            .resource_name(ResourceType::Model, &config.batch.model_prefix, ctx.run_tag());
        let model = reconciler
            .reconcile(&desired_model(config, &model_name, &package), options, ctx.cancel())
            .await?;

        let job_name = self
            .env
            .resource_name(ResourceType::TransformJob, &config.batch.job_prefix, ctx.run_tag());
        let job = reconciler
            .reconcile(
                &Self::desired_job(config, &job_name, model.reference.name()),
                options,
                ctx.cancel(),
            )
            .await?;
        let output_uri = config.platform.s3_uri(&config.batch.output_prefix);
        info!(stage = BATCH_INFER, resource = %job.reference, output = %output_uri, "Batch transform complete");

        Ok(PipelineStageResult::success(BATCH_INFER, job.reference).with_artifact(OUTPUT_URI, output_uri))
    }
}
