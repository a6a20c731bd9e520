//! Model training.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use super::{Stage, StageEnv, FEATURES, TRAIN};
use crate::config::ReconflowConfig;
use crate::core::{DesiredSpec, PipelineStageResult, ResourceType};
use crate::errors::ReconcileError;
use crate::pipeline::StageContext;
use crate::reconcile::ReconcileOptions;

/// Artifact key of the trained model archive.
pub const MODEL_DATA_URL: &str = "model_data_url";

/// Runs a training job named after the run tag and waits for it to complete.
///
/// Re-running with the same tag finds the completed job and reuses it.
#[derive(Debug)]
pub struct TrainingStage {
    env: Arc<StageEnv>,
}

impl TrainingStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(env: Arc<StageEnv>) -> Self {
        Self { env }
    }

    /// Returns the desired training job named `job_name`.
    #[must_use]
    pub fn desired(config: &ReconflowConfig, job_name: &str) -> DesiredSpec {
        let training = &config.training;
        let platform = &config.platform;
        let channel = |name: &str, key: &str| {
            json!({
                "ChannelName": name,
                "ContentType": "text/csv",
                "DataSource": {"S3DataSource": {
                    "S3DataType": "S3Prefix",
                    "S3Uri": platform.s3_uri(key),
                    "S3DataDistributionType": "FullyReplicated",
                }},
            })
        };

        DesiredSpec::new(
            ResourceType::TrainingJob,
            job_name,
            json!({
                "TrainingJobName": job_name,
                "AlgorithmSpecification": {
                    "TrainingImage": training.image_for(&platform.region),
                    "TrainingInputMode": "File",
                },
                "RoleArn": platform.role_arn,
                "InputDataConfig": [
                    channel("train", &training.train_key),
                    channel("validation", &training.validation_key),
                ],
                "OutputDataConfig": {"S3OutputPath": platform.s3_uri(&training.output_prefix)},
                "ResourceConfig": {
                    "InstanceType": training.instance_type,
                    "InstanceCount": training.instance_count,
                    "VolumeSizeInGB": 5,
                },
                "HyperParameters": training.hyperparameters,
                "StoppingCondition": {"MaxRuntimeInSeconds": 3600},
            }),
        )
    }

    /// Returns where the platform writes the model archive of `job_name`.
    #[must_use]
    pub fn model_data_url(config: &ReconflowConfig, job_name: &str) -> String {
        let prefix = config.training.output_prefix.trim_end_matches('/');
        config
            .platform
            .s3_uri(&format!("{prefix}/{job_name}/output/model.tar.gz"))
    }
}

#[async_trait]
impl Stage for TrainingStage {
    fn name(&self) -> &str {
        TRAIN
    }

    async fn run(&self, ctx: &StageContext) -> Result<PipelineStageResult, ReconcileError> {
        ctx.require_input(FEATURES)?;
        let config = self.env.config();
        let job_name = self
            .env
            .resource_name(ResourceType::TrainingJob, &config.training.job_prefix, ctx.run_tag());
        let desired = Self::desired(config, &job_name);

        let state = self
            .env
            .reconciler()
            .reconcile(&desired, ReconcileOptions::default(), ctx.cancel())
            .await?;
        let model_data_url = Self::model_data_url(config, &job_name);
        info!(stage = TRAIN, resource = %state.reference, model_data_url = %model_data_url, "Training complete");

        Ok(PipelineStageResult::success(TRAIN, state.reference).with_artifact(MODEL_DATA_URL, model_data_url))
    }
}
