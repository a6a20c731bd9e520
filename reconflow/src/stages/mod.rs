//! Pipeline stages.
//!
//! This module provides:
//! - The [`Stage`] trait implemented by every pipeline step
//! - The ML stages: feature group, training, registration, deployment and
//!   batch inference, each expressed through the reconciler and resolver
//! - [`build_ml_pipeline`], which wires them into a DAG

mod batch;
mod deploy;
mod env;
mod features;
mod registry;
mod training;

pub use batch::BatchInferenceStage;
pub use deploy::DeployStage;
pub use env::StageEnv;
pub use features::FeatureGroupStage;
pub use registry::RegisterStage;
pub use training::TrainingStage;

use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

use crate::config::ReconflowConfig;
use crate::core::PipelineStageResult;
use crate::errors::{PipelineValidationError, ReconcileError};
use crate::events::EventSink;
use crate::pipeline::{PipelineBuilder, StageContext, StageGraph, StageSpec};
use crate::platform::Platform;

/// Name of the feature group stage.
pub const FEATURES: &str = "features";
/// Name of the training stage.
pub const TRAIN: &str = "train";
/// Name of the registration stage.
pub const REGISTER: &str = "register";
/// Name of the endpoint deployment stage.
pub const DEPLOY: &str = "deploy";
/// Name of the batch inference stage.
pub const BATCH_INFER: &str = "batch-infer";

/// One step of a pipeline.
///
/// A stage converges the resources it owns and returns a result naming the
/// resource it produced. Running it again with the same run tag must resume
/// rather than duplicate.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the stage name.
    fn name(&self) -> &str;

    /// Runs the stage.
    async fn run(&self, ctx: &StageContext) -> Result<PipelineStageResult, ReconcileError>;
}

/// Builds the ML pipeline: features, train, register, then deploy and batch
/// inference in parallel when enabled.
///
/// # Errors
///
/// Returns an error if the assembled graph is invalid.
pub fn build_ml_pipeline(
    config: &ReconflowConfig,
    platform: Arc<dyn Platform>,
    events: Arc<dyn EventSink>,
) -> Result<StageGraph, PipelineValidationError> {
    let env = Arc::new(StageEnv::new(config.clone(), platform, events));

    let mut builder = PipelineBuilder::new(&config.pipeline_name)
        .stage(FEATURES, Arc::new(FeatureGroupStage::new(env.clone())), &[])?
        .stage(TRAIN, Arc::new(TrainingStage::new(env.clone())), &[FEATURES])?
        .stage(REGISTER, Arc::new(RegisterStage::new(env.clone())), &[TRAIN])?;

    if config.deployment.enabled {
        builder.add_stage_spec(
            StageSpec::new(DEPLOY, Arc::new(DeployStage::new(env.clone()))).with_dependency(REGISTER),
        )?;
    }
    if config.batch.enabled {
        builder.add_stage_spec(
            StageSpec::new(BATCH_INFER, Arc::new(BatchInferenceStage::new(env)))
                .with_dependency(REGISTER),
        )?;
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoOpEventSink;
    use crate::testing::InMemoryPlatform;

    fn build(config: &ReconflowConfig) -> StageGraph {
        build_ml_pipeline(config, Arc::new(InMemoryPlatform::new()), Arc::new(NoOpEventSink)).unwrap()
    }

    #[test]
    fn test_ml_pipeline_shape() {
        let graph = build(&ReconflowConfig::new());
        assert_eq!(graph.stage_count(), 5);

        let order = graph.execution_order();
        let pos = |s: &str| order.iter().position(|n| n == s).unwrap();
        assert!(pos(FEATURES) < pos(TRAIN));
        assert!(pos(TRAIN) < pos(REGISTER));
        assert!(pos(REGISTER) < pos(DEPLOY));
        assert!(pos(REGISTER) < pos(BATCH_INFER));

        let mut downstream = graph.descendants(TRAIN);
        downstream.sort();
        assert_eq!(downstream, vec![BATCH_INFER, DEPLOY, REGISTER]);
    }

    #[test]
    fn test_disabled_stages_are_left_out() {
        let mut config = ReconflowConfig::new();
        config.batch.enabled = false;
        let graph = build(&config);
        assert_eq!(graph.stage_count(), 4);
        assert!(!graph.execution_order().iter().any(|s| s == BATCH_INFER));

        config.deployment.enabled = false;
        assert_eq!(build(&config).stage_count(), 3);
    }
}
