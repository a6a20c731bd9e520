//! Feature group publishing.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use super::{Stage, StageEnv, FEATURES};
use crate::config::{FeatureType, ReconflowConfig};
use crate::core::{DesiredSpec, PipelineStageResult, ResourceType};
use crate::errors::ReconcileError;
use crate::pipeline::StageContext;
use crate::reconcile::ReconcileOptions;

/// Artifact key of the offline store location.
pub const OFFLINE_STORE_URI: &str = "offline_store_uri";

/// Ensures the fixed-name feature group exists with the configured schema.
///
/// A group with a different schema is deleted and recreated, and the create
/// is only issued once the delete has been observed completing.
#[derive(Debug)]
pub struct FeatureGroupStage {
    env: Arc<StageEnv>,
}

impl FeatureGroupStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(env: Arc<StageEnv>) -> Self {
        Self { env }
    }

    /// Returns the desired feature group.
    #[must_use]
    pub fn desired(config: &ReconflowConfig) -> DesiredSpec {
        let features = &config.features;
        let definitions: Vec<Value> = features
            .features
            .iter()
            .map(|f| {
                let ty = match f.feature_type {
                    FeatureType::String => "String",
                    FeatureType::Fractional => "Fractional",
                    FeatureType::Integral => "Integral",
                };
                json!({"FeatureName": f.name, "FeatureType": ty})
            })
            .collect();

        DesiredSpec::new(
            ResourceType::FeatureGroup,
            &features.name,
            json!({
                "FeatureGroupName": features.name,
                "RecordIdentifierFeatureName": features.record_identifier,
                "EventTimeFeatureName": features.event_time_feature,
                "FeatureDefinitions": definitions,
                "OnlineStoreConfig": {"EnableOnlineStore": features.enable_online_store},
                "OfflineStoreConfig": {
                    "S3StorageConfig": {"S3Uri": config.platform.s3_uri(&features.offline_store_prefix)}
                },
                "RoleArn": config.platform.role_arn,
            }),
        )
    }
}

#[async_trait]
impl Stage for FeatureGroupStage {
    fn name(&self) -> &str {
        FEATURES
    }

    async fn run(&self, ctx: &StageContext) -> Result<PipelineStageResult, ReconcileError> {
        let config = self.env.config();
        let desired = Self::desired(config);
        let options = ReconcileOptions {
            force_recreate: config.features.force_recreate,
        };

        let state = self.env.reconciler().reconcile(&desired, options, ctx.cancel()).await?;
        info!(stage = FEATURES, resource = %state.reference, "Feature group ready");

        Ok(PipelineStageResult::success(FEATURES, state.reference).with_artifact(
            OFFLINE_STORE_URI,
            config.platform.s3_uri(&config.features.offline_store_prefix),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FeatureDefinition, FeatureType};
    use crate::core::Phase;
    use crate::stages::fixtures;
    use crate::testing::InMemoryPlatform;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_creates_feature_group_with_schema() {
        let platform = Arc::new(InMemoryPlatform::new());
        let config = fixtures::fast_config();
        let stage = FeatureGroupStage::new(fixtures::env(&config, &platform));

        let result = stage.run(&fixtures::ctx(FEATURES, BTreeMap::new())).await.unwrap();

        assert_eq!(result.produced_ref.name(), "creditcard-fg2");
        assert_eq!(
            result.artifact(OFFLINE_STORE_URI),
            Some("s3://fraud-detectml1/feature-store/")
        );
        assert_eq!(platform.phase_of(&result.produced_ref), Phase::Active);

        let desired = FeatureGroupStage::desired(&config);
        assert_eq!(desired.config["FeatureDefinitions"].as_array().unwrap().len(), 32);
        assert_eq!(desired.config["FeatureDefinitions"][3]["FeatureType"], "Integral");
    }

    #[tokio::test]
    async fn test_changed_schema_replaces_group() {
        let platform = Arc::new(InMemoryPlatform::new());
        let mut config = fixtures::fast_config();
        FeatureGroupStage::new(fixtures::env(&config, &platform))
            .run(&fixtures::ctx(FEATURES, BTreeMap::new()))
            .await
            .unwrap();

        config
            .features
            .features
            .push(FeatureDefinition::new("Merchant", FeatureType::String));
        platform.clear_calls();
        FeatureGroupStage::new(fixtures::env(&config, &platform))
            .run(&fixtures::ctx(FEATURES, BTreeMap::new()))
            .await
            .unwrap();

        assert_eq!(platform.deletes().len(), 1);
        assert_eq!(platform.creates().len(), 1);
    }
}
