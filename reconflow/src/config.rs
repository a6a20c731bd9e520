//! Configuration for the ML pipeline.
//!
//! One explicit struct is passed into every component. Every field has a
//! default, so a configuration file only needs the values that differ.

use crate::observability::LoggingConfig;
use crate::reconcile::{PollConfig, VersionSelector, DEFAULT_MAX_CANDIDATES, DEFAULT_PAGE_SIZE};
use crate::core::ResourceType;
use crate::utils::{validate_resource_name, NamingPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read config file {path}: {source}")]
    Io {
        /// The path that failed.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid JSON for this schema.
    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is out of range.
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        /// Dotted field path.
        field: String,
        /// What is wrong.
        reason: String,
    },
}

impl ConfigError {
    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Which upstream model package the deployment stages consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalPolicy {
    /// The newest package with `Approved` status.
    #[default]
    LatestApproved,
    /// The newest package regardless of approval.
    LatestCreated,
}

impl ApprovalPolicy {
    /// Returns the selector implementing this policy for `group`.
    #[must_use]
    pub fn selector(self, group: &str) -> VersionSelector {
        match self {
            Self::LatestApproved => VersionSelector::latest_approved_package(group),
            Self::LatestCreated => VersionSelector::latest_created_package(group),
        }
    }
}

/// Account and storage settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Region all resources live in.
    #[serde(default = "default_region")]
    pub region: String,
    /// Bucket holding data, models and outputs.
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// Execution role assumed by the platform.
    #[serde(default = "default_role_arn")]
    pub role_arn: String,
    /// Account id, used in ARNs.
    #[serde(default = "default_account_id")]
    pub account_id: String,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_bucket() -> String {
    "fraud-detectml1".to_string()
}

fn default_role_arn() -> String {
    "arn:aws:iam::123456789012:role/service-role/SageMakerExecutionRole".to_string()
}

fn default_account_id() -> String {
    "123456789012".to_string()
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            bucket: default_bucket(),
            role_arn: default_role_arn(),
            account_id: default_account_id(),
        }
    }
}

impl PlatformConfig {
    /// Returns `s3://{bucket}/{key}`.
    #[must_use]
    pub fn s3_uri(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key.trim_start_matches('/'))
    }
}

/// Poll timing and listing bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Timing for create and update waits.
    #[serde(default)]
    pub create: PollConfig,
    /// Timing for delete waits.
    #[serde(default = "default_delete_poll")]
    pub delete: PollConfig,
    /// Entries per listing page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Bound on candidates read from one collection.
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
}

fn default_delete_poll() -> PollConfig {
    PollConfig::new()
        .with_interval(Duration::from_secs(10))
        .with_timeout(Duration::from_secs(900))
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_max_candidates() -> usize {
    DEFAULT_MAX_CANDIDATES
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            create: PollConfig::default(),
            delete: default_delete_poll(),
            page_size: default_page_size(),
            max_candidates: default_max_candidates(),
        }
    }
}

/// Type of one feature column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureType {
    /// String column.
    String,
    /// Floating-point column.
    Fractional,
    /// Integer column.
    Integral,
}

/// One feature column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureDefinition {
    /// Column name.
    pub name: String,
    /// Column type.
    #[serde(rename = "type")]
    pub feature_type: FeatureType,
}

impl FeatureDefinition {
    /// Creates a definition.
    #[must_use]
    pub fn new(name: impl Into<String>, feature_type: FeatureType) -> Self {
        Self {
            name: name.into(),
            feature_type,
        }
    }
}

/// Feature group settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureGroupConfig {
    /// Fixed feature group name.
    #[serde(default = "default_feature_group_name")]
    pub name: String,
    /// Record identifier column.
    #[serde(default = "default_record_id")]
    pub record_identifier: String,
    /// Event time column.
    #[serde(default = "default_event_time")]
    pub event_time_feature: String,
    /// Offline store prefix within the bucket.
    #[serde(default = "default_offline_prefix")]
    pub offline_store_prefix: String,
    /// Whether to enable the online store.
    #[serde(default)]
    pub enable_online_store: bool,
    /// Column definitions.
    #[serde(default = "default_feature_definitions")]
    pub features: Vec<FeatureDefinition>,
    /// Replace the feature group on every run even if it matches.
    #[serde(default)]
    pub force_recreate: bool,
}

fn default_feature_group_name() -> String {
    "creditcard-fg2".to_string()
}

fn default_record_id() -> String {
    "record_id".to_string()
}

fn default_event_time() -> String {
    "Time".to_string()
}

fn default_offline_prefix() -> String {
    "feature-store/".to_string()
}

fn default_feature_definitions() -> Vec<FeatureDefinition> {
    let mut features = vec![
        FeatureDefinition::new("record_id", FeatureType::String),
        FeatureDefinition::new("Time", FeatureType::Fractional),
        FeatureDefinition::new("Amount", FeatureType::Fractional),
        FeatureDefinition::new("Class", FeatureType::Integral),
    ];
    features.extend((1..=28).map(|i| FeatureDefinition::new(format!("V{i}"), FeatureType::Fractional)));
    features
}

impl Default for FeatureGroupConfig {
    fn default() -> Self {
        Self {
            name: default_feature_group_name(),
            record_identifier: default_record_id(),
            event_time_feature: default_event_time(),
            offline_store_prefix: default_offline_prefix(),
            enable_online_store: false,
            features: default_feature_definitions(),
            force_recreate: false,
        }
    }
}

/// Training job settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Prefix of the run-tagged job name.
    #[serde(default = "default_job_prefix")]
    pub job_prefix: String,
    /// Container image; `{region}` is substituted.
    #[serde(default = "default_image")]
    pub image: String,
    /// Instance type.
    #[serde(default = "default_training_instance")]
    pub instance_type: String,
    /// Instance count.
    #[serde(default = "default_instance_count")]
    pub instance_count: u32,
    /// Training data key.
    #[serde(default = "default_train_key")]
    pub train_key: String,
    /// Validation data key.
    #[serde(default = "default_validation_key")]
    pub validation_key: String,
    /// Model output prefix.
    #[serde(default = "default_output_prefix")]
    pub output_prefix: String,
    /// Algorithm hyperparameters.
    #[serde(default = "default_hyperparameters")]
    pub hyperparameters: BTreeMap<String, String>,
}

fn default_job_prefix() -> String {
    "creditcard-xgb".to_string()
}

fn default_image() -> String {
    "246618743249.dkr.ecr.{region}.amazonaws.com/sagemaker-xgboost:1.5-1".to_string()
}

fn default_training_instance() -> String {
    "ml.m5.large".to_string()
}

fn default_instance_count() -> u32 {
    1
}

fn default_train_key() -> String {
    "data/train.csv".to_string()
}

fn default_validation_key() -> String {
    "data/test.csv".to_string()
}

fn default_output_prefix() -> String {
    "models/".to_string()
}

fn default_hyperparameters() -> BTreeMap<String, String> {
    [
        ("objective".to_string(), "binary:logistic".to_string()),
        ("num_round".to_string(), "100".to_string()),
    ]
    .into_iter()
    .collect()
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            job_prefix: default_job_prefix(),
            image: default_image(),
            instance_type: default_training_instance(),
            instance_count: default_instance_count(),
            train_key: default_train_key(),
            validation_key: default_validation_key(),
            output_prefix: default_output_prefix(),
            hyperparameters: default_hyperparameters(),
        }
    }
}

impl TrainingConfig {
    /// Returns the image URI for `region`.
    #[must_use]
    pub fn image_for(&self, region: &str) -> String {
        self.image.replace("{region}", region)
    }
}

/// Model registry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Model package group name.
    #[serde(default = "default_group_name")]
    pub group_name: String,
    /// Group description.
    #[serde(default = "default_group_description")]
    pub group_description: String,
    /// Approval status given to newly registered packages.
    #[serde(default = "default_approval_status")]
    pub approval_status: crate::core::ApprovalStatus,
    /// Delete every package and recreate the group on this run.
    #[serde(default)]
    pub reset_group: bool,
}

fn default_group_name() -> String {
    "creditcard-fraud".to_string()
}

fn default_group_description() -> String {
    "CreditCard Fraud Detection MPG".to_string()
}

fn default_approval_status() -> crate::core::ApprovalStatus {
    crate::core::ApprovalStatus::Approved
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            group_name: default_group_name(),
            group_description: default_group_description(),
            approval_status: default_approval_status(),
            reset_group: false,
        }
    }
}

/// Endpoint deployment settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Whether the deploy stage runs.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Fixed endpoint name.
    #[serde(default = "default_endpoint_name")]
    pub endpoint_name: String,
    /// Prefix of the run-tagged model name.
    #[serde(default = "default_model_prefix")]
    pub model_prefix: String,
    /// Instance type.
    #[serde(default = "default_endpoint_instance")]
    pub instance_type: String,
    /// Initial instance count.
    #[serde(default = "default_instance_count")]
    pub instance_count: u32,
    /// Production variant name.
    #[serde(default = "default_variant")]
    pub variant_name: String,
    /// Which package to deploy.
    #[serde(default)]
    pub approval_policy: ApprovalPolicy,
}

fn default_true() -> bool {
    true
}

fn default_endpoint_name() -> String {
    "creditcard-fraud-endpoint".to_string()
}

fn default_model_prefix() -> String {
    "creditcard-model".to_string()
}

fn default_endpoint_instance() -> String {
    "ml.m5.large".to_string()
}

fn default_variant() -> String {
    "AllTraffic".to_string()
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint_name: default_endpoint_name(),
            model_prefix: default_model_prefix(),
            instance_type: default_endpoint_instance(),
            instance_count: default_instance_count(),
            variant_name: default_variant(),
            approval_policy: ApprovalPolicy::default(),
        }
    }
}

/// Batch transform settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Whether the batch stage runs.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Prefix of the run-tagged model name.
    #[serde(default = "default_batch_model_prefix")]
    pub model_prefix: String,
    /// Prefix of the run-tagged job name.
    #[serde(default = "default_batch_job_prefix")]
    pub job_prefix: String,
    /// Input data key.
    #[serde(default = "default_validation_key")]
    pub input_key: String,
    /// Output prefix.
    #[serde(default = "default_batch_output")]
    pub output_prefix: String,
    /// Input content type.
    #[serde(default = "default_content_type")]
    pub content_type: String,
    /// How input is split into records.
    #[serde(default = "default_split_type")]
    pub split_type: String,
    /// Instance type.
    #[serde(default = "default_batch_instance")]
    pub instance_type: String,
    /// Instance count.
    #[serde(default = "default_instance_count")]
    pub instance_count: u32,
    /// Which package to run.
    #[serde(default)]
    pub approval_policy: ApprovalPolicy,
}

fn default_batch_model_prefix() -> String {
    "batch-inference-model".to_string()
}

fn default_batch_job_prefix() -> String {
    "batch-transform".to_string()
}

fn default_batch_output() -> String {
    "batch-output/".to_string()
}

fn default_content_type() -> String {
    "text/csv".to_string()
}

fn default_split_type() -> String {
    "Line".to_string()
}

fn default_batch_instance() -> String {
    "ml.m4.xlarge".to_string()
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model_prefix: default_batch_model_prefix(),
            job_prefix: default_batch_job_prefix(),
            input_key: default_validation_key(),
            output_prefix: default_batch_output(),
            content_type: default_content_type(),
            split_type: default_split_type(),
            instance_type: default_batch_instance(),
            instance_count: default_instance_count(),
            approval_policy: ApprovalPolicy::default(),
        }
    }
}

/// Complete configuration of one pipeline invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconflowConfig {
    /// Pipeline name used in reports and logs.
    #[serde(default = "default_pipeline_name")]
    pub pipeline_name: String,
    /// Run tag for unique names. A UTC timestamp when unset; reuse a tag to
    /// resume a previous run.
    #[serde(default)]
    pub run_tag: Option<String>,
    /// Account and storage.
    #[serde(default)]
    pub platform: PlatformConfig,
    /// Poll timing.
    #[serde(default)]
    pub polling: PollingConfig,
    /// Feature group.
    #[serde(default)]
    pub features: FeatureGroupConfig,
    /// Training.
    #[serde(default)]
    pub training: TrainingConfig,
    /// Registry.
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Endpoint deployment.
    #[serde(default)]
    pub deployment: DeploymentConfig,
    /// Batch transform.
    #[serde(default)]
    pub batch: BatchConfig,
    /// Logging.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_pipeline_name() -> String {
    "creditcard-fraud".to_string()
}

impl Default for ReconflowConfig {
    fn default() -> Self {
        Self {
            pipeline_name: default_pipeline_name(),
            run_tag: None,
            platform: PlatformConfig::default(),
            polling: PollingConfig::default(),
            features: FeatureGroupConfig::default(),
            training: TrainingConfig::default(),
            registry: RegistryConfig::default(),
            deployment: DeploymentConfig::default(),
            batch: BatchConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ReconflowConfig {
    /// Creates a configuration with every default.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the run tag.
    #[must_use]
    pub fn with_run_tag(mut self, run_tag: impl Into<String>) -> Self {
        self.run_tag = Some(run_tag.into());
        self
    }

    /// Sets both poll timings.
    #[must_use]
    pub fn with_polling(mut self, create: PollConfig, delete: PollConfig) -> Self {
        self.polling.create = create;
        self.polling.delete = delete;
        self
    }

    /// Parses and validates a JSON document.
    ///
    /// # Errors
    ///
    /// Returns `Parse` for malformed JSON and `Invalid` for bad values.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be read, otherwise as
    /// [`from_json_str`](Self::from_json_str).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Checks values that serde cannot.
    ///
    /// # Errors
    ///
    /// Returns `Invalid` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline_name.trim().is_empty() {
            return Err(ConfigError::invalid("pipeline_name", "must not be empty"));
        }
        if let Some(tag) = &self.run_tag {
            check_name("run_tag", tag)?;
        }
        for (field, value) in [
            ("platform.region", &self.platform.region),
            ("platform.bucket", &self.platform.bucket),
            ("platform.role_arn", &self.platform.role_arn),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::invalid(field, "must not be empty"));
            }
        }
        for (field, poll) in [
            ("polling.create", &self.polling.create),
            ("polling.delete", &self.polling.delete),
        ] {
            if poll.timeout_ms == 0 {
                return Err(ConfigError::invalid(field, "timeout must be greater than zero"));
            }
            if poll.interval_ms == 0 {
                return Err(ConfigError::invalid(field, "interval must be greater than zero"));
            }
        }
        if self.polling.page_size == 0 || self.polling.max_candidates == 0 {
            return Err(ConfigError::invalid(
                "polling",
                "page_size and max_candidates must be greater than zero",
            ));
        }

        check_name("features.name", &self.features.name)?;
        if self.features.features.is_empty() {
            return Err(ConfigError::invalid("features.features", "must not be empty"));
        }
        for column in [&self.features.record_identifier, &self.features.event_time_feature] {
            if !self.features.features.iter().any(|f| &f.name == column) {
                return Err(ConfigError::invalid(
                    "features.features",
                    format!("no definition for column '{column}'"),
                ));
            }
        }
        check_name("training.job_prefix", &self.training.job_prefix)?;
        check_name("registry.group_name", &self.registry.group_name)?;
        check_name("deployment.endpoint_name", &self.deployment.endpoint_name)?;
        check_name("deployment.model_prefix", &self.deployment.model_prefix)?;
        check_name("batch.model_prefix", &self.batch.model_prefix)?;
        check_name("batch.job_prefix", &self.batch.job_prefix)?;

        // Deploy and batch inference run concurrently; each must own its model.
        if self.deployment.enabled && self.batch.enabled {
            let tag = self.run_tag.as_deref().unwrap_or(SAMPLE_RUN_TAG);
            let naming = NamingPolicy::for_type(ResourceType::Model);
            if naming.name_for(&self.deployment.model_prefix, tag)
                == naming.name_for(&self.batch.model_prefix, tag)
            {
                return Err(ConfigError::invalid(
                    "batch.model_prefix",
                    format!(
                        "derives the same model name as deployment.model_prefix '{}'",
                        self.deployment.model_prefix
                    ),
                ));
            }
        }
        Ok(())
    }
}

/// Same length as a generated timestamp tag.
const SAMPLE_RUN_TAG: &str = "00000000000000";

fn check_name(field: &str, value: &str) -> Result<(), ConfigError> {
    validate_resource_name(value).map_err(|reason| ConfigError::invalid(field, reason))
}
