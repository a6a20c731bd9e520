//! Resource naming policies.
//!
//! Every resource type uses exactly one policy. `Fixed` names are reused
//! across runs and converge through delete-before-create (or in-place
//! update); `Unique` names carry the run tag, so each run owns its resources
//! and a re-run with the same tag resumes instead of duplicating them.

use crate::core::ResourceType;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Longest name the platform accepts.
pub const MAX_NAME_LEN: usize = 63;

/// How a resource name is derived from its logical base name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingPolicy {
    /// The base name is the resource name, every run.
    Fixed,
    /// `{base}-{run_tag}`, one resource per run tag.
    Unique,
}

impl NamingPolicy {
    /// The policy used for each resource type.
    #[must_use]
    pub fn for_type(resource_type: ResourceType) -> Self {
        match resource_type {
            ResourceType::FeatureGroup
            | ResourceType::ModelPackageGroup
            | ResourceType::ModelPackage
            | ResourceType::Endpoint => Self::Fixed,
            ResourceType::TrainingJob
            | ResourceType::Model
            | ResourceType::EndpointConfig
            | ResourceType::TransformJob => Self::Unique,
        }
    }

    /// Derives the resource name.
    #[must_use]
    pub fn name_for(self, base: &str, run_tag: &str) -> String {
        match self {
            Self::Fixed => base.to_string(),
            Self::Unique => {
                let suffix = format!("-{run_tag}");
                let keep = MAX_NAME_LEN.saturating_sub(suffix.len()).min(base.len());
                let head = base[..keep].trim_end_matches('-');
                format!("{head}{suffix}")
            }
        }
    }
}

/// Builds a run tag from a timestamp, e.g. `20240101120000`.
#[must_use]
pub fn timestamp_run_tag(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d%H%M%S").to_string()
}

#[allow(clippy::expect_used)]
fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9](-*[a-zA-Z0-9])*$").expect("resource name pattern is a valid regex")
    })
}

/// Validates a resource name against the platform's naming rules.
///
/// # Errors
///
/// Returns a description of the violation.
pub fn validate_resource_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("resource name cannot be empty".to_string());
    }
    if name.len() > MAX_NAME_LEN {
        return Err(format!(
            "resource name '{name}' is {} characters, limit is {MAX_NAME_LEN}",
            name.len()
        ));
    }
    if !name_pattern().is_match(name) {
        return Err(format!(
            "resource name '{name}' must be alphanumeric with inner hyphens"
        ));
    }
    Ok(())
}
