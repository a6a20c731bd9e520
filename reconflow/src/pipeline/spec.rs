//! Stage specifications.

use crate::errors::{ContractErrorInfo, PipelineValidationError};
use crate::stages::Stage;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Specification for a single stage in a pipeline.
#[derive(Debug, Clone)]
pub struct StageSpec {
    /// The unique name of the stage.
    pub name: String,
    /// The stage implementation.
    pub runner: Arc<dyn Stage>,
    /// Names of stages this stage depends on.
    pub dependencies: BTreeSet<String>,
}

impl StageSpec {
    /// Creates a new stage specification.
    #[must_use]
    pub fn new(name: impl Into<String>, runner: Arc<dyn Stage>) -> Self {
        Self {
            name: name.into(),
            runner,
            dependencies: BTreeSet::new(),
        }
    }

    /// Creates a specification named after its runner.
    #[must_use]
    pub fn for_stage(runner: Arc<dyn Stage>) -> Self {
        Self::new(runner.name().to_string(), runner)
    }

    /// Sets the dependencies.
    #[must_use]
    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a dependency.
    #[must_use]
    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        self.dependencies.insert(dep.into());
        self
    }

    /// Validates the stage specification.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is blank or the stage depends on itself.
    pub fn validate(&self) -> Result<(), PipelineValidationError> {
        if self.name.trim().is_empty() {
            return Err(PipelineValidationError::new("Stage name cannot be empty").with_error_info(
                ContractErrorInfo::new("PIPELINE-EMPTY-NAME", "Stage name is empty")
                    .with_fix_hint("Give every stage a non-blank name."),
            ));
        }
        if self.dependencies.contains(&self.name) {
            return Err(PipelineValidationError::new(format!(
                "Stage '{}' cannot depend on itself",
                self.name
            ))
            .with_stages(vec![self.name.clone()])
            .with_error_info(
                ContractErrorInfo::new(
                    "PIPELINE-SELF-DEP",
                    format!("Stage '{}' lists itself as a dependency", self.name),
                )
                .with_fix_hint("Remove the stage from its own dependency list."),
            ));
        }
        Ok(())
    }
}
