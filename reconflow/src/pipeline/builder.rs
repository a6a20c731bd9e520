//! Pipeline builder with validation.

use super::{StageGraph, StageSpec};
use crate::errors::{ContractErrorInfo, CycleDetectedError, PipelineValidationError};
use crate::stages::Stage;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Builder for creating validated pipelines.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    /// The pipeline name.
    name: String,
    /// The stage specifications.
    stages: HashMap<String, StageSpec>,
    /// Insertion order for stages.
    stage_order: Vec<String>,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: HashMap::new(),
            stage_order: Vec::new(),
        }
    }

    /// Adds a stage whose dependencies have already been added.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails (duplicate name, missing
    /// dependency, self-dependency).
    pub fn stage(
        mut self,
        name: impl Into<String>,
        runner: Arc<dyn Stage>,
        dependencies: &[&str],
    ) -> Result<Self, PipelineValidationError> {
        let spec = StageSpec::new(name, runner).with_dependencies(dependencies.iter().copied());
        self.add_stage_spec(spec)?;
        Ok(self)
    }

    /// Adds a stage with a specification.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails.
    pub fn add_stage_spec(&mut self, spec: StageSpec) -> Result<(), PipelineValidationError> {
        self.admit(&spec)?;
        self.check_dependencies(&spec)?;
        self.store(spec);
        Ok(())
    }

    /// Builds a pipeline from specifications in any order.
    ///
    /// Dependencies are resolved after every stage is known, so forward
    /// references are allowed and cycles become possible; both are checked.
    ///
    /// # Errors
    ///
    /// Returns an error for duplicates, missing dependencies or cycles.
    pub fn from_specs(
        name: impl Into<String>,
        specs: impl IntoIterator<Item = StageSpec>,
    ) -> Result<Self, PipelineValidationError> {
        let mut builder = Self::new(name);
        for spec in specs {
            builder.admit(&spec)?;
            builder.store(spec);
        }
        for name in &builder.stage_order {
            if let Some(spec) = builder.stages.get(name) {
                builder.check_dependencies(spec)?;
            }
        }
        builder.detect_cycles()?;
        Ok(builder)
    }

    /// Builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if the builder has no stages.
    pub fn build(self) -> Result<StageGraph, PipelineValidationError> {
        if self.stages.is_empty() {
            return Err(PipelineValidationError::new("Pipeline has no stages").with_error_info(
                ContractErrorInfo::new("PIPELINE-EMPTY", "Cannot build an empty pipeline")
                    .with_fix_hint("Add at least one stage to the pipeline before building."),
            ));
        }
        self.detect_cycles()?;

        Ok(StageGraph::new(self.name, self.stages, self.stage_order))
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    fn admit(&self, spec: &StageSpec) -> Result<(), PipelineValidationError> {
        spec.validate()?;
        if self.stages.contains_key(&spec.name) {
            return Err(PipelineValidationError::new(format!(
                "Stage '{}' is defined more than once",
                spec.name
            ))
            .with_stages(vec![spec.name.clone()])
            .with_error_info(
                ContractErrorInfo::new(
                    "PIPELINE-DUPLICATE",
                    format!("Duplicate stage name '{}'", spec.name),
                )
                .with_fix_hint("Stage names must be unique within a pipeline."),
            ));
        }
        Ok(())
    }

    fn store(&mut self, spec: StageSpec) {
        self.stage_order.push(spec.name.clone());
        self.stages.insert(spec.name.clone(), spec);
    }

    fn check_dependencies(&self, spec: &StageSpec) -> Result<(), PipelineValidationError> {
        for dep in &spec.dependencies {
            if !self.stages.contains_key(dep) {
                return Err(PipelineValidationError::new(format!(
                    "Stage '{}' depends on unknown stage '{}'",
                    spec.name, dep
                ))
                .with_stages(vec![spec.name.clone(), dep.clone()])
                .with_error_info(
                    ContractErrorInfo::new(
                        "PIPELINE-MISSING-DEP",
                        format!("Dependency '{dep}' not found"),
                    )
                    .with_context_entry("stage", spec.name.clone())
                    .with_fix_hint("Ensure the dependency is added before the stage that depends on it."),
                ));
            }
        }
        Ok(())
    }

    /// Detects cycles in the dependency graph.
    fn detect_cycles(&self) -> Result<(), CycleDetectedError> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for name in &self.stage_order {
            if !visited.contains(name) {
                if let Some(cycle) = self.dfs_cycle(name, &mut visited, &mut rec_stack, &mut path) {
                    return Err(CycleDetectedError::new(cycle));
                }
            }
        }

        Ok(())
    }

    fn dfs_cycle(
        &self,
        node: &str,
        visited: &mut HashSet<String>,
        rec_stack: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        visited.insert(node.to_string());
        rec_stack.insert(node.to_string());
        path.push(node.to_string());

        if let Some(spec) = self.stages.get(node) {
            for dep in &spec.dependencies {
                if !visited.contains(dep) {
                    if let Some(cycle) = self.dfs_cycle(dep, visited, rec_stack, path) {
                        return Some(cycle);
                    }
                } else if rec_stack.contains(dep) {
                    let cycle_start = path.iter().position(|n| n == dep).unwrap_or(0);
                    let mut cycle: Vec<String> = path[cycle_start..].to_vec();
                    cycle.push(dep.clone());
                    return Some(cycle);
                }
            }
        }

        path.pop();
        rec_stack.remove(node);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedStage;

    fn stage(name: &str) -> Arc<dyn Stage> {
        Arc::new(ScriptedStage::succeeding(name))
    }

    #[test]
    fn test_builder_chain() {
        let builder = PipelineBuilder::new("ml")
            .stage("features", stage("features"), &[])
            .unwrap()
            .stage("train", stage("train"), &["features"])
            .unwrap()
            .stage("register", stage("register"), &["train"])
            .unwrap();

        assert_eq!(builder.name(), "ml");
        assert_eq!(builder.stage_count(), 3);
        assert!(builder.build().is_ok());
    }

    #[test]
    fn test_missing_dependency() {
        let err = PipelineBuilder::new("ml")
            .stage("train", stage("train"), &["features"])
            .unwrap_err();

        assert_eq!(err.code(), Some("PIPELINE-MISSING-DEP"));
        assert_eq!(err.stages, vec!["train".to_string(), "features".to_string()]);
    }

    #[test]
    fn test_duplicate_stage() {
        let err = PipelineBuilder::new("ml")
            .stage("train", stage("train"), &[])
            .unwrap()
            .stage("train", stage("train"), &[])
            .unwrap_err();

        assert_eq!(err.code(), Some("PIPELINE-DUPLICATE"));
    }

    #[test]
    fn test_empty_pipeline() {
        let err = PipelineBuilder::new("ml").build().unwrap_err();
        assert_eq!(err.code(), Some("PIPELINE-EMPTY"));
    }

    #[test]
    fn test_from_specs_allows_forward_references() {
        let builder = PipelineBuilder::from_specs(
            "ml",
            [
                StageSpec::new("deploy", stage("deploy")).with_dependency("register"),
                StageSpec::new("register", stage("register")),
            ],
        )
        .unwrap();
        assert_eq!(builder.stage_count(), 2);
    }

    #[test]
    fn test_from_specs_detects_cycle() {
        let err = PipelineBuilder::from_specs(
            "ml",
            [
                StageSpec::new("a", stage("a")).with_dependency("c"),
                StageSpec::new("b", stage("b")).with_dependency("a"),
                StageSpec::new("c", stage("c")).with_dependency("b"),
            ],
        )
        .unwrap_err();

        assert_eq!(err.code(), Some("PIPELINE-CYCLE"));
        assert_eq!(err.stages.first(), err.stages.last());
        assert_eq!(err.stages.len(), 4);
    }
}
