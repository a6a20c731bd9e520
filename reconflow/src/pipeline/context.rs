//! Per-stage execution context.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cancellation::CancellationToken;
use crate::core::PipelineStageResult;
use crate::errors::ReconcileError;
use crate::events::EventSink;

/// What a running stage can see.
///
/// Only results of declared dependencies are exposed. A stage asking for
/// anything else gets `UpstreamUnresolved`, the same outcome as a dependency
/// that produced nothing usable.
#[derive(Clone)]
pub struct StageContext {
    stage_name: String,
    run_tag: String,
    inputs: BTreeMap<String, PipelineStageResult>,
    cancel: Arc<CancellationToken>,
    events: Arc<dyn EventSink>,
}

impl StageContext {
    /// Creates a context.
    #[must_use]
    pub fn new(
        stage_name: impl Into<String>,
        run_tag: impl Into<String>,
        inputs: BTreeMap<String, PipelineStageResult>,
        cancel: Arc<CancellationToken>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            stage_name: stage_name.into(),
            run_tag: run_tag.into(),
            inputs,
            cancel,
            events,
        }
    }

    /// Returns the running stage's name.
    #[must_use]
    pub fn stage_name(&self) -> &str {
        &self.stage_name
    }

    /// Returns the run tag used to suffix unique resource names.
    #[must_use]
    pub fn run_tag(&self) -> &str {
        &self.run_tag
    }

    /// Returns the result of a declared dependency, if present.
    #[must_use]
    pub fn input(&self, stage: &str) -> Option<&PipelineStageResult> {
        self.inputs.get(stage)
    }

    /// Returns the successful result of a declared dependency.
    ///
    /// # Errors
    ///
    /// Returns `UpstreamUnresolved` if `stage` is not a dependency of this
    /// stage or did not succeed.
    pub fn require_input(&self, stage: &str) -> Result<&PipelineStageResult, ReconcileError> {
        match self.inputs.get(stage) {
            Some(result) if result.is_success() => Ok(result),
            Some(result) => Err(ReconcileError::upstream_unresolved(format!(
                "stage '{}' requires '{stage}', which did not succeed",
                self.stage_name
            ))
            .with_resource(result.produced_ref.clone())),
            None => Err(ReconcileError::upstream_unresolved(format!(
                "stage '{}' has no input from '{stage}'",
                self.stage_name
            ))),
        }
    }

    /// Returns every visible input.
    #[must_use]
    pub fn inputs(&self) -> &BTreeMap<String, PipelineStageResult> {
        &self.inputs
    }

    /// Returns the pipeline cancellation token.
    #[must_use]
    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns the event sink.
    #[must_use]
    pub fn events(&self) -> &Arc<dyn EventSink> {
        &self.events
    }
}

impl std::fmt::Debug for StageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageContext")
            .field("stage_name", &self.stage_name)
            .field("run_tag", &self.run_tag)
            .field("inputs", &self.inputs.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ResourceRef, ResourceType};
    use crate::errors::ErrorKind;
    use crate::events::NoOpEventSink;

    fn ctx(inputs: BTreeMap<String, PipelineStageResult>) -> StageContext {
        StageContext::new(
            "deploy",
            "20240101120000",
            inputs,
            Arc::new(CancellationToken::new()),
            Arc::new(NoOpEventSink),
        )
    }

    #[test]
    fn test_require_input_returns_declared_result() {
        let produced = ResourceRef::new(ResourceType::ModelPackageGroup, "fraud");
        let mut inputs = BTreeMap::new();
        inputs.insert(
            "register".to_string(),
            PipelineStageResult::success("register", produced.clone()),
        );

        let ctx = ctx(inputs);
        assert_eq!(ctx.require_input("register").unwrap().produced_ref, produced);
        assert_eq!(ctx.run_tag(), "20240101120000");
    }

    #[test]
    fn test_require_input_missing_is_unresolved() {
        let err = ctx(BTreeMap::new()).require_input("train").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UpstreamUnresolved);
        assert!(err.detail.contains("train"));
    }

    #[test]
    fn test_require_input_failed_is_unresolved() {
        let mut inputs = BTreeMap::new();
        inputs.insert(
            "train".to_string(),
            PipelineStageResult::failed("train", ResourceRef::new(ResourceType::TrainingJob, "t")),
        );
        let err = ctx(inputs).require_input("train").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UpstreamUnresolved);
    }
}
