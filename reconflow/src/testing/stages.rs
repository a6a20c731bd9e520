//! Scripted stages for pipeline tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::cancellation::CancellationToken;
use crate::core::{PipelineStageResult, ResourceRef, ResourceType};
use crate::errors::ReconcileError;
use crate::pipeline::StageContext;
use crate::stages::Stage;

#[derive(Debug)]
enum Script {
    Succeed,
    Fail(ReconcileError),
    Cancel(Arc<CancellationToken>),
}

/// A stage with a fixed outcome that records what it saw.
#[derive(Debug)]
pub struct ScriptedStage {
    name: String,
    script: Script,
    delay: Duration,
    calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedStage {
    fn new(name: impl Into<String>, script: Script) -> Self {
        Self {
            name: name.into(),
            script,
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A stage that produces a feature group named after itself.
    #[must_use]
    pub fn succeeding(name: impl Into<String>) -> Self {
        Self::new(name, Script::Succeed)
    }

    /// A stage that returns `err`.
    #[must_use]
    pub fn failing(name: impl Into<String>, err: ReconcileError) -> Self {
        Self::new(name, Script::Fail(err))
    }

    /// A stage that cancels `token` and then reports cancellation.
    #[must_use]
    pub fn cancelling(name: impl Into<String>, token: Arc<CancellationToken>) -> Self {
        Self::new(name, Script::Cancel(token))
    }

    /// Delays the outcome. The delay ends early on cancellation.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Returns how many times the stage ran.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Returns the input stage names seen on each run.
    #[must_use]
    pub fn seen_inputs(&self) -> Vec<Vec<String>> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Stage for ScriptedStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &StageContext) -> Result<PipelineStageResult, ReconcileError> {
        self.calls
            .lock()
            .push(ctx.inputs().keys().cloned().collect());

        if !self.delay.is_zero() {
            tokio::select! {
                () = ctx.cancel().cancelled() => return Err(ctx.cancel().to_error()),
                () = tokio::time::sleep(self.delay) => {}
            }
        }

        match &self.script {
            Script::Succeed => Ok(PipelineStageResult::success(
                &self.name,
                ResourceRef::new(ResourceType::FeatureGroup, &self.name),
            )),
            Script::Fail(err) => Err(err.clone()),
            Script::Cancel(token) => {
                token.cancel(format!("cancelled by stage '{}'", self.name));
                Err(token.to_error())
            }
        }
    }
}
