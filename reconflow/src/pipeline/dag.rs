//! DAG execution of pipeline stages.
//!
//! Stages start as soon as every dependency has succeeded. A failure skips
//! the failed stage's descendants only; independent branches keep running.

use super::context::StageContext;
use super::report::{PipelineReport, SkipReason, StageFailure, StageOutcome, StageRecord};
use super::StageSpec;
use crate::cancellation::CancellationToken;
use crate::core::PipelineStageResult;
use crate::errors::{ErrorKind, ReconcileError};
use crate::events::{EventSink, LifecycleEvent};
use crate::utils::generate_run_id;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinError;
use tracing::{error, info};

type StageRun = (Result<PipelineStageResult, ReconcileError>, f64);
type StageTask = BoxFuture<'static, (String, Result<StageRun, JoinError>)>;

/// A directed acyclic graph of stages for execution.
#[derive(Debug)]
pub struct StageGraph {
    /// The pipeline name.
    name: String,
    /// Stage specifications.
    stages: HashMap<String, StageSpec>,
    /// Execution order (topologically sorted).
    execution_order: Vec<String>,
}

impl StageGraph {
    /// Creates a new stage graph.
    #[must_use]
    pub fn new(name: String, stages: HashMap<String, StageSpec>, stage_order: Vec<String>) -> Self {
        let execution_order = topological_sort(&stages, &stage_order);

        Self {
            name,
            stages,
            execution_order,
        }
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

    /// Returns the execution order.
    #[must_use]
    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    /// Returns the transitive dependents of `stage`, in execution order.
    #[must_use]
    pub fn descendants(&self, stage: &str) -> Vec<String> {
        let mut found: HashSet<&str> = HashSet::new();
        found.insert(stage);
        let mut result = Vec::new();
        // Execution order lists parents first, so one pass suffices.
        for name in &self.execution_order {
            if let Some(spec) = self.stages.get(name) {
                if spec.dependencies.iter().any(|d| found.contains(d.as_str())) {
                    found.insert(name);
                    result.push(name.clone());
                }
            }
        }
        result
    }

    /// Runs every stage and returns the aggregate report.
    ///
    /// Each stage runs as its own task. On failure the stage's descendants
    /// are recorded as skipped and never scheduled. Once `cancel` fires no
    /// new stage is scheduled; running stages observe the same token and
    /// end promptly with `Cancelled`.
    pub async fn run(
        &self,
        run_tag: &str,
        cancel: Arc<CancellationToken>,
        events: Arc<dyn EventSink>,
    ) -> PipelineReport {
        let start = Instant::now();
        let run_id = generate_run_id();
        info!(pipeline = %self.name, run_tag, %run_id, stages = self.stages.len(), "Pipeline started");

        let mut in_degree: HashMap<&str, usize> = self
            .stages
            .iter()
            .map(|(name, spec)| (name.as_str(), spec.dependencies.len()))
            .collect();
        let mut results: BTreeMap<String, PipelineStageResult> = BTreeMap::new();
        let mut recorded: HashSet<String> = HashSet::new();
        let mut records: Vec<StageRecord> = Vec::new();
        let mut first_failure: Option<StageFailure> = None;
        let mut stage_cancelled = false;
        let mut active: FuturesUnordered<StageTask> = FuturesUnordered::new();

        if !cancel.is_cancelled() {
            for name in &self.execution_order {
                if in_degree.get(name.as_str()) == Some(&0) {
                    active.push(self.spawn_stage_task(name, run_tag, &results, &cancel, &events));
                }
            }
        }

        while let Some((stage, joined)) = active.next().await {
            let (outcome, duration_ms) = match joined {
                Ok((Ok(result), duration_ms)) if result.is_success() => {
                    (StageOutcome::Succeeded { result }, duration_ms)
                }
                Ok((Ok(result), duration_ms)) => (
                    StageOutcome::Failed {
                        kind: ErrorKind::OperationFailed,
                        detail: format!("stage '{stage}' reported failure"),
                        resource: Some(result.produced_ref),
                        phase: None,
                        elapsed_ms: None,
                    },
                    duration_ms,
                ),
                Ok((Err(err), duration_ms)) => (StageOutcome::from_error(&err), duration_ms),
                Err(join_err) => (
                    StageOutcome::Failed {
                        kind: ErrorKind::OperationFailed,
                        detail: format!("stage task aborted: {join_err}"),
                        resource: None,
                        phase: None,
                        elapsed_ms: None,
                    },
                    0.0,
                ),
            };

            match &outcome {
                StageOutcome::Succeeded { result } => {
                    events.emit(&LifecycleEvent::StageSucceeded {
                        stage: stage.clone(),
                        produced: result.produced_ref.clone(),
                        duration_ms,
                    });
                    results.insert(stage.clone(), result.clone());
                }
                StageOutcome::Failed { kind, detail, .. } => {
                    error!(pipeline = %self.name, stage = %stage, %kind, detail = %detail, "Stage failed");
                    events.emit(&LifecycleEvent::StageFailed {
                        stage: stage.clone(),
                        kind: *kind,
                        detail: detail.clone(),
                    });
                    if first_failure.is_none() {
                        first_failure = StageFailure::from_outcome(&stage, &outcome);
                    }
                }
                StageOutcome::Cancelled { .. } => {
                    stage_cancelled = true;
                    events.emit(&LifecycleEvent::StageCancelled {
                        stage: stage.clone(),
                    });
                }
                StageOutcome::Skipped { .. } => {}
            }

            let succeeded = outcome.is_success();
            let failed = matches!(outcome, StageOutcome::Failed { .. });
            recorded.insert(stage.clone());
            records.push(StageRecord {
                stage: stage.clone(),
                outcome,
                duration_ms,
            });

            if failed {
                for blocked in self.descendants(&stage) {
                    if recorded.insert(blocked.clone()) {
                        let reason = SkipReason::UpstreamFailed {
                            stage: stage.clone(),
                        };
                        events.emit(&LifecycleEvent::StageSkipped {
                            stage: blocked.clone(),
                            reason: reason.to_string(),
                        });
                        records.push(StageRecord {
                            stage: blocked,
                            outcome: StageOutcome::Skipped { reason },
                            duration_ms: 0.0,
                        });
                    }
                }
            }

            if !succeeded {
                continue;
            }
            for child in &self.execution_order {
                let Some(spec) = self.stages.get(child) else {
                    continue;
                };
                if !spec.dependencies.contains(&stage) {
                    continue;
                }
                let Some(count) = in_degree.get_mut(child.as_str()) else {
                    continue;
                };
                *count = count.saturating_sub(1);
                if *count == 0 && !recorded.contains(child) && !cancel.is_cancelled() {
                    active.push(self.spawn_stage_task(child, run_tag, &results, &cancel, &events));
                }
            }
        }

        for name in &self.execution_order {
            if recorded.insert(name.clone()) {
                let reason = SkipReason::PipelineCancelled;
                events.emit(&LifecycleEvent::StageSkipped {
                    stage: name.clone(),
                    reason: reason.to_string(),
                });
                records.push(StageRecord {
                    stage: name.clone(),
                    outcome: StageOutcome::Skipped { reason },
                    duration_ms: 0.0,
                });
            }
        }

        let report = PipelineReport {
            pipeline: self.name.clone(),
            run_tag: run_tag.to_string(),
            run_id,
            records,
            first_failure,
            cancelled: cancel.is_cancelled() || stage_cancelled,
            duration_ms: start.elapsed().as_secs_f64() * 1000.0,
        };
        info!(
            pipeline = %self.name,
            succeeded = report.succeeded(),
            cancelled = report.cancelled,
            duration_ms = report.duration_ms,
            "Pipeline finished"
        );
        report
    }

    /// Spawns a task to execute a single stage.
    fn spawn_stage_task(
        &self,
        stage_name: &str,
        run_tag: &str,
        completed: &BTreeMap<String, PipelineStageResult>,
        cancel: &Arc<CancellationToken>,
        events: &Arc<dyn EventSink>,
    ) -> StageTask {
        let name = stage_name.to_string();
        let Some(spec) = self.stages.get(stage_name) else {
            let missing = ReconcileError::upstream_unresolved(format!("unknown stage '{name}'"));
            return async move { (name, Ok((Err(missing), 0.0))) }.boxed();
        };

        let inputs: BTreeMap<String, PipelineStageResult> = spec
            .dependencies
            .iter()
            .filter_map(|dep| completed.get(dep).map(|r| (dep.clone(), r.clone())))
            .collect();
        let ctx = StageContext::new(&name, run_tag, inputs, cancel.clone(), events.clone());
        let runner = spec.runner.clone();

        events.emit(&LifecycleEvent::StageStarted { stage: name.clone() });
        info!(stage = %name, "Stage started");

        let handle = tokio::spawn(async move {
            let stage_start = Instant::now();
            let result = runner.run(&ctx).await;
            (result, stage_start.elapsed().as_secs_f64() * 1000.0)
        });
        async move { (name, handle.await) }.boxed()
    }
}

/// Performs topological sort on the stage graph.
fn topological_sort(stages: &HashMap<String, StageSpec>, stage_order: &[String]) -> Vec<String> {
    let mut result = Vec::new();
    let mut visited = HashSet::new();
    let mut temp_visited = HashSet::new();

    fn visit(
        node: &str,
        stages: &HashMap<String, StageSpec>,
        visited: &mut HashSet<String>,
        temp_visited: &mut HashSet<String>,
        result: &mut Vec<String>,
    ) {
        if visited.contains(node) || temp_visited.contains(node) {
            return;
        }

        temp_visited.insert(node.to_string());

        if let Some(spec) = stages.get(node) {
            for dep in &spec.dependencies {
                visit(dep, stages, visited, temp_visited, result);
            }
        }

        temp_visited.remove(node);
        visited.insert(node.to_string());
        result.push(node.to_string());
    }

    // Visit in insertion order for determinism
    for name in stage_order {
        visit(name, stages, &mut visited, &mut temp_visited, &mut result);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Phase, ResourceRef, ResourceState, ResourceType};
    use crate::events::CollectingEventSink;
    use crate::pipeline::PipelineBuilder;
    use crate::stages::Stage;
    use crate::testing::ScriptedStage;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn diamond(stages: [Arc<ScriptedStage>; 4]) -> StageGraph {
        let [a, b, c, d] = stages;
        PipelineBuilder::new("diamond")
            .stage("a", a, &[])
            .unwrap()
            .stage("b", b, &["a"])
            .unwrap()
            .stage("c", c, &["a"])
            .unwrap()
            .stage("d", d, &["b"])
            .unwrap()
            .build()
            .unwrap()
    }

    async fn run(graph: &StageGraph) -> (PipelineReport, Arc<CollectingEventSink>) {
        let events = Arc::new(CollectingEventSink::new());
        let report = graph
            .run("tag", Arc::new(CancellationToken::new()), events.clone())
            .await;
        (report, events)
    }

    #[test]
    fn test_topological_order_and_descendants() {
        let graph = diamond([
            Arc::new(ScriptedStage::succeeding("a")),
            Arc::new(ScriptedStage::succeeding("b")),
            Arc::new(ScriptedStage::succeeding("c")),
            Arc::new(ScriptedStage::succeeding("d")),
        ]);
        assert_eq!(graph.execution_order(), &["a", "b", "c", "d"]);
        assert_eq!(graph.descendants("a"), vec!["b", "c", "d"]);
        assert_eq!(graph.descendants("b"), vec!["d"]);
        assert!(graph.descendants("d").is_empty());
    }

    #[tokio::test]
    async fn test_all_stages_succeed_and_receive_inputs() {
        let d = Arc::new(ScriptedStage::succeeding("d"));
        let graph = diamond([
            Arc::new(ScriptedStage::succeeding("a")),
            Arc::new(ScriptedStage::succeeding("b")),
            Arc::new(ScriptedStage::succeeding("c")),
            d.clone(),
        ]);

        let (report, events) = run(&graph).await;

        assert!(report.succeeded());
        assert_eq!(report.succeeded_stages().len(), 4);
        assert_eq!(d.seen_inputs(), vec![vec!["b".to_string()]]);
        assert_eq!(events.names_with_prefix("stage.started").len(), 4);
        assert!(report.first_failure.is_none());
    }

    #[tokio::test]
    async fn test_failure_halts_downstream_but_not_siblings() {
        let job = ResourceRef::new(ResourceType::TrainingJob, "train-tag");
        let c = Arc::new(ScriptedStage::succeeding("c"));
        let d = Arc::new(ScriptedStage::succeeding("d"));
        let graph = diamond([
            Arc::new(ScriptedStage::succeeding("a")),
            Arc::new(ScriptedStage::failing(
                "b",
                ReconcileError::new(ErrorKind::CreateFailed, "training diverged")
                    .with_state(ResourceState::observed(job.clone(), Phase::Failed))
                    .with_elapsed(Duration::from_millis(420)),
            )),
            c.clone(),
            d.clone(),
        ]);

        let (report, events) = run(&graph).await;

        assert!(!report.succeeded());
        assert_eq!(d.call_count(), 0);
        assert_eq!(c.call_count(), 1);
        let failure = report.first_failure.clone().unwrap();
        assert_eq!(failure.stage, "b");
        assert_eq!(failure.kind, ErrorKind::CreateFailed);
        assert_eq!(failure.resource, Some(job));
        assert_eq!(failure.phase, Some(Phase::Failed));
        assert_eq!(failure.elapsed_ms, Some(420));
        assert_eq!(report.skipped(), vec!["d"]);
        assert_eq!(
            report.outcome("d"),
            Some(&StageOutcome::Skipped {
                reason: SkipReason::UpstreamFailed {
                    stage: "b".to_string()
                }
            })
        );
        assert!(report.outcome("c").unwrap().is_success());
        assert!(!report.cancelled);
        assert_eq!(events.names_with_prefix("stage.skipped"), vec!["stage.skipped"]);
    }

    #[tokio::test]
    async fn test_independent_stages_run_concurrently() {
        let slow = Duration::from_millis(150);
        let graph = PipelineBuilder::new("fanout")
            .stage("x", Arc::new(ScriptedStage::succeeding("x").with_delay(slow)), &[])
            .unwrap()
            .stage("y", Arc::new(ScriptedStage::succeeding("y").with_delay(slow)), &[])
            .unwrap()
            .build()
            .unwrap();

        let start = Instant::now();
        let (report, _) = run(&graph).await;

        assert!(report.succeeded());
        assert!(start.elapsed() < Duration::from_millis(280));
    }

    #[tokio::test]
    async fn test_cancellation_skips_unscheduled_stages() {
        let token = Arc::new(CancellationToken::new());
        let second = Arc::new(ScriptedStage::succeeding("second"));
        let graph = PipelineBuilder::new("cancel")
            .stage(
                "first",
                Arc::new(ScriptedStage::cancelling("first", token.clone())),
                &[],
            )
            .unwrap()
            .stage("second", second.clone(), &["first"])
            .unwrap()
            .build()
            .unwrap();

        let report = graph
            .run("tag", token.clone(), Arc::new(CollectingEventSink::new()))
            .await;

        assert!(report.cancelled);
        assert!(report.first_failure.is_none());
        assert_eq!(second.call_count(), 0);
        assert_eq!(report.skipped(), vec!["second"]);
        assert!(matches!(
            report.outcome("first"),
            Some(StageOutcome::Cancelled { .. })
        ));
    }

    #[tokio::test]
    async fn test_stage_reporting_failed_status_is_failure() {
        #[derive(Debug)]
        struct Reporting;

        #[async_trait::async_trait]
        impl Stage for Reporting {
            fn name(&self) -> &str {
                "reporting"
            }

            async fn run(&self, _ctx: &StageContext) -> Result<PipelineStageResult, ReconcileError> {
                Ok(PipelineStageResult::failed(
                    "reporting",
                    ResourceRef::new(ResourceType::TransformJob, "batch"),
                ))
            }
        }

        let graph = PipelineBuilder::new("p")
            .stage("reporting", Arc::new(Reporting), &[])
            .unwrap()
            .build()
            .unwrap();
        let (report, _) = run(&graph).await;

        assert_eq!(
            report.first_failure.map(|f| f.kind),
            Some(ErrorKind::OperationFailed)
        );
    }
}
