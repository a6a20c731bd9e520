//! The idempotent reconcile algorithm.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::poller::{poll, PollConfig, PollTarget, UNTIL_ABSENT, UNTIL_ACTIVE, UNTIL_SETTLED};
use super::resolver::{list_bounded, DEFAULT_MAX_CANDIDATES, DEFAULT_PAGE_SIZE};
use crate::cancellation::CancellationToken;
use crate::core::{DesiredSpec, Phase, ResourceRef, ResourceState, ResourceType, UpdateStrategy};
use crate::errors::{ErrorKind, ReconcileError};
use crate::events::{EventSink, LifecycleEvent, NoOpEventSink};
use crate::platform::{Platform, PlatformError};

/// Upper bound on list-then-delete rounds when emptying a parent.
const MAX_CHILD_SWEEPS: usize = 64;

/// Per-call options for [`Reconciler::reconcile`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOptions {
    /// Replace the resource even if it already matches.
    #[serde(default)]
    pub force_recreate: bool,
}

impl ReconcileOptions {
    /// Options that force replacement.
    #[must_use]
    pub fn forced() -> Self {
        Self {
            force_recreate: true,
        }
    }
}

/// Observes a resource, mapping "not found" to `Absent`.
async fn observe_on(platform: &dyn Platform, reference: &ResourceRef) -> Result<ResourceState, ReconcileError> {
    match platform.describe(reference).await {
        Ok(state) => Ok(state),
        Err(PlatformError::NotFound(_)) => Ok(ResourceState::absent(reference.clone())),
        Err(err) => Err(ReconcileError::from(err).with_resource(reference.clone())),
    }
}

/// Converges remote resources onto desired specs.
///
/// One algorithm serves every resource type; what differs per type is read
/// from [`ResourceType::capabilities`]. The reconciler holds no state between
/// calls, so a second call against the same spec is a no-op and a call after
/// a crash resumes from whatever the platform reports.
pub struct Reconciler {
    platform: Arc<dyn Platform>,
    create_poll: PollConfig,
    delete_poll: PollConfig,
    events: Arc<dyn EventSink>,
    page_size: usize,
    max_candidates: usize,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("create_poll", &self.create_poll)
            .field("delete_poll", &self.delete_poll)
            .field("page_size", &self.page_size)
            .field("max_candidates", &self.max_candidates)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a reconciler with default poll timing.
    #[must_use]
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self {
            platform,
            create_poll: PollConfig::default(),
            delete_poll: PollConfig::default(),
            events: Arc::new(NoOpEventSink),
            page_size: DEFAULT_PAGE_SIZE,
            max_candidates: DEFAULT_MAX_CANDIDATES,
        }
    }

    /// Sets the timing for create and update waits.
    #[must_use]
    pub fn with_create_poll(mut self, config: PollConfig) -> Self {
        self.create_poll = config;
        self
    }

    /// Sets the timing for delete waits.
    #[must_use]
    pub fn with_delete_poll(mut self, config: PollConfig) -> Self {
        self.delete_poll = config;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Sets the bounds used when listing children.
    #[must_use]
    pub fn with_bounds(mut self, page_size: usize, max_candidates: usize) -> Self {
        self.page_size = page_size.max(1);
        self.max_candidates = max_candidates.max(1);
        self
    }

    /// Returns the platform.
    #[must_use]
    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }

    /// Returns the event sink.
    #[must_use]
    pub fn events(&self) -> &Arc<dyn EventSink> {
        &self.events
    }

    /// Observes a resource once. "Not found" is reported as `Absent`.
    ///
    /// # Errors
    ///
    /// Propagates platform failures other than "not found".
    pub async fn observe(&self, reference: &ResourceRef) -> Result<ResourceState, ReconcileError> {
        observe_on(self.platform.as_ref(), reference).await
    }

    /// Converges `desired` and returns its final `Active` state.
    ///
    /// A resource already `Active` with a matching fingerprint is left
    /// untouched unless `options.force_recreate` is set. A conflicting or
    /// `Failed` resource is updated in place when its type allows it, and
    /// otherwise deleted (children first) and recreated. Create is never
    /// issued until the delete has been observed reaching `Absent`.
    ///
    /// # Errors
    ///
    /// - `InvalidSpec` if the spec fails validation.
    /// - `DeleteTimeout` if the old resource never disappears.
    /// - `CreateFailed` if the new resource ends `Failed`.
    /// - `Conflict` if the resource must be replaced but cannot be deleted.
    /// - `Timeout`, `Cancelled` or `Platform` from the underlying calls.
    pub async fn reconcile(
        &self,
        desired: &DesiredSpec,
        options: ReconcileOptions,
        cancel: &CancellationToken,
    ) -> Result<ResourceState, ReconcileError> {
        desired.validate()?;
        cancel.check()?;

        let reference = desired.reference();
        let capabilities = reference.resource_type.capabilities();
        let mut state = self.observe(&reference).await?;
        self.events.emit(&LifecycleEvent::Observed {
            resource: reference.clone(),
            phase: state.phase,
        });

        if state.phase.is_settling() {
            info!(resource = %reference, phase = %state.phase, "Waiting for resource to settle");
            state = self
                .wait(&reference, UNTIL_SETTLED, &self.create_poll, cancel)
                .await?;
        }
        if state.phase == Phase::Deleting {
            self.await_absent(&reference, cancel).await?;
            state = ResourceState::absent(reference.clone());
        }

        let compatible = desired.matches(&state);
        match state.phase {
            Phase::Absent => self.create(desired, cancel).await,
            Phase::Active if compatible && !options.force_recreate => {
                info!(resource = %reference, "Resource already matches desired spec");
                self.events.emit(&LifecycleEvent::Unchanged { resource: reference });
                Ok(state)
            }
            Phase::Active
                if !options.force_recreate && capabilities.update == UpdateStrategy::InPlace =>
            {
                self.update(&reference, desired, cancel).await
            }
            _ => {
                if !capabilities.deletable {
                    return Err(ReconcileError::new(
                        ErrorKind::Conflict,
                        format!(
                            "{reference} is {} with a different spec and cannot be deleted; use a new name",
                            state.phase
                        ),
                    )
                    .with_state(state));
                }
                warn!(
                    resource = %reference,
                    phase = %state.phase,
                    forced = options.force_recreate,
                    "Replacing resource"
                );
                if let Some(children) = capabilities.children {
                    self.delete_children(&reference, children, cancel).await?;
                }
                self.delete_and_wait(&reference, cancel).await?;
                self.create(desired, cancel).await
            }
        }
    }

    /// Creates a new resource from `desired` and waits for it to become
    /// `Active`, without looking for an existing one.
    ///
    /// Used for platform-named resources such as model packages, where every
    /// create yields a new version.
    ///
    /// # Errors
    ///
    /// `CreateFailed`, `Timeout`, `Cancelled`, `InvalidSpec` or `Platform`.
    pub async fn create_new(
        &self,
        desired: &DesiredSpec,
        cancel: &CancellationToken,
    ) -> Result<ResourceState, ReconcileError> {
        desired.validate()?;
        self.create(desired, cancel).await
    }

    /// Deletes a resource and its children and waits for it to disappear.
    ///
    /// Deleting something already absent is a no-op.
    ///
    /// # Errors
    ///
    /// `Conflict` for types that cannot be deleted, `DeleteTimeout`,
    /// `Cancelled` or `Platform`.
    pub async fn delete(
        &self,
        reference: &ResourceRef,
        cancel: &CancellationToken,
    ) -> Result<ResourceState, ReconcileError> {
        cancel.check()?;
        let state = self.observe(reference).await?;
        if state.is_absent() {
            return Ok(state);
        }
        let capabilities = reference.resource_type.capabilities();
        if !capabilities.deletable {
            return Err(ReconcileError::new(
                ErrorKind::Conflict,
                format!("{} resources cannot be deleted", reference.resource_type),
            )
            .with_state(state));
        }
        if let Some(children) = capabilities.children {
            self.delete_children(reference, children, cancel).await?;
        }
        if state.phase == Phase::Deleting {
            self.await_absent(reference, cancel).await?;
        } else {
            self.delete_and_wait(reference, cancel).await?;
        }
        Ok(ResourceState::absent(reference.clone()))
    }

    async fn create(
        &self,
        desired: &DesiredSpec,
        cancel: &CancellationToken,
    ) -> Result<ResourceState, ReconcileError> {
        cancel.check()?;
        let requested = desired.reference();
        info!(resource_type = %desired.resource_type, resource = %requested.name(), "Creating resource");
        let created = self
            .platform
            .create(desired)
            .await
            .map_err(|e| ReconcileError::from(e).with_resource(requested))?;
        self.events.emit(&LifecycleEvent::CreateIssued {
            resource: created.clone(),
        });

        let state = self
            .wait(&created, UNTIL_ACTIVE, &self.create_poll, cancel)
            .await
            .map_err(|e| match e.kind {
                ErrorKind::OperationFailed => e.into_kind(ErrorKind::CreateFailed),
                _ => e,
            })?;
        self.settled(&state);
        Ok(state)
    }

    async fn update(
        &self,
        reference: &ResourceRef,
        desired: &DesiredSpec,
        cancel: &CancellationToken,
    ) -> Result<ResourceState, ReconcileError> {
        cancel.check()?;
        info!(resource_type = %reference.resource_type, resource = %reference.name(), "Updating resource in place");
        self.platform
            .update(reference, desired)
            .await
            .map_err(|e| ReconcileError::from(e).with_resource(reference.clone()))?;
        self.events.emit(&LifecycleEvent::UpdateIssued {
            resource: reference.clone(),
        });

        let state = self
            .wait(reference, UNTIL_ACTIVE, &self.create_poll, cancel)
            .await?;
        self.settled(&state);
        Ok(state)
    }

    async fn delete_children(
        &self,
        parent: &ResourceRef,
        child_type: ResourceType,
        cancel: &CancellationToken,
    ) -> Result<(), ReconcileError> {
        // Listings are bounded, so sweep until a listing comes back empty.
        for sweep in 1..=MAX_CHILD_SWEEPS {
            let children = list_bounded(
                self.platform.as_ref(),
                child_type,
                Some(parent.name()),
                self.page_size,
                self.max_candidates,
            )
            .await?;
            if children.is_empty() {
                return Ok(());
            }
            warn!(
                resource = %parent,
                children = children.len(),
                sweep,
                "Deleting children before parent"
            );
            for child in children {
                if child.phase == Phase::Deleting {
                    self.await_absent(&child.reference, cancel).await?;
                } else {
                    self.delete_and_wait(&child.reference, cancel).await?;
                }
            }
        }
        Err(ReconcileError::new(
            ErrorKind::Conflict,
            format!("children of {parent} remain after {MAX_CHILD_SWEEPS} delete sweeps"),
        )
        .with_resource(parent.clone()))
    }

    async fn delete_and_wait(
        &self,
        reference: &ResourceRef,
        cancel: &CancellationToken,
    ) -> Result<(), ReconcileError> {
        cancel.check()?;
        info!(resource_type = %reference.resource_type, resource = %reference.name(), "Deleting resource");
        match self.platform.delete(reference).await {
            Ok(()) | Err(PlatformError::NotFound(_)) => {}
            Err(err) => return Err(ReconcileError::from(err).with_resource(reference.clone())),
        }
        self.events.emit(&LifecycleEvent::DeleteIssued {
            resource: reference.clone(),
        });
        self.await_absent(reference, cancel).await
    }

    async fn await_absent(
        &self,
        reference: &ResourceRef,
        cancel: &CancellationToken,
    ) -> Result<(), ReconcileError> {
        self.wait(reference, UNTIL_ABSENT, &self.delete_poll, cancel)
            .await
            .map_err(|e| match e.kind {
                ErrorKind::Timeout => {
                    let detail = format!("delete not observed completing: {}", e.detail);
                    ReconcileError { detail, ..e }.into_kind(ErrorKind::DeleteTimeout)
                }
                _ => e,
            })?;
        self.events.emit(&LifecycleEvent::Deleted {
            resource: reference.clone(),
        });
        Ok(())
    }

    async fn wait(
        &self,
        reference: &ResourceRef,
        target: PollTarget<'_>,
        config: &PollConfig,
        cancel: &CancellationToken,
    ) -> Result<ResourceState, ReconcileError> {
        let platform = self.platform.as_ref();
        let start = Instant::now();
        let state = poll(reference, move || observe_on(platform, reference), target, config, cancel).await?;
        info!(
            resource = %reference,
            phase = %state.phase,
            elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Resource settled"
        );
        Ok(state)
    }

    fn settled(&self, state: &ResourceState) {
        self.events.emit(&LifecycleEvent::Settled {
            resource: state.reference.clone(),
            phase: state.phase,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ApprovalStatus;
    use crate::events::CollectingEventSink;
    use crate::platform::MockPlatform;
    use crate::testing::{InMemoryPlatform, PlatformCall};
    use serde_json::json;
    use std::time::Duration;

    fn fast(timeout_ms: u64) -> PollConfig {
        PollConfig::new()
            .with_interval(Duration::from_millis(2))
            .with_timeout(Duration::from_millis(timeout_ms))
    }

    fn reconciler(platform: &Arc<InMemoryPlatform>) -> Reconciler {
        Reconciler::new(platform.clone())
            .with_create_poll(fast(2_000))
            .with_delete_poll(fast(2_000))
    }

    fn fg_spec(version: u32) -> DesiredSpec {
        DesiredSpec::new(
            ResourceType::FeatureGroup,
            "creditcard-fg",
            json!({"RecordIdentifierFeatureName": "record_id", "version": version}),
        )
    }

    fn group_spec() -> DesiredSpec {
        DesiredSpec::new(
            ResourceType::ModelPackageGroup,
            "fraud",
            json!({"ModelPackageGroupDescription": "fraud models"}),
        )
    }

    #[tokio::test]
    async fn test_absent_creates_then_second_run_is_noop() {
        let platform = Arc::new(InMemoryPlatform::new().with_steps(2));
        let events = Arc::new(CollectingEventSink::new());
        let reconciler = reconciler(&platform).with_events(events.clone());
        let token = CancellationToken::new();

        let first = reconciler
            .reconcile(&fg_spec(1), ReconcileOptions::default(), &token)
            .await
            .unwrap();
        assert_eq!(first.phase, Phase::Active);
        assert_eq!(platform.creates().len(), 1);

        let second = reconciler
            .reconcile(&fg_spec(1), ReconcileOptions::default(), &token)
            .await
            .unwrap();
        assert_eq!(second.phase, Phase::Active);
        assert_eq!(second.reference, first.reference);
        assert_eq!(platform.creates().len(), 1);
        assert!(platform.deletes().is_empty());
        assert!(events.position(|e| matches!(e, LifecycleEvent::Unchanged { .. })).is_some());
    }

    #[tokio::test]
    async fn test_conflicting_spec_deletes_before_create() {
        let platform = Arc::new(InMemoryPlatform::new().with_steps(2));
        let reference = platform.seed(&fg_spec(1), Phase::Active);
        let token = CancellationToken::new();

        let state = reconciler(&platform)
            .reconcile(&fg_spec(2), ReconcileOptions::default(), &token)
            .await
            .unwrap();
        assert!(state.is_active());
        assert_eq!(state.fingerprint, Some(fg_spec(2).fingerprint()));

        let calls = platform.calls();
        let delete_at = calls
            .iter()
            .position(|c| matches!(c, PlatformCall::Delete { .. }))
            .unwrap();
        let absent_at = calls
            .iter()
            .position(|c| {
                matches!(c, PlatformCall::Describe { resource, observed: Phase::Absent } if *resource == reference)
            })
            .unwrap();
        let create_at = calls
            .iter()
            .position(|c| matches!(c, PlatformCall::Create { .. }))
            .unwrap();
        assert!(delete_at < absent_at);
        assert!(absent_at < create_at);
    }

    #[tokio::test]
    async fn test_stalled_delete_never_creates() {
        let platform = Arc::new(InMemoryPlatform::new());
        platform.seed(&fg_spec(1), Phase::Active);
        platform.stall_delete("creditcard-fg");
        let token = CancellationToken::new();

        let err = Reconciler::new(platform.clone())
            .with_delete_poll(fast(60))
            .reconcile(&fg_spec(2), ReconcileOptions::default(), &token)
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::DeleteTimeout);
        assert_eq!(err.phase(), Some(Phase::Deleting));
        assert!(platform.creates().is_empty());
    }

    #[tokio::test]
    async fn test_failed_creation_is_create_failed() {
        let platform = Arc::new(InMemoryPlatform::new());
        platform.fail_create("creditcard-fg", "offline store bucket missing");
        let token = CancellationToken::new();

        let err = reconciler(&platform)
            .reconcile(&fg_spec(1), ReconcileOptions::default(), &token)
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::CreateFailed);
        assert_eq!(err.detail, "offline store bucket missing");
        assert_eq!(err.phase(), Some(Phase::Failed));
    }

    #[tokio::test]
    async fn test_failed_resource_is_replaced() {
        let platform = Arc::new(InMemoryPlatform::new());
        let reference = platform.seed(&fg_spec(1), Phase::Failed);
        let token = CancellationToken::new();

        let state = reconciler(&platform)
            .reconcile(&fg_spec(1), ReconcileOptions::default(), &token)
            .await
            .unwrap();

        assert!(state.is_active());
        assert_eq!(platform.deletes(), vec![reference.clone()]);
        assert_eq!(platform.creates(), vec![reference]);
    }

    #[tokio::test]
    async fn test_resumes_resource_left_creating() {
        let platform = Arc::new(InMemoryPlatform::new());
        let reference = platform.create(&fg_spec(1)).await.unwrap();
        platform.clear_calls();
        let token = CancellationToken::new();

        let state = reconciler(&platform)
            .reconcile(&fg_spec(1), ReconcileOptions::default(), &token)
            .await
            .unwrap();

        assert_eq!(state.reference, reference);
        assert!(state.is_active());
        assert_eq!(platform.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_resumes_resource_left_deleting() {
        let platform = Arc::new(InMemoryPlatform::new());
        let reference = platform.seed(&fg_spec(1), Phase::Active);
        platform.delete(&reference).await.unwrap();
        platform.clear_calls();
        let token = CancellationToken::new();

        let state = reconciler(&platform)
            .reconcile(&fg_spec(1), ReconcileOptions::default(), &token)
            .await
            .unwrap();

        assert!(state.is_active());
        assert!(platform.deletes().is_empty());
        assert_eq!(platform.creates().len(), 1);
    }

    #[tokio::test]
    async fn test_force_recreate_empties_group() {
        let platform = Arc::new(InMemoryPlatform::new());
        let group = platform.seed(&group_spec(), Phase::Active);
        for _ in 0..3 {
            platform.seed_package("fraud", ApprovalStatus::Approved);
        }
        let events = Arc::new(CollectingEventSink::new());
        let token = CancellationToken::new();

        let state = reconciler(&platform)
            .with_events(events.clone())
            .reconcile(&group_spec(), ReconcileOptions::forced(), &token)
            .await
            .unwrap();

        assert!(state.is_active());
        assert!(platform.packages_in("fraud").is_empty());
        let deletes = platform.deletes();
        assert_eq!(deletes.len(), 4);
        assert_eq!(deletes.last(), Some(&group));
        assert!(deletes[..3]
            .iter()
            .all(|r| r.resource_type == ResourceType::ModelPackage));
        assert_eq!(events.names_with_prefix("resource.deleted").len(), 4);
    }

    #[tokio::test]
    async fn test_force_recreate_sweeps_past_listing_bound() {
        let platform = Arc::new(InMemoryPlatform::new());
        let group = platform.seed(&group_spec(), Phase::Active);
        for _ in 0..5 {
            platform.seed_package("fraud", ApprovalStatus::Approved);
        }
        let token = CancellationToken::new();

        let state = reconciler(&platform)
            .with_bounds(2, 2)
            .reconcile(&group_spec(), ReconcileOptions::forced(), &token)
            .await
            .unwrap();

        assert!(state.is_active());
        assert!(platform.packages_in("fraud").is_empty());
        let deletes = platform.deletes();
        assert_eq!(deletes.len(), 6);
        assert_eq!(deletes.last(), Some(&group));
    }

    #[tokio::test]
    async fn test_endpoint_updates_in_place() {
        let platform = Arc::new(InMemoryPlatform::new());
        let endpoint = |config: &str| {
            DesiredSpec::new(
                ResourceType::Endpoint,
                "fraud-endpoint",
                json!({"EndpointConfigName": config}),
            )
        };
        let reference = platform.seed(&endpoint("config-1"), Phase::Active);
        let token = CancellationToken::new();

        let state = reconciler(&platform)
            .reconcile(&endpoint("config-2"), ReconcileOptions::default(), &token)
            .await
            .unwrap();

        assert!(state.is_active());
        assert_eq!(platform.updates(), vec![reference]);
        assert!(platform.deletes().is_empty());
        assert!(platform.creates().is_empty());
    }

    #[tokio::test]
    async fn test_conflicting_job_is_conflict() {
        let platform = Arc::new(InMemoryPlatform::new());
        let job = |rounds: u32| {
            DesiredSpec::new(ResourceType::TrainingJob, "train-20240101", json!({"num_round": rounds}))
        };
        platform.seed(&job(100), Phase::Active);
        let token = CancellationToken::new();

        let err = reconciler(&platform)
            .reconcile(&job(200), ReconcileOptions::default(), &token)
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Conflict);
        assert_eq!(platform.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_issues_nothing() {
        let platform = Arc::new(InMemoryPlatform::new());
        let token = CancellationToken::new();
        token.cancel("shutdown");

        let err = reconciler(&platform)
            .reconcile(&fg_spec(1), ReconcileOptions::default(), &token)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(platform.calls().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_name_rejected_without_calls() {
        let platform = Arc::new(InMemoryPlatform::new());
        let token = CancellationToken::new();
        let spec = DesiredSpec::new(ResourceType::FeatureGroup, "bad_name!", json!({}));

        let err = reconciler(&platform)
            .reconcile(&spec, ReconcileOptions::default(), &token)
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::InvalidSpec);
        assert!(platform.calls().is_empty());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let platform = Arc::new(InMemoryPlatform::new());
        let reference = platform.seed(&fg_spec(1), Phase::Active);
        let token = CancellationToken::new();
        let reconciler = reconciler(&platform);

        assert!(reconciler.delete(&reference, &token).await.unwrap().is_absent());
        assert!(reconciler.delete(&reference, &token).await.unwrap().is_absent());
        assert_eq!(platform.deletes().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_fingerprint_never_matches() {
        let job = DesiredSpec::new(
            ResourceType::TrainingJob,
            "train-20240101",
            json!({"num_round": 100}),
        );
        let mut mock = MockPlatform::new();
        mock.expect_describe()
            .returning(|r| Ok(ResourceState::observed(r.clone(), Phase::Active)));
        mock.expect_create().never();
        mock.expect_update().never();
        mock.expect_delete().never();
        let token = CancellationToken::new();

        let err = Reconciler::new(Arc::new(mock))
            .reconcile(&job, ReconcileOptions::default(), &token)
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Conflict);
        assert_eq!(err.phase(), Some(Phase::Active));
    }

    #[tokio::test]
    async fn test_describe_failure_propagates() {
        let mut mock = MockPlatform::new();
        mock.expect_describe()
            .returning(|_| Err(PlatformError::Throttled("rate exceeded".into())));
        mock.expect_create().never();
        let token = CancellationToken::new();

        let err = Reconciler::new(Arc::new(mock))
            .reconcile(&fg_spec(1), ReconcileOptions::default(), &token)
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Platform);
        assert!(err.kind.is_retryable());
    }
}
