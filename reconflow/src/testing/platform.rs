//! An in-memory, eventually-consistent platform simulator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use crate::core::{
    ApprovalStatus, DesiredSpec, Phase, ResourceRef, ResourceState, ResourceSummary, ResourceType,
};
use crate::platform::{ListPage, ListQuery, Platform, PlatformError};

/// Base of the logical clock used for `created_at`.
const EPOCH_SECS: i64 = 1_700_000_000;

/// One recorded call against the simulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    /// `describe`, with the phase it reported (`Absent` for not found).
    Describe {
        /// The resource described.
        resource: ResourceRef,
        /// The phase returned.
        observed: Phase,
    },
    /// `create`, with the reference of the created resource.
    Create {
        /// The created resource.
        resource: ResourceRef,
    },
    /// `update`.
    Update {
        /// The updated resource.
        resource: ResourceRef,
    },
    /// `delete`.
    Delete {
        /// The deleted resource.
        resource: ResourceRef,
    },
    /// `list`.
    List {
        /// The collection listed.
        collection: ResourceType,
        /// The parent filter.
        parent: Option<String>,
    },
}

impl PlatformCall {
    /// Returns the resource the call targeted, if any.
    #[must_use]
    pub fn resource(&self) -> Option<&ResourceRef> {
        match self {
            Self::Describe { resource, .. }
            | Self::Create { resource }
            | Self::Update { resource }
            | Self::Delete { resource } => Some(resource),
            Self::List { .. } => None,
        }
    }

    /// Returns true for create, update and delete.
    #[must_use]
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::Create { .. } | Self::Update { .. } | Self::Delete { .. }
        )
    }
}

/// An injected misbehaviour, keyed by resource name.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Fault {
    FailCreate(String),
    StallCreate,
    StallDelete,
}

#[derive(Debug, Clone)]
struct Entry {
    phase: Phase,
    pending: VecDeque<Phase>,
    detail: Option<String>,
    fingerprint: Option<String>,
    parent: Option<String>,
    approval: Option<ApprovalStatus>,
    created_at: DateTime<Utc>,
    seq: u64,
}

#[derive(Debug, Default)]
struct SimState {
    resources: BTreeMap<ResourceRef, Entry>,
    calls: Vec<PlatformCall>,
    faults: HashMap<String, Fault>,
    package_versions: HashMap<String, u64>,
    clock: u64,
}

impl SimState {
    fn tick(&mut self) -> (u64, DateTime<Utc>) {
        self.clock += 1;
        let secs = EPOCH_SECS + i64::try_from(self.clock).unwrap_or(i64::MAX / 2);
        let at = DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now);
        (self.clock, at)
    }

    fn has_children(&self, group: &str) -> bool {
        self.resources.iter().any(|(r, e)| {
            r.resource_type == ResourceType::ModelPackage && e.parent.as_deref() == Some(group)
        })
    }
}

/// An in-memory stand-in for the managed ML platform.
///
/// Asynchronous operations advance one step per `describe`: a create is
/// observed `Creating` for `steps` describes and then `Active`, a delete is
/// observed `Deleting` and then disappears. Model packages get sequential
/// ARNs within their group and read their approval from the
/// `ModelApprovalStatus` configuration key. Jobs cannot be deleted and a
/// group that still owns packages cannot be deleted, as on the real service.
///
/// Every call is recorded in a journal for assertions.
#[derive(Debug)]
pub struct InMemoryPlatform {
    region: String,
    account_id: String,
    steps: usize,
    latency: Duration,
    state: Mutex<SimState>,
}

impl Default for InMemoryPlatform {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            account_id: "123456789012".to_string(),
            steps: 1,
            latency: Duration::ZERO,
            state: Mutex::new(SimState::default()),
        }
    }
}

impl InMemoryPlatform {
    /// Creates an empty platform.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how many describes a transition stays in its transitional phase.
    #[must_use]
    pub fn with_steps(mut self, steps: usize) -> Self {
        self.steps = steps.max(1);
        self
    }

    /// Adds latency to every call.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Sets the region and account used in ARNs.
    #[must_use]
    pub fn with_account(mut self, region: impl Into<String>, account_id: impl Into<String>) -> Self {
        self.region = region.into();
        self.account_id = account_id.into();
        self
    }

    /// Makes creations of `name` end in `Failed` with `detail`.
    pub fn fail_create(&self, name: impl Into<String>, detail: impl Into<String>) {
        self.state
            .lock()
            .faults
            .insert(name.into(), Fault::FailCreate(detail.into()));
    }

    /// Makes creations of `name` stay `Creating` forever.
    pub fn stall_create(&self, name: impl Into<String>) {
        self.state.lock().faults.insert(name.into(), Fault::StallCreate);
    }

    /// Makes deletions of `name` stay `Deleting` forever.
    pub fn stall_delete(&self, name: impl Into<String>) {
        self.state.lock().faults.insert(name.into(), Fault::StallDelete);
    }

    /// Removes every injected fault.
    pub fn clear_faults(&self) {
        self.state.lock().faults.clear();
    }

    /// Inserts a resource directly in `phase`, bypassing the journal.
    ///
    /// Model packages receive the next ARN in their group; the returned
    /// reference is the one to describe.
    pub fn seed(&self, spec: &DesiredSpec, phase: Phase) -> ResourceRef {
        let mut state = self.state.lock();
        let reference = self.assign_reference(&mut state, spec);
        let (seq, created_at) = state.tick();
        let entry = Entry {
            phase,
            pending: VecDeque::new(),
            detail: None,
            fingerprint: Some(spec.fingerprint()),
            parent: parent_of(spec),
            approval: approval_of(spec),
            created_at,
            seq,
        };
        state.resources.insert(reference.clone(), entry);
        reference
    }

    /// Seeds an `Active` model package in `group` with the given approval.
    pub fn seed_package(&self, group: &str, approval: ApprovalStatus) -> ResourceRef {
        let spec = DesiredSpec::new(
            ResourceType::ModelPackage,
            group,
            serde_json::json!({
                "ModelPackageGroupName": group,
                "ModelApprovalStatus": approval.to_string(),
            }),
        )
        .with_parent(group);
        self.seed(&spec, Phase::Active)
    }

    /// Changes a model package's approval status.
    pub fn set_approval(&self, reference: &ResourceRef, approval: ApprovalStatus) {
        if let Some(entry) = self.state.lock().resources.get_mut(reference) {
            entry.approval = Some(approval);
        }
    }

    /// Forces a resource into `phase` without going through a transition.
    pub fn set_phase(&self, reference: &ResourceRef, phase: Phase) {
        if let Some(entry) = self.state.lock().resources.get_mut(reference) {
            entry.phase = phase;
            entry.pending.clear();
        }
    }

    /// Returns the current phase without advancing it.
    #[must_use]
    pub fn phase_of(&self, reference: &ResourceRef) -> Phase {
        self.state
            .lock()
            .resources
            .get(reference)
            .map_or(Phase::Absent, |e| e.phase)
    }

    /// Returns true if the resource exists in any phase.
    #[must_use]
    pub fn contains(&self, reference: &ResourceRef) -> bool {
        self.state.lock().resources.contains_key(reference)
    }

    /// Returns the packages currently in `group`, oldest first.
    #[must_use]
    pub fn packages_in(&self, group: &str) -> Vec<ResourceRef> {
        let state = self.state.lock();
        let mut packages: Vec<(u64, ResourceRef)> = state
            .resources
            .iter()
            .filter(|(r, e)| {
                r.resource_type == ResourceType::ModelPackage && e.parent.as_deref() == Some(group)
            })
            .map(|(r, e)| (e.seq, r.clone()))
            .collect();
        packages.sort();
        packages.into_iter().map(|(_, r)| r).collect()
    }

    /// Returns the call journal.
    #[must_use]
    pub fn calls(&self) -> Vec<PlatformCall> {
        self.state.lock().calls.clone()
    }

    /// Clears the call journal.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Returns the references of every create call, in order.
    #[must_use]
    pub fn creates(&self) -> Vec<ResourceRef> {
        self.collect_calls(|c| match c {
            PlatformCall::Create { resource } => Some(resource.clone()),
            _ => None,
        })
    }

    /// Returns the references of every delete call, in order.
    #[must_use]
    pub fn deletes(&self) -> Vec<ResourceRef> {
        self.collect_calls(|c| match c {
            PlatformCall::Delete { resource } => Some(resource.clone()),
            _ => None,
        })
    }

    /// Returns the references of every update call, in order.
    #[must_use]
    pub fn updates(&self) -> Vec<ResourceRef> {
        self.collect_calls(|c| match c {
            PlatformCall::Update { resource } => Some(resource.clone()),
            _ => None,
        })
    }

    /// Returns the number of create, update and delete calls.
    #[must_use]
    pub fn mutation_count(&self) -> usize {
        self.state.lock().calls.iter().filter(|c| c.is_mutation()).count()
    }

    fn collect_calls(&self, f: impl Fn(&PlatformCall) -> Option<ResourceRef>) -> Vec<ResourceRef> {
        self.state.lock().calls.iter().filter_map(f).collect()
    }

    fn assign_reference(&self, state: &mut SimState, spec: &DesiredSpec) -> ResourceRef {
        if spec.resource_type != ResourceType::ModelPackage {
            return spec.reference();
        }
        let version = state
            .package_versions
            .entry(spec.name.clone())
            .and_modify(|v| *v += 1)
            .or_insert(1);
        ResourceRef::new(
            ResourceType::ModelPackage,
            format!(
                "arn:aws:sagemaker:{}:{}:model-package/{}/{}",
                self.region, self.account_id, spec.name, version
            ),
        )
    }

    fn transition(&self, to: Phase) -> VecDeque<Phase> {
        let mut pending = VecDeque::with_capacity(self.steps);
        for _ in 1..self.steps {
            pending.push_back(Phase::Unknown);
        }
        pending.push_back(to);
        pending
    }

    async fn delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

fn parent_of(spec: &DesiredSpec) -> Option<String> {
    match spec.resource_type {
        ResourceType::ModelPackage => Some(spec.parent.clone().unwrap_or_else(|| spec.name.clone())),
        _ => spec.parent.clone(),
    }
}

fn approval_of(spec: &DesiredSpec) -> Option<ApprovalStatus> {
    if spec.resource_type != ResourceType::ModelPackage {
        return None;
    }
    let status = spec
        .config
        .get("ModelApprovalStatus")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok());
    Some(status.unwrap_or_default())
}

#[async_trait]
impl Platform for InMemoryPlatform {
    async fn describe(&self, reference: &ResourceRef) -> Result<ResourceState, PlatformError> {
        self.delay().await;
        let mut state = self.state.lock();
        let Some(entry) = state.resources.get_mut(reference) else {
            state.calls.push(PlatformCall::Describe {
                resource: reference.clone(),
                observed: Phase::Absent,
            });
            return Err(PlatformError::NotFound(reference.clone()));
        };

        let mut observed = ResourceState::observed(reference.clone(), entry.phase);
        if let Some(fingerprint) = &entry.fingerprint {
            observed = observed.with_fingerprint(fingerprint.clone());
        }
        if let Some(detail) = &entry.detail {
            observed = observed.with_detail(detail.clone());
        }

        // Unknown is a placeholder step that keeps the current phase.
        match entry.pending.pop_front() {
            Some(Phase::Unknown) | None => {}
            Some(next) => entry.phase = next,
        }
        let gone = entry.phase == Phase::Absent;
        if gone {
            state.resources.remove(reference);
        }

        state.calls.push(PlatformCall::Describe {
            resource: reference.clone(),
            observed: observed.phase,
        });
        Ok(observed)
    }

    async fn create(&self, spec: &DesiredSpec) -> Result<ResourceRef, PlatformError> {
        self.delay().await;
        let mut state = self.state.lock();

        if spec.resource_type == ResourceType::ModelPackage {
            let group = ResourceRef::new(ResourceType::ModelPackageGroup, &spec.name);
            if !state.resources.contains_key(&group) {
                return Err(PlatformError::Validation(format!(
                    "model package group {} does not exist",
                    spec.name
                )));
            }
        } else if state.resources.contains_key(&spec.reference()) {
            return Err(PlatformError::Validation(format!(
                "cannot create already existing {}",
                spec.reference()
            )));
        }

        let reference = self.assign_reference(&mut state, spec);
        let (seq, created_at) = state.tick();
        let fault = state.faults.get(&spec.name).cloned();
        let (pending, detail) = match fault {
            Some(Fault::FailCreate(detail)) => (self.transition(Phase::Failed), Some(detail)),
            Some(Fault::StallCreate) => (VecDeque::new(), None),
            _ => (self.transition(Phase::Active), None),
        };

        state.resources.insert(
            reference.clone(),
            Entry {
                phase: Phase::Creating,
                pending,
                detail,
                fingerprint: Some(spec.fingerprint()),
                parent: parent_of(spec),
                approval: approval_of(spec),
                created_at,
                seq,
            },
        );
        state.calls.push(PlatformCall::Create {
            resource: reference.clone(),
        });
        Ok(reference)
    }

    async fn update(&self, reference: &ResourceRef, spec: &DesiredSpec) -> Result<(), PlatformError> {
        self.delay().await;
        let mut state = self.state.lock();
        let pending = self.transition(Phase::Active);
        let Some(entry) = state.resources.get_mut(reference) else {
            return Err(PlatformError::NotFound(reference.clone()));
        };
        if entry.phase != Phase::Active {
            return Err(PlatformError::Validation(format!(
                "cannot update {reference} while {}",
                entry.phase
            )));
        }
        entry.phase = Phase::Updating;
        entry.pending = pending;
        entry.fingerprint = Some(spec.fingerprint());
        state.calls.push(PlatformCall::Update {
            resource: reference.clone(),
        });
        Ok(())
    }

    async fn delete(&self, reference: &ResourceRef) -> Result<(), PlatformError> {
        self.delay().await;
        let mut state = self.state.lock();
        if !state.resources.contains_key(reference) {
            return Err(PlatformError::NotFound(reference.clone()));
        }
        if reference.resource_type.is_job() {
            return Err(PlatformError::Validation(format!("{reference} cannot be deleted")));
        }
        if reference.resource_type == ResourceType::ModelPackageGroup
            && state.has_children(reference.name())
        {
            return Err(PlatformError::ResourceInUse(reference.clone()));
        }

        let stalled = state.faults.get(reference.name()) == Some(&Fault::StallDelete);
        let pending = if stalled {
            VecDeque::new()
        } else {
            self.transition(Phase::Absent)
        };
        if let Some(entry) = state.resources.get_mut(reference) {
            if entry.phase != Phase::Deleting {
                entry.phase = Phase::Deleting;
                entry.pending = pending;
            }
        }
        state.calls.push(PlatformCall::Delete {
            resource: reference.clone(),
        });
        Ok(())
    }

    async fn list(&self, query: &ListQuery) -> Result<ListPage, PlatformError> {
        self.delay().await;
        let mut state = self.state.lock();
        state.calls.push(PlatformCall::List {
            collection: query.collection,
            parent: query.parent.clone(),
        });

        let mut matching: Vec<(&ResourceRef, &Entry)> = state
            .resources
            .iter()
            .filter(|(r, e)| {
                r.resource_type == query.collection
                    && query.parent.as_ref().map_or(true, |p| e.parent.as_ref() == Some(p))
            })
            .collect();
        matching.sort_by_key(|(_, e)| e.seq);

        let offset = match &query.page_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| PlatformError::Validation(format!("invalid page token {token}")))?,
            None => 0,
        };
        let page_size = query.page_size.max(1);
        let end = (offset + page_size).min(matching.len());

        let items = matching
            .get(offset..end)
            .unwrap_or_default()
            .iter()
            .map(|(r, e)| {
                let mut summary = ResourceSummary::new((*r).clone(), e.phase, e.created_at);
                if let Some(approval) = e.approval {
                    summary = summary.with_approval(approval);
                }
                if let Some(fingerprint) = &e.fingerprint {
                    summary = summary.with_fingerprint(fingerprint.clone());
                }
                summary
            })
            .collect();
        let next_token = (end < matching.len()).then(|| end.to_string());

        Ok(ListPage { items, next_token })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fg_spec() -> DesiredSpec {
        DesiredSpec::new(ResourceType::FeatureGroup, "fg", json!({"RecordIdentifierFeatureName": "id"}))
    }

    #[tokio::test]
    async fn test_create_then_describe_transitions() {
        let platform = InMemoryPlatform::new();
        let r = platform.create(&fg_spec()).await.unwrap();

        assert_eq!(platform.describe(&r).await.unwrap().phase, Phase::Creating);
        assert_eq!(platform.describe(&r).await.unwrap().phase, Phase::Active);
        assert_eq!(platform.describe(&r).await.unwrap().phase, Phase::Active);
    }

    #[tokio::test]
    async fn test_steps_lengthen_transitions() {
        let platform = InMemoryPlatform::new().with_steps(3);
        let r = platform.create(&fg_spec()).await.unwrap();

        for _ in 0..3 {
            assert_eq!(platform.describe(&r).await.unwrap().phase, Phase::Creating);
        }
        assert_eq!(platform.describe(&r).await.unwrap().phase, Phase::Active);
    }

    #[tokio::test]
    async fn test_delete_then_not_found() {
        let platform = InMemoryPlatform::new();
        let r = platform.seed(&fg_spec(), Phase::Active);

        platform.delete(&r).await.unwrap();
        assert_eq!(platform.describe(&r).await.unwrap().phase, Phase::Deleting);
        assert_eq!(
            platform.describe(&r).await.unwrap_err(),
            PlatformError::NotFound(r.clone())
        );
        assert!(!platform.contains(&r));
    }

    #[tokio::test]
    async fn test_duplicate_create_rejected() {
        let platform = InMemoryPlatform::new();
        platform.seed(&fg_spec(), Phase::Active);
        assert!(matches!(
            platform.create(&fg_spec()).await,
            Err(PlatformError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_group_with_packages_is_in_use() {
        let platform = InMemoryPlatform::new();
        let group = platform.seed(
            &DesiredSpec::new(ResourceType::ModelPackageGroup, "g", json!({})),
            Phase::Active,
        );
        let package = platform.seed_package("g", ApprovalStatus::Approved);

        assert_eq!(
            package.name(),
            "arn:aws:sagemaker:us-east-1:123456789012:model-package/g/1"
        );
        assert_eq!(
            platform.delete(&group).await.unwrap_err(),
            PlatformError::ResourceInUse(group.clone())
        );
    }

    #[tokio::test]
    async fn test_list_pages_in_creation_order() {
        let platform = InMemoryPlatform::new();
        platform.seed(&DesiredSpec::new(ResourceType::ModelPackageGroup, "g", json!({})), Phase::Active);
        for _ in 0..5 {
            platform.seed_package("g", ApprovalStatus::PendingManualApproval);
        }

        let first = platform
            .list(&ListQuery::new(ResourceType::ModelPackage, 2).in_parent("g"))
            .await
            .unwrap();
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.next_token.as_deref(), Some("2"));
        assert!(first.items[0].created_at < first.items[1].created_at);

        let last = platform
            .list(&ListQuery::new(ResourceType::ModelPackage, 2).in_parent("g").after("4"))
            .await
            .unwrap();
        assert_eq!(last.items.len(), 1);
        assert!(last.next_token.is_none());
    }

    #[tokio::test]
    async fn test_failed_creation_carries_detail() {
        let platform = InMemoryPlatform::new();
        platform.fail_create("fg", "role cannot be assumed");
        let r = platform.create(&fg_spec()).await.unwrap();

        platform.describe(&r).await.unwrap();
        let state = platform.describe(&r).await.unwrap();
        assert_eq!(state.phase, Phase::Failed);
        assert_eq!(state.detail.as_deref(), Some("role cannot be assumed"));
    }

    #[tokio::test]
    async fn test_jobs_cannot_be_deleted() {
        let platform = InMemoryPlatform::new();
        let job = platform.seed(
            &DesiredSpec::new(ResourceType::TrainingJob, "train-1", json!({})),
            Phase::Active,
        );
        assert!(matches!(
            platform.delete(&job).await,
            Err(PlatformError::Validation(_))
        ));
    }
}
