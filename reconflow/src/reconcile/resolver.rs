//! Resolution of "the current version" of an upstream collection.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::{ApprovalStatus, Phase, ResourceRef, ResourceSummary, ResourceType};
use crate::errors::ReconcileError;
use crate::events::{EventSink, LifecycleEvent, NoOpEventSink};
use crate::platform::{ListQuery, Platform};

/// Default entries requested per listing page.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Default bound on the number of candidates read from a collection.
pub const DEFAULT_MAX_CANDIDATES: usize = 1000;

/// Predicate applied to listed candidates.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CandidateFilter {
    /// Every candidate passes.
    #[default]
    Any,
    /// Candidates in the given phase.
    Phase(Phase),
    /// Candidates with the given approval status.
    Approval(ApprovalStatus),
    /// Candidates passing every inner filter.
    All(Vec<CandidateFilter>),
}

impl CandidateFilter {
    /// Returns true if the candidate passes.
    #[must_use]
    pub fn matches(&self, candidate: &ResourceSummary) -> bool {
        match self {
            Self::Any => true,
            Self::Phase(phase) => candidate.phase == *phase,
            Self::Approval(status) => candidate.approval == Some(*status),
            Self::All(filters) => filters.iter().all(|f| f.matches(candidate)),
        }
    }
}

/// Field candidates are ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderBy {
    /// Creation timestamp.
    #[default]
    CreationTime,
    /// Name or ARN.
    Name,
}

/// Direction of ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// Newest or greatest first.
    #[default]
    Descending,
    /// Oldest or smallest first.
    Ascending,
}

/// A policy for picking versions out of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSelector {
    /// The collection to search.
    pub collection: ResourceType,
    /// Restrict to children of this parent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Candidates must pass this filter.
    #[serde(default)]
    pub filter: CandidateFilter,
    /// Ordering field.
    #[serde(default)]
    pub order_by: OrderBy,
    /// Ordering direction.
    #[serde(default)]
    pub order: SortOrder,
    /// How many matches `resolve_top` returns.
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    1
}

impl VersionSelector {
    /// Creates a selector over a whole collection: newest first, no filter.
    #[must_use]
    pub fn new(collection: ResourceType) -> Self {
        Self {
            collection,
            parent: None,
            filter: CandidateFilter::Any,
            order_by: OrderBy::CreationTime,
            order: SortOrder::Descending,
            limit: default_limit(),
        }
    }

    /// The newest approved package in `group`.
    #[must_use]
    pub fn latest_approved_package(group: impl Into<String>) -> Self {
        Self::new(ResourceType::ModelPackage)
            .in_parent(group)
            .with_filter(CandidateFilter::All(vec![
                CandidateFilter::Phase(Phase::Active),
                CandidateFilter::Approval(ApprovalStatus::Approved),
            ]))
    }

    /// The newest package in `group` regardless of approval.
    #[must_use]
    pub fn latest_created_package(group: impl Into<String>) -> Self {
        Self::new(ResourceType::ModelPackage)
            .in_parent(group)
            .with_filter(CandidateFilter::Phase(Phase::Active))
    }

    /// The newest completed resource of a type, e.g. a training job.
    #[must_use]
    pub fn latest_completed(collection: ResourceType) -> Self {
        Self::new(collection).with_filter(CandidateFilter::Phase(Phase::Active))
    }

    /// Restricts to children of `parent`.
    #[must_use]
    pub fn in_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Sets the filter.
    #[must_use]
    pub fn with_filter(mut self, filter: CandidateFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Sets the ordering.
    #[must_use]
    pub fn ordered_by(mut self, order_by: OrderBy, order: SortOrder) -> Self {
        self.order_by = order_by;
        self.order = order;
        self
    }

    /// Sets the limit.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    fn compare(&self, a: &ResourceSummary, b: &ResourceSummary) -> Ordering {
        let by_field = match self.order_by {
            OrderBy::CreationTime => a.created_at.cmp(&b.created_at),
            OrderBy::Name => a.reference.name().cmp(b.reference.name()),
        };
        let by_field = match self.order {
            SortOrder::Ascending => by_field,
            SortOrder::Descending => by_field.reverse(),
        };
        by_field.then_with(|| a.reference.name().cmp(b.reference.name()))
    }

    fn describe(&self) -> String {
        match &self.parent {
            Some(parent) => format!("{} in {parent} matching {:?}", self.collection, self.filter),
            None => format!("{} matching {:?}", self.collection, self.filter),
        }
    }
}

/// Applies a selector to a snapshot.
///
/// Pure: the same snapshot always yields the same ordered matches.
#[must_use]
pub fn select<'a>(snapshot: &'a [ResourceSummary], selector: &VersionSelector) -> Vec<&'a ResourceSummary> {
    let mut matches: Vec<&ResourceSummary> = snapshot
        .iter()
        .filter(|c| c.reference.resource_type == selector.collection)
        .filter(|c| selector.filter.matches(c))
        .collect();
    matches.sort_by(|a, b| selector.compare(a, b));
    matches
}

/// Reads a collection page by page, up to `max_candidates` entries.
pub(crate) async fn list_bounded(
    platform: &dyn Platform,
    collection: ResourceType,
    parent: Option<&str>,
    page_size: usize,
    max_candidates: usize,
) -> Result<Vec<ResourceSummary>, ReconcileError> {
    let mut query = ListQuery::new(collection, page_size.max(1));
    if let Some(parent) = parent {
        query = query.in_parent(parent);
    }

    let mut items = Vec::new();
    loop {
        let page = platform.list(&query).await?;
        items.extend(page.items);
        if items.len() >= max_candidates {
            items.truncate(max_candidates);
            break;
        }
        match page.next_token {
            Some(token) => query = query.after(token),
            None => break,
        }
    }

    debug!(
        resource_type = %collection,
        parent,
        candidates = items.len(),
        "Listed collection"
    );
    Ok(items)
}

/// Resolves version selectors against the platform.
pub struct VersionResolver {
    platform: Arc<dyn Platform>,
    events: Arc<dyn EventSink>,
    page_size: usize,
    max_candidates: usize,
}

impl std::fmt::Debug for VersionResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionResolver")
            .field("page_size", &self.page_size)
            .field("max_candidates", &self.max_candidates)
            .finish_non_exhaustive()
    }
}

impl VersionResolver {
    /// Creates a resolver with default paging bounds.
    #[must_use]
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self {
            platform,
            events: Arc::new(NoOpEventSink),
            page_size: DEFAULT_PAGE_SIZE,
            max_candidates: DEFAULT_MAX_CANDIDATES,
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Sets the listing bounds.
    #[must_use]
    pub fn with_bounds(mut self, page_size: usize, max_candidates: usize) -> Self {
        self.page_size = page_size.max(1);
        self.max_candidates = max_candidates.max(1);
        self
    }

    /// Reads the bounded snapshot the selector applies to.
    ///
    /// # Errors
    ///
    /// Propagates listing failures.
    pub async fn snapshot(&self, selector: &VersionSelector) -> Result<Vec<ResourceSummary>, ReconcileError> {
        list_bounded(
            self.platform.as_ref(),
            selector.collection,
            selector.parent.as_deref(),
            self.page_size,
            self.max_candidates,
        )
        .await
    }

    /// Returns the first candidate passing the selector.
    ///
    /// # Errors
    ///
    /// Returns `UpstreamUnresolved` if nothing passes the filter, or the
    /// listing failure.
    pub async fn resolve_latest(&self, selector: &VersionSelector) -> Result<ResourceRef, ReconcileError> {
        let snapshot = self.snapshot(selector).await?;
        let winner = select(&snapshot, selector)
            .into_iter()
            .next()
            .map(|c| c.reference.clone())
            .ok_or_else(|| unresolved(selector))?;

        info!(
            resource_type = %selector.collection,
            resource = %winner.name(),
            "Resolved latest version"
        );
        self.events.emit(&LifecycleEvent::Resolved {
            collection: selector.collection,
            resource: winner.clone(),
        });
        Ok(winner)
    }

    /// Returns up to `selector.limit` candidates, best first.
    ///
    /// # Errors
    ///
    /// Returns `UpstreamUnresolved` if nothing passes the filter, or the
    /// listing failure.
    pub async fn resolve_top(&self, selector: &VersionSelector) -> Result<Vec<ResourceRef>, ReconcileError> {
        let snapshot = self.snapshot(selector).await?;
        let top: Vec<ResourceRef> = select(&snapshot, selector)
            .into_iter()
            .take(selector.limit.max(1))
            .map(|c| c.reference.clone())
            .collect();
        if top.is_empty() {
            return Err(unresolved(selector));
        }
        Ok(top)
    }
}

fn unresolved(selector: &VersionSelector) -> ReconcileError {
    ReconcileError::upstream_unresolved(format!("no candidate for {}", selector.describe()))
}
