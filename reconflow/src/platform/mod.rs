//! The managed-platform interface consumed by the reconciler.
//!
//! Adapters bind a concrete ML platform (model registry, feature store,
//! training, hosting and batch services) to these verbs and map native
//! statuses onto [`Phase`](crate::core::Phase). Errors are classified by the
//! adapter into [`PlatformError`] variants; nothing downstream inspects error
//! messages.

use crate::core::{DesiredSpec, ResourceRef, ResourceState, ResourceSummary, ResourceType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by platform calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    /// The resource does not exist.
    #[error("resource not found: {0}")]
    NotFound(ResourceRef),

    /// The resource exists and blocks the request (e.g. a group with children).
    #[error("resource in use: {0}")]
    ResourceInUse(ResourceRef),

    /// The platform throttled the request.
    #[error("request throttled: {0}")]
    Throttled(String),

    /// The caller lacks permission.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The platform rejected the request parameters.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Any other platform failure.
    #[error("platform error: {0}")]
    Other(String),
}

/// A request for one page of a collection listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListQuery {
    /// The resource type to list.
    pub collection: ResourceType,
    /// Restrict to children of this collection (e.g. a model package group).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Continuation token from the previous page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_token: Option<String>,
    /// Maximum entries per page.
    pub page_size: usize,
}

impl ListQuery {
    /// Creates a query for the first page of a collection.
    #[must_use]
    pub fn new(collection: ResourceType, page_size: usize) -> Self {
        Self {
            collection,
            parent: None,
            page_token: None,
            page_size,
        }
    }

    /// Restricts the listing to children of `parent`.
    #[must_use]
    pub fn in_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Continues from a page token.
    #[must_use]
    pub fn after(mut self, token: impl Into<String>) -> Self {
        self.page_token = Some(token.into());
        self
    }
}

/// One page of a listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListPage {
    /// Entries on this page, in platform order.
    pub items: Vec<ResourceSummary>,
    /// Token for the next page, if more entries exist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

/// The abstract operations of the managed ML platform.
///
/// `delete` and `update` are asynchronous on the platform side: returning
/// `Ok` means the request was accepted, and completion is observed through
/// `describe`.
///
/// Adapters must persist [`DesiredSpec::fingerprint`] on `create` and
/// `update` (for example as a resource tag) and report it back in
/// [`ResourceState::fingerprint`] from `describe` and in the summaries
/// returned by `list`. A resource observed without a fingerprint never
/// matches a desired spec: deletable types are replaced on every
/// reconcile and jobs fail with `Conflict`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Platform: Send + Sync {
    /// Observes a resource. Returns `NotFound` if it does not exist.
    async fn describe(&self, reference: &ResourceRef) -> Result<ResourceState, PlatformError>;

    /// Requests creation. Returns the reference of the created resource,
    /// which carries the platform-assigned ARN for versioned resources.
    async fn create(&self, spec: &DesiredSpec) -> Result<ResourceRef, PlatformError>;

    /// Requests an in-place update.
    async fn update(&self, reference: &ResourceRef, spec: &DesiredSpec) -> Result<(), PlatformError>;

    /// Requests deletion.
    async fn delete(&self, reference: &ResourceRef) -> Result<(), PlatformError>;

    /// Lists one page of a collection.
    async fn list(&self, query: &ListQuery) -> Result<ListPage, PlatformError>;
}
