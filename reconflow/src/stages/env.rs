//! Shared state for the ML stages.

use std::sync::Arc;

use crate::config::{ApprovalPolicy, ReconflowConfig};
use crate::core::{ResourceRef, ResourceType};
use crate::errors::ReconcileError;
use crate::events::EventSink;
use crate::platform::Platform;
use crate::reconcile::{Reconciler, VersionResolver};
use crate::utils::NamingPolicy;

/// Configuration plus the reconciler and resolver every ML stage uses.
#[derive(Debug)]
pub struct StageEnv {
    config: ReconflowConfig,
    reconciler: Reconciler,
    resolver: VersionResolver,
}

impl StageEnv {
    /// Builds the reconciler and resolver from `config`.
    #[must_use]
    pub fn new(config: ReconflowConfig, platform: Arc<dyn Platform>, events: Arc<dyn EventSink>) -> Self {
        let polling = &config.polling;
        let reconciler = Reconciler::new(platform.clone())
            .with_create_poll(polling.create.clone())
            .with_delete_poll(polling.delete.clone())
            .with_bounds(polling.page_size, polling.max_candidates)
            .with_events(events.clone());
        let resolver = VersionResolver::new(platform)
            .with_bounds(polling.page_size, polling.max_candidates)
            .with_events(events);
        Self {
            config,
            reconciler,
            resolver,
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ReconflowConfig {
        &self.config
    }

    /// Returns the reconciler.
    #[must_use]
    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Returns the resolver.
    #[must_use]
    pub fn resolver(&self) -> &VersionResolver {
        &self.resolver
    }

    /// Returns the name of a `resource_type` resource for this run, applying
    /// the type's naming policy to `base`.
    #[must_use]
    pub fn resource_name(&self, resource_type: ResourceType, base: &str, run_tag: &str) -> String {
        NamingPolicy::for_type(resource_type).name_for(base, run_tag)
    }

    /// Resolves the model package to consume under `policy`.
    ///
    /// # Errors
    ///
    /// `UpstreamUnresolved` if no package in the group qualifies.
    pub async fn resolve_package(&self, policy: ApprovalPolicy) -> Result<ResourceRef, ReconcileError> {
        let selector = policy.selector(&self.config.registry.group_name);
        self.resolver.resolve_latest(&selector).await
    }
}
