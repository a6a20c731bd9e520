//! Reconciliation: bounded polling, the idempotent reconcile algorithm and
//! version resolution.

mod poller;
mod reconciler;
mod resolver;

pub use poller::{
    poll, BackoffStrategy, JitterStrategy, PollConfig, PollTarget, UNTIL_ABSENT, UNTIL_ACTIVE,
    UNTIL_SETTLED,
};
pub use reconciler::{ReconcileOptions, Reconciler};
pub use resolver::{
    select, CandidateFilter, OrderBy, SortOrder, VersionResolver, VersionSelector,
    DEFAULT_MAX_CANDIDATES, DEFAULT_PAGE_SIZE,
};
