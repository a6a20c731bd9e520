//! Core data types: resource handles, observed state, desired specs and
//! stage results.

mod phase;
mod resource;
mod result;
mod spec;
mod state;

pub use phase::{ApprovalStatus, Phase};
pub use resource::{Capabilities, ResourceRef, ResourceType, UpdateStrategy};
pub use result::{PipelineStageResult, StageStatus};
pub use spec::DesiredSpec;
pub use state::{ResourceState, ResourceSummary};
