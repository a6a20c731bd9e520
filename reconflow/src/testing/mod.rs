//! Testing utilities for reconflow.
//!
//! This module provides:
//! - An in-memory platform with scripted transitions and a call journal
//! - Scripted stages for pipeline tests

mod platform;
mod stages;

pub use platform::{InMemoryPlatform, PlatformCall};
pub use stages::ScriptedStage;
