//! Cooperative cancellation.
//!
//! A [`CancellationToken`] is shared by a pipeline run, its stages and every
//! poll they perform. Once cancelled, no new create, update or delete is
//! issued and in-flight waits return `Cancelled`.

mod token;

pub use token::CancellationToken;
