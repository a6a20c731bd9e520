//! Bounded, cancellable polling of asynchronous platform operations.
//!
//! Every wait in the crate goes through [`poll`]. There are no fixed sleeps:
//! a wait ends when the observed phase reaches a terminal or failure set,
//! when the timeout elapses, or when the caller cancels.

use crate::cancellation::CancellationToken;
use crate::core::{Phase, ResourceRef, ResourceState};
use crate::errors::{ErrorKind, ReconcileError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::debug;

/// Backoff strategy for poll intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// interval (constant)
    #[default]
    Constant,
    /// interval * attempt
    Linear,
    /// interval * 2^(attempt - 1)
    Exponential,
}

/// Jitter applied to poll intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    #[default]
    None,
    /// Half fixed, half random
    Equal,
}

/// Timing of one kind of wait.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    /// Base interval between queries in milliseconds.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Cap on the interval in milliseconds.
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
    /// Total time allowed in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Backoff strategy.
    #[serde(default)]
    pub backoff: BackoffStrategy,
    /// Jitter strategy.
    #[serde(default)]
    pub jitter: JitterStrategy,
}

fn default_interval_ms() -> u64 {
    15_000
}

fn default_max_interval_ms() -> u64 {
    60_000
}

fn default_timeout_ms() -> u64 {
    3_600_000
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
            timeout_ms: default_timeout_ms(),
            backoff: BackoffStrategy::default(),
            jitter: JitterStrategy::default(),
        }
    }
}

impl PollConfig {
    /// Creates a poll config with the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval_ms = duration_ms(interval);
        self
    }

    /// Sets the interval cap.
    #[must_use]
    pub fn with_max_interval(mut self, max_interval: Duration) -> Self {
        self.max_interval_ms = duration_ms(max_interval);
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = duration_ms(timeout);
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Returns the timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Calculates the wait after the given 1-based attempt.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.interval_ms;
        let max = self.max_interval_ms.max(base);
        let step = attempt.max(1);

        let delay = match self.backoff {
            BackoffStrategy::Constant => base,
            BackoffStrategy::Linear => base.saturating_mul(u64::from(step)),
            BackoffStrategy::Exponential => {
                base.saturating_mul(2u64.saturating_pow(step.saturating_sub(1)))
            }
        }
        .min(max);

        let jittered = match self.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };

        Duration::from_millis(jittered)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Phases that end a wait.
#[derive(Debug, Clone, Copy)]
pub struct PollTarget<'a> {
    /// Phases that end the wait successfully.
    pub terminal: &'a [Phase],
    /// Phases that end the wait with `OperationFailed`.
    pub failure: &'a [Phase],
}

impl<'a> PollTarget<'a> {
    /// Creates a target.
    #[must_use]
    pub const fn new(terminal: &'a [Phase], failure: &'a [Phase]) -> Self {
        Self { terminal, failure }
    }
}

/// Wait for `Active`, failing on `Failed`.
pub const UNTIL_ACTIVE: PollTarget<'static> = PollTarget::new(&[Phase::Active], &[Phase::Failed]);

/// Wait for `Absent`, failing on `Failed`. "Not found" is success here.
pub const UNTIL_ABSENT: PollTarget<'static> = PollTarget::new(&[Phase::Absent], &[Phase::Failed]);

/// Wait for any settled phase without treating `Failed` as an error.
pub const UNTIL_SETTLED: PollTarget<'static> =
    PollTarget::new(&[Phase::Active, Phase::Failed, Phase::Absent], &[]);

/// Polls `query` until the observed phase is in `target.terminal`.
///
/// `query` should map "not found" to [`Phase::Absent`] rather than failing,
/// so that deletion can be observed completing. Errors returned by `query`
/// propagate immediately; there is no retry inside the poll.
///
/// A query that hangs is cut off at the deadline, so the call never takes
/// longer than the timeout plus scheduling slack.
///
/// # Errors
///
/// - `OperationFailed` when a phase in `target.failure` is observed.
/// - `Timeout` when the timeout elapses, carrying the last observed state.
/// - `Cancelled` as soon as `cancel` fires.
pub async fn poll<F, Fut>(
    reference: &ResourceRef,
    mut query: F,
    target: PollTarget<'_>,
    config: &PollConfig,
    cancel: &CancellationToken,
) -> Result<ResourceState, ReconcileError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<ResourceState, ReconcileError>>,
{
    let start = Instant::now();
    let deadline = start + config.timeout();
    let mut last: Option<ResourceState> = None;
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(cancelled(cancel, reference, last, start));
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(timed_out(reference, target, last, start));
        }

        let observed = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(cancelled(cancel, reference, last, start)),
            observed = tokio::time::timeout(remaining, query()) => observed,
        };
        let Ok(state) = observed else {
            return Err(timed_out(reference, target, last, start));
        };
        let state = state?;
        attempt += 1;

        debug!(
            resource = %reference,
            phase = %state.phase,
            attempt,
            elapsed_ms = duration_ms(start.elapsed()),
            "Polled resource"
        );

        if target.failure.contains(&state.phase) {
            let detail = state
                .detail
                .clone()
                .unwrap_or_else(|| format!("{reference} entered phase {}", state.phase));
            return Err(ReconcileError::new(ErrorKind::OperationFailed, detail)
                .with_state(state)
                .with_elapsed(start.elapsed()));
        }
        if target.terminal.contains(&state.phase) {
            return Ok(state);
        }
        last = Some(state);

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(timed_out(reference, target, last, start));
        }
        let wait = config.delay_for(attempt).min(remaining);
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(cancelled(cancel, reference, last, start)),
            () = tokio::time::sleep(wait) => {}
        }
    }
}

fn timed_out(
    reference: &ResourceRef,
    target: PollTarget<'_>,
    last: Option<ResourceState>,
    start: Instant,
) -> ReconcileError {
    let elapsed = start.elapsed();
    let observed = last
        .as_ref()
        .map_or_else(|| "no observation".to_string(), |s| format!("last phase {}", s.phase));
    let err = ReconcileError::new(
        ErrorKind::Timeout,
        format!(
            "{reference} did not reach {:?} within {}ms ({observed})",
            target.terminal,
            duration_ms(elapsed)
        ),
    )
    .with_resource(reference.clone())
    .with_elapsed(elapsed);
    match last {
        Some(state) => err.with_state(state),
        None => err,
    }
}

fn cancelled(
    cancel: &CancellationToken,
    reference: &ResourceRef,
    last: Option<ResourceState>,
    start: Instant,
) -> ReconcileError {
    let err = cancel
        .to_error()
        .with_resource(reference.clone())
        .with_elapsed(start.elapsed());
    match last {
        Some(state) => err.with_state(state),
        None => err,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ResourceType;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fg() -> ResourceRef {
        ResourceRef::new(ResourceType::FeatureGroup, "fg")
    }

    fn fast(timeout_ms: u64) -> PollConfig {
        PollConfig::new()
            .with_interval(Duration::from_millis(5))
            .with_timeout(Duration::from_millis(timeout_ms))
    }

    fn scripted(phases: &[Phase]) -> Arc<Mutex<VecDeque<Phase>>> {
        Arc::new(Mutex::new(phases.iter().copied().collect()))
    }

    #[test]
    fn test_delay_for_backoff_strategies() {
        let base = PollConfig::new()
            .with_interval(Duration::from_millis(100))
            .with_max_interval(Duration::from_millis(350));

        let constant = base.clone();
        assert_eq!(constant.delay_for(1), Duration::from_millis(100));
        assert_eq!(constant.delay_for(5), Duration::from_millis(100));

        let linear = base.clone().with_backoff(BackoffStrategy::Linear);
        assert_eq!(linear.delay_for(2), Duration::from_millis(200));
        assert_eq!(linear.delay_for(9), Duration::from_millis(350));

        let exp = base.with_backoff(BackoffStrategy::Exponential);
        assert_eq!(exp.delay_for(1), Duration::from_millis(100));
        assert_eq!(exp.delay_for(2), Duration::from_millis(200));
        assert_eq!(exp.delay_for(3), Duration::from_millis(350));
        assert_eq!(exp.delay_for(60), Duration::from_millis(350));
    }

    #[test]
    fn test_equal_jitter_stays_in_range() {
        let config = PollConfig::new()
            .with_interval(Duration::from_millis(100))
            .with_jitter(JitterStrategy::Equal);
        for _ in 0..50 {
            let d = config.delay_for(1);
            assert!(d >= Duration::from_millis(50) && d <= Duration::from_millis(100));
        }
    }

    #[tokio::test]
    async fn test_poll_reaches_terminal() {
        let phases = scripted(&[Phase::Creating, Phase::Creating, Phase::Active]);
        let calls = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();

        let state = poll(
            &fg(),
            || {
                let phases = phases.clone();
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let phase = phases.lock().pop_front().unwrap_or(Phase::Active);
                    Ok(ResourceState::observed(fg(), phase))
                }
            },
            UNTIL_ACTIVE,
            &fast(1_000),
            &token,
        )
        .await
        .unwrap();

        assert_eq!(state.phase, Phase::Active);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_poll_failure_phase() {
        let phases = scripted(&[Phase::Creating, Phase::Failed]);
        let token = CancellationToken::new();

        let err = poll(
            &fg(),
            || {
                let phases = phases.clone();
                async move {
                    let phase = phases.lock().pop_front().unwrap_or(Phase::Failed);
                    Ok(ResourceState::observed(fg(), phase).with_detail("insufficient capacity"))
                }
            },
            UNTIL_ACTIVE,
            &fast(1_000),
            &token,
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind, ErrorKind::OperationFailed);
        assert_eq!(err.detail, "insufficient capacity");
        assert_eq!(err.phase(), Some(Phase::Failed));
    }

    #[tokio::test]
    async fn test_absent_is_success_when_waiting_for_delete() {
        let phases = scripted(&[Phase::Deleting, Phase::Absent]);
        let token = CancellationToken::new();

        let state = poll(
            &fg(),
            || {
                let phases = phases.clone();
                async move {
                    let phase = phases.lock().pop_front().unwrap_or(Phase::Absent);
                    Ok(ResourceState::observed(fg(), phase))
                }
            },
            UNTIL_ABSENT,
            &fast(1_000),
            &token,
        )
        .await
        .unwrap();

        assert!(state.is_absent());
    }

    #[tokio::test]
    async fn test_poll_timeout_is_bounded() {
        let token = CancellationToken::new();
        let start = Instant::now();

        let err = poll(
            &fg(),
            || async { Ok(ResourceState::observed(fg(), Phase::Creating)) },
            UNTIL_ACTIVE,
            &fast(80),
            &token,
        )
        .await
        .unwrap_err();

        let elapsed = start.elapsed();
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert_eq!(err.phase(), Some(Phase::Creating));
        assert!(elapsed >= Duration::from_millis(80));
        assert!(elapsed < Duration::from_millis(80 + 200), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn test_poll_timeout_cuts_off_hanging_query() {
        let token = CancellationToken::new();
        let start = Instant::now();

        let err = poll(
            &fg(),
            || async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(ResourceState::observed(fg(), Phase::Active))
            },
            UNTIL_ACTIVE,
            &fast(50),
            &token,
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Timeout);
        assert!(err.last_state.is_none());
        assert!(start.elapsed() < Duration::from_millis(50 + 200));
    }

    #[tokio::test]
    async fn test_poll_cancellation_is_prompt() {
        let token = Arc::new(CancellationToken::new());
        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                token.cancel("operator abort");
            })
        };
        let config = PollConfig::new()
            .with_interval(Duration::from_secs(10))
            .with_timeout(Duration::from_secs(60));
        let start = Instant::now();

        let err = poll(
            &fg(),
            || async { Ok(ResourceState::observed(fg(), Phase::Creating)) },
            UNTIL_ACTIVE,
            &config,
            &token,
        )
        .await
        .unwrap_err();

        canceller.await.unwrap();
        assert_eq!(err.kind, ErrorKind::Cancelled);
        assert_eq!(err.detail, "operator abort");
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_query_error_propagates() {
        let token = CancellationToken::new();
        let err = poll(
            &fg(),
            || async {
                Err::<ResourceState, _>(ReconcileError::new(ErrorKind::Platform, "throttled"))
            },
            UNTIL_ACTIVE,
            &fast(1_000),
            &token,
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Platform);
    }
}
