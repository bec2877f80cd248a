//! Convergence primitive.
//!
//! Polls a synchronous predicate at a fixed cadence until it converges.
//!
//! - **Once**: resolve on the first passing tick (or after `reliability`
//!   consecutive passing ticks) strictly before the deadline. A pass at or
//!   after the deadline is rejected as [`ConvergeError::LateSuccess`].
//! - **Continuous**: keep polling until the window has elapsed; any failing
//!   tick rejects immediately.
//!
//! A tick fails when the predicate raises or returns a literal `false`.
//! Returning a deferred value is a usage violation and is never retried.

use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::config::{duration_ms, DEFAULT_INTERVAL_MS, DEFAULT_RELIABILITY, DEFAULT_TIMEOUT_MS};
use crate::result::{ConvergeError, ConvergeResult};
use crate::stats::Stats;
use crate::step::{IntoVerdict, Verdict};

/// Shortest cadence the loop will sleep for
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Polling mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollMode {
    /// Succeed once before the deadline
    #[default]
    Once,
    /// Stay succeeding for the whole window
    Continuous,
}

/// Options for one convergence
#[derive(Debug, Clone)]
pub struct PollOptions {
    /// Deadline (Once) or window (Continuous)
    pub timeout: Duration,
    /// Polling mode
    pub mode: PollMode,
    /// Cadence between ticks
    pub interval: Duration,
    /// Consecutive passing ticks required in Once mode
    pub reliability: u32,
    /// External abort signal, checked at every tick
    pub signal: Option<CancellationToken>,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            mode: PollMode::Once,
            interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
            reliability: DEFAULT_RELIABILITY,
            signal: None,
        }
    }
}

impl PollOptions {
    /// Create options with a budget
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    /// Set the mode
    #[must_use]
    pub const fn with_mode(mut self, mode: PollMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the cadence
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the reliability
    #[must_use]
    pub const fn with_reliability(mut self, reliability: u32) -> Self {
        self.reliability = reliability;
        self
    }

    /// Set the abort signal
    #[must_use]
    pub fn with_signal(mut self, signal: Option<CancellationToken>) -> Self {
        self.signal = signal;
        self
    }
}

/// Poll `predicate` until it converges.
///
/// The resolved [`Stats`] carry the value of the last passing tick.
pub async fn poll<F, R>(mut predicate: F, options: &PollOptions) -> ConvergeResult<Stats>
where
    F: FnMut() -> R,
    R: IntoVerdict,
{
    let always = options.mode == PollMode::Continuous;
    let mut stats = Stats::begin(options.timeout, always);
    let timeout_ms = duration_ms(options.timeout);
    let reliability = options.reliability.max(1);
    let interval = options.interval.max(MIN_INTERVAL);
    let mut streak = 0u32;

    loop {
        check_signal(options.signal.as_ref())?;
        stats.runs += 1;
        let verdict = predicate().into_verdict();
        let elapsed = stats.start.elapsed();
        trace!(
            runs = stats.runs,
            elapsed_ms = duration_ms(elapsed),
            timeout_ms,
            "poll tick"
        );

        let failure = match verdict {
            Ok(Verdict::Pass(value)) => match options.mode {
                PollMode::Once if elapsed >= options.timeout => {
                    return Err(ConvergeError::late_success(
                        timeout_ms,
                        duration_ms(elapsed),
                    ));
                }
                PollMode::Once => {
                    streak += 1;
                    if streak >= reliability {
                        return Ok(stats.finish(value));
                    }
                    None
                }
                PollMode::Continuous if elapsed >= options.timeout => {
                    return Ok(stats.finish(value));
                }
                PollMode::Continuous => None,
            },
            Ok(Verdict::False) => Some(ConvergeError::explicit_false("predicate returned false")),
            Ok(Verdict::Deferred) => {
                warn!(runs = stats.runs, "predicate returned a deferred value");
                return Err(ConvergeError::usage(
                    "predicate returned a deferred value; predicates must be synchronous",
                ));
            }
            Err(error) if error.is_fatal() => return Err(error),
            Err(error) => Some(error),
        };

        if let Some(error) = failure {
            streak = 0;
            if always {
                return Err(error);
            }
            if elapsed >= options.timeout {
                return Err(ConvergeError::timeout_exceeded(
                    timeout_ms,
                    stats.runs,
                    Some(error),
                ));
            }
        }

        let remaining = options.timeout.saturating_sub(elapsed);
        pause(interval.min(remaining).max(MIN_INTERVAL), options.signal.as_ref()).await?;
    }
}

/// Evaluate `predicate` once, without retrying
pub fn check_once<F, R>(predicate: F) -> ConvergeResult<Value>
where
    F: FnOnce() -> R,
    R: IntoVerdict,
{
    match predicate().into_verdict()? {
        Verdict::Pass(value) => Ok(value),
        Verdict::False => Err(ConvergeError::explicit_false("predicate returned false")),
        Verdict::Deferred => Err(ConvergeError::usage(
            "predicate returned a deferred value; predicates must be synchronous",
        )),
    }
}

pub(crate) fn check_signal(signal: Option<&CancellationToken>) -> ConvergeResult<()> {
    match signal {
        Some(token) if token.is_cancelled() => {
            warn!("convergence aborted by caller");
            Err(ConvergeError::AbortedByCaller)
        }
        _ => Ok(()),
    }
}

/// Sleep for `duration`, waking early if the signal fires
pub(crate) async fn pause(
    duration: Duration,
    signal: Option<&CancellationToken>,
) -> ConvergeResult<()> {
    match signal {
        Some(token) => {
            tokio::select! {
                () = token.cancelled() => {
                    warn!("convergence aborted by caller");
                    Err(ConvergeError::AbortedByCaller)
                }
                () = tokio::time::sleep(duration) => Ok(()),
            }
        }
        None => {
            tokio::time::sleep(duration).await;
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::result::ErrorKind;
    use futures::future::BoxFuture;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    mod poll_options {
        use super::*;

        #[test]
        fn test_default() {
            let options = PollOptions::default();
            assert_eq!(options.timeout, ms(2000));
            assert_eq!(options.interval, ms(10));
            assert_eq!(options.reliability, 1);
            assert_eq!(options.mode, PollMode::Once);
            assert!(options.signal.is_none());
        }

        #[test]
        fn test_builders() {
            let options = PollOptions::new(ms(100))
                .with_mode(PollMode::Continuous)
                .with_interval(ms(5))
                .with_reliability(3);
            assert_eq!(options.timeout, ms(100));
            assert_eq!(options.mode, PollMode::Continuous);
            assert_eq!(options.interval, ms(5));
            assert_eq!(options.reliability, 3);
        }
    }

    mod once {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_immediate_pass() {
            let stats = poll(|| json!("ok"), &PollOptions::new(ms(100))).await.unwrap();
            assert_eq!(stats.runs, 1);
            assert_eq!(stats.value, json!("ok"));
            assert!(!stats.always);
        }

        #[tokio::test(start_paused = true)]
        async fn test_eventual_pass() {
            let counter = Arc::new(AtomicUsize::new(0));
            let seen = counter.clone();
            let stats = poll(
                move || seen.fetch_add(1, Ordering::SeqCst) >= 2,
                &PollOptions::new(ms(1000)),
            )
            .await
            .unwrap();
            assert_eq!(stats.runs, 3);
            assert_eq!(counter.load(Ordering::SeqCst), 3);
            assert!(stats.elapsed >= ms(20));
        }

        #[tokio::test(start_paused = true)]
        async fn test_timeout_carries_last_failure() {
            let start = Instant::now();
            let err = poll(|| Err::<bool, _>("still loading"), &PollOptions::new(ms(100)))
                .await
                .unwrap_err();
            assert!(start.elapsed() >= ms(100));
            assert!(start.elapsed() < ms(110));
            assert_eq!(err.kind(), ErrorKind::TimeoutExceeded);
            assert_eq!(err.cause().unwrap().to_string(), "still loading");
        }

        #[tokio::test(start_paused = true)]
        async fn test_explicit_false_times_out() {
            let err = poll(|| false, &PollOptions::new(ms(30))).await.unwrap_err();
            assert_eq!(err.cause().unwrap().kind(), ErrorKind::ExplicitFalse);
        }

        #[tokio::test(start_paused = true)]
        async fn test_late_success_rejected() {
            let err = poll(|| true, &PollOptions::new(Duration::ZERO))
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::LateSuccess);
        }

        #[tokio::test(start_paused = true)]
        async fn test_reliability_crossing_deadline_is_late() {
            let options = PollOptions::new(ms(25)).with_reliability(5);
            let err = poll(|| true, &options).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::LateSuccess);
        }

        #[tokio::test(start_paused = true)]
        async fn test_reliability_requires_consecutive_passes() {
            let counter = Arc::new(AtomicUsize::new(0));
            let seen = counter.clone();
            // pass, fail, pass, pass
            let stats = poll(
                move || seen.fetch_add(1, Ordering::SeqCst) != 1,
                &PollOptions::new(ms(1000)).with_reliability(2),
            )
            .await
            .unwrap();
            assert_eq!(stats.runs, 4);
        }

        #[tokio::test(start_paused = true)]
        async fn test_deferred_is_not_retried() {
            let counter = Arc::new(AtomicUsize::new(0));
            let seen = counter.clone();
            let err = poll(
                move || -> BoxFuture<'static, bool> {
                    let _ = seen.fetch_add(1, Ordering::SeqCst);
                    Box::pin(async { true })
                },
                &PollOptions::new(ms(1000)),
            )
            .await
            .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::UsageViolation);
            assert_eq!(counter.load(Ordering::SeqCst), 1);
        }

        #[tokio::test(start_paused = true)]
        async fn test_fatal_error_not_retried() {
            let start = Instant::now();
            let err = poll(
                || Err::<bool, _>(ConvergeError::usage("no scope")),
                &PollOptions::new(ms(1000)),
            )
            .await
            .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::UsageViolation);
            assert_eq!(start.elapsed(), Duration::ZERO);
        }
    }

    mod continuous {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_holds_for_window() {
            let start = Instant::now();
            let stats = poll(
                || true,
                &PollOptions::new(ms(50)).with_mode(PollMode::Continuous),
            )
            .await
            .unwrap();
            assert!(start.elapsed() >= ms(50));
            assert!(start.elapsed() < ms(60));
            assert!(stats.always);
            assert!(stats.runs >= 6);
        }

        #[tokio::test(start_paused = true)]
        async fn test_first_failure_rejects_immediately() {
            let counter = Arc::new(AtomicUsize::new(0));
            let seen = counter.clone();
            let start = Instant::now();
            let err = poll(
                move || seen.fetch_add(1, Ordering::SeqCst) < 2,
                &PollOptions::new(ms(500)).with_mode(PollMode::Continuous),
            )
            .await
            .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ExplicitFalse);
            assert!(start.elapsed() < ms(30));
        }

        #[tokio::test(start_paused = true)]
        async fn test_zero_window_checks_once() {
            let stats = poll(
                || json!(1),
                &PollOptions::new(Duration::ZERO).with_mode(PollMode::Continuous),
            )
            .await
            .unwrap();
            assert_eq!(stats.runs, 1);
            assert_eq!(stats.value, json!(1));
        }
    }

    mod abort {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_cancelled_before_start() {
            let token = CancellationToken::new();
            token.cancel();
            let err = poll(|| true, &PollOptions::default().with_signal(Some(token)))
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::AbortedByCaller);
        }

        #[tokio::test(start_paused = true)]
        async fn test_cancelled_mid_poll() {
            let token = CancellationToken::new();
            let trigger = token.clone();
            let _ = tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(35)).await;
                trigger.cancel();
            });
            let start = Instant::now();
            let err = poll(|| false, &PollOptions::default().with_signal(Some(token)))
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::AbortedByCaller);
            assert!(start.elapsed() < ms(50));
        }
    }

    mod single_check {
        use super::*;

        #[test]
        fn test_check_once() {
            assert_eq!(check_once(|| json!(3)).unwrap(), json!(3));
            assert_eq!(
                check_once(|| false).unwrap_err().kind(),
                ErrorKind::ExplicitFalse
            );
        }
    }
}
