//! crates/edubase_core/src/retry.rs
//!
//! Bounded retry and polling policies. Every wait loop in the core goes through
//! one of these so that its bounds are named values that tests can shrink.

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::warn;

/// Re-runs a failing operation a fixed number of times with a fixed pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one. Zero behaves like one.
    pub max_attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }
}

/// What bounds a polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollLimit {
    Attempts(u32),
    Elapsed(Duration),
}

/// Repeats a probe until it yields a value or the limit is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub limit: PollLimit,
    pub interval: Duration,
}

impl PollPolicy {
    pub const fn attempts(attempts: u32, interval: Duration) -> Self {
        Self {
            limit: PollLimit::Attempts(attempts),
            interval,
        }
    }

    pub const fn elapsed(max: Duration, interval: Duration) -> Self {
        Self {
            limit: PollLimit::Elapsed(max),
            interval,
        }
    }
}

/// Runs `op` until it succeeds or `policy.max_attempts` is exhausted, returning the
/// last error in the latter case.
pub async fn retry_async<T, E, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                warn!("{} attempt {}/{} failed ({}), retrying...", label, attempt, attempts, e);
                sleep(policy.interval).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Calls `probe` until it returns `Ok(Some(_))`. Returns `Ok(None)` once the limit is
/// exhausted; a probe error aborts the loop immediately.
pub async fn poll<T, E, F, Fut>(policy: &PollPolicy, mut probe: F) -> Result<Option<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let started = Instant::now();
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        if let Some(value) = probe().await? {
            return Ok(Some(value));
        }
        let exhausted = match policy.limit {
            PollLimit::Attempts(max) => attempt >= max,
            PollLimit::Elapsed(max) => started.elapsed() + policy.interval > max,
        };
        if exhausted {
            return Ok(None);
        }
        sleep(policy.interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[tokio::test]
    async fn retry_stops_at_first_success() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::new(5, Duration::ZERO);
        let result: Result<u32, String> = retry_async(&policy, "op", |attempt| {
            calls.set(calls.get() + 1);
            async move {
                if attempt < 3 {
                    Err(format!("attempt {attempt}"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(3));
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn retry_returns_last_error_when_exhausted() {
        let policy = RetryPolicy::new(2, Duration::ZERO);
        let result: Result<(), String> =
            retry_async(&policy, "op", |attempt| async move { Err(format!("boom {attempt}")) })
                .await;
        assert_eq!(result, Err("boom 2".to_string()));
    }

    #[tokio::test]
    async fn poll_gives_up_after_attempt_limit() {
        let calls = Cell::new(0);
        let policy = PollPolicy::attempts(4, Duration::ZERO);
        let result: Result<Option<()>, ()> = poll(&policy, || {
            calls.set(calls.get() + 1);
            async { Ok(None) }
        })
        .await;
        assert_eq!(result, Ok(None));
        assert_eq!(calls.get(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_respects_elapsed_limit() {
        let calls = Cell::new(0);
        let policy = PollPolicy::elapsed(Duration::from_secs(5), Duration::from_secs(1));
        let result: Result<Option<()>, ()> = poll(&policy, || {
            calls.set(calls.get() + 1);
            async { Ok(None) }
        })
        .await;
        assert_eq!(result, Ok(None));
        // probes at t = 0, 1, 2, 3, 4 and 5 seconds
        assert_eq!(calls.get(), 6);
    }

    #[tokio::test]
    async fn poll_returns_first_value() {
        let calls = Cell::new(0);
        let policy = PollPolicy::attempts(10, Duration::ZERO);
        let result: Result<Option<u32>, ()> = poll(&policy, || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move { Ok((n == 2).then_some(n)) }
        })
        .await;
        assert_eq!(result, Ok(Some(2)));
    }
}
