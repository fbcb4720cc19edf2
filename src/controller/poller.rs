//! Status poller
//!
//! Generic wait-until-stable primitive. The caller supplies a status fetch
//! and two predicates; the poller parks the task between fetches with
//! exponential backoff and never runs past its deadline, even when a single
//! fetch hangs.

use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::core::config::PollConfig;
use crate::core::{AgentformError, Result};

/// Backoff settings for status polling
#[derive(Debug, Clone)]
pub struct PollPolicy {
    /// First and smallest delay between fetches
    pub min_interval: Duration,
    /// Largest delay between fetches
    pub max_interval: Duration,
    /// Growth factor per non-terminal fetch
    pub multiplier: f64,
    /// Upper bound for one fetch
    pub call_timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from_config(&PollConfig::default())
    }
}

impl PollPolicy {
    /// Build a policy from configuration
    pub fn from_config(config: &PollConfig) -> Self {
        Self {
            min_interval: Duration::from_millis(config.min_interval_ms),
            max_interval: Duration::from_millis(config.max_interval_ms),
            multiplier: config.multiplier,
            call_timeout: Duration::from_secs(config.call_timeout_secs),
        }
    }

    /// Interval that follows `current`
    pub fn next_interval(&self, current: Duration) -> Duration {
        current
            .mul_f64(self.multiplier.max(1.0))
            .clamp(self.min_interval, self.max_interval)
    }

    /// Add up to 25% jitter, staying within [min, max]
    fn jittered(&self, interval: Duration) -> Duration {
        let spread = interval.as_millis() as u64 / 4;
        let extra = if spread == 0 {
            0
        } else {
            rand::rng().random_range(0..=spread)
        };
        (interval + Duration::from_millis(extra)).clamp(self.min_interval, self.max_interval)
    }
}

/// Waits for remote resources to reach a terminal status before a deadline
#[derive(Debug, Clone)]
pub struct StatusPoller {
    policy: PollPolicy,
    deadline: Instant,
}

impl StatusPoller {
    /// Create a poller that gives up at `deadline`
    pub fn new(policy: PollPolicy, deadline: Instant) -> Self {
        Self { policy, deadline }
    }

    /// Create a poller whose deadline is `budget` from now
    pub fn with_budget(policy: PollPolicy, budget: Duration) -> Self {
        Self::new(policy, Instant::now() + budget)
    }

    /// Get the deadline
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Fetch `resource`'s status until `is_terminal` or `is_failure` holds.
    ///
    /// Returns the terminal status, `StabilizationFailed` carrying the failure
    /// status, or `Timeout` once the deadline passes. Retryable fetch errors
    /// and fetches exceeding the per-call timeout count as "not yet"; other
    /// fetch errors are returned unchanged.
    pub async fn wait_until<S, F, Fut, T, P>(
        &self,
        resource: &str,
        mut fetch: F,
        is_terminal: T,
        is_failure: P,
    ) -> Result<S>
    where
        S: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<S>>,
        T: Fn(&S) -> bool,
        P: Fn(&S) -> bool,
    {
        let started = Instant::now();
        let mut interval = self.policy.min_interval;
        let timeout = || AgentformError::Timeout {
            resource: resource.to_string(),
            waited: started.elapsed(),
        };

        loop {
            let remaining = self.remaining();
            if remaining.is_zero() {
                return Err(timeout());
            }

            let call_budget = self.policy.call_timeout.min(remaining);
            match tokio::time::timeout(call_budget, fetch()).await {
                Ok(Ok(status)) => {
                    if is_failure(&status) {
                        return Err(AgentformError::StabilizationFailed {
                            resource: resource.to_string(),
                            status: status.to_string(),
                        });
                    }
                    if is_terminal(&status) {
                        tracing::debug!(resource, %status, waited = ?started.elapsed(), "stable");
                        return Ok(status);
                    }
                    tracing::debug!(resource, %status, "not yet stable");
                }
                Ok(Err(e)) if e.is_retryable() => {
                    tracing::warn!(resource, error = %e, "status fetch failed, will retry");
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    tracing::warn!(resource, timeout = ?call_budget, "status fetch timed out");
                }
            }

            let remaining = self.remaining();
            if remaining.is_zero() {
                return Err(timeout());
            }
            tokio::time::sleep(self.policy.jittered(interval).min(remaining)).await;
            interval = self.policy.next_interval(interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::AgentStatus;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn policy() -> PollPolicy {
        PollPolicy {
            min_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(8),
            multiplier: 2.0,
            call_timeout: Duration::from_secs(5),
        }
    }

    fn settled(s: &AgentStatus) -> bool {
        !s.is_transient()
    }

    fn failed(s: &AgentStatus) -> bool {
        s.is_failed()
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_terminal_status() {
        let poller = StatusPoller::with_budget(policy(), Duration::from_secs(60));
        let fetches = AtomicU32::new(0);

        let status = poller
            .wait_until(
                "agent A1",
                || {
                    let n = fetches.fetch_add(1, Ordering::SeqCst);
                    async move {
                        Ok(if n < 2 {
                            AgentStatus::Creating
                        } else {
                            AgentStatus::NotPrepared
                        })
                    }
                },
                settled,
                failed,
            )
            .await
            .unwrap();

        assert_eq!(status, AgentStatus::NotPrepared);
        assert_eq!(fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_status_is_reported() {
        let poller = StatusPoller::with_budget(policy(), Duration::from_secs(60));
        let err = poller
            .wait_until(
                "agent A1",
                || async { Ok(AgentStatus::Failed) },
                settled,
                failed,
            )
            .await
            .unwrap_err();

        match err {
            AgentformError::StabilizationFailed { status, .. } => assert_eq!(status, "FAILED"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_at_deadline() {
        let poller = StatusPoller::with_budget(policy(), Duration::from_secs(30));
        let deadline = poller.deadline();

        let err = poller
            .wait_until(
                "agent A1",
                || async { Ok(AgentStatus::Creating) },
                settled,
                failed,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AgentformError::Timeout { .. }));
        assert!(Instant::now() <= deadline);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_fetch_cannot_outlive_deadline() {
        let poller = StatusPoller::with_budget(policy(), Duration::from_secs(12));
        let deadline = poller.deadline();

        let err = poller
            .wait_until(
                "agent A1",
                || std::future::pending::<Result<AgentStatus>>(),
                settled,
                failed,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AgentformError::Timeout { .. }));
        assert!(Instant::now() <= deadline);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_polls_faster_than_min_interval() {
        let poller = StatusPoller::with_budget(policy(), Duration::from_secs(120));
        let seen = Mutex::new(Vec::new());

        poller
            .wait_until(
                "agent A1",
                || {
                    let mut seen = seen.lock().unwrap();
                    seen.push(Instant::now());
                    let n = seen.len();
                    async move {
                        Ok(if n < 6 {
                            AgentStatus::Preparing
                        } else {
                            AgentStatus::Prepared
                        })
                    }
                },
                |s| *s == AgentStatus::Prepared,
                failed,
            )
            .await
            .unwrap();

        let seen = seen.into_inner().unwrap();
        for pair in seen.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_secs(1), "gap {:?} below minimum", gap);
            assert!(gap <= Duration::from_secs(8), "gap {:?} above maximum", gap);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_errors_keep_polling() {
        let poller = StatusPoller::with_budget(policy(), Duration::from_secs(60));
        let fetches = AtomicU32::new(0);

        let status = poller
            .wait_until(
                "agent A1",
                || {
                    let n = fetches.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n == 0 {
                            Err(AgentformError::Throttled("rate exceeded".into()))
                        } else {
                            Ok(AgentStatus::Prepared)
                        }
                    }
                },
                settled,
                failed,
            )
            .await
            .unwrap();

        assert_eq!(status, AgentStatus::Prepared);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_errors_propagate() {
        let poller = StatusPoller::with_budget(policy(), Duration::from_secs(60));
        let err = poller
            .wait_until(
                "agent A1",
                || async { Err::<AgentStatus, _>(AgentformError::not_found("agent A1")) },
                settled,
                failed,
            )
            .await
            .unwrap_err();

        assert!(err.is_not_found());
    }

    #[test]
    fn test_backoff_is_bounded() {
        let policy = policy();
        let mut interval = policy.min_interval;
        for _ in 0..10 {
            interval = policy.next_interval(interval);
        }
        assert_eq!(interval, Duration::from_secs(8));
    }
}
