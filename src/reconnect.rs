//! Jittered exponential backoff for re-establishing the connection.
//!
//! [`ReconnectSupervisor`] has two states: idle, and a liveness check pending.
//! [`ReconnectSupervisor::on_disconnect`] moves idle to pending and schedules
//! the check after a backoff delay; calls while a check is pending are
//! coalesced. When the check fires and the transport is still down, it
//! schedules the next round and asks the transport to reconnect.
//!
//! The delay for attempt `n` is
//! `clamp(random[0, 1) × min(2^n - 1, max), min, max)` in seconds.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::transport::Transport;

pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BackoffError {
    #[error("Reconnect minimum interval ({min:?}) exceeds maximum ({max:?})")]
    MinAboveMax { min: Duration, max: Duration },
}

/// Backoff bounds. `min <= max` holds for every constructed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    min: Duration,
    max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            min: DEFAULT_MIN_INTERVAL,
            max: DEFAULT_MAX_INTERVAL,
        }
    }
}

impl BackoffPolicy {
    pub fn new(min: Duration, max: Duration) -> Result<Self, BackoffError> {
        if min > max {
            return Err(BackoffError::MinAboveMax { min, max });
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Delay for `attempt` with a fresh random jitter factor.
    pub fn next(&self, attempt: u32) -> Duration {
        let jitter = rand::rng().random::<f64>();
        self.delay(attempt, jitter)
    }

    /// Delay for `attempt` with the given jitter factor in `[0, 1]`.
    pub fn delay(&self, attempt: u32, jitter: f64) -> Duration {
        let max_secs = self.max.as_secs_f64();
        // 2^64 already dwarfs any sane maximum.
        let ceiling = (2f64.powi(attempt.min(64) as i32) - 1.0).min(max_secs);
        let secs = jitter.clamp(0.0, 1.0) * ceiling;

        Duration::from_secs_f64(secs).clamp(self.min, self.max)
    }
}

/// Coalescing reconnect scheduler. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ReconnectSupervisor {
    inner: Arc<Inner>,
}

struct Inner {
    policy: BackoffPolicy,
    transport: Arc<dyn Transport>,
    attempts: AtomicU32,
    check_scheduled: AtomicBool,
    cancel: CancellationToken,
}

impl ReconnectSupervisor {
    pub fn new(
        policy: BackoffPolicy,
        transport: Arc<dyn Transport>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                policy,
                transport,
                attempts: AtomicU32::new(0),
                check_scheduled: AtomicBool::new(false),
                cancel,
            }),
        }
    }

    /// Schedules a liveness check unless one is already pending.
    ///
    /// Returns `true` if this call scheduled the check. Safe to call from any
    /// number of tasks at once; exactly one wins.
    pub fn on_disconnect(&self) -> bool {
        if self.inner.cancel.is_cancelled() {
            return false;
        }
        if self
            .inner
            .check_scheduled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let attempt = self.inner.attempts.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        let delay = self.inner.policy.next(attempt);
        tracing::info!(attempt, delay_secs = delay.as_secs_f64(), "Scheduling reconnect check");

        let this = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = this.inner.cancel.cancelled() => {
                    this.inner.check_scheduled.store(false, Ordering::Release);
                }
                _ = tokio::time::sleep(delay) => this.check().await,
            }
        });
        true
    }

    /// Runs the liveness check now.
    pub async fn check(&self) {
        self.inner.check_scheduled.store(false, Ordering::Release);
        if self.inner.cancel.is_cancelled() || self.inner.transport.is_connected() {
            return;
        }

        // Schedule first so a failure event raised by reconnect() coalesces into it.
        self.on_disconnect();
        tracing::info!("Connection is down, reconnecting");
        if let Err(e) = self.inner.transport.reconnect().await {
            tracing::warn!(error = %e, "Reconnect attempt failed");
        }
    }

    /// Backoff rounds started so far. Never reset.
    pub fn attempt_count(&self) -> u32 {
        self.inner.attempts.load(Ordering::Acquire)
    }

    pub fn is_check_scheduled(&self) -> bool {
        self.inner.check_scheduled.load(Ordering::Acquire)
    }

    pub fn policy(&self) -> BackoffPolicy {
        self.inner.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::FakeTransport;
    use proptest::prelude::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_min_above_max_rejected() {
        assert_eq!(
            BackoffPolicy::new(secs(10), secs(5)),
            Err(BackoffError::MinAboveMax {
                min: secs(10),
                max: secs(5)
            })
        );
        assert!(BackoffPolicy::new(secs(0), secs(0)).is_ok());
        assert!(BackoffPolicy::new(secs(5), secs(5)).is_ok());
    }

    #[test]
    fn test_delay_formula() {
        let policy = BackoffPolicy::new(secs(1), secs(300)).unwrap();
        // 2^3 - 1 = 7
        assert_eq!(policy.delay(3, 1.0), secs(7));
        assert_eq!(policy.delay(3, 0.5), Duration::from_secs_f64(3.5));
        // Clamped up to min.
        assert_eq!(policy.delay(3, 0.0), secs(1));
        // Exponent beyond max is capped.
        assert_eq!(policy.delay(20, 1.0), secs(300));
        assert_eq!(policy.delay(u32::MAX, 1.0), secs(300));
    }

    #[test]
    fn test_expected_delay_non_decreasing() {
        let policy = BackoffPolicy::default();
        let expected = |attempt| policy.delay(attempt, 0.5);
        for attempt in 1..20 {
            assert!(expected(attempt) <= expected(attempt + 1), "attempt {attempt}");
        }
        // Plateau once 2^n - 1 passes the maximum.
        assert_eq!(expected(20), expected(30));
    }

    proptest! {
        #[test]
        fn prop_delay_within_bounds(
            min in 0u64..600,
            extra in 0u64..600,
            attempt in 1u32..40,
        ) {
            let policy = BackoffPolicy::new(secs(min), secs(min + extra)).unwrap();
            let delay = policy.next(attempt);
            prop_assert!(delay >= policy.min());
            prop_assert!(delay <= policy.max());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_disconnects_schedule_once() {
        let transport = FakeTransport::new(false);
        let supervisor =
            ReconnectSupervisor::new(BackoffPolicy::default(), transport, CancellationToken::new());

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let s = supervisor.clone();
                tokio::spawn(async move { s.on_disconnect() })
            })
            .collect();

        let mut scheduled = 0;
        for h in handles {
            if h.await.unwrap() {
                scheduled += 1;
            }
        }
        assert_eq!(scheduled, 1);
        assert_eq!(supervisor.attempt_count(), 1);
        assert!(supervisor.is_check_scheduled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_reconnects_and_goes_idle() {
        let transport = FakeTransport::new(false);
        let supervisor = ReconnectSupervisor::new(
            BackoffPolicy::new(secs(1), secs(2)).unwrap(),
            transport.clone(),
            CancellationToken::new(),
        );

        assert_eq!(supervisor.policy().max(), secs(2));
        assert!(supervisor.on_disconnect());
        tokio::time::sleep(secs(3)).await;
        assert_eq!(transport.reconnects(), 1);
        // The follow-up round finds the link healthy and stops.
        tokio::time::sleep(secs(3)).await;
        assert_eq!(transport.reconnects(), 1);
        assert!(!supervisor.is_check_scheduled());
        assert_eq!(supervisor.attempt_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keeps_retrying_while_down() {
        let transport = FakeTransport::new(false);
        transport.set_heals(false);
        let supervisor = ReconnectSupervisor::new(
            BackoffPolicy::new(secs(1), secs(1)).unwrap(),
            transport.clone(),
            CancellationToken::new(),
        );

        supervisor.on_disconnect();
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(transport.reconnects(), 3);
        assert!(supervisor.is_check_scheduled());
        assert_eq!(supervisor.attempt_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_when_connected_is_noop() {
        let transport = FakeTransport::new(false);
        transport.set_connected(true);
        let supervisor = ReconnectSupervisor::new(
            BackoffPolicy::default(),
            transport.clone(),
            CancellationToken::new(),
        );

        supervisor.check().await;
        assert_eq!(transport.reconnects(), 0);
        assert!(!supervisor.is_check_scheduled());
        assert_eq!(supervisor.attempt_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drops_pending_check() {
        let transport = FakeTransport::new(false);
        let cancel = CancellationToken::new();
        let supervisor = ReconnectSupervisor::new(
            BackoffPolicy::new(secs(1), secs(1)).unwrap(),
            transport.clone(),
            cancel.clone(),
        );

        supervisor.on_disconnect();
        cancel.cancel();
        tokio::time::sleep(secs(5)).await;
        assert_eq!(transport.reconnects(), 0);
        assert!(!supervisor.on_disconnect());
    }
}
