//! Circuit breaker (§4.9): opens after `threshold` consecutive failures,
//! stays open for `cooldown`, then permits exactly one probe request.
//! Grounded on `original_source/framework/src/drivers/postgres/pg_pool.cpp`'s
//! `allow_request()`/failure-counter pair, reimplemented with an atomic
//! state machine (§9: a stricter, single-probe gate via
//! `compare_exchange` rather than the donor's read-then-act check, closing
//! the race where two callers could otherwise both see "cooldown elapsed"
//! and both issue a probe).

use std::{
    sync::atomic::{AtomicU32, AtomicU8, Ordering},
    time::{Duration, Instant},
};
use tokio::sync::Mutex;

const CLOSED: u8 = 0;
const OPEN: u8 = 1;
const PROBING: u8 = 2;

/// Tracks consecutive failures for one pooled resource and gates new
/// requests while the breaker is open (§4.9).
pub struct CircuitBreaker {
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    threshold: u32,
    cooldown: Duration,
    opened_at: Mutex<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: AtomicU8::new(CLOSED),
            consecutive_failures: AtomicU32::new(0),
            threshold,
            cooldown,
            opened_at: Mutex::new(None),
        }
    }

    /// Whether a new request may proceed. Closed: always. Open: only once
    /// `cooldown` has elapsed since opening, and then only a single caller
    /// wins the probe; everyone else is refused until that probe reports a
    /// result via [`record_success`](Self::record_success) or
    /// [`record_failure`](Self::record_failure).
    pub async fn allow(&self) -> bool {
        match self.state.load(Ordering::Acquire) {
            CLOSED => true,
            PROBING => false,
            OPEN => {
                let elapsed = self
                    .opened_at
                    .lock()
                    .await
                    .map(|at| at.elapsed() >= self.cooldown)
                    .unwrap_or(true);
                if !elapsed {
                    return false;
                }
                self.state
                    .compare_exchange(OPEN, PROBING, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            }
            _ => unreachable!("breaker state is one of CLOSED, OPEN, PROBING"),
        }
    }

    /// Resets the failure counter and closes the breaker.
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.state.store(CLOSED, Ordering::Release);
    }

    /// Records a failure. Opens the breaker once `threshold` consecutive
    /// failures accumulate (including a failed probe, which reopens it
    /// immediately regardless of the counter).
    pub async fn record_failure(&self) {
        if self.state.load(Ordering::Acquire) == PROBING {
            self.open().await;
            return;
        }
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= self.threshold {
            self.open().await;
        }
    }

    async fn open(&self) {
        *self.opened_at.lock().await = Some(Instant::now());
        self.state.store(OPEN, Ordering::Release);
    }

    pub fn is_open(&self) -> bool {
        self.state.load(Ordering::Acquire) == OPEN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        assert!(breaker.allow().await);
        breaker.record_failure().await;
        breaker.record_failure().await;
        assert!(breaker.allow().await);
        breaker.record_failure().await;
        assert!(!breaker.allow().await);
        assert!(breaker.is_open());
    }

    #[tokio::test]
    async fn success_resets_the_counter() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
        breaker.record_failure().await;
        breaker.record_success();
        breaker.record_failure().await;
        assert!(breaker.allow().await);
    }

    #[tokio::test]
    async fn probe_is_granted_exactly_once_after_cooldown() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(10));
        breaker.record_failure().await;
        assert!(!breaker.allow().await);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(breaker.allow().await);
        assert!(!breaker.allow().await, "a second caller must not also get the probe");
    }

    #[tokio::test]
    async fn failed_probe_reopens_immediately() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(10));
        breaker.record_failure().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(breaker.allow().await);
        breaker.record_failure().await;
        assert!(breaker.is_open());
    }
}
