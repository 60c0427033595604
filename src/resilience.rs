//! Retry back-off schedules and the per-connection circuit breaker.
//!
//! Pure computation only: this module never performs I/O. The
//! `ConnectionManager` (see [`crate::connection`]) is the only caller.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// How the retry delay grows with attempt number.
///
/// The `Fibonacci` name is historical: the source system's formula is an
/// arithmetic progression, not the Fibonacci sequence. The spec preserves
/// the observed behavior under that name rather than "fixing" it, since
/// consumers may depend on the exact delays it produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lengthening {
    /// `n * interval`
    Linear,
    /// `(n + (n - 1)) * interval`, i.e. `(2n - 1) * interval`.
    Fibonacci,
    /// `floor(n^2 / 2) * interval`
    HalfSquare,
    /// `interval * 2^(n-1)`
    Squaring,
}

impl Default for Lengthening {
    fn default() -> Self {
        Lengthening::Fibonacci
    }
}

impl Lengthening {
    /// Compute the back-off delay for 1-based attempt `n` given the base
    /// `interval`, per spec.md §4.1.
    pub fn delay(&self, n: u32, interval: Duration) -> Duration {
        let n = n as u64;
        let multiplier = match self {
            Lengthening::Linear => n,
            Lengthening::Fibonacci => (2 * n).saturating_sub(1),
            Lengthening::HalfSquare => (n * n) / 2,
            Lengthening::Squaring => 1u64 << n.saturating_sub(1).min(62),
        };
        interval.saturating_mul(multiplier as u32)
    }
}

/// Retry and breaker parameters for one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResiliencePolicy {
    /// Number of retry attempts after the first, i.e. total attempts made
    /// is `retry_count + 1`.
    pub retry_count: u32,
    /// Base interval fed into the `lengthening` formula.
    pub retry_interval: Duration,
    /// How the delay grows across attempts.
    pub lengthening: Lengthening,
    /// Consecutive `FatalAndFailure` errors before the breaker opens.
    pub breaker_failure_count: u32,
    /// How long the breaker stays open before allowing one probe.
    pub breaker_test_interval: Duration,
}

impl Default for ResiliencePolicy {
    fn default() -> Self {
        Self {
            retry_count: 0,
            retry_interval: Duration::from_millis(250),
            lengthening: Lengthening::Fibonacci,
            breaker_failure_count: 5,
            breaker_test_interval: Duration::from_millis(30_000),
        }
    }
}

impl ResiliencePolicy {
    /// Delay before attempt `n` (1-based).
    pub fn delay(&self, n: u32) -> Duration {
        self.lengthening.delay(n, self.retry_interval)
    }

    /// Total number of attempts the policy allows, including the first.
    pub fn attempts(&self) -> u32 {
        self.retry_count + 1
    }
}

/// Circuit breaker phase, per spec.md's `Breaker State` entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerPhase {
    Closed,
    Open,
    HalfOpen,
}

/// Circuit breaker state for one [`crate::connection::ConnectionManager`].
///
/// Guarded by a single lock so phase transitions and the failure counter
/// stay consistent under concurrent callers, per spec.md §5 ("updates are
/// atomic with respect to concurrent callers of that manager").
#[derive(Debug)]
pub struct BreakerState {
    inner: parking_lot::Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    phase: BreakerPhase,
    consecutive_failures: u32,
    open_since: Option<Instant>,
    /// Set once a `HalfOpen` probe has been handed out, so concurrent
    /// callers don't all probe at once.
    probe_in_flight: bool,
}

/// What the caller should do before attempting an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Proceed normally.
    Allowed,
    /// Proceed, but this is the single `HalfOpen` probe; a failure reopens
    /// the breaker immediately.
    Probe,
    /// Fail immediately without I/O.
    Rejected,
}

impl Default for BreakerState {
    fn default() -> Self {
        Self::new()
    }
}

impl BreakerState {
    pub fn new() -> Self {
        Self {
            inner: parking_lot::Mutex::new(Inner {
                phase: BreakerPhase::Closed,
                consecutive_failures: 0,
                open_since: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> BreakerPhase {
        self.inner.lock().phase
    }

    /// Consecutive `FatalAndFailure` count since the last reset.
    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// When the breaker last opened, if it's currently open or half-open.
    pub fn open_since(&self) -> Option<Instant> {
        self.inner.lock().open_since
    }

    /// Consult the breaker before attempting an operation. Implements the
    /// Closed -> Open -> HalfOpen transition of spec.md §4.2 step 1.
    pub fn admit(&self, policy: &ResiliencePolicy, now: Instant) -> Admission {
        let mut inner = self.inner.lock();
        match inner.phase {
            BreakerPhase::Closed => Admission::Allowed,
            BreakerPhase::Open => {
                let elapsed = inner
                    .open_since
                    .map(|since| now.saturating_duration_since(since))
                    .unwrap_or_default();
                if elapsed >= policy.breaker_test_interval {
                    inner.phase = BreakerPhase::HalfOpen;
                    inner.probe_in_flight = true;
                    Admission::Probe
                } else {
                    Admission::Rejected
                }
            }
            BreakerPhase::HalfOpen => {
                if inner.probe_in_flight {
                    Admission::Rejected
                } else {
                    inner.probe_in_flight = true;
                    Admission::Probe
                }
            }
        }
    }

    /// Record a successful attempt. Closes the breaker if it was
    /// `HalfOpen`, per spec.md §4.2 step 2d.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.phase == BreakerPhase::HalfOpen {
            inner.phase = BreakerPhase::Closed;
        }
        inner.consecutive_failures = 0;
        inner.open_since = None;
        inner.probe_in_flight = false;
    }

    /// Record a `FatalAndFailure`. Opens the breaker once the consecutive
    /// count reaches `breaker_failure_count`, per spec.md §4.2 step 3.
    pub fn record_failure(&self, policy: &ResiliencePolicy, now: Instant) {
        let mut inner = self.inner.lock();
        inner.probe_in_flight = false;

        if inner.phase == BreakerPhase::HalfOpen {
            // A failed probe reopens immediately.
            inner.phase = BreakerPhase::Open;
            inner.open_since = Some(now);
            return;
        }

        inner.consecutive_failures += 1;
        if inner.consecutive_failures >= policy.breaker_failure_count {
            inner.phase = BreakerPhase::Open;
            inner.open_since = Some(now);
        }
    }
}
