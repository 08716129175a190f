use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::GatewayError;
use crate::session::{Session, SessionQuotas};

/// Circuit breaker tuning.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive upstream failures before the circuit opens.
    pub failure_threshold: u32,
    /// Initial cooldown before a half-open trial is admitted.
    pub cooldown: Duration,
    /// Cap on the backed-off cooldown after repeated half-open failures.
    pub max_cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(300),
            max_cooldown: Duration::from_secs(1800),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open { opened_at: Instant },
    /// One trial call is in flight; everyone else is denied until its outcome
    /// is recorded.
    HalfOpen,
}

struct Inner {
    window: VecDeque<Instant>,
    circuit: CircuitState,
    consecutive_failures: u32,
    current_cooldown: Duration,
}

/// Observable snapshot of the limiter, for logging and status reporting.
#[derive(Debug, Clone)]
pub struct RateLimiterState {
    pub calls_in_window: usize,
    pub circuit_open: bool,
    pub circuit_open_for: Option<Duration>,
    pub consecutive_failures: u32,
}

/// Sliding-window rate limiter with a circuit breaker.
///
/// Admission tracks calls over a rolling window against a per-session ceiling.
/// `acquire` blocks the caller up to its timeout while the window is full, and
/// fails fast while the circuit is open. Admission decisions and counter
/// updates happen under one lock, so concurrent callers can never overshoot
/// the ceiling.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<Inner>>,
    quotas: SessionQuotas,
    window: Duration,
    breaker: CircuitBreakerConfig,
}

impl RateLimiter {
    pub fn new(quotas: SessionQuotas, breaker: CircuitBreakerConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                window: VecDeque::new(),
                circuit: CircuitState::Closed,
                consecutive_failures: 0,
                current_cooldown: breaker.cooldown,
            })),
            quotas,
            window: Duration::from_secs(60),
            breaker,
        }
    }

    /// Acquire one admission slot for the given session, waiting at most
    /// `timeout` for window capacity.
    pub async fn acquire(&self, session: Session, timeout: Duration) -> Result<(), GatewayError> {
        let deadline = Instant::now() + timeout;

        loop {
            let mut inner = self.inner.lock().await;
            let now = Instant::now();

            // Circuit gate first: while open, nobody waits on the window.
            let half_open_candidate = match inner.circuit {
                CircuitState::Closed => false,
                CircuitState::HalfOpen => return Err(GatewayError::CircuitOpen),
                CircuitState::Open { opened_at } => {
                    if now.duration_since(opened_at) < inner.current_cooldown {
                        return Err(GatewayError::CircuitOpen);
                    }
                    true
                }
            };

            while let Some(&front) = inner.window.front() {
                if now.duration_since(front) >= self.window {
                    inner.window.pop_front();
                } else {
                    break;
                }
            }

            let ceiling = self.quotas.ceiling(session);
            if ceiling == 0 {
                // A zero quota can never admit; waiting would be unbounded.
                return Err(GatewayError::RateLimitTimeout);
            }
            if inner.window.len() < ceiling {
                inner.window.push_back(now);
                if half_open_candidate {
                    // The trial slot: admit exactly one call past the cooldown.
                    inner.circuit = CircuitState::HalfOpen;
                    tracing::warn!(
                        session = session.name(),
                        "Circuit breaker half-open: admitting trial call"
                    );
                }
                return Ok(());
            }

            // Window full: wait for the oldest call to fall out, bounded by
            // the caller's deadline.
            let front = *inner.window.front().expect("window is non-empty");
            let wait = front + self.window - now + Duration::from_millis(50);
            drop(inner);

            if Instant::now() + wait > deadline {
                return Err(GatewayError::RateLimitTimeout);
            }
            tracing::debug!(
                session = session.name(),
                wait_secs = wait.as_secs_f64(),
                "Rate limiter: waiting for window capacity"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Record a successful upstream call. Closes the circuit and resets the
    /// failure counter.
    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        if inner.circuit != CircuitState::Closed {
            tracing::warn!("Circuit breaker closed after successful trial call");
        }
        inner.circuit = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.current_cooldown = self.breaker.cooldown;
    }

    /// Record a failed upstream call. Opens the circuit at the failure
    /// threshold; a failed half-open trial reopens it with a doubled
    /// (capped) cooldown.
    pub async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.consecutive_failures += 1;

        match inner.circuit {
            CircuitState::HalfOpen => {
                inner.current_cooldown =
                    (inner.current_cooldown * 2).min(self.breaker.max_cooldown);
                inner.circuit = CircuitState::Open {
                    opened_at: Instant::now(),
                };
                tracing::warn!(
                    cooldown_secs = inner.current_cooldown.as_secs(),
                    "Circuit breaker reopened: trial call failed"
                );
            }
            CircuitState::Closed => {
                if inner.consecutive_failures >= self.breaker.failure_threshold {
                    inner.circuit = CircuitState::Open {
                        opened_at: Instant::now(),
                    };
                    tracing::warn!(
                        consecutive_failures = inner.consecutive_failures,
                        cooldown_secs = inner.current_cooldown.as_secs(),
                        "Circuit breaker opened"
                    );
                }
            }
            CircuitState::Open { .. } => {}
        }
    }

    pub async fn state(&self) -> RateLimiterState {
        let inner = self.inner.lock().await;
        let (circuit_open, circuit_open_for) = match inner.circuit {
            CircuitState::Closed => (false, None),
            CircuitState::HalfOpen => (true, None),
            CircuitState::Open { opened_at } => (true, Some(opened_at.elapsed())),
        };
        RateLimiterState {
            calls_in_window: inner.window.len(),
            circuit_open,
            circuit_open_for,
            consecutive_failures: inner.consecutive_failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(weekend: usize, threshold: u32, cooldown_secs: u64) -> RateLimiter {
        RateLimiter::new(
            SessionQuotas {
                weekend_per_min: weekend,
                trading_hours_per_min: 10,
                after_hours_per_min: 30,
            },
            CircuitBreakerConfig {
                failure_threshold: threshold,
                cooldown: Duration::from_secs(cooldown_secs),
                max_cooldown: Duration::from_secs(cooldown_secs * 4),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn weekend_ceiling_enforced() {
        let limiter = limiter(2, 5, 300);
        let timeout = Duration::from_secs(5);

        let mut admitted = 0;
        let mut denied = 0;
        for _ in 0..5 {
            match limiter.acquire(Session::Weekend, timeout).await {
                Ok(()) => admitted += 1,
                Err(GatewayError::RateLimitTimeout) => denied += 1,
                Err(other) => panic!("unexpected denial: {other}"),
            }
        }

        assert_eq!(admitted, 2);
        assert_eq!(denied, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_ceiling_denies_instead_of_panicking() {
        let limiter = limiter(0, 5, 300);

        assert_eq!(
            limiter.acquire(Session::Weekend, Duration::from_secs(5)).await,
            Err(GatewayError::RateLimitTimeout)
        );
        // Other sessions keep their own quotas.
        assert!(limiter
            .acquire(Session::AfterHours, Duration::from_secs(1))
            .await
            .is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn window_capacity_returns_after_rollover() {
        let limiter = limiter(2, 5, 300);
        let timeout = Duration::from_secs(1);

        assert!(limiter.acquire(Session::Weekend, timeout).await.is_ok());
        assert!(limiter.acquire(Session::Weekend, timeout).await.is_ok());
        assert_eq!(
            limiter.acquire(Session::Weekend, timeout).await,
            Err(GatewayError::RateLimitTimeout)
        );

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(limiter.acquire(Session::Weekend, timeout).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn blocking_acquire_waits_for_slot() {
        let limiter = limiter(2, 5, 300);

        assert!(limiter.acquire(Session::Weekend, Duration::from_secs(1)).await.is_ok());
        assert!(limiter.acquire(Session::Weekend, Duration::from_secs(1)).await.is_ok());

        // Generous timeout: the third call should block, then be admitted
        // once the first timestamp falls out of the 60s window.
        let result = limiter
            .acquire(Session::Weekend, Duration::from_secs(120))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn circuit_opens_after_threshold_failures() {
        let limiter = limiter(10, 3, 300);
        let timeout = Duration::from_secs(1);

        for _ in 0..3 {
            limiter.record_failure().await;
        }

        assert_eq!(
            limiter.acquire(Session::AfterHours, timeout).await,
            Err(GatewayError::CircuitOpen)
        );
        assert!(limiter.state().await.circuit_open);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_exactly_one_trial() {
        let limiter = limiter(10, 3, 300);
        let timeout = Duration::from_secs(1);

        for _ in 0..3 {
            limiter.record_failure().await;
        }
        tokio::time::advance(Duration::from_secs(301)).await;

        // First post-cooldown call is the trial; the next is still denied.
        assert!(limiter.acquire(Session::AfterHours, timeout).await.is_ok());
        assert_eq!(
            limiter.acquire(Session::AfterHours, timeout).await,
            Err(GatewayError::CircuitOpen)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn successful_trial_closes_circuit() {
        let limiter = limiter(10, 3, 300);
        let timeout = Duration::from_secs(1);

        for _ in 0..3 {
            limiter.record_failure().await;
        }
        tokio::time::advance(Duration::from_secs(301)).await;

        assert!(limiter.acquire(Session::AfterHours, timeout).await.is_ok());
        limiter.record_success().await;

        let state = limiter.state().await;
        assert!(!state.circuit_open);
        assert_eq!(state.consecutive_failures, 0);
        assert!(limiter.acquire(Session::AfterHours, timeout).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_trial_reopens_with_backoff() {
        let limiter = limiter(10, 3, 100);
        let timeout = Duration::from_secs(1);

        for _ in 0..3 {
            limiter.record_failure().await;
        }
        tokio::time::advance(Duration::from_secs(101)).await;
        assert!(limiter.acquire(Session::AfterHours, timeout).await.is_ok());
        limiter.record_failure().await;

        // Original cooldown has elapsed but the backed-off one (200s) has not.
        tokio::time::advance(Duration::from_secs(101)).await;
        assert_eq!(
            limiter.acquire(Session::AfterHours, timeout).await,
            Err(GatewayError::CircuitOpen)
        );

        tokio::time::advance(Duration::from_secs(100)).await;
        assert!(limiter.acquire(Session::AfterHours, timeout).await.is_ok());
    }
}
