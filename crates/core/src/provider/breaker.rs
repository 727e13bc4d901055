//! Per-provider circuit breaker.
//!
//! closed → open after `failure_threshold` consecutive failures; open →
//! half-open after the cooldown; half-open closes on the first success and
//! re-opens with an extended cooldown on failure. State is in-memory; a
//! restart starts closed.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Externally visible breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// What the caller may do right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerDecision {
    /// Circuit closed; call freely.
    Allow,
    /// Cooldown elapsed; exactly this caller probes the provider.
    AllowProbe,
    /// Circuit open; skip the provider.
    Skip,
}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    /// 1 normally; 2 after a failed half-open probe, so the circuit does not
    /// ping-pong.
    cooldown_factor: u32,
}

pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            cooldown,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                cooldown_factor: 1,
            }),
        }
    }

    /// Atomic check-and-transition: an open circuit whose cooldown elapsed
    /// moves to half-open and grants exactly one probe.
    pub fn check(&self) -> BreakerDecision {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::Closed => BreakerDecision::Allow,
            BreakerState::HalfOpen => BreakerDecision::Skip,
            BreakerState::Open => {
                let cooldown = self.cooldown * inner.cooldown_factor;
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed() >= cooldown)
                    .unwrap_or(true);
                if elapsed {
                    inner.state = BreakerState::HalfOpen;
                    BreakerDecision::AllowProbe
                } else {
                    BreakerDecision::Skip
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.cooldown_factor = 1;
    }

    /// Returns the new consecutive-failure count.
    pub fn record_failure(&self) -> u32 {
        let mut inner = self.inner.lock().unwrap();
        inner.consecutive_failures += 1;
        match inner.state {
            BreakerState::Closed => {
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            BreakerState::HalfOpen => {
                // Failed probe: back to open, cooldown extended once.
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.cooldown_factor = 2;
            }
            BreakerState::Open => {}
        }
        inner.consecutive_failures
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().unwrap().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().unwrap().consecutive_failures
    }

    pub fn reset(&self) {
        self.record_success();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(5, Duration::from_millis(50))
    }

    #[test]
    fn test_opens_at_threshold() {
        let breaker = breaker();
        for _ in 0..4 {
            breaker.record_failure();
            assert_eq!(breaker.state(), BreakerState::Closed);
        }
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(breaker.check(), BreakerDecision::Skip);
    }

    #[test]
    fn test_success_resets_counter() {
        let breaker = breaker();
        for _ in 0..4 {
            breaker.record_failure();
        }
        breaker.record_success();
        assert_eq!(breaker.consecutive_failures(), 0);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_half_open_after_cooldown_grants_single_probe() {
        let breaker = breaker();
        for _ in 0..5 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(60));

        assert_eq!(breaker.check(), BreakerDecision::AllowProbe);
        // Concurrent checker sees half-open and must skip.
        assert_eq!(breaker.check(), BreakerDecision::Skip);
    }

    #[test]
    fn test_probe_success_closes() {
        let breaker = breaker();
        for _ in 0..5 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(breaker.check(), BreakerDecision::AllowProbe);
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.check(), BreakerDecision::Allow);
    }

    #[test]
    fn test_probe_failure_extends_cooldown() {
        let breaker = breaker();
        for _ in 0..5 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(breaker.check(), BreakerDecision::AllowProbe);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);

        // After the base cooldown the circuit is still open (factor 2).
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(breaker.check(), BreakerDecision::Skip);
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(breaker.check(), BreakerDecision::AllowProbe);
    }

    #[test]
    fn test_reset() {
        let breaker = breaker();
        for _ in 0..5 {
            breaker.record_failure();
        }
        breaker.reset();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }
}
