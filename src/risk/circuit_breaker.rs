use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Pauses trading after consecutive API failures.
///
/// Closed: normal. Open: blocked until `reset_after_s` since the last
/// failure, then half-open allows one probe trade; success closes it.
#[derive(Debug)]
pub struct CircuitBreaker {
    pub max_failures: u32,
    pub reset_after_s: u64,
    consecutive_failures: u32,
    last_failure_time: Option<DateTime<Utc>>,
    state: BreakerState,
}

impl CircuitBreaker {
    pub fn new(max_failures: u32, reset_after_s: u64) -> Self {
        Self {
            max_failures,
            reset_after_s,
            consecutive_failures: 0,
            last_failure_time: None,
            state: BreakerState::Closed,
        }
    }

    pub fn record_success(&mut self) {
        if self.state != BreakerState::Closed {
            info!("[CIRCUIT] Breaker closed after successful call");
        }
        self.consecutive_failures = 0;
        self.last_failure_time = None;
        self.state = BreakerState::Closed;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        self.last_failure_time = Some(Utc::now());
        if self.consecutive_failures >= self.max_failures {
            if self.state != BreakerState::Open {
                error!(
                    "[CIRCUIT] Breaker OPEN after {} consecutive failures, blocking trades for {}s",
                    self.consecutive_failures, self.reset_after_s
                );
            }
            self.state = BreakerState::Open;
        }
    }

    pub fn can_trade(&mut self) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => true, // one probe allowed
            BreakerState::Open => {
                let elapsed = self
                    .last_failure_time
                    .map(|t| (Utc::now() - t).num_seconds())
                    .unwrap_or(i64::MAX);
                if elapsed >= self.reset_after_s as i64 {
                    info!("[CIRCUIT] Breaker HALF-OPEN, allowing test trade");
                    self.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn is_tripped(&self) -> bool {
        self.state == BreakerState::Open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opens_after_max_failures() {
        let mut breaker = CircuitBreaker::new(3, 300);
        assert!(breaker.can_trade());
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.can_trade());
        breaker.record_failure();
        assert!(breaker.is_tripped());
        assert!(!breaker.can_trade());
    }

    #[test]
    fn test_half_open_after_cooldown() {
        let mut breaker = CircuitBreaker::new(1, 0);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        // reset window of zero elapses immediately
        assert!(breaker.can_trade());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        // success closes
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let mut breaker = CircuitBreaker::new(1, 0);
        breaker.record_failure();
        assert!(breaker.can_trade()); // half-open probe
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn test_success_resets_count() {
        let mut breaker = CircuitBreaker::new(3, 300);
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        assert_eq!(breaker.consecutive_failures(), 0);
        breaker.record_failure();
        assert!(!breaker.is_tripped());
    }
}
