use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::types::TimeFrame;

/// Sliding-window event counter for the 5-second tick/candle rates the
/// status surface reports.
#[derive(Debug, Default)]
pub struct RollingCounter {
    events: Mutex<VecDeque<Instant>>,
}

impl RollingCounter {
    pub fn record(&self) {
        let mut events = self.events.lock().unwrap_or_else(|p| p.into_inner());
        let now = Instant::now();
        events.push_back(now);
        // retain a minute of history at most
        while let Some(front) = events.front() {
            if now.duration_since(*front) > Duration::from_secs(60) {
                events.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn count_last(&self, window: Duration) -> usize {
        let events = self.events.lock().unwrap_or_else(|p| p.into_inner());
        let now = Instant::now();
        events
            .iter()
            .rev()
            .take_while(|t| now.duration_since(**t) <= window)
            .count()
    }
}

/// Shared feed-health state: heartbeats, reconnect and rate-limit counters,
/// degradation flags. Written by the collectors, read by the status surface
/// and the gate funnel.
#[derive(Debug, Default)]
pub struct DataHealth {
    ws_last_msg: Mutex<Option<DateTime<Utc>>>,
    candle_heartbeats: Mutex<HashMap<TimeFrame, DateTime<Utc>>>,
    pub ws_reconnects: AtomicU64,
    pub rest_requests: AtomicU64,
    pub rest_429s: AtomicU64,
    rest_rate_degraded: AtomicBool,
    pub ticks: RollingCounter,
    pub candles: RollingCounter,
}

impl DataHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn touch_ws(&self) {
        *self.ws_last_msg.lock().unwrap_or_else(|p| p.into_inner()) = Some(Utc::now());
    }

    pub fn touch_candles(&self, tf: TimeFrame) {
        self.candle_heartbeats
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(tf, Utc::now());
    }

    /// Seconds since the last WS message, or None before first contact.
    pub fn ws_last_age_s(&self) -> Option<i64> {
        self.ws_last_msg
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .map(|t| (Utc::now() - t).num_seconds())
    }

    pub fn candle_age_s(&self, tf: TimeFrame) -> Option<i64> {
        self.candle_heartbeats
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&tf)
            .map(|t| (Utc::now() - *t).num_seconds())
    }

    pub fn ws_ok(&self, max_age_s: i64) -> bool {
        self.ws_last_age_s().map(|age| age <= max_age_s).unwrap_or(false)
    }

    pub fn record_rest_request(&self) {
        self.rest_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rest_429(&self) {
        self.rest_429s.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_rate_degraded(&self, degraded: bool) {
        self.rest_rate_degraded.store(degraded, Ordering::Relaxed);
    }

    pub fn rest_rate_degraded(&self) -> bool {
        self.rest_rate_degraded.load(Ordering::Relaxed)
    }

    pub fn record_ws_reconnect(&self) {
        self.ws_reconnects.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolling_counter_window() {
        let counter = RollingCounter::default();
        counter.record();
        counter.record();
        assert_eq!(counter.count_last(Duration::from_secs(5)), 2);
        assert_eq!(counter.count_last(Duration::from_millis(0)), 0);
    }

    #[test]
    fn test_ws_heartbeat_age() {
        let health = DataHealth::new();
        assert_eq!(health.ws_last_age_s(), None);
        assert!(!health.ws_ok(10));
        health.touch_ws();
        assert!(health.ws_ok(10));
        assert!(health.ws_last_age_s().unwrap() <= 1);
    }

    #[test]
    fn test_degradation_flag() {
        let health = DataHealth::new();
        assert!(!health.rest_rate_degraded());
        health.record_rest_429();
        health.set_rate_degraded(true);
        assert!(health.rest_rate_degraded());
        assert_eq!(health.rest_429s.load(Ordering::Relaxed), 1);
    }
}
