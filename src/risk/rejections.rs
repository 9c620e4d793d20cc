use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};

use crate::storage::EventLog;
use crate::types::{GateReason, RejectionRecord};

const RECENT_CAPACITY: usize = 50;
const DEDUPE_SECONDS: i64 = 8;
const MAXPOS_DEDUPE_SECONDS: i64 = 60;

/// Per-gate rejection counters plus a bounded, de-spammed stream of the
/// most recent blocked events for the UI.
pub struct RejectionTracker {
    counters: HashMap<GateReason, u64>,
    recent: VecDeque<RejectionRecord>,
    last_emitted: HashMap<(String, GateReason, String), DateTime<Utc>>,
    event_log: Option<EventLog>,
}

impl RejectionTracker {
    pub fn new(event_log: Option<EventLog>) -> Self {
        Self {
            counters: GateReason::all().iter().map(|g| (*g, 0)).collect(),
            recent: VecDeque::with_capacity(RECENT_CAPACITY),
            last_emitted: HashMap::new(),
            event_log,
        }
    }

    /// Count a rejection, log it for post-analysis, and append to the
    /// display stream unless an identical event fired moments ago.
    pub fn record(&mut self, symbol: &str, gate: GateReason, details: &str) {
        *self.counters.entry(gate).or_insert(0) += 1;

        let record = RejectionRecord {
            ts: Utc::now(),
            symbol: symbol.to_string(),
            gate,
            details: details.to_string(),
        };
        if let Some(log) = &self.event_log {
            log.log_rejection(&record);
        }

        // identical (symbol, gate, detail) within the window collapses;
        // max-positions noise gets a longer window
        let key = (symbol.to_string(), gate, details.to_string());
        let window = if details.contains("max positions") || details.contains("Max positions") {
            MAXPOS_DEDUPE_SECONDS
        } else {
            DEDUPE_SECONDS
        };
        let now = Utc::now();
        if let Some(last) = self.last_emitted.get(&key) {
            if (now - *last).num_seconds() < window {
                return;
            }
        }
        self.last_emitted.insert(key, now);

        if self.recent.len() >= RECENT_CAPACITY {
            self.recent.pop_back();
        }
        self.recent.push_front(record);
    }

    pub fn count(&self, gate: GateReason) -> u64 {
        self.counters.get(&gate).copied().unwrap_or(0)
    }

    pub fn counters(&self) -> HashMap<String, u64> {
        self.counters
            .iter()
            .map(|(gate, count)| (gate.as_str().to_string(), *count))
            .collect()
    }

    pub fn total(&self) -> u64 {
        self.counters.values().sum()
    }

    pub fn recent(&self) -> Vec<RejectionRecord> {
        self.recent.iter().cloned().collect()
    }

    pub fn top_gate(&self) -> Option<GateReason> {
        self.counters
            .iter()
            .filter(|(_, count)| **count > 0)
            .max_by_key(|(_, count)| **count)
            .map(|(gate, _)| *gate)
    }

    #[cfg(test)]
    pub(crate) fn backdate_emitted(&mut self, seconds: i64) {
        for ts in self.last_emitted.values_mut() {
            *ts = *ts - chrono::Duration::seconds(seconds);
        }
    }
}
