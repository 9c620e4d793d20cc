use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

use crate::types::Intent;

/// Rank used to order batched signals before execution.
pub fn combined_rank(intent: &Intent, momentum_1h: f64, momentum_15m: f64, volume_spike: f64) -> f64 {
    0.4 * intent.edge_score + 10.0 * momentum_1h + 20.0 * momentum_15m + 10.0 * volume_spike
}

#[derive(Debug, Clone)]
struct BatchedSignal {
    intent: Intent,
    rank: f64,
}

/// Optional entry batching: signals arriving within the window are held,
/// ranked, and flushed together so the best setups claim the open slots.
/// Duplicate symbols keep the higher-ranked signal.
pub struct SignalBatcher {
    window: Duration,
    pending: HashMap<String, BatchedSignal>,
    window_started: Option<DateTime<Utc>>,
}

impl SignalBatcher {
    pub fn new(window_seconds: u64) -> Self {
        Self {
            window: Duration::seconds(window_seconds as i64),
            pending: HashMap::new(),
            window_started: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.window > Duration::zero()
    }

    /// Queue a signal; the first signal opens the window.
    pub fn push(&mut self, intent: Intent, momentum_1h: f64, momentum_15m: f64, volume_spike: f64) {
        let rank = combined_rank(&intent, momentum_1h, momentum_15m, volume_spike);
        let symbol = intent.symbol.clone();
        match self.pending.get(&symbol) {
            Some(existing) if existing.rank >= rank => {}
            _ => {
                self.pending.insert(symbol, BatchedSignal { intent, rank });
            }
        }
        if self.window_started.is_none() {
            self.window_started = Some(Utc::now());
        }
    }

    pub fn window_elapsed(&self) -> bool {
        match self.window_started {
            Some(started) => Utc::now() - started >= self.window,
            None => false,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drain the window: top `limit` signals by rank, best first.
    pub fn flush(&mut self, limit: usize) -> Vec<Intent> {
        let mut batch: Vec<BatchedSignal> = self.pending.drain().map(|(_, s)| s).collect();
        self.window_started = None;
        batch.sort_by(|a, b| b.rank.partial_cmp(&a.rank).unwrap_or(std::cmp::Ordering::Equal));
        batch.into_iter().take(limit).map(|s| s.intent).collect()
    }
}
