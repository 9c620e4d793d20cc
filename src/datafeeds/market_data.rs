use chrono::{DateTime, Timelike, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use super::health::DataHealth;
use super::tiers::TierScheduler;
use crate::storage::CandleStore;
use crate::types::{Candle, CandleBuffer, TimeFrame};

/// Shared market-data hub: the per-symbol buffers plus their persistence.
///
/// The collectors are the only writers. Readers take cloned buffer
/// snapshots, so analysis never blocks ingestion.
pub struct MarketData {
    buffers: RwLock<HashMap<String, CandleBuffer>>,
    store: Arc<CandleStore>,
    scheduler: Arc<RwLock<TierScheduler>>,
    pub health: Arc<DataHealth>,
}

impl MarketData {
    pub fn new(
        store: Arc<CandleStore>,
        scheduler: Arc<RwLock<TierScheduler>>,
        health: Arc<DataHealth>,
    ) -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
            store,
            scheduler,
            health,
        }
    }

    pub fn store(&self) -> &Arc<CandleStore> {
        &self.store
    }

    /// Apply one closed/forming candle from WS or REST.
    pub async fn apply_candle(&self, symbol: &str, tf: TimeFrame, candle: Candle, source: &str) {
        let counts = {
            let mut buffers = self.buffers.write().await;
            let buffer = buffers
                .entry(symbol.to_string())
                .or_insert_with(|| CandleBuffer::new(symbol));
            if !buffer.push(tf, candle.clone()) {
                return;
            }
            (buffer.contiguous_tail_len(TimeFrame::M1), buffer.contiguous_tail_len(TimeFrame::M5))
        };

        self.store.write_candle(symbol, &candle, tf, source);
        self.health.touch_candles(tf);
        self.health.candles.record();
        self.update_counts(symbol, counts).await;
    }

    /// Apply a validated REST batch.
    pub async fn apply_candles(
        &self,
        symbol: &str,
        tf: TimeFrame,
        candles: Vec<Candle>,
        source: &str,
    ) -> usize {
        if candles.is_empty() {
            return 0;
        }
        let (added, counts) = {
            let mut buffers = self.buffers.write().await;
            let buffer = buffers
                .entry(symbol.to_string())
                .or_insert_with(|| CandleBuffer::new(symbol));
            let added = buffer.extend(tf, candles.clone());
            (added, (buffer.contiguous_tail_len(TimeFrame::M1), buffer.contiguous_tail_len(TimeFrame::M5)))
        };
        if added > 0 {
            self.store.write_candles(symbol, &candles, tf, source);
            self.health.touch_candles(tf);
        }
        self.update_counts(symbol, counts).await;
        added
    }

    /// Fold a trade tick into the forming 1m candle. When the minute rolls
    /// over, the completed candle is persisted.
    pub async fn apply_tick(&self, symbol: &str, price: Decimal, volume: Decimal) {
        let minute_start = minute_floor(Utc::now());
        let (completed, counts) = {
            let mut buffers = self.buffers.write().await;
            let buffer = buffers
                .entry(symbol.to_string())
                .or_insert_with(|| CandleBuffer::new(symbol));

            let mut completed = None;
            match buffer.last(TimeFrame::M1).cloned() {
                Some(last) if last.timestamp == minute_start => {
                    let mut updated = last;
                    updated.high = updated.high.max(price);
                    updated.low = updated.low.min(price);
                    updated.close = price;
                    updated.volume += volume;
                    buffer.push(TimeFrame::M1, updated);
                }
                other => {
                    completed = other;
                    buffer.push(
                        TimeFrame::M1,
                        Candle {
                            timestamp: minute_start,
                            open: price,
                            high: price,
                            low: price,
                            close: price,
                            volume,
                        },
                    );
                }
            }
            (
                completed,
                (buffer.contiguous_tail_len(TimeFrame::M1), buffer.contiguous_tail_len(TimeFrame::M5)),
            )
        };

        if let Some(candle) = completed {
            self.store.write_candle(symbol, &candle, TimeFrame::M1, "ws");
        }
        self.health.touch_ws();
        self.health.ticks.record();
        self.update_counts(symbol, counts).await;
    }

    async fn update_counts(&self, symbol: &str, (count_1m, count_5m): (usize, usize)) {
        self.scheduler
            .write()
            .await
            .update_candle_counts(symbol, count_1m, count_5m);
    }

    pub async fn buffer_snapshot(&self, symbol: &str) -> Option<CandleBuffer> {
        self.buffers.read().await.get(symbol).cloned()
    }

    pub async fn last_price(&self, symbol: &str) -> Option<Decimal> {
        self.buffers
            .read()
            .await
            .get(symbol)
            .and_then(|b| b.last_price())
    }

    pub async fn symbol_count(&self) -> usize {
        self.buffers.read().await.len()
    }

    /// Seed buffers from disk on startup.
    pub async fn rehydrate(&self, symbols: &[String], max_age_hours: i64) {
        let loaded = self.store.rehydrate_buffers(symbols, max_age_hours);
        let mut total = 0usize;
        for (symbol, (candles_1m, candles_5m)) in loaded {
            let counts = {
                let mut buffers = self.buffers.write().await;
                let buffer = buffers
                    .entry(symbol.clone())
                    .or_insert_with(|| CandleBuffer::new(&symbol));
                total += buffer.extend(TimeFrame::M1, candles_1m);
                total += buffer.extend(TimeFrame::M5, candles_5m);
                (buffer.contiguous_tail_len(TimeFrame::M1), buffer.contiguous_tail_len(TimeFrame::M5))
            };
            self.update_counts(&symbol, counts).await;
        }
        info!("[DATA] Buffers rehydrated with {} candles", total);
    }
}

fn minute_floor(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}
