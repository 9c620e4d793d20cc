use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info, warn};

use super::market_data::MarketData;
use super::poller::validate_candles;
use super::tiers::TierScheduler;
use crate::exchange::CoinbaseClient;
use crate::features::compute_features;
use crate::strategies::{MarketContext, StrategyOrchestrator};
use crate::types::TimeFrame;

const BACKFILL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);
const SYMBOLS_PER_SWEEP: usize = 5;

/// Opportunistic history fill for cold tier-1 symbols.
///
/// Newly promoted symbols arrive with thin buffers; this task pulls enough
/// 1m/5m history to warm them without wiping anything the collectors have
/// already gathered, then smoke-tests the strategy stack on the result.
pub struct BackgroundBackfill {
    client: CoinbaseClient,
    data: Arc<MarketData>,
    scheduler: Arc<RwLock<TierScheduler>>,
    orchestrator: Arc<Mutex<StrategyOrchestrator>>,
}

impl BackgroundBackfill {
    pub fn new(
        client: CoinbaseClient,
        data: Arc<MarketData>,
        scheduler: Arc<RwLock<TierScheduler>>,
        orchestrator: Arc<Mutex<StrategyOrchestrator>>,
    ) -> Self {
        Self {
            client,
            data,
            scheduler,
            orchestrator,
        }
    }

    pub async fn run(self: Arc<Self>, mut stop_rx: watch::Receiver<bool>) {
        loop {
            if *stop_rx.borrow() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(BACKFILL_INTERVAL) => {}
                _ = stop_rx.changed() => continue,
            }

            let cold: Vec<String> = {
                let scheduler = self.scheduler.read().await;
                scheduler
                    .cold_tier1_symbols()
                    .into_iter()
                    .take(SYMBOLS_PER_SWEEP)
                    .collect()
            };
            if cold.is_empty() {
                continue;
            }
            debug!("[BACKFILL] {} cold symbols queued", cold.len());

            for symbol in cold {
                self.backfill_symbol(&symbol).await;
            }
        }
        debug!("[BACKFILL] stopped");
    }

    pub async fn backfill_symbol(&self, symbol: &str) {
        self.scheduler.write().await.mark_backfilling(symbol, true);

        let mut filled = 0usize;
        for (tf, lookback_minutes) in [(TimeFrame::M1, 120i64), (TimeFrame::M5, 8 * 60)] {
            let end = Utc::now();
            let start = end - ChronoDuration::minutes(lookback_minutes);
            match self.client.get_product_candles(symbol, start, end, tf).await {
                Ok(candles) => {
                    if validate_candles(&candles).is_ok() {
                        filled += self.data.apply_candles(symbol, tf, candles, "rest").await;
                    }
                }
                Err(e) => warn!("[BACKFILL] {} {} fetch failed: {}", symbol, tf, e),
            }
        }

        let counts = match self.data.buffer_snapshot(symbol).await {
            Some(b) => (b.contiguous_tail_len(TimeFrame::M1), b.contiguous_tail_len(TimeFrame::M5)),
            None => (0, 0),
        };
        {
            let mut scheduler = self.scheduler.write().await;
            scheduler.record_poll(symbol, counts.0, counts.1);
            scheduler.mark_backfilling(symbol, false);
        }

        if filled > 0 {
            info!("[BACKFILL] {} warmed with {} candles", symbol, filled);
            self.smoke_test(symbol).await;
        }
    }

    /// Run the strategy stack once over the fresh history; any signal is
    /// discarded, this only proves the pipeline digests the data.
    async fn smoke_test(&self, symbol: &str) {
        let Some(buffer) = self.data.buffer_snapshot(symbol).await else {
            return;
        };
        let features = compute_features(&buffer, 0.0);
        let context = MarketContext::default();
        let mut orchestrator = self.orchestrator.lock().await;
        let outcome = orchestrator.analyze(symbol, &buffer, &features, &context);
        debug!(
            "[BACKFILL] smoke test {}: {}",
            symbol,
            if outcome.is_some() { "signal" } else { "quiet" }
        );
        orchestrator.reset(symbol);
    }
}
