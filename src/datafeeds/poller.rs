use chrono::{Duration as ChronoDuration, Utc};
use futures::stream::{self, StreamExt};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::{debug, warn};

use super::market_data::MarketData;
use super::tiers::TierScheduler;
use crate::exchange::{CoinbaseClient, ExchangeError};
use crate::types::{Candle, TimeFrame};

const LOOP_INTERVAL: Duration = Duration::from_secs(2);
const DEGRADED_DELAY: Duration = Duration::from_millis(300);
const MAX_CONCURRENT_FETCHES: usize = 4;
const DEGRADE_AFTER_429S: u64 = 3;

/// Reject disordered or empty REST candle batches before they touch the
/// buffers.
pub fn validate_candles(candles: &[Candle]) -> Result<(), &'static str> {
    if candles.is_empty() {
        return Err("empty batch");
    }
    for pair in candles.windows(2) {
        if pair[1].timestamp <= pair[0].timestamp {
            return Err("not time-ordered");
        }
    }
    Ok(())
}

/// Tier-2/3 data collector: polls REST candles for symbols the scheduler
/// marks due, with bounded concurrency and a global request budget.
pub struct RestPoller {
    client: CoinbaseClient,
    data: Arc<MarketData>,
    scheduler: Arc<RwLock<TierScheduler>>,
    limiter: RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl RestPoller {
    pub fn new(
        client: CoinbaseClient,
        data: Arc<MarketData>,
        scheduler: Arc<RwLock<TierScheduler>>,
    ) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(3).expect("nonzero"));
        Self {
            client,
            data,
            scheduler,
            limiter: RateLimiter::direct(quota),
        }
    }

    /// Poll loop until the stop flag flips.
    pub async fn run(self: Arc<Self>, mut stop_rx: watch::Receiver<bool>) {
        loop {
            if *stop_rx.borrow() {
                break;
            }
            let sleep = if self.data.health.rest_rate_degraded() {
                LOOP_INTERVAL + DEGRADED_DELAY * 4
            } else {
                LOOP_INTERVAL
            };
            tokio::select! {
                _ = tokio::time::sleep(sleep) => {}
                _ = stop_rx.changed() => continue,
            }

            let (tier2_due, tier3_due) = self.scheduler.read().await.symbols_needing_poll();
            if tier2_due.is_empty() && tier3_due.is_empty() {
                continue;
            }
            let due: Vec<String> = tier2_due.into_iter().chain(tier3_due).collect();
            debug!("[POLL] {} symbols due", due.len());

            let had_429 = Arc::new(std::sync::atomic::AtomicBool::new(false));
            stream::iter(due)
                .for_each_concurrent(MAX_CONCURRENT_FETCHES, |symbol| {
                    let poller = Arc::clone(&self);
                    let had_429 = Arc::clone(&had_429);
                    async move {
                        if poller.poll_symbol(&symbol).await.is_err() {
                            had_429.store(true, std::sync::atomic::Ordering::Relaxed);
                        }
                    }
                })
                .await;

            // repeated 429s flip the degradation flag; one clean sweep clears it
            if had_429.load(std::sync::atomic::Ordering::Relaxed) {
                if self.data.health.rest_429s.load(std::sync::atomic::Ordering::Relaxed)
                    >= DEGRADE_AFTER_429S
                {
                    self.data.health.set_rate_degraded(true);
                }
            } else {
                self.data.health.set_rate_degraded(false);
            }
        }
        debug!("[POLL] stopped");
    }

    /// One symbol's poll: always 1m + 5m, wider timeframes only when their
    /// buffers have gone stale. Returns Err only for rate-limit failures.
    pub async fn poll_symbol(&self, symbol: &str) -> Result<(), ()> {
        let mut rate_limited = false;

        self.fetch_into_buffer(symbol, TimeFrame::M1, 35, &mut rate_limited).await;
        self.fetch_into_buffer(symbol, TimeFrame::M5, 5 * 60, &mut rate_limited).await;

        let buffer = self.data.buffer_snapshot(symbol).await;
        let h1_stale = buffer
            .as_ref()
            .and_then(|b| b.last(TimeFrame::H1).map(|c| Utc::now() - c.timestamp))
            .map(|age| age > ChronoDuration::hours(1))
            .unwrap_or(true);
        if h1_stale {
            self.fetch_into_buffer(symbol, TimeFrame::H1, 48 * 60, &mut rate_limited).await;
        }
        let d1_stale = buffer
            .as_ref()
            .and_then(|b| b.last(TimeFrame::D1).map(|c| Utc::now() - c.timestamp))
            .map(|age| age > ChronoDuration::hours(6))
            .unwrap_or(true);
        if d1_stale {
            self.fetch_into_buffer(symbol, TimeFrame::D1, 30 * 24 * 60, &mut rate_limited).await;
        }

        let (count_1m, count_5m) = match self.data.buffer_snapshot(symbol).await {
            Some(b) => (b.contiguous_tail_len(TimeFrame::M1), b.contiguous_tail_len(TimeFrame::M5)),
            None => (0, 0),
        };
        self.scheduler
            .write()
            .await
            .record_poll(symbol, count_1m, count_5m);

        if rate_limited {
            Err(())
        } else {
            Ok(())
        }
    }

    async fn fetch_into_buffer(
        &self,
        symbol: &str,
        tf: TimeFrame,
        lookback_minutes: i64,
        rate_limited: &mut bool,
    ) {
        self.limiter.until_ready().await;
        if self.data.health.rest_rate_degraded() {
            tokio::time::sleep(DEGRADED_DELAY).await;
        }
        self.data.health.record_rest_request();

        let end = Utc::now();
        let start = end - ChronoDuration::minutes(lookback_minutes);
        match self.client.get_product_candles(symbol, start, end, tf).await {
            Ok(candles) => {
                if let Err(reason) = validate_candles(&candles) {
                    debug!("[POLL] {} {} batch rejected: {}", symbol, tf, reason);
                    return;
                }
                self.data.apply_candles(symbol, tf, candles, "rest").await;
            }
            Err(ExchangeError::RateLimited) => {
                self.data.health.record_rest_429();
                *rate_limited = true;
            }
            Err(ExchangeError::Timeout(_)) => {
                // soft failure: no buffer update, heartbeat goes stale
                debug!("[POLL] {} {} timed out", symbol, tf);
            }
            Err(e) => {
                warn!("[POLL] {} {} fetch failed: {}", symbol, tf, e);
            }
        }
    }
}
