use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::market_data::MarketData;
use crate::config::Settings;
use crate::exchange::{CoinbaseClient, ExchangeError};
use crate::types::{base_asset, TimeFrame};

pub const STABLECOINS: &[&str] = &[
    "USDT", "USDC", "DAI", "USD", "EURC", "FDUSD", "PYUSD", "GUSD", "TUSD",
];

const BID_ASK_CHUNK: usize = 25;

#[derive(Debug, Clone, Serialize)]
pub struct UniverseInfo {
    pub symbol: String,
    pub tier_label: String,
    pub avg_spread_bps: f64,
    pub volume_24h_usd: Decimal,
    pub eligible: bool,
}

/// Contemporaneous spike metrics on 5m candles, used by signal scoring
/// and the hot-list leaderboard.
#[derive(Debug, Clone, Serialize)]
pub struct BurstMetrics {
    pub symbol: String,
    pub vol_spike: f64,
    pub range_spike: f64,
    pub trend_15m: f64,
    pub vwap_distance: f64,
}

impl BurstMetrics {
    pub fn heat(&self) -> f64 {
        self.vol_spike + self.range_spike + self.trend_15m.max(0.0) * 10.0
    }
}

/// Periodically rebuilds the eligible, ranked trading universe.
pub struct UniverseScanner {
    client: CoinbaseClient,
    data: Arc<MarketData>,
    settings: Arc<RwLock<Settings>>,
    universe: RwLock<HashMap<String, UniverseInfo>>,
}

impl UniverseScanner {
    pub fn new(
        client: CoinbaseClient,
        data: Arc<MarketData>,
        settings: Arc<RwLock<Settings>>,
    ) -> Self {
        Self {
            client,
            data,
            settings,
            universe: RwLock::new(HashMap::new()),
        }
    }

    pub async fn universe_snapshot(&self) -> HashMap<String, UniverseInfo> {
        self.universe.read().await.clone()
    }

    pub async fn info(&self, symbol: &str) -> Option<UniverseInfo> {
        self.universe.read().await.get(symbol).cloned()
    }

    pub async fn spread_bps(&self, symbol: &str) -> Option<f64> {
        self.universe
            .read()
            .await
            .get(symbol)
            .map(|info| info.avg_spread_bps)
    }

    /// Full rebuild: product list, spreads, eligibility, ranking.
    /// Returns the ranked symbol list for the tier scheduler.
    pub async fn scan(&self) -> Result<Vec<String>, ExchangeError> {
        let settings = self.settings.read().await.clone();
        let products = self.client.get_products().await?;

        let mut candidates: Vec<(String, Decimal)> = products
            .into_iter()
            .filter(|p| {
                let base = base_asset(&p.product_id);
                p.product_id.ends_with("-USD")
                    && !STABLECOINS.contains(&base)
                    && !settings.ignored_symbols.iter().any(|s| s == &p.product_id)
                    && p.price > Decimal::ZERO
            })
            .map(|p| (p.product_id, p.volume_24h_usd))
            .collect();
        candidates.sort_by(|a, b| b.1.cmp(&a.1));

        // spreads for everything we might trade, fetched in chunks
        let mut spreads: HashMap<String, f64> = HashMap::new();
        let ids: Vec<String> = candidates.iter().map(|(id, _)| id.clone()).collect();
        for chunk in ids.chunks(BID_ASK_CHUNK) {
            match self.client.get_best_bid_ask(chunk).await {
                Ok(books) => {
                    for book in books {
                        spreads.insert(book.product_id.clone(), book.spread_bps());
                    }
                }
                Err(e) => warn!("[SCAN] bid/ask chunk failed: {}", e),
            }
        }

        let ranked = self.rank(&candidates, &spreads, &settings).await;

        info!(
            "[SCAN] Universe rebuilt: {} candidates, {} eligible",
            candidates.len(),
            self.universe
                .read()
                .await
                .values()
                .filter(|u| u.eligible)
                .count()
        );
        Ok(ranked)
    }

    /// Composite ranking: volume percentile dominates, tight spreads help,
    /// and a diversity pass keeps some mid/small caps in the hot tiers.
    async fn rank(
        &self,
        candidates: &[(String, Decimal)],
        spreads: &HashMap<String, f64>,
        settings: &Settings,
    ) -> Vec<String> {
        let total = candidates.len().max(1) as f64;
        let mut scored: Vec<(String, f64, bool)> = Vec::with_capacity(candidates.len());
        let mut universe = HashMap::new();

        for (rank, (symbol, volume)) in candidates.iter().enumerate() {
            let spread = spreads.get(symbol).copied().unwrap_or(settings.spread_max_bps);
            let eligible = *volume >= settings.min_24h_volume_usd
                && spread <= settings.spread_max_bps;

            let vol_percentile = 1.0 - rank as f64 / total;
            let spread_score = 1.0 - (spread / settings.spread_max_bps).clamp(0.0, 1.0);
            let score = 0.7 * vol_percentile + 0.3 * spread_score;

            let tier_label = cap_label(*volume);
            universe.insert(
                symbol.clone(),
                UniverseInfo {
                    symbol: symbol.clone(),
                    tier_label: tier_label.to_string(),
                    avg_spread_bps: spread,
                    volume_24h_usd: *volume,
                    eligible,
                },
            );
            scored.push((symbol.clone(), if eligible { score } else { score - 1.0 }, eligible));
        }

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        // diversity: pull the best mid and small caps into the top block so
        // the WS tier is not all mega-caps
        let mut ranked: Vec<String> = scored.iter().map(|(s, _, _)| s.clone()).collect();
        let universe_ref = &universe;
        for wanted in ["mid_cap", "small_cap"] {
            if let Some(pos) = ranked.iter().position(|s| {
                universe_ref
                    .get(s)
                    .map(|u| u.tier_label == wanted && u.eligible)
                    .unwrap_or(false)
            }) {
                if pos >= 20 {
                    let symbol = ranked.remove(pos);
                    ranked.insert(19.min(ranked.len()), symbol);
                }
            }
        }

        *self.universe.write().await = universe;
        ranked
    }

    /// Burst metrics for one symbol from its 5m buffer.
    pub async fn burst_metrics(&self, symbol: &str) -> Option<BurstMetrics> {
        let buffer = self.data.buffer_snapshot(symbol).await?;
        compute_burst_metrics(&buffer)
    }

    /// Leaderboard of the hottest symbols by burst heat.
    pub async fn burst_leaderboard(&self, symbols: &[String], top: usize) -> Vec<BurstMetrics> {
        let mut metrics = Vec::new();
        for symbol in symbols {
            if let Some(m) = self.burst_metrics(symbol).await {
                metrics.push(m);
            }
        }
        metrics.sort_by(|a, b| b.heat().partial_cmp(&a.heat()).unwrap_or(std::cmp::Ordering::Equal));
        metrics.truncate(top);
        metrics
    }
}

fn cap_label(volume_24h_usd: Decimal) -> &'static str {
    let v = volume_24h_usd.to_f64().unwrap_or(0.0);
    if v >= 50_000_000.0 {
        "large_cap"
    } else if v >= 5_000_000.0 {
        "mid_cap"
    } else if v >= 500_000.0 {
        "small_cap"
    } else {
        "micro_cap"
    }
}

/// Spike ratios vs rolling medians plus short-term trend and VWAP distance.
pub fn compute_burst_metrics(buffer: &crate::types::CandleBuffer) -> Option<BurstMetrics> {
    let candles = buffer.last_n(TimeFrame::M5, 25);
    if candles.len() < 6 {
        return None;
    }
    let last = candles.last()?;

    let mut volumes: Vec<f64> = candles
        .iter()
        .take(candles.len() - 1)
        .map(|c| c.volume.to_f64().unwrap_or(0.0))
        .collect();
    let mut ranges: Vec<f64> = candles
        .iter()
        .take(candles.len() - 1)
        .map(|c| c.range().to_f64().unwrap_or(0.0))
        .collect();
    let vol_median = median(&mut volumes)?;
    let range_median = median(&mut ranges)?;

    let last_vol = last.volume.to_f64().unwrap_or(0.0);
    let last_range = last.range().to_f64().unwrap_or(0.0);
    let vol_spike = if vol_median > 0.0 { last_vol / vol_median } else { 1.0 };
    let range_spike = if range_median > 0.0 { last_range / range_median } else { 1.0 };

    let closes = buffer.closes(TimeFrame::M5, 4);
    let trend_15m = if closes.len() >= 4 {
        let first = closes[0].to_f64().unwrap_or(0.0);
        let now = closes[closes.len() - 1].to_f64().unwrap_or(0.0);
        if first > 0.0 {
            (now - first) / first
        } else {
            0.0
        }
    } else {
        0.0
    };

    let vwap_distance = match (buffer.vwap(30), buffer.last_price()) {
        (Some(vwap), Some(price)) if !vwap.is_zero() => ((price - vwap) / vwap)
            .to_f64()
            .unwrap_or(0.0),
        _ => 0.0,
    };

    Some(BurstMetrics {
        symbol: buffer.symbol.clone(),
        vol_spike,
        range_spike,
        trend_15m,
        vwap_distance,
    })
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    Some(values[values.len() / 2])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Candle, CandleBuffer};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn buffer_with_burst() -> CandleBuffer {
        let mut buffer = CandleBuffer::new("SOL-USD");
        for i in 0..20 {
            let ts = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap()
                + chrono::Duration::minutes(i * 5);
            let (volume, high) = if i == 19 {
                (dec!(50), dec!(110)) // spike on the last bar
            } else {
                (dec!(10), dec!(101))
            };
            buffer.push(
                TimeFrame::M5,
                Candle {
                    timestamp: ts,
                    open: dec!(100),
                    high,
                    low: dec!(99),
                    close: high - dec!(0.5),
                    volume,
                },
            );
        }
        buffer
    }

    #[test]
    fn test_burst_metrics_detect_spike() {
        let buffer = buffer_with_burst();
        let metrics = compute_burst_metrics(&buffer).unwrap();
        assert!(metrics.vol_spike > 3.0, "vol_spike={}", metrics.vol_spike);
        assert!(metrics.range_spike > 2.0, "range_spike={}", metrics.range_spike);
        assert!(metrics.trend_15m > 0.0);
    }

    #[test]
    fn test_burst_metrics_need_history() {
        let mut buffer = CandleBuffer::new("FOO-USD");
        buffer.push(
            TimeFrame::M5,
            Candle {
                timestamp: Utc::now(),
                open: dec!(1),
                high: dec!(1),
                low: dec!(1),
                close: dec!(1),
                volume: dec!(1),
            },
        );
        assert!(compute_burst_metrics(&buffer).is_none());
    }

    #[test]
    fn test_cap_labels() {
        assert_eq!(cap_label(dec!(100000000)), "large_cap");
        assert_eq!(cap_label(dec!(10000000)), "mid_cap");
        assert_eq!(cap_label(dec!(1000000)), "small_cap");
        assert_eq!(cap_label(dec!(1000)), "micro_cap");
    }
}
