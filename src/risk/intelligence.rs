use chrono::{DateTime, Timelike, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::types::{base_asset, Intent, MarketRegime, Position};

/// Result of the intelligence layer's entry scoring.
#[derive(Debug, Clone)]
pub struct EntryScore {
    pub total_score: f64,
    pub should_enter: bool,
    pub btc_regime: MarketRegime,
    pub btc_trend_ok: bool,
}

/// Cached external ML score with a freshness contract. Stale scores
/// contribute nothing; they never block an entry.
#[derive(Debug, Clone)]
pub struct MlScore {
    pub score: f64,
    pub updated_at: DateTime<Utc>,
}

impl MlScore {
    pub const MAX_AGE_S: i64 = 300;

    pub fn is_fresh(&self) -> bool {
        (Utc::now() - self.updated_at).num_seconds() <= Self::MAX_AGE_S
    }
}

/// Market-awareness layer behind the gate funnel: sector caps, regime
/// tracking, session sizing, entry scoring, and emergency halts.
/// Pluggable so the shipped deterministic version can be swapped out.
pub trait Intelligence: Send + Sync {
    fn update_sector_counts(&self, positions: &HashMap<String, Position>);
    fn check_position_limits(
        &self,
        symbol: &str,
        size_usd: Decimal,
        positions: &HashMap<String, Position>,
    ) -> Result<(), String>;
    fn is_trading_halted(&self) -> Option<String>;
    fn score_entry(&self, intent: &Intent, positions: &HashMap<String, Position>) -> EntryScore;
    fn get_size_multiplier(&self) -> f64;
    fn get_live_ml(&self, symbol: &str) -> Option<MlScore>;
    fn market_regime(&self) -> MarketRegime;
}

#[derive(Debug, Default)]
struct IntelState {
    sector_counts: HashMap<&'static str, usize>,
    regime: MarketRegime,
    btc_trend_1h: f64,
    entry_score_min: f64,
    manual_halt: Option<String>,
    ml_scores: HashMap<String, MlScore>,
}

/// Deterministic, self-contained intelligence implementation.
pub struct DefaultIntelligence {
    state: Mutex<IntelState>,
    max_per_sector: usize,
}

fn sector_of(symbol: &str) -> &'static str {
    let base = base_asset(symbol);
    match base {
        "BTC" | "LTC" | "BCH" => "payments",
        "ETH" | "SOL" | "AVAX" | "ADA" | "DOT" | "NEAR" | "APT" | "SUI" | "SEI" | "ATOM" => "l1",
        "UNI" | "AAVE" | "MKR" | "CRV" | "COMP" | "SNX" => "defi",
        "DOGE" | "SHIB" | "PEPE" | "WIF" | "BONK" => "meme",
        "FET" | "RNDR" | "TAO" | "GRT" => "ai",
        "ARB" | "OP" | "IMX" | "MATIC" | "POL" => "l2",
        _ => "other",
    }
}

impl DefaultIntelligence {
    pub fn new(entry_score_min: f64) -> Self {
        Self {
            state: Mutex::new(IntelState {
                entry_score_min,
                ..IntelState::default()
            }),
            max_per_sector: 3,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, IntelState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Called by the engine each tick with fresh BTC context.
    pub fn update_market_state(&self, btc_trend_1h: f64) {
        let mut state = self.lock();
        state.btc_trend_1h = btc_trend_1h;
        state.regime = if btc_trend_1h <= -0.03 {
            MarketRegime::RiskOff
        } else if btc_trend_1h <= -0.01 {
            MarketRegime::Caution
        } else {
            MarketRegime::Normal
        };
    }

    pub fn set_entry_score_min(&self, entry_score_min: f64) {
        self.lock().entry_score_min = entry_score_min;
    }

    pub fn set_manual_halt(&self, reason: Option<String>) {
        self.lock().manual_halt = reason;
    }

    pub fn put_ml_score(&self, symbol: &str, score: f64) {
        self.lock().ml_scores.insert(
            symbol.to_string(),
            MlScore {
                score,
                updated_at: Utc::now(),
            },
        );
    }
}

impl Intelligence for DefaultIntelligence {
    fn update_sector_counts(&self, positions: &HashMap<String, Position>) {
        let mut counts: HashMap<&'static str, usize> = HashMap::new();
        for symbol in positions.keys() {
            *counts.entry(sector_of(symbol)).or_insert(0) += 1;
        }
        self.lock().sector_counts = counts;
    }

    fn check_position_limits(
        &self,
        symbol: &str,
        _size_usd: Decimal,
        _positions: &HashMap<String, Position>,
    ) -> Result<(), String> {
        let sector = sector_of(symbol);
        let state = self.lock();
        let count = state.sector_counts.get(sector).copied().unwrap_or(0);
        if count >= self.max_per_sector {
            return Err(format!("sector_{}_full_{}/{}", sector, count, self.max_per_sector));
        }
        Ok(())
    }

    fn is_trading_halted(&self) -> Option<String> {
        let state = self.lock();
        if let Some(reason) = &state.manual_halt {
            return Some(reason.clone());
        }
        if state.regime == MarketRegime::RiskOff {
            return Some(format!(
                "risk_off_btc_{:.1}%",
                state.btc_trend_1h * 100.0
            ));
        }
        None
    }

    /// Entry score: the signal's boosted edge plus burst/context adjustments,
    /// an ML bump when a fresh score exists, and a spread penalty.
    fn score_entry(&self, intent: &Intent, _positions: &HashMap<String, Position>) -> EntryScore {
        let state = self.lock();
        let mut total = intent.edge_score;

        if intent.vol_spike >= 2.0 {
            total += 5.0;
        }
        if intent.trend_15m > 0.0 {
            total += 3.0;
        }
        if intent.vwap_distance > 0.02 {
            total -= 5.0; // chasing an extended tape
        }
        total -= (intent.spread_bps / 20.0).min(5.0);

        if let Some(ml) = state.ml_scores.get(&intent.symbol) {
            if ml.is_fresh() {
                total += (ml.score * 10.0).clamp(-10.0, 10.0);
            }
        }

        let btc_trend_ok = state.btc_trend_1h > -0.01;
        if !btc_trend_ok {
            total -= 10.0;
        }

        let total = total.clamp(0.0, 100.0);
        EntryScore {
            total_score: total,
            should_enter: total >= state.entry_score_min,
            btc_regime: state.regime,
            btc_trend_ok,
        }
    }

    /// Time-of-day multiplier, never above 1.0. Thin overnight liquidity
    /// (02:00-06:00 UTC) trades smaller.
    fn get_size_multiplier(&self) -> f64 {
        let hour = Utc::now().hour();
        if (2..6).contains(&hour) {
            0.7
        } else {
            1.0
        }
    }

    fn get_live_ml(&self, symbol: &str) -> Option<MlScore> {
        self.lock().ml_scores.get(symbol).cloned()
    }

    fn market_regime(&self) -> MarketRegime {
        self.lock().regime
    }
}

/// Decide whether a failed entry score is a regime rejection or a plain
/// score rejection. Keeps the funnel histogram honest when BTC is selling
/// off and everything scores poorly.
pub fn categorize_score_rejection(entry_score: &EntryScore) -> crate::types::GateReason {
    if entry_score.btc_regime != MarketRegime::Normal && !entry_score.btc_trend_ok {
        crate::types::GateReason::Regime
    } else {
        crate::types::GateReason::Score
    }
}
