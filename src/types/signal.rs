use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{OrderEventType, SignalDirection, SignalType, SizingTier, TradingMode};

/// Unified signal produced by any strategy.
///
/// Strategies set `edge_score_base` and price geometry but never apply
/// gates; the orchestrator picks one signal per symbol per tick and the
/// gate funnel decides what happens to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySignal {
    pub symbol: String,
    pub strategy_id: String,
    pub signal_type: SignalType,
    pub direction: SignalDirection,
    /// Base edge score 0-100, before confluence boost.
    pub edge_score_base: f64,
    pub trend_score: f64,
    pub volume_score: f64,
    pub pattern_score: f64,
    pub timing_score: f64,
    pub entry_price: Decimal,
    pub stop_price: Decimal,
    pub tp1_price: Decimal,
    pub tp2_price: Decimal,
    /// Distance to stop as a percentage of entry.
    pub risk_pct: f64,
    /// Reward:risk to TP1.
    pub rr_ratio: f64,
    pub reason: String,
    pub reasons: Vec<String>,
    pub timestamp: DateTime<Utc>,
    /// Number of strategies that agreed this tick (set by the orchestrator).
    pub confluence_count: u32,
}

impl StrategySignal {
    pub fn new(symbol: &str, strategy_id: &str, signal_type: SignalType) -> Self {
        Self {
            symbol: symbol.to_string(),
            strategy_id: strategy_id.to_string(),
            signal_type,
            direction: SignalDirection::None,
            edge_score_base: 0.0,
            trend_score: 0.0,
            volume_score: 0.0,
            pattern_score: 0.0,
            timing_score: 0.0,
            entry_price: Decimal::ZERO,
            stop_price: Decimal::ZERO,
            tp1_price: Decimal::ZERO,
            tp2_price: Decimal::ZERO,
            risk_pct: 0.0,
            rr_ratio: 0.0,
            reason: String::new(),
            reasons: Vec::new(),
            timestamp: Utc::now(),
            confluence_count: 1,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.direction == SignalDirection::Long
            && self.edge_score_base > 0.0
            && self.entry_price > Decimal::ZERO
            && self.stop_price > Decimal::ZERO
    }

    /// Full geometry validation, returning the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.direction == SignalDirection::None {
            return Err("no direction".to_string());
        }
        if self.entry_price <= Decimal::ZERO {
            return Err(format!("invalid entry_price={}", self.entry_price));
        }
        if self.stop_price <= Decimal::ZERO {
            return Err(format!("invalid stop_price={}", self.stop_price));
        }
        if self.direction == SignalDirection::Long {
            if self.stop_price >= self.entry_price {
                return Err(format!(
                    "long stop ({}) >= entry ({})",
                    self.stop_price, self.entry_price
                ));
            }
            if self.tp1_price > Decimal::ZERO && self.tp1_price <= self.entry_price {
                return Err(format!(
                    "long tp1 ({}) <= entry ({})",
                    self.tp1_price, self.entry_price
                ));
            }
        }
        if self.rr_ratio < 0.0 {
            return Err(format!("negative rr_ratio={}", self.rr_ratio));
        }
        Ok(())
    }
}

/// Candidate trade request: the orchestrator's selected signal plus the
/// market snapshot the gate funnel and sizer need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    pub symbol: String,
    pub signal_type: SignalType,
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
    pub stop_price: Decimal,
    pub tp1_price: Decimal,
    pub tp2_price: Decimal,
    pub strategy_id: String,
    /// Edge score after confluence boost, 0-100.
    pub edge_score: f64,
    pub confidence: f64,
    pub spread_bps: f64,
    pub vol_spike: f64,
    pub range_spike: f64,
    pub trend_15m: f64,
    pub vwap_distance: f64,
    pub tier: String,
    pub confluence_count: u32,
    pub reasons: Vec<String>,
}

impl Intent {
    pub fn from_signal(signal: &StrategySignal, spread_bps: f64) -> Self {
        Self {
            symbol: signal.symbol.clone(),
            signal_type: signal.signal_type,
            timestamp: signal.timestamp,
            price: signal.entry_price,
            stop_price: signal.stop_price,
            tp1_price: signal.tp1_price,
            tp2_price: signal.tp2_price,
            strategy_id: signal.strategy_id.clone(),
            edge_score: signal.edge_score_base,
            confidence: signal.edge_score_base / 100.0,
            spread_bps,
            vol_spike: 1.0,
            range_spike: 1.0,
            trend_15m: 0.0,
            vwap_distance: 0.0,
            tier: "unknown".to_string(),
            confluence_count: signal.confluence_count,
            reasons: signal.reasons.clone(),
        }
    }
}

/// An Intent that survived the full gate funnel, sized and ready to execute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradePlan {
    pub intent: Intent,
    pub size_usd: Decimal,
    pub stop_price: Decimal,
    pub tp1_price: Decimal,
    pub tp2_price: Decimal,
    pub time_stop_min: u32,
    pub rr_ratio: f64,
    pub tier: SizingTier,
    pub entry_score: f64,
    pub available_budget: Decimal,
    pub session_mult: f64,
    pub current_exposure: Decimal,
}

/// Append-only order lifecycle event for the UI stream and audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderEvent {
    pub event_type: OrderEventType,
    pub symbol: String,
    pub side: super::Side,
    pub mode: TradingMode,
    pub price: Decimal,
    pub size_usd: Decimal,
    pub size_qty: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pnl: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pnl_pct: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub reason: String,
}

/// One blocked-signal record for the rejection stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectionRecord {
    pub ts: DateTime<Utc>,
    pub symbol: String,
    pub gate: super::GateReason,
    pub details: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn long_signal() -> StrategySignal {
        let mut s = StrategySignal::new("BTC-USD", "burst_flag", SignalType::FlagBreakout);
        s.direction = SignalDirection::Long;
        s.edge_score_base = 72.0;
        s.entry_price = dec!(100);
        s.stop_price = dec!(97);
        s.tp1_price = dec!(105);
        s.tp2_price = dec!(108);
        s.rr_ratio = 5.0 / 3.0;
        s
    }

    #[test]
    fn test_signal_validation() {
        assert!(long_signal().validate().is_ok());

        let mut inverted = long_signal();
        inverted.stop_price = dec!(101);
        assert!(inverted.validate().is_err());

        let mut no_dir = long_signal();
        no_dir.direction = SignalDirection::None;
        assert!(!no_dir.is_valid());
    }

    #[test]
    fn test_intent_carries_signal_fields() {
        let signal = long_signal();
        let intent = Intent::from_signal(&signal, 10.0);
        assert_eq!(intent.symbol, "BTC-USD");
        assert_eq!(intent.price, dec!(100));
        assert_eq!(intent.spread_bps, 10.0);
        assert_eq!(intent.edge_score, 72.0);
    }
}
