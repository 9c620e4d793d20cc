pub mod bb_expansion;
pub mod breakout_retest;
pub mod burst_flag;
pub mod correlation_play;
pub mod daily_momentum;
pub mod gap_fill;
pub mod liquidity_sweep;
pub mod mean_reversion;
pub mod momentum_1h;
pub mod orchestrator;
pub mod range_breakout;
pub mod relative_strength;
pub mod rsi_momentum;
pub mod support_bounce;
pub mod vwap_reclaim;

pub use orchestrator::*;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::features::FeatureVector;
use crate::types::{CandleBuffer, MarketRegime, SignalDirection, SignalType, StrategySignal};

/// Shared market context handed to every strategy each tick.
#[derive(Debug, Clone, Default)]
pub struct MarketContext {
    pub btc_trend_1h: f64,
    pub btc_trend_15m: f64,
    pub regime: MarketRegime,
}

/// One tradeable edge. Strategies score their own pattern and never apply
/// gates; the orchestrator and the gate funnel own selection and filtering.
pub trait Strategy: Send + Sync {
    fn strategy_id(&self) -> &'static str;

    fn analyze(
        &mut self,
        symbol: &str,
        buffer: &CandleBuffer,
        features: &FeatureVector,
        context: &MarketContext,
    ) -> Option<StrategySignal>;

    /// Clear per-symbol state after a position closes or the pattern
    /// invalidates. Stateless strategies take the default no-op.
    fn reset(&mut self, _symbol: &str) {}
}

pub(crate) fn f(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

/// Assemble a long signal with derived geometry, or None when the levels
/// are unusable (stop at/above entry).
pub(crate) fn long_signal(
    symbol: &str,
    strategy_id: &str,
    signal_type: SignalType,
    entry: Decimal,
    stop: Decimal,
    tp1: Decimal,
    tp2: Decimal,
    reason: &str,
) -> Option<StrategySignal> {
    if entry <= Decimal::ZERO || stop <= Decimal::ZERO || stop >= entry {
        return None;
    }
    let mut signal = StrategySignal::new(symbol, strategy_id, signal_type);
    signal.direction = SignalDirection::Long;
    signal.entry_price = entry;
    signal.stop_price = stop;
    signal.tp1_price = tp1;
    signal.tp2_price = tp2;
    signal.risk_pct = f((entry - stop) / entry) * 100.0;
    let risk = f(entry - stop);
    signal.rr_ratio = if risk > 0.0 { f(tp1 - entry) / risk } else { 0.0 };
    signal.reason = reason.to_string();
    signal.reasons.push(reason.to_string());
    Some(signal)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::types::{Candle, TimeFrame};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    /// Candles with the given closes, one per interval, ending "now"-ish.
    pub fn seed(buffer: &mut CandleBuffer, tf: TimeFrame, closes: &[f64], volumes: &[f64]) {
        let base = Utc.with_ymd_and_hms(2024, 6, 1, 6, 0, 0).unwrap();
        for (i, close) in closes.iter().enumerate() {
            let close = Decimal::from_f64_retain(*close).unwrap_or_default();
            let volume = volumes
                .get(i)
                .and_then(|v| Decimal::from_f64_retain(*v))
                .unwrap_or(dec!(10));
            let open = if i == 0 {
                close
            } else {
                Decimal::from_f64_retain(closes[i - 1]).unwrap_or(close)
            };
            buffer.push(
                tf,
                Candle {
                    timestamp: base + chrono::Duration::minutes((i as u64 * tf.to_minutes()) as i64),
                    open,
                    high: open.max(close) * dec!(1.002),
                    low: open.min(close) * dec!(0.998),
                    close,
                    volume,
                },
            );
        }
    }

    pub fn features_for(buffer: &CandleBuffer) -> FeatureVector {
        crate::features::compute_features(buffer, 10.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_long_signal_geometry() {
        let signal = long_signal(
            "BTC-USD",
            "burst_flag",
            SignalType::FlagBreakout,
            dec!(100),
            dec!(97),
            dec!(105),
            dec!(108),
            "test",
        )
        .unwrap();
        assert_eq!(signal.direction, SignalDirection::Long);
        assert!((signal.rr_ratio - 5.0 / 3.0).abs() < 1e-9);
        assert!((signal.risk_pct - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_long_signal_rejects_inverted_stop() {
        assert!(long_signal(
            "BTC-USD",
            "x",
            SignalType::FlagBreakout,
            dec!(100),
            dec!(101),
            dec!(105),
            dec!(108),
            "bad",
        )
        .is_none());
    }
}
