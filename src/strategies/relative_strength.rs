use rust_decimal_macros::dec;

use super::{long_signal, MarketContext, Strategy};
use crate::features::FeatureVector;
use crate::types::{CandleBuffer, SignalType, StrategySignal, TimeFrame};

/// Outperformance vs BTC: symbols grinding up while the index chops or
/// drifts. Strength that persists against a flat market leader tends to
/// continue when the leader turns.
pub struct RelativeStrengthStrategy {
    min_outperformance: f64,
}

impl RelativeStrengthStrategy {
    pub fn new() -> Self {
        Self {
            min_outperformance: 0.01,
        }
    }
}

impl Default for RelativeStrengthStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for RelativeStrengthStrategy {
    fn strategy_id(&self) -> &'static str {
        "relative_strength"
    }

    fn analyze(
        &mut self,
        symbol: &str,
        buffer: &CandleBuffer,
        features: &FeatureVector,
        context: &MarketContext,
    ) -> Option<StrategySignal> {
        if symbol.starts_with("BTC-") || buffer.len(TimeFrame::M5) < 16 {
            return None;
        }
        let outperformance = features.trend_1h - context.btc_trend_1h;
        if outperformance < self.min_outperformance || features.trend_1h <= 0.0 {
            return None;
        }
        // needs short-term agreement, not a fading spike
        if features.trend_15m < 0.0 {
            return None;
        }

        let last = buffer.last(TimeFrame::M5)?;
        let entry = last.close;
        let atr = buffer.atr(14, TimeFrame::M5)?;
        let stop = (entry - atr * dec!(2)).min(buffer.recent_low(TimeFrame::M5, 8)?);
        let tp1 = entry + atr * dec!(3);
        let tp2 = entry + atr * dec!(5);

        let mut signal = long_signal(
            symbol,
            self.strategy_id(),
            SignalType::RelativeStrength,
            entry,
            stop,
            tp1,
            tp2,
            "rs_outperformance",
        )?;

        let mut score: f64 = 20.0;
        if outperformance >= 0.03 {
            score += 25.0;
        } else if outperformance >= 0.02 {
            score += 18.0;
        } else {
            score += 10.0;
        }
        if context.btc_trend_1h >= 0.0 {
            score += 10.0; // strength with a tailwind beats strength against one
        }
        if features.vol_ratio >= 1.5 {
            score += 12.0;
        }
        if features.vwap_distance > 0.0 {
            score += 8.0;
        }
        signal.edge_score_base = score.min(100.0);
        signal.trend_score = (outperformance * 1000.0).clamp(0.0, 30.0);
        Some(signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::test_support::{features_for, seed};

    fn rising_buffer() -> CandleBuffer {
        let mut buffer = CandleBuffer::new("SOL-USD");
        let closes: Vec<f64> = (0..20).map(|i| 100.0 * (1.0 + i as f64 * 0.003)).collect();
        seed(&mut buffer, TimeFrame::M5, &closes, &[10.0; 20]);
        buffer
    }

    #[test]
    fn test_outperformer_fires_against_flat_btc() {
        let buffer = rising_buffer();
        let features = features_for(&buffer);
        let context = MarketContext {
            btc_trend_1h: 0.0,
            ..MarketContext::default()
        };
        let mut strategy = RelativeStrengthStrategy::new();
        let signal = strategy
            .analyze("SOL-USD", &buffer, &features, &context)
            .expect("outperformance should fire");
        assert!(signal.edge_score_base >= 40.0);
    }

    #[test]
    fn test_btc_itself_is_skipped() {
        let buffer = rising_buffer();
        let features = features_for(&buffer);
        let mut strategy = RelativeStrengthStrategy::new();
        assert!(strategy
            .analyze("BTC-USD", &buffer, &features, &MarketContext::default())
            .is_none());
    }

    #[test]
    fn test_no_edge_when_matching_btc() {
        let buffer = rising_buffer();
        let features = features_for(&buffer);
        let context = MarketContext {
            btc_trend_1h: features.trend_1h,
            ..MarketContext::default()
        };
        let mut strategy = RelativeStrengthStrategy::new();
        assert!(strategy.analyze("SOL-USD", &buffer, &features, &context).is_none());
    }
}
