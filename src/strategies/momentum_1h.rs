use rust_decimal_macros::dec;

use super::{long_signal, MarketContext, Strategy};
use crate::features::FeatureVector;
use crate::types::{CandleBuffer, SignalType, StrategySignal, TimeFrame};

/// Pure 1-hour momentum: a strong, steady hourly climb with green 5m
/// participation. No pattern, just persistence.
pub struct Momentum1hStrategy {
    min_trend_1h: f64,
    min_green_5m: usize,
}

impl Momentum1hStrategy {
    pub fn new() -> Self {
        Self {
            min_trend_1h: 0.015,
            min_green_5m: 7,
        }
    }
}

impl Default for Momentum1hStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for Momentum1hStrategy {
    fn strategy_id(&self) -> &'static str {
        "momentum_1h"
    }

    fn analyze(
        &mut self,
        symbol: &str,
        buffer: &CandleBuffer,
        features: &FeatureVector,
        _context: &MarketContext,
    ) -> Option<StrategySignal> {
        if buffer.len(TimeFrame::M5) < 14 {
            return None;
        }
        if features.trend_1h < self.min_trend_1h {
            return None;
        }
        let green = buffer.green_count(TimeFrame::M5, 12);
        if green < self.min_green_5m {
            return None;
        }
        // momentum, not a blow-off: last bar still near the highs
        let last = buffer.last(TimeFrame::M5)?;
        let high_12 = buffer.recent_high(TimeFrame::M5, 12)?;
        if last.close < high_12 * dec!(0.99) {
            return None;
        }

        let entry = last.close;
        let atr = buffer.atr(14, TimeFrame::M5)?;
        let stop = (entry - atr * dec!(25) / dec!(10)).min(buffer.recent_low(TimeFrame::M5, 6)?);
        let tp1 = entry + atr * dec!(3);
        let tp2 = entry + atr * dec!(5);

        let mut signal = long_signal(
            symbol,
            self.strategy_id(),
            SignalType::Momentum1h,
            entry,
            stop,
            tp1,
            tp2,
            "momentum_1h",
        )?;

        let mut score = 20.0;
        if features.trend_1h >= 0.04 {
            score += 25.0;
        } else if features.trend_1h >= 0.025 {
            score += 18.0;
        } else {
            score += 10.0;
        }
        score += (green as f64 - 6.0).clamp(0.0, 6.0) * 2.5;
        if features.vol_ratio >= 1.5 {
            score += 12.0;
        }
        if features.vwap_distance > 0.0 {
            score += 8.0;
        }
        signal.edge_score_base = score.min(100.0);
        signal.trend_score = (features.trend_1h * 500.0).clamp(0.0, 30.0);
        Some(signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::test_support::{features_for, seed};

    #[test]
    fn test_steady_climb_fires() {
        let mut buffer = CandleBuffer::new("INJ-USD");
        let closes: Vec<f64> = (0..16).map(|i| 100.0 * (1.0 + i as f64 * 0.0025)).collect();
        seed(&mut buffer, TimeFrame::M5, &closes, &[10.0; 16]);

        let features = features_for(&buffer);
        let mut strategy = Momentum1hStrategy::new();
        let signal = strategy
            .analyze("INJ-USD", &buffer, &features, &MarketContext::default())
            .expect("steady climb should fire");
        assert!(signal.edge_score_base >= 40.0);
    }

    #[test]
    fn test_choppy_tape_rejected() {
        let mut buffer = CandleBuffer::new("INJ-USD");
        let closes: Vec<f64> = (0..16)
            .map(|i| 100.0 + if i % 2 == 0 { 2.0 } else { -1.5 })
            .collect();
        seed(&mut buffer, TimeFrame::M5, &closes, &[10.0; 16]);

        let features = features_for(&buffer);
        let mut strategy = Momentum1hStrategy::new();
        assert!(strategy
            .analyze("INJ-USD", &buffer, &features, &MarketContext::default())
            .is_none());
    }
}
