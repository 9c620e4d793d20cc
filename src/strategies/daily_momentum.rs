use rust_decimal_macros::dec;

use super::{long_signal, MarketContext, Strategy};
use crate::features::{compute_htf_snapshot, FeatureVector};
use crate::types::{CandleBuffer, SignalType, StrategySignal, TimeFrame};

/// Multi-day trend continuation: the daily tape is trending up, price sits
/// near its recent daily high, and the intraday tape agrees.
pub struct DailyMomentumStrategy {
    min_trend_1d: f64,
    max_dist_from_high: f64,
}

impl DailyMomentumStrategy {
    pub fn new() -> Self {
        Self {
            min_trend_1d: 0.05,
            max_dist_from_high: 0.03,
        }
    }
}

impl Default for DailyMomentumStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for DailyMomentumStrategy {
    fn strategy_id(&self) -> &'static str {
        "daily_momentum"
    }

    fn analyze(
        &mut self,
        symbol: &str,
        buffer: &CandleBuffer,
        features: &FeatureVector,
        _context: &MarketContext,
    ) -> Option<StrategySignal> {
        if buffer.len(TimeFrame::D1) < 5 {
            return None;
        }
        let htf = compute_htf_snapshot(buffer);
        if htf.trend_1d < self.min_trend_1d {
            return None;
        }
        // near the highs, not breaking down from them
        if htf.dist_from_20d_high < -self.max_dist_from_high {
            return None;
        }
        // intraday confirmation
        if features.trend_1h <= 0.0 {
            return None;
        }

        let last = buffer.last(TimeFrame::M5).or_else(|| buffer.last(TimeFrame::D1))?;
        let entry = last.close;
        let atr = buffer
            .atr(14, TimeFrame::D1)
            .unwrap_or(entry * dec!(0.04));
        let stop = entry - atr;
        let tp1 = entry + atr * dec!(15) / dec!(10);
        let tp2 = entry + atr * dec!(25) / dec!(10);

        let mut signal = long_signal(
            symbol,
            self.strategy_id(),
            SignalType::DailyMomentum,
            entry,
            stop,
            tp1,
            tp2,
            "daily_trend",
        )?;

        let mut score: f64 = 20.0;
        if htf.trend_1d >= 0.15 {
            score += 25.0;
        } else if htf.trend_1d >= 0.08 {
            score += 15.0;
        } else {
            score += 8.0;
        }
        if htf.dist_from_20d_high >= 0.0 {
            score += 15.0; // fresh highs
        }
        if features.trend_1h > 0.01 {
            score += 15.0;
        }
        if features.vol_ratio >= 1.5 {
            score += 10.0;
        }
        signal.edge_score_base = score.min(100.0);
        signal.trend_score = (htf.trend_1d * 100.0).clamp(0.0, 30.0);
        signal.timing_score = (features.trend_1h * 500.0).clamp(0.0, 15.0);
        Some(signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::test_support::{features_for, seed};

    #[test]
    fn test_trending_dailies_fire() {
        let mut buffer = CandleBuffer::new("SUI-USD");
        let daily: Vec<f64> = (0..10).map(|i| 100.0 * (1.0 + i as f64 * 0.04)).collect();
        seed(&mut buffer, TimeFrame::D1, &daily, &[50.0; 10]);
        // intraday tape also rising
        let intraday: Vec<f64> = (0..20).map(|i| 135.0 + i as f64 * 0.2).collect();
        seed(&mut buffer, TimeFrame::M5, &intraday, &[10.0; 20]);
        let minute: Vec<f64> = (0..10).map(|i| 138.5 + i as f64 * 0.05).collect();
        seed(&mut buffer, TimeFrame::M1, &minute, &[10.0; 10]);

        let features = features_for(&buffer);
        let mut strategy = DailyMomentumStrategy::new();
        let signal = strategy
            .analyze("SUI-USD", &buffer, &features, &MarketContext::default())
            .expect("daily momentum should fire");
        assert!(signal.edge_score_base >= 40.0);
    }

    #[test]
    fn test_flat_dailies_do_not_fire() {
        let mut buffer = CandleBuffer::new("SUI-USD");
        seed(&mut buffer, TimeFrame::D1, &[100.0; 10], &[50.0; 10]);
        seed(&mut buffer, TimeFrame::M5, &[100.0; 20], &[10.0; 20]);

        let features = features_for(&buffer);
        let mut strategy = DailyMomentumStrategy::new();
        assert!(strategy
            .analyze("SUI-USD", &buffer, &features, &MarketContext::default())
            .is_none());
    }
}
