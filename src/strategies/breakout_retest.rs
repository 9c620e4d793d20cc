use rust_decimal_macros::dec;

use super::{f, long_signal, MarketContext, Strategy};
use crate::features::FeatureVector;
use crate::types::{CandleBuffer, SignalType, StrategySignal, TimeFrame};

/// Breakout-retest continuation: price broke a prior swing high, pulled
/// back to the level, and is holding it as support.
pub struct BreakoutRetestStrategy {
    lookback: usize,
    retest_tolerance: f64,
}

impl BreakoutRetestStrategy {
    pub fn new() -> Self {
        Self {
            lookback: 30,
            retest_tolerance: 0.004,
        }
    }
}

impl Default for BreakoutRetestStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for BreakoutRetestStrategy {
    fn strategy_id(&self) -> &'static str {
        "breakout_retest"
    }

    fn analyze(
        &mut self,
        symbol: &str,
        buffer: &CandleBuffer,
        features: &FeatureVector,
        _context: &MarketContext,
    ) -> Option<StrategySignal> {
        if buffer.len(TimeFrame::M5) < self.lookback {
            return None;
        }
        let swings = buffer.swing_highs(TimeFrame::M5, self.lookback);
        let last = buffer.last(TimeFrame::M5)?;

        // find a broken level: a swing high the current price cleared
        let level = swings
            .into_iter()
            .filter(|level| last.close > *level)
            .max()?;
        let level_f = f(level);

        // retest shape: a recent bar dipped to the level and the last bar
        // is green holding above it
        let recent = buffer.last_n(TimeFrame::M5, 4);
        let dipped = recent
            .iter()
            .any(|c| f(c.low) <= level_f * (1.0 + self.retest_tolerance));
        let holding = last.is_green() && f(last.close) > level_f * (1.0 + self.retest_tolerance / 2.0);
        if !dipped || !holding {
            return None;
        }
        // not already extended far beyond the retest
        let extension = (f(last.close) - level_f) / level_f;
        if extension > 0.01 {
            return None;
        }

        let entry = last.close;
        let stop = level * dec!(0.994);
        let atr = buffer.atr(14, TimeFrame::M5)?;
        let tp1 = entry + atr * dec!(25) / dec!(10);
        let tp2 = entry + atr * dec!(4);

        let mut signal = long_signal(
            symbol,
            self.strategy_id(),
            SignalType::BreakoutRetest,
            entry,
            stop,
            tp1,
            tp2,
            "breakout_retest",
        )?;

        let mut score: f64 = 25.0;
        if features.vol_ratio >= 1.5 {
            score += 15.0;
        }
        if features.trend_15m > 0.0 {
            score += 15.0;
        }
        if features.trend_1h > 0.0 {
            score += 10.0;
        }
        if extension < 0.004 {
            score += 10.0; // entering right at the level
        }
        signal.edge_score_base = score.min(100.0);
        signal.pattern_score = ((0.01 - extension) * 2000.0).clamp(0.0, 20.0);
        Some(signal)
    }
}
