use rust_decimal_macros::dec;

use super::{f, long_signal, MarketContext, Strategy};
use crate::features::FeatureVector;
use crate::types::{CandleBuffer, SignalType, StrategySignal, TimeFrame};

/// Bounce off an established support level: price tags a level that held
/// at least twice before and prints a green rejection candle.
pub struct SupportBounceStrategy {
    lookback: usize,
    level_tolerance: f64,
}

impl SupportBounceStrategy {
    pub fn new() -> Self {
        Self {
            lookback: 40,
            level_tolerance: 0.005,
        }
    }

    fn support_touches(&self, buffer: &CandleBuffer, level: f64) -> usize {
        buffer
            .last_n(TimeFrame::M5, self.lookback)
            .iter()
            .filter(|c| {
                let low = f(c.low);
                level > 0.0 && ((low - level) / level).abs() <= self.level_tolerance
            })
            .count()
    }
}

impl Default for SupportBounceStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for SupportBounceStrategy {
    fn strategy_id(&self) -> &'static str {
        "support_bounce"
    }

    fn analyze(
        &mut self,
        symbol: &str,
        buffer: &CandleBuffer,
        features: &FeatureVector,
        _context: &MarketContext,
    ) -> Option<StrategySignal> {
        if buffer.len(TimeFrame::M5) < self.lookback / 2 {
            return None;
        }
        let last = buffer.last(TimeFrame::M5)?;
        if !last.is_green() {
            return None;
        }

        let support = buffer.recent_low(TimeFrame::M5, self.lookback)?;
        let level = f(support);
        // the last bar must have tagged the level and closed away from it
        let tagged = f(last.low) <= level * (1.0 + self.level_tolerance);
        let closed_away = f(last.close) > level * (1.0 + self.level_tolerance);
        if !tagged || !closed_away {
            return None;
        }

        let touches = self.support_touches(buffer, level);
        if touches < 2 {
            return None; // untested lows are not support
        }

        let entry = last.close;
        let stop = support * dec!(0.995);
        let atr = buffer.atr(14, TimeFrame::M5)?;
        let tp1 = entry + atr * dec!(2);
        let tp2 = entry + atr * dec!(35) / dec!(10);

        let mut signal = long_signal(
            symbol,
            self.strategy_id(),
            SignalType::SupportBounce,
            entry,
            stop,
            tp1,
            tp2,
            "support_bounce",
        )?;

        let mut score: f64 = 20.0;
        if touches >= 4 {
            score += 20.0;
        } else if touches >= 3 {
            score += 12.0;
        } else {
            score += 6.0;
        }
        if features.vol_ratio >= 1.8 {
            score += 18.0;
        } else if features.vol_ratio >= 1.2 {
            score += 10.0;
        }
        if features.trend_1h > -0.005 {
            score += 12.0; // bounces in downtrends get cut quickly
        }
        let rejection = f((last.close - last.low) / last.low) * 100.0;
        if rejection > 0.3 {
            score += 12.0;
        }
        signal.edge_score_base = score.min(100.0);
        signal.pattern_score = (touches as f64 * 5.0).clamp(0.0, 20.0);
        Some(signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::test_support::{features_for, seed};

    #[test]
    fn test_triple_tested_support_bounces() {
        let mut buffer = CandleBuffer::new("LINK-USD");
        // three dips to ~100 with recoveries, then a fresh tag and bounce
        let closes = [
            102.0, 101.0, 100.0, 101.5, 102.5, 101.0, 100.1, 101.8, 102.2, 101.2, 100.2, 100.05,
            102.0,
        ];
        seed(&mut buffer, TimeFrame::M5, &closes, &[12.0; 13]);
        // widen lookback guard
        let mut strategy = SupportBounceStrategy {
            lookback: 12,
            level_tolerance: 0.006,
        };

        let features = features_for(&buffer);
        let signal = strategy.analyze("LINK-USD", &buffer, &features, &MarketContext::default());
        let signal = signal.expect("bounce should fire");
        assert!(signal.stop_price < signal.entry_price);
        assert!(signal.pattern_score > 0.0);
    }

    #[test]
    fn test_red_candle_never_bounces() {
        let mut buffer = CandleBuffer::new("LINK-USD");
        let closes: Vec<f64> = (0..25).map(|i| 110.0 - i as f64 * 0.4).collect();
        seed(&mut buffer, TimeFrame::M5, &closes, &[10.0; 25]);

        let features = features_for(&buffer);
        let mut strategy = SupportBounceStrategy::new();
        assert!(strategy
            .analyze("LINK-USD", &buffer, &features, &MarketContext::default())
            .is_none());
    }
}
