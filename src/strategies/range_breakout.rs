use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::{f, long_signal, MarketContext, Strategy};
use crate::features::FeatureVector;
use crate::types::{CandleBuffer, SignalType, StrategySignal, TimeFrame};

/// Consolidation breakout on 5m candles: a tight multi-bar range, then a
/// close above the range high on expanding volume.
pub struct RangeBreakoutStrategy {
    range_bars: usize,
    max_range_atr_mult: Decimal,
    min_vol_ratio: f64,
}

impl RangeBreakoutStrategy {
    pub fn new() -> Self {
        Self {
            range_bars: 12,
            max_range_atr_mult: dec!(3),
            min_vol_ratio: 1.3,
        }
    }
}

impl Default for RangeBreakoutStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for RangeBreakoutStrategy {
    fn strategy_id(&self) -> &'static str {
        "range_breakout"
    }

    fn analyze(
        &mut self,
        symbol: &str,
        buffer: &CandleBuffer,
        features: &FeatureVector,
        _context: &MarketContext,
    ) -> Option<StrategySignal> {
        if buffer.len(TimeFrame::M5) < self.range_bars + 16 {
            return None;
        }
        let last = buffer.last(TimeFrame::M5)?;
        let atr = buffer.atr(14, TimeFrame::M5)?;
        if atr.is_zero() {
            return None;
        }

        // the range excludes the breakout bar itself
        let window = buffer.last_n(TimeFrame::M5, self.range_bars + 1);
        let range_bars = &window[..window.len() - 1];
        let range_high = range_bars.iter().map(|c| c.high).max()?;
        let range_low = range_bars.iter().map(|c| c.low).min()?;
        let range_width = range_high - range_low;

        // tight consolidation only
        if range_width > atr * self.max_range_atr_mult {
            return None;
        }
        // breakout close with volume
        if last.close <= range_high || features.vol_ratio < self.min_vol_ratio {
            return None;
        }

        let entry = last.close;
        let stop = range_low.max(entry - atr * dec!(2));
        let tp1 = entry + range_width.max(atr * dec!(2));
        let tp2 = entry + (range_width * dec!(2)).max(atr * dec!(3));

        let mut signal = long_signal(
            symbol,
            self.strategy_id(),
            SignalType::RangeBreakout,
            entry,
            stop,
            tp1,
            tp2,
            "range_breakout",
        )?;

        let mut score: f64 = 20.0;
        let tightness = f(range_width / atr);
        if tightness < 1.5 {
            score += 20.0;
        } else if tightness < 2.5 {
            score += 10.0;
        }
        if features.vol_ratio >= 2.5 {
            score += 20.0;
        } else if features.vol_ratio >= 1.8 {
            score += 12.0;
        } else {
            score += 6.0;
        }
        let breakout_margin = f((last.close - range_high) / atr);
        if breakout_margin > 0.3 {
            score += 15.0;
        } else {
            score += 8.0;
        }
        if features.trend_15m > 0.0 {
            score += 10.0;
        }
        signal.edge_score_base = score.min(100.0);
        signal.pattern_score = (20.0 - tightness * 5.0).clamp(0.0, 20.0);
        signal.volume_score = (features.vol_ratio * 8.0).clamp(0.0, 20.0);
        Some(signal)
    }
}
