use rust_decimal_macros::dec;

use super::{f, long_signal, MarketContext, Strategy};
use crate::features::FeatureVector;
use crate::types::{CandleBuffer, SignalType, StrategySignal, TimeFrame};

/// Stop-hunt reversal on 1m candles: a wick below the recent low that
/// closes back above it on a volume burst. The sweep clears resting stops,
/// then price snaps back.
pub struct LiquiditySweepStrategy {
    low_lookback: usize,
    min_wick_ratio: f64,
}

impl LiquiditySweepStrategy {
    pub fn new() -> Self {
        Self {
            low_lookback: 20,
            min_wick_ratio: 0.5,
        }
    }
}

impl Default for LiquiditySweepStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for LiquiditySweepStrategy {
    fn strategy_id(&self) -> &'static str {
        "liquidity_sweep"
    }

    fn analyze(
        &mut self,
        symbol: &str,
        buffer: &CandleBuffer,
        features: &FeatureVector,
        _context: &MarketContext,
    ) -> Option<StrategySignal> {
        if buffer.len(TimeFrame::M1) < self.low_lookback + 2 {
            return None;
        }
        let last = buffer.last(TimeFrame::M1)?;
        let window = buffer.last_n(TimeFrame::M1, self.low_lookback + 1);
        let prior_low = window[..window.len() - 1].iter().map(|c| c.low).min()?;

        // sweep: wick pierced the prior low, body closed back above it
        let pierced = last.low < prior_low;
        let reclaimed = last.close > prior_low && last.is_green();
        if !pierced || !reclaimed {
            return None;
        }
        // the lower wick must dominate the bar
        let range = f(last.range());
        if range <= 0.0 {
            return None;
        }
        let lower_wick = f(last.close.min(last.open) - last.low);
        if lower_wick / range < self.min_wick_ratio {
            return None;
        }
        // needs participation, not a liquidity vacuum
        if features.vol_ratio < 1.5 {
            return None;
        }

        let entry = last.close;
        let stop = last.low * dec!(0.998);
        let risk = entry - stop;
        let tp1 = entry + risk * dec!(2);
        let tp2 = entry + risk * dec!(3);

        let mut signal = long_signal(
            symbol,
            self.strategy_id(),
            SignalType::LiquiditySweep,
            entry,
            stop,
            tp1,
            tp2,
            "liquidity_sweep",
        )?;

        let mut score: f64 = 25.0;
        let wick_ratio = lower_wick / range;
        if wick_ratio >= 0.7 {
            score += 20.0;
        } else {
            score += 10.0;
        }
        if features.vol_ratio >= 3.0 {
            score += 20.0;
        } else if features.vol_ratio >= 2.0 {
            score += 12.0;
        } else {
            score += 6.0;
        }
        let sweep_depth = f((prior_low - last.low) / prior_low) * 100.0;
        if sweep_depth > 0.15 {
            score += 10.0;
        }
        if features.trend_15m >= 0.0 {
            score += 10.0;
        }
        signal.edge_score_base = score.min(100.0);
        signal.pattern_score = (wick_ratio * 25.0).clamp(0.0, 25.0);
        signal.volume_score = (features.vol_ratio * 6.0).clamp(0.0, 20.0);
        Some(signal)
    }
}
