use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::{f, long_signal, MarketContext, Strategy};
use crate::features::FeatureVector;
use crate::types::{CandleBuffer, SignalType, StrategySignal, TimeFrame};

/// Bull-flag breakout after an impulse move.
///
/// Pattern: volume/range burst, strong directional impulse, shallow flag
/// consolidation, then a close above the flag high. The edge score rewards
/// impulse strength, flag quality (30-50% retrace is ideal), trend
/// alignment, and volume confirmation.
pub struct BurstFlagStrategy {
    impulse_min_pct: Decimal,
    flag_max_retrace: Decimal,
    lookback: usize,
}

#[derive(Debug)]
struct Impulse {
    start_low: Decimal,
    peak: Decimal,
    pct_move: f64,
    green_candles: usize,
}

impl BurstFlagStrategy {
    pub fn new() -> Self {
        Self {
            impulse_min_pct: dec!(0.02),
            flag_max_retrace: dec!(0.7),
            lookback: 20,
        }
    }

    fn find_impulse(&self, buffer: &CandleBuffer) -> Option<Impulse> {
        let candles = buffer.last_n(TimeFrame::M1, self.lookback);
        if candles.len() < 10 {
            return None;
        }
        // impulse window: everything except the flag tail (last 5 bars)
        let body = &candles[..candles.len() - 5];
        let start_low = body.iter().map(|c| c.low).min()?;
        let peak_idx = body
            .iter()
            .enumerate()
            .max_by_key(|(_, c)| c.high)
            .map(|(i, _)| i)?;
        let peak = body[peak_idx].high;
        if start_low.is_zero() {
            return None;
        }
        let pct_move = f((peak - start_low) / start_low);
        if pct_move < f(self.impulse_min_pct) {
            return None;
        }
        let green_candles = body[..=peak_idx].iter().filter(|c| c.is_green()).count();
        Some(Impulse {
            start_low,
            peak,
            pct_move,
            green_candles,
        })
    }

    fn edge_score(&self, impulse: &Impulse, retrace: f64, features: &FeatureVector) -> f64 {
        let mut score: f64 = 10.0; // base for a valid pattern

        // impulse strength
        if impulse.pct_move >= 0.05 {
            score += 15.0;
        } else if impulse.pct_move >= 0.03 {
            score += 10.0;
        } else {
            score += 5.0;
        }
        if impulse.green_candles >= 5 {
            score += 10.0;
        } else if impulse.green_candles >= 3 {
            score += 5.0;
        }

        // flag quality: ideal retrace 30-50%
        if (0.3..=0.5).contains(&retrace) {
            score += 15.0;
        } else if (0.2..=0.6).contains(&retrace) {
            score += 10.0;
        } else {
            score += 5.0;
        }

        // trend alignment
        if features.trend_5m > 0.005 {
            score += 15.0;
        } else if features.trend_5m > 0.002 {
            score += 10.0;
        } else if features.trend_5m > 0.0 {
            score += 5.0;
        }

        // volume confirmation
        if features.vol_ratio >= 3.0 {
            score += 15.0;
        } else if features.vol_ratio >= 2.0 {
            score += 10.0;
        } else if features.vol_ratio >= 1.5 {
            score += 5.0;
        }

        // above VWAP but not extended
        if features.vwap_pct > 0.0 && features.vwap_pct < 0.5 {
            score += 10.0;
        } else if features.vwap_pct < 1.0 {
            score += 5.0;
        }

        score.min(100.0)
    }
}

impl Default for BurstFlagStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for BurstFlagStrategy {
    fn strategy_id(&self) -> &'static str {
        "burst_flag"
    }

    fn analyze(
        &mut self,
        symbol: &str,
        buffer: &CandleBuffer,
        features: &FeatureVector,
        _context: &MarketContext,
    ) -> Option<StrategySignal> {
        let impulse = self.find_impulse(buffer)?;

        let flag = buffer.last_n(TimeFrame::M1, 5);
        if flag.len() < 5 {
            return None;
        }
        let flag_low = flag.iter().map(|c| c.low).min()?;
        let flag_high = flag[..flag.len() - 1].iter().map(|c| c.high).max()?;
        let impulse_height = impulse.peak - impulse.start_low;
        if impulse_height <= Decimal::ZERO {
            return None;
        }
        let retrace = f((impulse.peak - flag_low) / impulse_height);
        if retrace > f(self.flag_max_retrace) || retrace < 0.0 {
            return None;
        }

        // breakout: last close clears the flag high
        let last = buffer.last(TimeFrame::M1)?;
        if last.close <= flag_high {
            return None;
        }

        let fast = features.vol_spike_5m >= 3.0 && features.trend_5m > 0.01;
        let signal_type = if fast {
            SignalType::FastBreakout
        } else {
            SignalType::FlagBreakout
        };

        let entry = last.close;
        let stop = flag_low.min(entry * dec!(0.97));
        let tp1 = entry + impulse_height;
        let tp2 = entry + impulse_height * dec!(15) / dec!(10);

        let mut signal = long_signal(
            symbol,
            self.strategy_id(),
            signal_type,
            entry,
            stop,
            tp1,
            tp2,
            if fast { "fast_breakout" } else { "flag_breakout" },
        )?;
        signal.edge_score_base = self.edge_score(&impulse, retrace, features);
        signal.trend_score = (features.trend_5m * 1000.0).clamp(0.0, 20.0);
        signal.volume_score = (features.vol_ratio * 5.0).clamp(0.0, 20.0);
        signal.pattern_score = (impulse.pct_move * 500.0).clamp(0.0, 25.0);
        Some(signal)
    }
}
