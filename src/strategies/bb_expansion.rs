use rust_decimal_macros::dec;

use super::{f, long_signal, MarketContext, Strategy};
use crate::features::FeatureVector;
use crate::indicators::bollinger_width;
use crate::types::{CandleBuffer, SignalType, StrategySignal, TimeFrame};

/// Bollinger expansion: volatility compressing then releasing upward.
/// Fires when band width jumps versus its recent state and price closes
/// above the upper half of the bands.
pub struct BbExpansionStrategy {
    period: usize,
    expansion_ratio: f64,
}

impl BbExpansionStrategy {
    pub fn new() -> Self {
        Self {
            period: 20,
            expansion_ratio: 1.4,
        }
    }
}

impl Default for BbExpansionStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for BbExpansionStrategy {
    fn strategy_id(&self) -> &'static str {
        "bb_expansion"
    }

    fn analyze(
        &mut self,
        symbol: &str,
        buffer: &CandleBuffer,
        features: &FeatureVector,
        _context: &MarketContext,
    ) -> Option<StrategySignal> {
        let total = buffer.len(TimeFrame::M5);
        if total < self.period + 6 {
            return None;
        }

        let closes_now = buffer.closes(TimeFrame::M5, self.period);
        let closes_then = {
            let all = buffer.closes(TimeFrame::M5, self.period + 5);
            all[..self.period].to_vec()
        };
        let width_now = f(bollinger_width(&closes_now, self.period, dec!(2))?);
        let width_then = f(bollinger_width(&closes_then, self.period, dec!(2))?);
        if width_then <= 0.0 || width_now / width_then < self.expansion_ratio {
            return None;
        }

        let (middle, upper, _) = buffer.bb(self.period, dec!(2), TimeFrame::M5)?;
        let last = buffer.last(TimeFrame::M5)?;
        // breaking out through the upper half, not collapsing downward
        if last.close <= middle || !last.is_green() {
            return None;
        }

        let entry = last.close;
        let stop = middle * dec!(0.995);
        let band_height = upper - middle;
        let tp1 = entry + band_height;
        let tp2 = entry + band_height * dec!(2);

        let mut signal = long_signal(
            symbol,
            self.strategy_id(),
            SignalType::BbExpansion,
            entry,
            stop,
            tp1,
            tp2,
            "bb_expansion",
        )?;

        let mut score: f64 = 22.0;
        let ratio = width_now / width_then;
        if ratio >= 2.0 {
            score += 20.0;
        } else if ratio >= 1.7 {
            score += 12.0;
        } else {
            score += 6.0;
        }
        if last.close >= upper {
            score += 15.0; // riding the band
        }
        if features.vol_ratio >= 1.8 {
            score += 15.0;
        } else if features.vol_ratio >= 1.3 {
            score += 8.0;
        }
        if features.trend_15m > 0.0 {
            score += 10.0;
        }
        signal.edge_score_base = score.min(100.0);
        signal.pattern_score = ((ratio - 1.0) * 20.0).clamp(0.0, 25.0);
        Some(signal)
    }
}
