use rust_decimal_macros::dec;

use super::{f, long_signal, MarketContext, Strategy};
use crate::features::FeatureVector;
use crate::types::{CandleBuffer, SignalType, StrategySignal, TimeFrame};

/// VWAP reclaim: price spent time below session VWAP, crossed back above,
/// and is holding the level. Scores shallow reclaims with volume behind
/// them; deeply extended prices are ignored.
pub struct VwapReclaimStrategy {
    vwap_window: usize,
    max_extension_pct: f64,
}

impl VwapReclaimStrategy {
    pub fn new() -> Self {
        Self {
            vwap_window: 30,
            max_extension_pct: 1.5,
        }
    }
}

impl Default for VwapReclaimStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for VwapReclaimStrategy {
    fn strategy_id(&self) -> &'static str {
        "vwap_reclaim"
    }

    fn analyze(
        &mut self,
        symbol: &str,
        buffer: &CandleBuffer,
        features: &FeatureVector,
        _context: &MarketContext,
    ) -> Option<StrategySignal> {
        if buffer.len(TimeFrame::M1) < self.vwap_window / 2 {
            return None;
        }
        let vwap = buffer.vwap(self.vwap_window)?;
        let recent = buffer.last_n(TimeFrame::M1, 6);
        if recent.len() < 6 {
            return None;
        }

        let last = recent.last()?;
        // reclaim shape: some of the prior bars closed below VWAP, the last
        // two closed above it
        let below_count = recent[..4].iter().filter(|c| c.close < vwap).count();
        let holding = recent[4].close > vwap && recent[5].close > vwap;
        if below_count < 2 || !holding {
            return None;
        }

        // skip chases: already extended far above the reclaimed level
        if features.vwap_pct > self.max_extension_pct {
            return None;
        }

        let entry = last.close;
        let recent_low = recent.iter().map(|c| c.low).min()?;
        let stop = recent_low.min(vwap * dec!(0.995));
        let risk = entry - stop;
        if risk <= rust_decimal::Decimal::ZERO {
            return None;
        }
        let tp1 = entry + risk * dec!(2);
        let tp2 = entry + risk * dec!(3);

        let mut signal = long_signal(
            symbol,
            self.strategy_id(),
            SignalType::VwapReclaim,
            entry,
            stop,
            tp1,
            tp2,
            "vwap_reclaim",
        )?;

        let mut score: f64 = 20.0;
        if features.vol_ratio >= 2.0 {
            score += 20.0;
        } else if features.vol_ratio >= 1.3 {
            score += 10.0;
        }
        if features.trend_5m > 0.0 {
            score += 15.0;
        }
        // tight reclaim (close to vwap) scores best
        let distance = f((entry - vwap) / vwap) * 100.0;
        if distance < 0.2 {
            score += 20.0;
        } else if distance < 0.5 {
            score += 10.0;
        }
        if below_count >= 3 {
            score += 10.0;
        }
        signal.edge_score_base = score.min(100.0);
        signal.trend_score = (features.trend_5m * 1000.0).clamp(0.0, 20.0);
        signal.volume_score = (features.vol_ratio * 8.0).clamp(0.0, 20.0);
        signal.pattern_score = (20.0 - distance * 10.0).clamp(0.0, 20.0);
        Some(signal)
    }
}
