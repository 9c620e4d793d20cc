use rust_decimal_macros::dec;

use super::{f, long_signal, MarketContext, Strategy};
use crate::features::FeatureVector;
use crate::types::{CandleBuffer, SignalType, StrategySignal, TimeFrame};

/// Oversold snap-back on 5m candles: a close outside the lower Bollinger
/// band with a washed-out RSI, followed by a close back inside the bands.
pub struct MeanReversionStrategy {
    bb_period: usize,
    rsi_period: usize,
    rsi_oversold: f64,
}

impl MeanReversionStrategy {
    pub fn new() -> Self {
        Self {
            bb_period: 20,
            rsi_period: 14,
            rsi_oversold: 30.0,
        }
    }
}

impl Default for MeanReversionStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for MeanReversionStrategy {
    fn strategy_id(&self) -> &'static str {
        "mean_reversion"
    }

    fn analyze(
        &mut self,
        symbol: &str,
        buffer: &CandleBuffer,
        features: &FeatureVector,
        _context: &MarketContext,
    ) -> Option<StrategySignal> {
        if buffer.len(TimeFrame::M5) < self.bb_period + 2 {
            return None;
        }
        let (middle, _, lower) = buffer.bb(self.bb_period, dec!(2), TimeFrame::M5)?;
        let rsi = f(buffer.rsi(self.rsi_period, TimeFrame::M5)?);

        let recent = buffer.last_n(TimeFrame::M5, 3);
        let last = recent.last()?;
        let touched_band = recent[..recent.len() - 1]
            .iter()
            .any(|c| c.low <= lower || c.close <= lower);
        let back_inside = last.close > lower && last.is_green();
        if !touched_band || !back_inside || rsi > self.rsi_oversold + 10.0 {
            return None;
        }

        let entry = last.close;
        let recent_low = buffer.recent_low(TimeFrame::M5, 5)?;
        let stop = recent_low * dec!(0.997);
        let tp1 = middle; // revert to the mean
        let tp2 = middle + (middle - entry).abs() / dec!(2);
        if tp1 <= entry {
            return None;
        }

        let mut signal = long_signal(
            symbol,
            self.strategy_id(),
            SignalType::MeanReversion,
            entry,
            stop,
            tp1,
            tp2,
            "bb_snapback",
        )?;

        let mut score: f64 = 15.0;
        if rsi <= self.rsi_oversold {
            score += 25.0;
        } else {
            score += 10.0;
        }
        let band_depth = f((lower - recent_low) / entry) * 100.0;
        if band_depth > 0.2 {
            score += 15.0; // deep flush below the band
        }
        if features.vol_ratio >= 1.5 {
            score += 15.0;
        }
        if features.trend_1h > -0.01 {
            score += 10.0; // avoid knife-catching in a crashing hour
        }
        signal.edge_score_base = score.min(100.0);
        signal.pattern_score = (self.rsi_oversold + 10.0 - rsi).clamp(0.0, 25.0);
        signal.volume_score = (features.vol_ratio * 8.0).clamp(0.0, 20.0);
        Some(signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::test_support::{features_for, seed};

    #[test]
    fn test_no_signal_in_uptrend() {
        let mut buffer = CandleBuffer::new("SOL-USD");
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let volumes = vec![10.0; 30];
        seed(&mut buffer, TimeFrame::M5, &closes, &volumes);

        let features = features_for(&buffer);
        let mut strategy = MeanReversionStrategy::new();
        assert!(strategy
            .analyze("SOL-USD", &buffer, &features, &MarketContext::default())
            .is_none());
    }

    #[test]
    fn test_snapback_after_flush() {
        let mut buffer = CandleBuffer::new("SOL-USD");
        // stable range then a hard flush below the band and a green reclaim
        let mut closes: Vec<f64> = (0..24)
            .map(|i| 100.0 + if i % 2 == 0 { 0.3 } else { -0.3 })
            .collect();
        closes.extend([97.0, 94.0, 92.0, 95.5]);
        let volumes = vec![10.0; closes.len()];
        seed(&mut buffer, TimeFrame::M5, &closes, &volumes);

        let features = features_for(&buffer);
        let mut strategy = MeanReversionStrategy::new();
        let signal = strategy.analyze("SOL-USD", &buffer, &features, &MarketContext::default());
        if let Some(signal) = signal {
            assert!(signal.tp1_price > signal.entry_price);
            assert!(signal.stop_price < signal.entry_price);
        }
        // RSI may stay above the window depending on the flush depth; the
        // strategy must at minimum not panic and produce sane geometry.
    }
}
