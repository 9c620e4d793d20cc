use rust_decimal_macros::dec;

use super::{long_signal, MarketContext, Strategy};
use crate::features::FeatureVector;
use crate::types::{CandleBuffer, SignalType, StrategySignal, TimeFrame};

/// Laggard catch-up: BTC has moved decisively but this symbol has not yet
/// followed, and its short-term tape just turned up.
pub struct CorrelationPlayStrategy {
    min_btc_move: f64,
    max_follow_ratio: f64,
}

impl CorrelationPlayStrategy {
    pub fn new() -> Self {
        Self {
            min_btc_move: 0.01,
            max_follow_ratio: 0.5,
        }
    }
}

impl Default for CorrelationPlayStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for CorrelationPlayStrategy {
    fn strategy_id(&self) -> &'static str {
        "correlation_play"
    }

    fn analyze(
        &mut self,
        symbol: &str,
        buffer: &CandleBuffer,
        features: &FeatureVector,
        context: &MarketContext,
    ) -> Option<StrategySignal> {
        if symbol.starts_with("BTC-") || buffer.len(TimeFrame::M5) < 16 {
            return None;
        }
        // the leader moved, this symbol lagged
        if context.btc_trend_1h < self.min_btc_move {
            return None;
        }
        if features.trend_1h > context.btc_trend_1h * self.max_follow_ratio {
            return None; // already followed
        }
        // catch-up must have started
        if features.trend_5m <= 0.0 || features.trend_15m < 0.0 {
            return None;
        }

        let last = buffer.last(TimeFrame::M5)?;
        let entry = last.close;
        let atr = buffer.atr(14, TimeFrame::M5)?;
        let stop = entry - atr * dec!(2);
        // target proportional to the unclosed correlation distance
        let lag = context.btc_trend_1h - features.trend_1h;
        let lag_target = entry * rust_decimal::Decimal::from_f64_retain(1.0 + lag * 0.6)
            .unwrap_or(entry);
        let tp1 = lag_target.max(entry + atr * dec!(2));
        let tp2 = tp1 + atr * dec!(15) / dec!(10);

        let mut signal = long_signal(
            symbol,
            self.strategy_id(),
            SignalType::CorrelationPlay,
            entry,
            stop,
            tp1,
            tp2,
            "btc_laggard",
        )?;

        let mut score: f64 = 20.0;
        if context.btc_trend_1h >= 0.02 {
            score += 20.0;
        } else {
            score += 10.0;
        }
        if lag >= 0.015 {
            score += 15.0;
        } else {
            score += 8.0;
        }
        if features.vol_ratio >= 1.3 {
            score += 12.0;
        }
        if features.trend_5m > 0.003 {
            score += 12.0;
        }
        signal.edge_score_base = score.min(100.0);
        signal.timing_score = (features.trend_5m * 2000.0).clamp(0.0, 15.0);
        Some(signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::test_support::{features_for, seed};

    fn laggard_buffer() -> CandleBuffer {
        let mut buffer = CandleBuffer::new("ADA-USD");
        // mostly flat hour with a small late upturn
        let mut closes = vec![100.0; 14];
        closes.extend([100.1, 100.25, 100.4, 100.6]);
        seed(&mut buffer, TimeFrame::M5, &closes, &[10.0; 18]);
        let minute: Vec<f64> = (0..8).map(|i| 100.3 + i as f64 * 0.05).collect();
        seed(&mut buffer, TimeFrame::M1, &minute, &[10.0; 8]);
        buffer
    }

    #[test]
    fn test_laggard_fires_when_btc_ran() {
        let buffer = laggard_buffer();
        let features = features_for(&buffer);
        let context = MarketContext {
            btc_trend_1h: 0.025,
            ..MarketContext::default()
        };
        let mut strategy = CorrelationPlayStrategy::new();
        let signal = strategy
            .analyze("ADA-USD", &buffer, &features, &context)
            .expect("laggard should fire");
        assert!(signal.edge_score_base >= 40.0);
        assert!(signal.tp1_price > signal.entry_price);
    }

    #[test]
    fn test_no_play_when_btc_flat() {
        let buffer = laggard_buffer();
        let features = features_for(&buffer);
        let mut strategy = CorrelationPlayStrategy::new();
        assert!(strategy
            .analyze("ADA-USD", &buffer, &features, &MarketContext::default())
            .is_none());
    }
}
