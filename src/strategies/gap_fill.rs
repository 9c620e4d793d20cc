use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::{f, long_signal, MarketContext, Strategy};
use crate::features::FeatureVector;
use crate::types::{CandleBuffer, SignalType, StrategySignal, TimeFrame};

/// Gap-fill long: a sharp gap down between consecutive 5m closes that has
/// started recovering. Targets the pre-gap price.
pub struct GapFillStrategy {
    min_gap_pct: f64,
    scan_bars: usize,
}

impl GapFillStrategy {
    pub fn new() -> Self {
        Self {
            min_gap_pct: 0.015,
            scan_bars: 12,
        }
    }
}

impl Default for GapFillStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for GapFillStrategy {
    fn strategy_id(&self) -> &'static str {
        "gap_fill"
    }

    fn analyze(
        &mut self,
        symbol: &str,
        buffer: &CandleBuffer,
        features: &FeatureVector,
        _context: &MarketContext,
    ) -> Option<StrategySignal> {
        let candles = buffer.last_n(TimeFrame::M5, self.scan_bars);
        if candles.len() < 6 {
            return None;
        }

        // newest gap-down inside the scan window
        let mut gap: Option<(usize, Decimal, Decimal)> = None; // (idx, pre_gap, post_gap)
        for i in 1..candles.len() - 1 {
            let prev_close = candles[i - 1].close;
            let this_open = candles[i].open;
            if prev_close.is_zero() {
                continue;
            }
            let gap_pct = f((this_open - prev_close) / prev_close);
            if gap_pct <= -self.min_gap_pct {
                gap = Some((i, prev_close, this_open));
            }
        }
        let (gap_idx, pre_gap, _post_gap) = gap?;

        let last = candles.last()?;
        let gap_low = candles[gap_idx..].iter().map(|c| c.low).min()?;
        // recovery underway: green candle, above the gap low, below the fill
        if !last.is_green() || last.close >= pre_gap || last.close <= gap_low {
            return None;
        }
        let recovered = f((last.close - gap_low) / (pre_gap - gap_low).max(dec!(0.0001)));
        if recovered < 0.2 {
            return None; // barely off the lows, no momentum yet
        }

        let entry = last.close;
        let stop = gap_low * dec!(0.997);
        let tp1 = pre_gap;
        let tp2 = pre_gap * dec!(1.01);

        let mut signal = long_signal(
            symbol,
            self.strategy_id(),
            SignalType::GapFill,
            entry,
            stop,
            tp1,
            tp2,
            "gap_fill",
        )?;

        let mut score: f64 = 20.0;
        if recovered >= 0.5 {
            score += 20.0;
        } else if recovered >= 0.35 {
            score += 12.0;
        } else {
            score += 6.0;
        }
        if features.vol_ratio >= 1.5 {
            score += 15.0;
        }
        if features.trend_5m > 0.0 {
            score += 15.0;
        }
        if features.vwap_distance > -0.005 {
            score += 10.0;
        }
        signal.edge_score_base = score.min(100.0);
        signal.pattern_score = (recovered * 30.0).clamp(0.0, 25.0);
        Some(signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::test_support::features_for;
    use crate::types::Candle;
    use chrono::{TimeZone, Utc};

    fn candle(i: i64, open: f64, close: f64) -> Candle {
        let open = Decimal::from_f64_retain(open).unwrap();
        let close = Decimal::from_f64_retain(close).unwrap();
        Candle {
            timestamp: Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
                + chrono::Duration::minutes(i * 5),
            open,
            high: open.max(close) * dec!(1.001),
            low: open.min(close) * dec!(0.999),
            close,
            volume: dec!(10),
        }
    }

    #[test]
    fn test_recovering_gap_down_fires() {
        let mut buffer = CandleBuffer::new("DOT-USD");
        // steady tape, 3% gap down, then recovery candles
        let bars = [
            (100.0, 100.2),
            (100.2, 100.1),
            (100.1, 100.0),
            (97.0, 96.5), // gap down open
            (96.5, 96.8),
            (96.8, 97.6),
            (97.6, 98.4),
        ];
        for (i, (open, close)) in bars.iter().enumerate() {
            buffer.push(TimeFrame::M5, candle(i as i64, *open, *close));
        }

        let features = features_for(&buffer);
        let mut strategy = GapFillStrategy::new();
        let signal = strategy
            .analyze("DOT-USD", &buffer, &features, &MarketContext::default())
            .expect("gap recovery should fire");
        assert_eq!(signal.tp1_price, dec!(100.0)); // targets the fill
        assert!(signal.stop_price < signal.entry_price);
    }

    #[test]
    fn test_no_gap_no_signal() {
        let mut buffer = CandleBuffer::new("DOT-USD");
        for i in 0..10 {
            buffer.push(TimeFrame::M5, candle(i, 100.0, 100.1));
        }
        let features = features_for(&buffer);
        let mut strategy = GapFillStrategy::new();
        assert!(strategy
            .analyze("DOT-USD", &buffer, &features, &MarketContext::default())
            .is_none());
    }
}
