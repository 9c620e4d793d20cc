use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::TimeFrame;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    pub fn is_green(&self) -> bool {
        self.close > self.open
    }

    pub fn range(&self) -> Decimal {
        self.high - self.low
    }

    pub fn typical_price(&self) -> Decimal {
        (self.high + self.low + self.close) / Decimal::from(3)
    }

    /// OHLC sanity: low <= open,close <= high and non-negative volume.
    pub fn is_valid(&self) -> bool {
        self.low <= self.open
            && self.low <= self.close
            && self.open <= self.high
            && self.close <= self.high
            && self.volume >= Decimal::ZERO
    }
}

/// Per-symbol rolling candle history across all tracked timeframes.
///
/// The collectors are the only writers; everything downstream (feature
/// engine, strategies) reads. Within each timeframe candles are kept in
/// strictly increasing timestamp order with duplicates dropped.
#[derive(Debug, Clone)]
pub struct CandleBuffer {
    pub symbol: String,
    candles_1m: VecDeque<Candle>,
    candles_5m: VecDeque<Candle>,
    candles_1h: VecDeque<Candle>,
    candles_1d: VecDeque<Candle>,
    max_1m: usize,
    max_5m: usize,
    max_1h: usize,
    max_1d: usize,
}

impl CandleBuffer {
    pub fn new(symbol: &str) -> Self {
        Self::with_capacity(symbol, 300, 200, 120, 60)
    }

    pub fn with_capacity(symbol: &str, max_1m: usize, max_5m: usize, max_1h: usize, max_1d: usize) -> Self {
        Self {
            symbol: symbol.to_string(),
            candles_1m: VecDeque::with_capacity(max_1m),
            candles_5m: VecDeque::with_capacity(max_5m),
            candles_1h: VecDeque::with_capacity(max_1h),
            candles_1d: VecDeque::with_capacity(max_1d),
            max_1m,
            max_5m,
            max_1h,
            max_1d,
        }
    }

    fn deque(&self, tf: TimeFrame) -> &VecDeque<Candle> {
        match tf {
            TimeFrame::M1 => &self.candles_1m,
            TimeFrame::M5 => &self.candles_5m,
            TimeFrame::H1 => &self.candles_1h,
            TimeFrame::D1 => &self.candles_1d,
        }
    }

    fn deque_mut(&mut self, tf: TimeFrame) -> (&mut VecDeque<Candle>, usize) {
        match tf {
            TimeFrame::M1 => (&mut self.candles_1m, self.max_1m),
            TimeFrame::M5 => (&mut self.candles_5m, self.max_5m),
            TimeFrame::H1 => (&mut self.candles_1h, self.max_1h),
            TimeFrame::D1 => (&mut self.candles_1d, self.max_1d),
        }
    }

    /// Insert a candle, keeping timestamps strictly increasing.
    ///
    /// A candle with the same timestamp as the newest entry replaces it
    /// (WS sends updates for the forming bar); older timestamps are dropped.
    /// Returns true if the buffer changed.
    pub fn push(&mut self, tf: TimeFrame, candle: Candle) -> bool {
        if !candle.is_valid() {
            return false;
        }
        let (deque, max) = self.deque_mut(tf);
        match deque.back_mut() {
            Some(last) if candle.timestamp < last.timestamp => return false,
            Some(last) if candle.timestamp == last.timestamp => {
                *last = candle;
                return true;
            }
            _ => {}
        }
        deque.push_back(candle);
        while deque.len() > max {
            deque.pop_front();
        }
        true
    }

    /// Bulk-seed a timeframe (rehydration / backfill). Input may be unsorted
    /// or overlap existing data; the result stays ordered and deduplicated.
    pub fn extend(&mut self, tf: TimeFrame, candles: Vec<Candle>) -> usize {
        let mut sorted = candles;
        sorted.sort_by_key(|c| c.timestamp);
        let mut added = 0;
        for candle in sorted {
            if self.push(tf, candle) {
                added += 1;
            }
        }
        added
    }

    pub fn len(&self, tf: TimeFrame) -> usize {
        self.deque(tf).len()
    }

    pub fn is_empty(&self, tf: TimeFrame) -> bool {
        self.deque(tf).is_empty()
    }

    pub fn last(&self, tf: TimeFrame) -> Option<&Candle> {
        self.deque(tf).back()
    }

    pub fn last_price(&self) -> Option<Decimal> {
        self.candles_1m
            .back()
            .or_else(|| self.candles_5m.back())
            .map(|c| c.close)
    }

    pub fn last_n(&self, tf: TimeFrame, n: usize) -> Vec<&Candle> {
        let deque = self.deque(tf);
        let skip = deque.len().saturating_sub(n);
        deque.iter().skip(skip).collect()
    }

    pub fn closes(&self, tf: TimeFrame, n: usize) -> Vec<Decimal> {
        self.last_n(tf, n).iter().map(|c| c.close).collect()
    }

    /// Volume-weighted average price over the last n 1m candles.
    pub fn vwap(&self, n: usize) -> Option<Decimal> {
        let recent = self.last_n(TimeFrame::M1, n);
        if recent.is_empty() {
            return None;
        }
        let mut pv = Decimal::ZERO;
        let mut vol = Decimal::ZERO;
        for c in &recent {
            pv += c.typical_price() * c.volume;
            vol += c.volume;
        }
        if vol.is_zero() {
            // Zero-volume stretch: fall back to the plain close average
            let sum: Decimal = recent.iter().map(|c| c.close).sum();
            return Some(sum / Decimal::from(recent.len() as u64));
        }
        Some(pv / vol)
    }

    /// Average true range over the last n candles of a timeframe.
    pub fn atr(&self, n: usize, tf: TimeFrame) -> Option<Decimal> {
        let recent = self.last_n(tf, n + 1);
        if recent.len() < 2 {
            return None;
        }
        let mut sum = Decimal::ZERO;
        let mut count = 0u32;
        for pair in recent.windows(2) {
            let prev_close = pair[0].close;
            let c = pair[1];
            let tr = (c.high - c.low)
                .max((c.high - prev_close).abs())
                .max((c.low - prev_close).abs());
            sum += tr;
            count += 1;
        }
        Some(sum / Decimal::from(count))
    }

    /// Exponential moving average of closes (seeded with SMA of the first n).
    pub fn ema(&self, n: usize, tf: TimeFrame) -> Option<Decimal> {
        let closes = self.closes(tf, self.len(tf));
        crate::indicators::ema_last(&closes, n)
    }

    /// Wilder RSI of closes.
    pub fn rsi(&self, n: usize, tf: TimeFrame) -> Option<Decimal> {
        let closes = self.closes(tf, self.len(tf));
        crate::indicators::rsi_last(&closes, n)
    }

    /// Bollinger bands (middle, upper, lower) of closes.
    pub fn bb(&self, n: usize, k: Decimal, tf: TimeFrame) -> Option<(Decimal, Decimal, Decimal)> {
        let closes = self.closes(tf, n);
        crate::indicators::bollinger(&closes, n, k)
    }

    pub fn recent_high(&self, tf: TimeFrame, n: usize) -> Option<Decimal> {
        self.last_n(tf, n).iter().map(|c| c.high).max()
    }

    pub fn recent_low(&self, tf: TimeFrame, n: usize) -> Option<Decimal> {
        self.last_n(tf, n).iter().map(|c| c.low).min()
    }

    /// How many of the last n candles closed green.
    pub fn green_count(&self, tf: TimeFrame, n: usize) -> usize {
        self.last_n(tf, n).iter().filter(|c| c.is_green()).count()
    }

    /// True when every one of the last n candles closed green.
    pub fn all_green(&self, tf: TimeFrame, n: usize) -> bool {
        let recent = self.last_n(tf, n);
        recent.len() >= n && recent.iter().all(|c| c.is_green())
    }

    /// Swing highs: candles strictly higher than both neighbours on each side.
    pub fn swing_highs(&self, tf: TimeFrame, lookback: usize) -> Vec<Decimal> {
        let recent = self.last_n(tf, lookback);
        let mut highs = Vec::new();
        if recent.len() < 5 {
            return highs;
        }
        for i in 2..recent.len() - 2 {
            let h = recent[i].high;
            if h > recent[i - 1].high
                && h > recent[i - 2].high
                && h > recent[i + 1].high
                && h > recent[i + 2].high
            {
                highs.push(h);
            }
        }
        highs
    }

    /// Length of the newest run of candles with no gap wider than 2x the
    /// timeframe interval. Warmth accounting uses this rather than the raw
    /// length so a holed series keeps its symbol cold.
    pub fn contiguous_tail_len(&self, tf: TimeFrame) -> usize {
        let deque = self.deque(tf);
        let max_gap = Duration::seconds((tf.to_seconds() * 2) as i64);
        let mut len = 0;
        let mut prev: Option<DateTime<Utc>> = None;
        for candle in deque.iter().rev() {
            if let Some(newer) = prev {
                if newer - candle.timestamp > max_gap {
                    break;
                }
            }
            prev = Some(candle.timestamp);
            len += 1;
        }
        len
    }

    /// A gap wider than 2x the timeframe interval anywhere in the recent
    /// window means the series is not contiguous.
    pub fn has_gap(&self, tf: TimeFrame, n: usize) -> bool {
        let recent = self.last_n(tf, n);
        let max_gap = Duration::seconds((tf.to_seconds() * 2) as i64);
        recent
            .windows(2)
            .any(|pair| pair[1].timestamp - pair[0].timestamp > max_gap)
    }

    pub fn total_volume(&self, tf: TimeFrame, n: usize) -> Decimal {
        self.last_n(tf, n).iter().map(|c| c.volume).sum()
    }

    pub fn avg_volume(&self, tf: TimeFrame, n: usize) -> Option<Decimal> {
        let recent = self.last_n(tf, n);
        if recent.is_empty() {
            return None;
        }
        let sum: Decimal = recent.iter().map(|c| c.volume).sum();
        Some(sum / Decimal::from(recent.len() as u64))
    }
}
