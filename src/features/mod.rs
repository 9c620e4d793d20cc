use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;

use crate::types::{CandleBuffer, TimeFrame};

/// Feature staleness horizon: vectors older than this are skipped.
pub const FEATURE_MAX_AGE_S: i64 = 120;

/// Coerce non-finite values to 0.0. Downstream strategies rely on every
/// feature being a finite number.
pub fn finite_float(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

/// Live per-symbol feature vector. All values are finite f64.
#[derive(Debug, Clone, Serialize)]
pub struct FeatureVector {
    pub price: f64,
    pub trend_1h: f64,
    pub trend_15m: f64,
    pub trend_5m: f64,
    pub vol_ratio: f64,
    pub vol_spike_5m: f64,
    pub vwap_pct: f64,
    pub vwap_distance: f64,
    pub spread_bps: f64,
    /// Timestamp of the newest candle backing this vector.
    pub timestamp: DateTime<Utc>,
}

impl FeatureVector {
    pub fn is_stale(&self) -> bool {
        (Utc::now() - self.timestamp).num_seconds() > FEATURE_MAX_AGE_S
    }
}

/// Higher-timeframe snapshot for daily/momentum strategies.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HtfSnapshot {
    pub trend_1d: f64,
    pub day_change_pct: f64,
    pub dist_from_20d_high: f64,
}

fn pct_change(buffer: &CandleBuffer, tf: TimeFrame, bars: usize) -> f64 {
    let closes = buffer.closes(tf, bars + 1);
    if closes.len() < bars + 1 {
        return 0.0;
    }
    let first = closes[0].to_f64().unwrap_or(0.0);
    let last = closes[closes.len() - 1].to_f64().unwrap_or(0.0);
    if first <= 0.0 {
        return 0.0;
    }
    finite_float((last - first) / first)
}

/// Build the live feature vector for one symbol from its buffer snapshot.
pub fn compute_features(buffer: &CandleBuffer, spread_bps: f64) -> FeatureVector {
    let price = buffer
        .last_price()
        .and_then(|p| p.to_f64())
        .unwrap_or(0.0);

    let trend_5m = pct_change(buffer, TimeFrame::M1, 5);
    let trend_15m = pct_change(buffer, TimeFrame::M5, 3);
    let trend_1h = pct_change(buffer, TimeFrame::M5, 12);

    let vol_ratio = {
        let last = buffer
            .last(TimeFrame::M1)
            .and_then(|c| c.volume.to_f64())
            .unwrap_or(0.0);
        let avg = buffer
            .avg_volume(TimeFrame::M1, 20)
            .and_then(|v| v.to_f64())
            .unwrap_or(0.0);
        if avg > 0.0 {
            last / avg
        } else {
            1.0
        }
    };

    let vol_spike_5m = crate::datafeeds::compute_burst_metrics(buffer)
        .map(|m| m.vol_spike)
        .unwrap_or(1.0);

    let (vwap_pct, vwap_distance) = match (buffer.vwap(30), buffer.last_price()) {
        (Some(vwap), Some(last)) if !vwap.is_zero() => {
            let dist = ((last - vwap) / vwap).to_f64().unwrap_or(0.0);
            (dist * 100.0, dist)
        }
        _ => (0.0, 0.0),
    };

    let timestamp = buffer
        .last(TimeFrame::M1)
        .or_else(|| buffer.last(TimeFrame::M5))
        .map(|c| c.timestamp)
        .unwrap_or_else(Utc::now);

    FeatureVector {
        price: finite_float(price),
        trend_1h: finite_float(trend_1h),
        trend_15m: finite_float(trend_15m),
        trend_5m: finite_float(trend_5m),
        vol_ratio: finite_float(vol_ratio),
        vol_spike_5m: finite_float(vol_spike_5m),
        vwap_pct: finite_float(vwap_pct),
        vwap_distance: finite_float(vwap_distance),
        spread_bps: finite_float(spread_bps),
        timestamp,
    }
}

/// Daily-timeframe snapshot for strategies that trade multi-day trends.
pub fn compute_htf_snapshot(buffer: &CandleBuffer) -> HtfSnapshot {
    let trend_1d = pct_change(buffer, TimeFrame::D1, 3);
    let day_change_pct = buffer
        .last(TimeFrame::D1)
        .map(|c| {
            let open = c.open.to_f64().unwrap_or(0.0);
            let close = c.close.to_f64().unwrap_or(0.0);
            if open > 0.0 {
                (close - open) / open * 100.0
            } else {
                0.0
            }
        })
        .unwrap_or(0.0);

    let dist_from_20d_high = match (buffer.recent_high(TimeFrame::D1, 20), buffer.last_price()) {
        (Some(high), Some(price)) if !high.is_zero() => ((price - high) / high)
            .to_f64()
            .unwrap_or(0.0),
        _ => 0.0,
    };

    HtfSnapshot {
        trend_1d: finite_float(trend_1d),
        day_change_pct: finite_float(day_change_pct),
        dist_from_20d_high: finite_float(dist_from_20d_high),
    }
}
