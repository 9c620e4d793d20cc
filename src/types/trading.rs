use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    Paper,
    Live,
}

impl TradingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradingMode::Paper => "paper",
            TradingMode::Live => "live",
        }
    }

    pub fn from_env() -> Self {
        match std::env::var("TRADING_MODE").as_deref() {
            Ok("live") | Ok("LIVE") => TradingMode::Live,
            _ => TradingMode::Paper,
        }
    }
}

impl fmt::Display for TradingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeFrame {
    M1,
    M5,
    H1,
    D1,
}

impl TimeFrame {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeFrame::M1 => "1m",
            TimeFrame::M5 => "5m",
            TimeFrame::H1 => "1h",
            TimeFrame::D1 => "1d",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(TimeFrame::M1),
            "5m" => Some(TimeFrame::M5),
            "1h" => Some(TimeFrame::H1),
            "1d" => Some(TimeFrame::D1),
            _ => None,
        }
    }

    pub fn to_minutes(&self) -> u64 {
        match self {
            TimeFrame::M1 => 1,
            TimeFrame::M5 => 5,
            TimeFrame::H1 => 60,
            TimeFrame::D1 => 1440,
        }
    }

    pub fn to_seconds(&self) -> u64 {
        self.to_minutes() * 60
    }

    /// Coinbase candle granularity label for REST requests.
    pub fn granularity(&self) -> &'static str {
        match self {
            TimeFrame::M1 => "ONE_MINUTE",
            TimeFrame::M5 => "FIVE_MINUTE",
            TimeFrame::H1 => "ONE_HOUR",
            TimeFrame::D1 => "ONE_DAY",
        }
    }

    pub fn all() -> [TimeFrame; 4] {
        [TimeFrame::M1, TimeFrame::M5, TimeFrame::H1, TimeFrame::D1]
    }
}

impl fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    FlagBreakout,
    FastBreakout,
    VwapReclaim,
    MeanReversion,
    DailyMomentum,
    RangeBreakout,
    RelativeStrength,
    SupportBounce,
    GapFill,
    BreakoutRetest,
    CorrelationPlay,
    LiquiditySweep,
    Momentum1h,
    RsiMomentum,
    BbExpansion,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::FlagBreakout => "flag_breakout",
            SignalType::FastBreakout => "fast_breakout",
            SignalType::VwapReclaim => "vwap_reclaim",
            SignalType::MeanReversion => "mean_reversion",
            SignalType::DailyMomentum => "daily_momentum",
            SignalType::RangeBreakout => "range_breakout",
            SignalType::RelativeStrength => "relative_strength",
            SignalType::SupportBounce => "support_bounce",
            SignalType::GapFill => "gap_fill",
            SignalType::BreakoutRetest => "breakout_retest",
            SignalType::CorrelationPlay => "correlation_play",
            SignalType::LiquiditySweep => "liquidity_sweep",
            SignalType::Momentum1h => "momentum_1h",
            SignalType::RsiMomentum => "rsi_momentum",
            SignalType::BbExpansion => "bb_expansion",
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalDirection {
    Long,
    None,
}

/// Broad market regime derived from BTC behavior; gates use it to
/// categorize score rejections honestly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketRegime {
    Normal,
    Caution,
    RiskOff,
}

impl MarketRegime {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketRegime::Normal => "normal",
            MarketRegime::Caution => "caution",
            MarketRegime::RiskOff => "risk_off",
        }
    }
}

impl Default for MarketRegime {
    fn default() -> Self {
        MarketRegime::Normal
    }
}

impl fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Canonical gate rejection categories. Every blocked signal maps to exactly
/// one of these for the funnel histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateReason {
    Warmth,
    Regime,
    Score,
    Rr,
    Limits,
    Spread,
    Truth,
    CircuitBreaker,
    Whitelist,
    Cooldown,
    Budget,
    Risk,
}

impl GateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateReason::Warmth => "warmth",
            GateReason::Regime => "regime",
            GateReason::Score => "score",
            GateReason::Rr => "rr",
            GateReason::Limits => "limits",
            GateReason::Spread => "spread",
            GateReason::Truth => "truth",
            GateReason::CircuitBreaker => "circuit_breaker",
            GateReason::Whitelist => "whitelist",
            GateReason::Cooldown => "cooldown",
            GateReason::Budget => "budget",
            GateReason::Risk => "risk",
        }
    }

    pub fn all() -> [GateReason; 12] {
        [
            GateReason::Warmth,
            GateReason::Regime,
            GateReason::Score,
            GateReason::Rr,
            GateReason::Limits,
            GateReason::Spread,
            GateReason::Truth,
            GateReason::CircuitBreaker,
            GateReason::Whitelist,
            GateReason::Cooldown,
            GateReason::Budget,
            GateReason::Risk,
        ]
    }
}

impl fmt::Display for GateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionState {
    Open,
    PartialClosed,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderEventType {
    Open,
    PartialClose,
    Close,
}

impl fmt::Display for OrderEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderEventType::Open => write!(f, "open"),
            OrderEventType::PartialClose => write!(f, "partial_close"),
            OrderEventType::Close => write!(f, "close"),
        }
    }
}

/// Sizing tier assigned by the position sizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingTier {
    Scout,
    Normal,
    Strong,
    Whale,
}

impl SizingTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SizingTier::Scout => "scout",
            SizingTier::Normal => "normal",
            SizingTier::Strong => "strong",
            SizingTier::Whale => "whale",
        }
    }
}

impl fmt::Display for SizingTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Base asset of a product id like "BTC-USD".
pub fn base_asset(symbol: &str) -> &str {
    symbol.split('-').next().unwrap_or(symbol)
}

/// Quote asset of a product id like "BTC-USD".
pub fn quote_asset(symbol: &str) -> &str {
    symbol.split('-').nth(1).unwrap_or("")
}

/// Filesystem-safe form of a product id ('/' and ':' become '-').
pub fn safe_symbol(symbol: &str) -> String {
    symbol.replace(['/', ':'], "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_helpers() {
        assert_eq!(base_asset("BTC-USD"), "BTC");
        assert_eq!(quote_asset("BTC-USD"), "USD");
        assert_eq!(base_asset("SOL"), "SOL");
        assert_eq!(safe_symbol("BTC/USD:PERP"), "BTC-USD-PERP");
    }

    #[test]
    fn test_timeframe_roundtrip() {
        for tf in TimeFrame::all() {
            assert_eq!(TimeFrame::from_str(tf.as_str()), Some(tf));
        }
        assert_eq!(TimeFrame::from_str("15m"), None);
    }

    #[test]
    fn test_mode_labels() {
        assert_eq!(TradingMode::Paper.as_str(), "paper");
        assert_eq!(TradingMode::Live.as_str(), "live");
    }
}
