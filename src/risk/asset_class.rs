use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::types::base_asset;

/// Size bucket an asset trades like, driving stop/target geometry.
/// Large caps get wider swing-style stops; micro caps get cut fast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetClass {
    LargeCap,
    MidCap,
    SmallCap,
    MicroCap,
}

impl AssetClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetClass::LargeCap => "large_cap",
            AssetClass::MidCap => "mid_cap",
            AssetClass::SmallCap => "small_cap",
            AssetClass::MicroCap => "micro_cap",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RiskProfile {
    pub class: AssetClass,
    /// Stop distance as a fraction of entry.
    pub stop_loss_pct: Decimal,
    /// TP1 distance as a fraction of entry; TP2 is 1.5x this.
    pub take_profit_pct: Decimal,
    pub max_hold_hours: u32,
}

const LARGE_CAPS: &[&str] = &["BTC", "ETH"];
const MID_CAPS: &[&str] = &[
    "SOL", "XRP", "ADA", "AVAX", "DOGE", "DOT", "LINK", "LTC", "BCH", "UNI", "ATOM", "XLM",
];
const SMALL_CAPS: &[&str] = &[
    "NEAR", "APT", "ARB", "OP", "INJ", "TIA", "SUI", "SEI", "RNDR", "FET", "AAVE", "ALGO", "FIL",
    "HBAR", "ICP", "IMX", "MKR", "SAND", "MANA", "GRT",
];

pub fn classify(symbol: &str) -> AssetClass {
    let base = base_asset(symbol);
    if LARGE_CAPS.contains(&base) {
        AssetClass::LargeCap
    } else if MID_CAPS.contains(&base) {
        AssetClass::MidCap
    } else if SMALL_CAPS.contains(&base) {
        AssetClass::SmallCap
    } else {
        AssetClass::MicroCap
    }
}

pub fn risk_profile(symbol: &str) -> RiskProfile {
    match classify(symbol) {
        AssetClass::LargeCap => RiskProfile {
            class: AssetClass::LargeCap,
            stop_loss_pct: dec!(0.05),
            take_profit_pct: dec!(0.08),
            max_hold_hours: 48,
        },
        AssetClass::MidCap => RiskProfile {
            class: AssetClass::MidCap,
            stop_loss_pct: dec!(0.04),
            take_profit_pct: dec!(0.07),
            max_hold_hours: 24,
        },
        AssetClass::SmallCap => RiskProfile {
            class: AssetClass::SmallCap,
            stop_loss_pct: dec!(0.035),
            take_profit_pct: dec!(0.06),
            max_hold_hours: 12,
        },
        AssetClass::MicroCap => RiskProfile {
            class: AssetClass::MicroCap,
            stop_loss_pct: dec!(0.025),
            take_profit_pct: dec!(0.05),
            max_hold_hours: 6,
        },
    }
}
