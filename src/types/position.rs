use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{PositionState, Side};

/// A tracked spot position. Owned exclusively by the PositionRegistry;
/// the router mutates it through registry handles only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    pub entry_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub size_usd: Decimal,
    pub size_qty: Decimal,
    pub stop_price: Decimal,
    pub tp1_price: Decimal,
    pub tp2_price: Decimal,
    pub time_stop_deadline: DateTime<Utc>,
    pub strategy_id: String,
    pub cost_basis: Decimal,
    #[serde(default)]
    pub realized_pnl: Decimal,
    #[serde(default)]
    pub stack_count: u32,
    pub state: PositionState,
    #[serde(default)]
    pub breakeven_locked: bool,
    #[serde(default)]
    pub trailing_active: bool,
    #[serde(default)]
    pub trail_pct: Decimal,
    #[serde(default)]
    pub trail_high: Decimal,
    #[serde(default)]
    pub current_price: Decimal,
}

impl Position {
    pub fn new(
        symbol: &str,
        entry_price: Decimal,
        size_usd: Decimal,
        size_qty: Decimal,
        stop_price: Decimal,
        tp1_price: Decimal,
        tp2_price: Decimal,
        time_stop_deadline: DateTime<Utc>,
        strategy_id: &str,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            side: Side::Buy,
            entry_price,
            entry_time: Utc::now(),
            size_usd,
            size_qty,
            stop_price,
            tp1_price,
            tp2_price,
            time_stop_deadline,
            strategy_id: strategy_id.to_string(),
            cost_basis: size_usd,
            realized_pnl: Decimal::ZERO,
            stack_count: 0,
            state: PositionState::Open,
            breakeven_locked: false,
            trailing_active: false,
            trail_pct: Decimal::ZERO,
            trail_high: Decimal::ZERO,
            current_price: entry_price,
        }
    }

    pub fn current_value(&self) -> Decimal {
        self.size_qty * self.current_price
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        (self.current_price - self.entry_price) * self.size_qty
    }

    pub fn pnl_pct(&self) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        (self.current_price - self.entry_price) / self.entry_price * Decimal::from(100)
    }

    /// Price move expressed in R multiples (risk = entry - stop).
    pub fn r_multiple(&self) -> Decimal {
        let risk = self.entry_price - self.stop_price;
        if risk <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        (self.current_price - self.entry_price) / risk
    }

    pub fn update_price(&mut self, price: Decimal) {
        self.current_price = price;
        if self.trailing_active && price > self.trail_high {
            self.trail_high = price;
        }
    }

    pub fn hold_seconds(&self) -> i64 {
        (Utc::now() - self.entry_time).num_seconds()
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, PositionState::Open | PositionState::PartialClosed)
    }
}

/// A single asset row from the exchange portfolio breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotPosition {
    pub asset: String,
    pub total_balance_crypto: Decimal,
    pub total_balance_fiat: Decimal,
    pub average_entry_price: Decimal,
    pub cost_basis: Decimal,
    pub unrealized_pnl: Decimal,
    pub is_cash: bool,
}

/// Authoritative portfolio view. Built from the exchange in live mode,
/// synthesized from the paper account in paper mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub timestamp: DateTime<Utc>,
    pub total_value: Decimal,
    pub total_cash: Decimal,
    pub total_crypto: Decimal,
    pub total_unrealized_pnl: Decimal,
    pub total_realized_pnl: Decimal,
    pub positions: HashMap<String, SpotPosition>,
}

impl PortfolioSnapshot {
    pub fn empty() -> Self {
        Self {
            timestamp: Utc::now(),
            total_value: Decimal::ZERO,
            total_cash: Decimal::ZERO,
            total_crypto: Decimal::ZERO,
            total_unrealized_pnl: Decimal::ZERO,
            total_realized_pnl: Decimal::ZERO,
            positions: HashMap::new(),
        }
    }

    pub fn age_seconds(&self) -> i64 {
        (Utc::now() - self.timestamp).num_seconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn position() -> Position {
        Position::new(
            "BTC-USD",
            dec!(100),
            dec!(15),
            dec!(0.15),
            dec!(97),
            dec!(105),
            dec!(108),
            Utc::now() + chrono::Duration::minutes(120),
            "burst_flag",
        )
    }

    #[test]
    fn test_pnl_math() {
        let mut pos = position();
        pos.update_price(dec!(103));
        assert_eq!(pos.unrealized_pnl(), dec!(0.45));
        assert_eq!(pos.pnl_pct(), dec!(3));
        assert_eq!(pos.r_multiple(), dec!(1));
    }

    #[test]
    fn test_trail_high_tracks_peak() {
        let mut pos = position();
        pos.trailing_active = true;
        pos.trail_high = pos.entry_price;
        pos.update_price(dec!(110));
        pos.update_price(dec!(108));
        assert_eq!(pos.trail_high, dec!(110));
    }

    #[test]
    fn test_stop_geometry_long() {
        let pos = position();
        assert!(pos.stop_price < pos.entry_price);
        assert!(pos.entry_price <= pos.tp1_price);
        assert!(pos.tp1_price <= pos.tp2_price);
    }
}
