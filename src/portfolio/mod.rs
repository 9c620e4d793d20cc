pub mod live;
pub mod paper;

pub use live::*;
pub use paper::*;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::exchange::ProductInfo;
use crate::types::PortfolioSnapshot;

/// Portfolio truth interface: balances, holdings, and the authoritative
/// snapshot the gate funnel checks before any order leaves the engine.
/// Two concrete variants: paper (synthetic) and live (exchange-backed).
#[async_trait]
pub trait PortfolioManager: Send + Sync {
    async fn get_available_balance(&self) -> Decimal;

    async fn get_total_portfolio_value(&self) -> Decimal;

    /// Refresh from the source of truth. Throttled internally in live mode.
    async fn update_portfolio_state(&self) -> anyhow::Result<()>;

    async fn has_exchange_holding(&self, symbol: &str) -> bool;

    /// Current USD value of a holding, zero when absent.
    async fn holding_value(&self, symbol: &str) -> Decimal;

    async fn get_product_info(&self, symbol: &str) -> Option<ProductInfo>;

    async fn snapshot(&self) -> PortfolioSnapshot;

    async fn snapshot_age_s(&self) -> i64;

    /// Truth-sync gate: refuse trading on a stale portfolio picture.
    async fn validate_before_trade(&self, symbol: &str) -> Result<(), String>;
}
