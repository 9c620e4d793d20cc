use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::PortfolioManager;
use crate::exchange::{CoinbaseClient, ProductInfo};
use crate::types::{PortfolioSnapshot, SpotPosition};

const UPDATE_THROTTLE_S: i64 = 10;
const PRICE_CACHE_S: i64 = 30;

struct CachedPrice {
    price: Decimal,
    at: DateTime<Utc>,
}

struct LiveState {
    snapshot: PortfolioSnapshot,
    last_update: Option<DateTime<Utc>>,
    portfolio_uuid: Option<String>,
    product_info: HashMap<String, ProductInfo>,
    prices: HashMap<String, CachedPrice>,
}

/// Exchange-backed portfolio truth.
///
/// Pulls accounts plus the default portfolio breakdown, throttled to one
/// refresh per 10 s; per-symbol prices and product metadata are cached to
/// stay under rate limits. A snapshot older than `truth_staleness_s`
/// flips `truth_stale` and the gate funnel rejects with `truth`.
pub struct LivePortfolio {
    client: CoinbaseClient,
    truth_staleness_s: i64,
    state: Mutex<LiveState>,
}

impl LivePortfolio {
    pub fn new(client: CoinbaseClient, truth_staleness_s: i64) -> Self {
        Self {
            client,
            truth_staleness_s,
            state: Mutex::new(LiveState {
                snapshot: PortfolioSnapshot::empty(),
                last_update: None,
                portfolio_uuid: None,
                product_info: HashMap::new(),
                prices: HashMap::new(),
            }),
        }
    }

    pub async fn is_truth_stale(&self) -> bool {
        self.snapshot_age_s().await > self.truth_staleness_s
    }

    async fn resolve_portfolio_uuid(&self) -> anyhow::Result<String> {
        {
            let state = self.state.lock().await;
            if let Some(uuid) = &state.portfolio_uuid {
                return Ok(uuid.clone());
            }
        }
        let portfolios = self.client.get_portfolios().await?;
        let default = portfolios
            .iter()
            .find(|p| p.portfolio_type == "DEFAULT")
            .or_else(|| portfolios.first())
            .ok_or_else(|| anyhow::anyhow!("no portfolios returned"))?;
        self.state.lock().await.portfolio_uuid = Some(default.uuid.clone());
        Ok(default.uuid.clone())
    }

    /// Cached product price; refreshed at most every 30 s per symbol.
    pub async fn get_price(&self, symbol: &str) -> Option<Decimal> {
        {
            let state = self.state.lock().await;
            if let Some(cached) = state.prices.get(symbol) {
                if (Utc::now() - cached.at).num_seconds() <= PRICE_CACHE_S {
                    return Some(cached.price);
                }
            }
        }
        match self.client.get_product(symbol).await {
            Ok(product) => {
                let price = product.price;
                let mut state = self.state.lock().await;
                state.prices.insert(
                    symbol.to_string(),
                    CachedPrice {
                        price,
                        at: Utc::now(),
                    },
                );
                state.product_info.insert(symbol.to_string(), product);
                Some(price)
            }
            Err(e) => {
                warn!("[TRUTH] price fetch failed for {}: {}", symbol, e);
                None
            }
        }
    }
}

#[async_trait]
impl PortfolioManager for LivePortfolio {
    async fn get_available_balance(&self) -> Decimal {
        self.state.lock().await.snapshot.total_cash
    }

    async fn get_total_portfolio_value(&self) -> Decimal {
        self.state.lock().await.snapshot.total_value
    }

    async fn update_portfolio_state(&self) -> anyhow::Result<()> {
        {
            let state = self.state.lock().await;
            if let Some(last) = state.last_update {
                if (Utc::now() - last).num_seconds() < UPDATE_THROTTLE_S {
                    return Ok(());
                }
            }
        }

        let uuid = self.resolve_portfolio_uuid().await?;
        let accounts = self.client.get_accounts().await?;
        let breakdown = self.client.get_portfolio_breakdown(&uuid).await?;

        let total_cash: Decimal = accounts
            .iter()
            .filter(|a| a.currency == "USD" || a.currency == "USDC")
            .map(|a| a.available_balance)
            .sum();

        let mut positions = HashMap::new();
        let mut total_crypto = Decimal::ZERO;
        let mut total_unrealized = Decimal::ZERO;
        for row in breakdown {
            if row.is_cash {
                continue;
            }
            total_crypto += row.total_balance_fiat;
            total_unrealized += row.unrealized_pnl;
            let symbol = format!("{}-USD", row.asset);
            positions.insert(
                symbol,
                SpotPosition {
                    asset: row.asset,
                    total_balance_crypto: row.total_balance_crypto,
                    total_balance_fiat: row.total_balance_fiat,
                    average_entry_price: row.average_entry_price,
                    cost_basis: row.cost_basis,
                    unrealized_pnl: row.unrealized_pnl,
                    is_cash: false,
                },
            );
        }

        let mut state = self.state.lock().await;
        state.snapshot = PortfolioSnapshot {
            timestamp: Utc::now(),
            total_value: total_cash + total_crypto,
            total_cash,
            total_crypto,
            total_unrealized_pnl: total_unrealized,
            total_realized_pnl: state.snapshot.total_realized_pnl,
            positions,
        };
        state.last_update = Some(Utc::now());
        info!(
            "[TRUTH] Portfolio refreshed: ${} total, {} holdings",
            state.snapshot.total_value,
            state.snapshot.positions.len()
        );
        Ok(())
    }

    async fn has_exchange_holding(&self, symbol: &str) -> bool {
        self.state
            .lock()
            .await
            .snapshot
            .positions
            .contains_key(symbol)
    }

    async fn holding_value(&self, symbol: &str) -> Decimal {
        self.state
            .lock()
            .await
            .snapshot
            .positions
            .get(symbol)
            .map(|p| p.total_balance_fiat)
            .unwrap_or(Decimal::ZERO)
    }

    async fn get_product_info(&self, symbol: &str) -> Option<ProductInfo> {
        {
            let state = self.state.lock().await;
            if let Some(info) = state.product_info.get(symbol) {
                return Some(info.clone());
            }
        }
        match self.client.get_product(symbol).await {
            Ok(product) => {
                self.state
                    .lock()
                    .await
                    .product_info
                    .insert(symbol.to_string(), product.clone());
                Some(product)
            }
            Err(e) => {
                warn!("[TRUTH] product info failed for {}: {}", symbol, e);
                None
            }
        }
    }

    async fn snapshot(&self) -> PortfolioSnapshot {
        self.state.lock().await.snapshot.clone()
    }

    async fn snapshot_age_s(&self) -> i64 {
        let state = self.state.lock().await;
        match state.last_update {
            Some(last) => (Utc::now() - last).num_seconds(),
            None => i64::MAX,
        }
    }

    async fn validate_before_trade(&self, symbol: &str) -> Result<(), String> {
        let age = self.snapshot_age_s().await;
        if age > self.truth_staleness_s {
            return Err(format!(
                "truth_stale: snapshot {}s old (max {}s) before trading {}",
                if age == i64::MAX { -1 } else { age },
                self.truth_staleness_s,
                symbol
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_never_updated_is_stale() {
        let portfolio = LivePortfolio::new(CoinbaseClient::public_only(), 15);
        assert!(portfolio.is_truth_stale().await);
        let err = portfolio
            .validate_before_trade("BTC-USD")
            .await
            .unwrap_err();
        assert!(err.contains("truth_stale"));
    }

    #[tokio::test]
    async fn test_fresh_snapshot_passes_gate() {
        let portfolio = LivePortfolio::new(CoinbaseClient::public_only(), 15);
        {
            let mut state = portfolio.state.lock().await;
            state.last_update = Some(Utc::now());
            state.snapshot.timestamp = Utc::now();
        }
        assert!(portfolio.validate_before_trade("BTC-USD").await.is_ok());
        assert!(!portfolio.is_truth_stale().await);
    }

    #[tokio::test]
    async fn test_stale_after_threshold() {
        let portfolio = LivePortfolio::new(CoinbaseClient::public_only(), 15);
        {
            let mut state = portfolio.state.lock().await;
            state.last_update = Some(Utc::now() - chrono::Duration::seconds(30));
        }
        assert!(portfolio.is_truth_stale().await);
        assert!(portfolio.validate_before_trade("BTC-USD").await.is_err());
    }
}
