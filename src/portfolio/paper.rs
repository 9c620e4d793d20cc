use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use super::PortfolioManager;
use crate::datafeeds::MarketData;
use crate::exchange::ProductInfo;
use crate::storage::{atomic_write_json_logged, load_json, ModePaths};
use crate::types::{base_asset, PortfolioSnapshot, SpotPosition};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperHolding {
    pub qty: Decimal,
    pub cost_basis: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperState {
    pub cash: Decimal,
    pub holdings: HashMap<String, PaperHolding>,
    pub realized_pnl: Decimal,
}

impl PaperState {
    fn fresh(start_balance: Decimal) -> Self {
        Self {
            cash: start_balance,
            holdings: HashMap::new(),
            realized_pnl: Decimal::ZERO,
        }
    }
}

/// In-memory paper account with atomic persistence to `paper_state.json`.
/// Holdings are priced from the live market-data buffers, so the synthetic
/// snapshot tracks the market like the real one would.
pub struct PaperPortfolio {
    state: Mutex<PaperState>,
    data: Arc<MarketData>,
    persist_path: PathBuf,
}

impl PaperPortfolio {
    pub fn new(
        paths: &ModePaths,
        data: Arc<MarketData>,
        start_balance: Decimal,
        reset: bool,
    ) -> Self {
        let persist_path = paths.paper_state_path();
        let state = if reset {
            info!("[PAPER] Resetting paper account to ${}", start_balance);
            let fresh = PaperState::fresh(start_balance);
            atomic_write_json_logged(&persist_path, &fresh);
            fresh
        } else {
            match load_json::<PaperState>(&persist_path) {
                Ok(Some(loaded)) => {
                    info!(
                        "[PAPER] Loaded paper account: ${} cash, {} holdings",
                        loaded.cash,
                        loaded.holdings.len()
                    );
                    loaded
                }
                _ => {
                    let fresh = PaperState::fresh(start_balance);
                    atomic_write_json_logged(&persist_path, &fresh);
                    fresh
                }
            }
        };
        Self {
            state: Mutex::new(state),
            data,
            persist_path,
        }
    }

    /// Fill a buy: debit cash, grow the holding.
    pub async fn apply_buy(
        &self,
        symbol: &str,
        qty: Decimal,
        price: Decimal,
    ) -> Result<(), String> {
        let cost = qty * price;
        let mut state = self.state.lock().await;
        if state.cash < cost {
            return Err(format!(
                "insufficient paper cash: need {} have {}",
                cost, state.cash
            ));
        }
        state.cash -= cost;
        let holding = state
            .holdings
            .entry(symbol.to_string())
            .or_insert(PaperHolding {
                qty: Decimal::ZERO,
                cost_basis: Decimal::ZERO,
            });
        holding.qty += qty;
        holding.cost_basis += cost;
        atomic_write_json_logged(&self.persist_path, &*state);
        Ok(())
    }

    /// Fill a sell: credit cash, shrink the holding, realize PnL against
    /// average cost. Returns the realized PnL of the sold slice.
    pub async fn apply_sell(
        &self,
        symbol: &str,
        qty: Decimal,
        price: Decimal,
    ) -> Result<Decimal, String> {
        let mut state = self.state.lock().await;
        let holding = state
            .holdings
            .get_mut(symbol)
            .ok_or_else(|| format!("no paper holding for {}", symbol))?;
        if holding.qty < qty {
            return Err(format!(
                "insufficient paper {}: need {} have {}",
                symbol, qty, holding.qty
            ));
        }
        let avg_cost = if holding.qty.is_zero() {
            Decimal::ZERO
        } else {
            holding.cost_basis / holding.qty
        };
        let proceeds = qty * price;
        let cost_out = qty * avg_cost;
        let pnl = proceeds - cost_out;

        holding.qty -= qty;
        holding.cost_basis -= cost_out;
        if holding.qty <= dec!(0.0000000001) {
            state.holdings.remove(symbol);
        }
        state.cash += proceeds;
        state.realized_pnl += pnl;
        atomic_write_json_logged(&self.persist_path, &*state);
        Ok(pnl)
    }

    async fn price_of(&self, symbol: &str) -> Decimal {
        self.data.last_price(symbol).await.unwrap_or(Decimal::ZERO)
    }

    pub async fn state_copy(&self) -> PaperState {
        self.state.lock().await.clone()
    }
}

#[async_trait]
impl PortfolioManager for PaperPortfolio {
    async fn get_available_balance(&self) -> Decimal {
        self.state.lock().await.cash
    }

    async fn get_total_portfolio_value(&self) -> Decimal {
        let state = self.state.lock().await.clone();
        let mut total = state.cash;
        for (symbol, holding) in &state.holdings {
            let price = self.price_of(symbol).await;
            if price > Decimal::ZERO {
                total += holding.qty * price;
            } else {
                // no market picture: carry at cost
                total += holding.cost_basis;
            }
        }
        total
    }

    async fn update_portfolio_state(&self) -> anyhow::Result<()> {
        // the paper account is its own source of truth
        Ok(())
    }

    async fn has_exchange_holding(&self, symbol: &str) -> bool {
        self.state.lock().await.holdings.contains_key(symbol)
    }

    async fn holding_value(&self, symbol: &str) -> Decimal {
        let qty = match self.state.lock().await.holdings.get(symbol) {
            Some(holding) => holding.qty,
            None => return Decimal::ZERO,
        };
        qty * self.price_of(symbol).await
    }

    async fn get_product_info(&self, symbol: &str) -> Option<ProductInfo> {
        let price = self.price_of(symbol).await;
        if price.is_zero() {
            return None;
        }
        Some(ProductInfo {
            product_id: symbol.to_string(),
            price,
            quote_min_size: dec!(1),
            base_min_size: Decimal::ZERO,
            base_increment: dec!(0.00000001),
            volume_24h_usd: Decimal::ZERO,
        })
    }

    async fn snapshot(&self) -> PortfolioSnapshot {
        let state = self.state.lock().await.clone();
        let mut positions = HashMap::new();
        let mut total_crypto = Decimal::ZERO;
        let mut total_unrealized = Decimal::ZERO;
        for (symbol, holding) in &state.holdings {
            let price = self.price_of(symbol).await;
            let fiat = holding.qty * price;
            let unrealized = fiat - holding.cost_basis;
            total_crypto += fiat;
            total_unrealized += unrealized;
            let avg_entry = if holding.qty.is_zero() {
                Decimal::ZERO
            } else {
                holding.cost_basis / holding.qty
            };
            positions.insert(
                symbol.clone(),
                SpotPosition {
                    asset: base_asset(symbol).to_string(),
                    total_balance_crypto: holding.qty,
                    total_balance_fiat: fiat,
                    average_entry_price: avg_entry,
                    cost_basis: holding.cost_basis,
                    unrealized_pnl: unrealized,
                    is_cash: false,
                },
            );
        }
        PortfolioSnapshot {
            timestamp: Utc::now(),
            total_value: state.cash + total_crypto,
            total_cash: state.cash,
            total_crypto,
            total_unrealized_pnl: total_unrealized,
            total_realized_pnl: state.realized_pnl,
            positions,
        }
    }

    async fn snapshot_age_s(&self) -> i64 {
        0 // synthesized on demand, never stale
    }

    async fn validate_before_trade(&self, _symbol: &str) -> Result<(), String> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datafeeds::{DataHealth, TierConfig, TierScheduler};
    use crate::storage::CandleStore;
    use crate::types::{Candle, TimeFrame, TradingMode};
    use tokio::sync::RwLock;

    async fn harness(start: Decimal, reset: bool) -> (tempfile::TempDir, PaperPortfolio) {
        let dir = tempfile::tempdir().unwrap();
        let portfolio = portfolio_in(dir.path(), start, reset).await;
        (dir, portfolio)
    }

    async fn portfolio_in(root: &std::path::Path, start: Decimal, reset: bool) -> PaperPortfolio {
        let store = Arc::new(CandleStore::new(root.join("candles")));
        let scheduler = Arc::new(RwLock::new(TierScheduler::new(TierConfig::default())));
        let health = Arc::new(DataHealth::new());
        let data = Arc::new(MarketData::new(store, scheduler, health));
        let paths = ModePaths::with_root(root, TradingMode::Paper);
        PaperPortfolio::new(&paths, data, start, reset)
    }

    async fn set_price(portfolio: &PaperPortfolio, symbol: &str, price: Decimal) {
        portfolio
            .data
            .apply_candle(
                symbol,
                TimeFrame::M1,
                Candle {
                    timestamp: Utc::now(),
                    open: price,
                    high: price,
                    low: price,
                    close: price,
                    volume: dec!(1),
                },
                "ws",
            )
            .await;
    }

    #[tokio::test]
    async fn test_buy_debits_cash() {
        let (_dir, portfolio) = harness(dec!(1000), true).await;
        set_price(&portfolio, "BTC-USD", dec!(100)).await;
        portfolio
            .apply_buy("BTC-USD", dec!(0.15), dec!(100))
            .await
            .unwrap();

        assert_eq!(portfolio.get_available_balance().await, dec!(985));
        assert!(portfolio.has_exchange_holding("BTC-USD").await);
        assert_eq!(portfolio.holding_value("BTC-USD").await, dec!(15));
        assert_eq!(portfolio.get_total_portfolio_value().await, dec!(1000));
    }

    #[tokio::test]
    async fn test_insufficient_cash_rejected() {
        let (_dir, portfolio) = harness(dec!(10), true).await;
        let err = portfolio
            .apply_buy("BTC-USD", dec!(1), dec!(100))
            .await
            .unwrap_err();
        assert!(err.contains("insufficient paper cash"));
        assert_eq!(portfolio.get_available_balance().await, dec!(10));
    }

    #[tokio::test]
    async fn test_sell_realizes_pnl() {
        let (_dir, portfolio) = harness(dec!(1000), true).await;
        portfolio
            .apply_buy("ETH-USD", dec!(1), dec!(100))
            .await
            .unwrap();
        let pnl = portfolio
            .apply_sell("ETH-USD", dec!(1), dec!(110))
            .await
            .unwrap();

        assert_eq!(pnl, dec!(10));
        assert_eq!(portfolio.get_available_balance().await, dec!(1010));
        assert!(!portfolio.has_exchange_holding("ETH-USD").await);
        let snapshot = portfolio.snapshot().await;
        assert_eq!(snapshot.total_realized_pnl, dec!(10));
    }

    #[tokio::test]
    async fn test_partial_sell_keeps_cost_basis_average() {
        let (_dir, portfolio) = harness(dec!(1000), true).await;
        portfolio
            .apply_buy("SOL-USD", dec!(2), dec!(50))
            .await
            .unwrap();
        let pnl = portfolio
            .apply_sell("SOL-USD", dec!(1), dec!(60))
            .await
            .unwrap();
        assert_eq!(pnl, dec!(10));
        let state = portfolio.state_copy().await;
        assert_eq!(state.holdings["SOL-USD"].qty, dec!(1));
        assert_eq!(state.holdings["SOL-USD"].cost_basis, dec!(50));
    }

    #[tokio::test]
    async fn test_state_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let portfolio = portfolio_in(dir.path(), dec!(500), true).await;
            portfolio
                .apply_buy("BTC-USD", dec!(0.1), dec!(1000))
                .await
                .unwrap();
        }
        let reloaded = portfolio_in(dir.path(), dec!(500), false).await;
        assert_eq!(reloaded.get_available_balance().await, dec!(400));
        assert!(reloaded.has_exchange_holding("BTC-USD").await);

        // reset flag wipes
        let wiped = portfolio_in(dir.path(), dec!(500), true).await;
        assert_eq!(wiped.get_available_balance().await, dec!(500));
        assert!(!wiped.has_exchange_holding("BTC-USD").await);
    }
}
