use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::datafeeds::MarketData;
use crate::exchange::{CoinbaseClient, ExchangeError};
use crate::portfolio::PaperPortfolio;
use crate::types::{Position, TradePlan};

/// A confirmed (or simulated) fill.
#[derive(Debug, Clone)]
pub struct Fill {
    pub price: Decimal,
    pub qty: Decimal,
    pub quote_spent: Decimal,
    pub order_id: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("no price available for {0}")]
    NoPrice(String),
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("exchange error: {0}")]
    Exchange(#[from] ExchangeError),
}

/// Order execution seam: paper simulates fills, live talks to the
/// exchange. The router never knows which one it holds.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute_buy(&self, plan: &TradePlan) -> Result<Fill, ExecError>;

    /// Sell `qty` of the base asset at market. `reason` is for the logs.
    async fn execute_sell(
        &self,
        symbol: &str,
        qty: Decimal,
        reason: &str,
    ) -> Result<Fill, ExecError>;
}

/// Paper executor: immediate fills at the current buffer price plus
/// configured slippage, settling against the paper account.
pub struct PaperExecutor {
    portfolio: Arc<PaperPortfolio>,
    data: Arc<MarketData>,
    slippage_bps: Decimal,
}

impl PaperExecutor {
    pub fn new(portfolio: Arc<PaperPortfolio>, data: Arc<MarketData>, slippage_bps: Decimal) -> Self {
        Self {
            portfolio,
            data,
            slippage_bps,
        }
    }

    fn slip(&self, price: Decimal, buying: bool) -> Decimal {
        let slip = price * self.slippage_bps / dec!(10000);
        if buying {
            price + slip
        } else {
            price - slip
        }
    }
}

#[async_trait]
impl Executor for PaperExecutor {
    async fn execute_buy(&self, plan: &TradePlan) -> Result<Fill, ExecError> {
        let symbol = &plan.intent.symbol;
        let market = self
            .data
            .last_price(symbol)
            .await
            .unwrap_or(plan.intent.price);
        if market <= Decimal::ZERO {
            return Err(ExecError::NoPrice(symbol.clone()));
        }
        let price = self.slip(market, true);
        let qty = plan.size_usd / price;
        self.portfolio
            .apply_buy(symbol, qty, price)
            .await
            .map_err(ExecError::Rejected)?;
        info!(
            "[PAPER] BUY {} {} @ {} (${})",
            qty, symbol, price, plan.size_usd
        );
        Ok(Fill {
            price,
            qty,
            quote_spent: qty * price,
            order_id: None,
        })
    }

    async fn execute_sell(
        &self,
        symbol: &str,
        qty: Decimal,
        reason: &str,
    ) -> Result<Fill, ExecError> {
        let market = self
            .data
            .last_price(symbol)
            .await
            .ok_or_else(|| ExecError::NoPrice(symbol.to_string()))?;
        let price = self.slip(market, false);
        self.portfolio
            .apply_sell(symbol, qty, price)
            .await
            .map_err(ExecError::Rejected)?;
        info!("[PAPER] SELL {} {} @ {} ({})", qty, symbol, price, reason);
        Ok(Fill {
            price,
            qty,
            quote_spent: qty * price,
            order_id: None,
        })
    }
}

const FILL_POLL_ATTEMPTS: u32 = 10;
const FILL_POLL_DELAY_MS: u64 = 500;

/// Live executor: market or limit orders via the exchange client, with a
/// bounded fill-confirmation poll. Partial fills are honored at the
/// filled quantity and the remainder cancelled.
pub struct LiveExecutor {
    client: CoinbaseClient,
    use_limit_orders: bool,
    limit_buffer_pct: Decimal,
}

impl LiveExecutor {
    pub fn new(client: CoinbaseClient, use_limit_orders: bool, limit_buffer_pct: Decimal) -> Self {
        Self {
            client,
            use_limit_orders,
            limit_buffer_pct,
        }
    }

    async fn await_fill(&self, order_id: &str) -> Result<(Decimal, Decimal), ExecError> {
        for _ in 0..FILL_POLL_ATTEMPTS {
            let status = self.client.get_order(order_id).await?;
            if status.is_filled() && status.filled_size > Decimal::ZERO {
                return Ok((status.average_filled_price, status.filled_size));
            }
            if status.status == "CANCELLED" || status.status == "FAILED" {
                return Err(ExecError::Rejected(format!(
                    "order {} ended {}",
                    order_id, status.status
                )));
            }
            if status.filled_size > Decimal::ZERO && status.status == "OPEN" {
                // partial fill sitting on the book: take what we have
                let _ = self.client.cancel_orders(&[order_id.to_string()]).await;
                return Ok((status.average_filled_price, status.filled_size));
            }
            tokio::time::sleep(std::time::Duration::from_millis(FILL_POLL_DELAY_MS)).await;
        }
        // never confirmed: cancel and report
        let _ = self.client.cancel_orders(&[order_id.to_string()]).await;
        Err(ExecError::Rejected(format!(
            "order {} not filled in time",
            order_id
        )))
    }
}

#[async_trait]
impl Executor for LiveExecutor {
    async fn execute_buy(&self, plan: &TradePlan) -> Result<Fill, ExecError> {
        let symbol = &plan.intent.symbol;
        let ack = if self.use_limit_orders {
            let mid = plan.intent.price;
            let limit = mid * (Decimal::ONE - self.limit_buffer_pct);
            let base_size = plan.size_usd / limit;
            self.client
                .limit_order_gtc_buy(symbol, base_size, limit)
                .await?
        } else {
            self.client.market_order_buy(symbol, plan.size_usd).await?
        };

        let (price, qty) = self.await_fill(&ack.order_id).await?;
        info!("[LIVE] BUY {} {} @ {} ({})", qty, symbol, price, ack.order_id);
        Ok(Fill {
            price,
            qty,
            quote_spent: qty * price,
            order_id: Some(ack.order_id),
        })
    }

    async fn execute_sell(
        &self,
        symbol: &str,
        qty: Decimal,
        reason: &str,
    ) -> Result<Fill, ExecError> {
        let ack = self.client.market_order_sell(symbol, qty).await?;
        let (price, filled) = self.await_fill(&ack.order_id).await?;
        info!(
            "[LIVE] SELL {} {} @ {} ({}, {})",
            filled, symbol, price, reason, ack.order_id
        );
        Ok(Fill {
            price,
            qty: filled,
            quote_spent: filled * price,
            order_id: Some(ack.order_id),
        })
    }
}

/// Protective bracket ownership: arming stops after fills and re-arming
/// orphans on the health-check cadence.
#[async_trait]
pub trait StopOrderManager: Send + Sync {
    /// Place the protective stop for a freshly opened position. Returns
    /// the stop order id when one was placed.
    async fn arm_stop(&self, position: &Position) -> Option<String>;

    /// Verify every open position still has a working stop; re-arm any
    /// orphans. Returns how many stops were re-armed.
    async fn health_check(&self, positions: &[Position]) -> usize;
}

/// Paper mode: exits are simulated by the monitor loop, no resting orders.
pub struct NullStopManager;

#[async_trait]
impl StopOrderManager for NullStopManager {
    async fn arm_stop(&self, _position: &Position) -> Option<String> {
        None
    }

    async fn health_check(&self, _positions: &[Position]) -> usize {
        0
    }
}

/// Live mode: resting stop-limit sells on the exchange, tracked by id.
pub struct LiveStopManager {
    client: CoinbaseClient,
    armed: Mutex<std::collections::HashMap<String, String>>, // symbol -> order id
}

impl LiveStopManager {
    pub fn new(client: CoinbaseClient) -> Self {
        Self {
            client,
            armed: Mutex::new(std::collections::HashMap::new()),
        }
    }

    pub async fn disarm(&self, symbol: &str) {
        if let Some(order_id) = self.armed.lock().await.remove(symbol) {
            if let Err(e) = self.client.cancel_orders(&[order_id.clone()]).await {
                warn!("[STOPS] cancel failed for {} ({}): {}", symbol, order_id, e);
            }
        }
    }
}

#[async_trait]
impl StopOrderManager for LiveStopManager {
    async fn arm_stop(&self, position: &Position) -> Option<String> {
        // limit a touch under the stop so the order crosses after trigger
        let limit = position.stop_price * dec!(0.997);
        match self
            .client
            .stop_limit_sell(&position.symbol, position.size_qty, position.stop_price, limit)
            .await
        {
            Ok(ack) => {
                info!(
                    "[STOPS] armed {} stop @ {} ({})",
                    position.symbol, position.stop_price, ack.order_id
                );
                self.armed
                    .lock()
                    .await
                    .insert(position.symbol.clone(), ack.order_id.clone());
                Some(ack.order_id)
            }
            Err(e) => {
                warn!("[STOPS] arm failed for {}: {}", position.symbol, e);
                None
            }
        }
    }

    async fn health_check(&self, positions: &[Position]) -> usize {
        let mut rearmed = 0;
        for position in positions {
            if !position.is_open() {
                continue;
            }
            let known = self.armed.lock().await.get(&position.symbol).cloned();
            let needs_rearm = match known {
                None => true,
                Some(order_id) => match self.client.get_order(&order_id).await {
                    Ok(status) => {
                        status.status == "CANCELLED"
                            || status.status == "EXPIRED"
                            || status.status == "FAILED"
                    }
                    Err(e) => {
                        warn!("[STOPS] status check failed for {}: {}", position.symbol, e);
                        false
                    }
                },
            };
            if needs_rearm && self.arm_stop(position).await.is_some() {
                rearmed += 1;
            }
        }
        if rearmed > 0 {
            info!("[STOPS] re-armed {} orphaned stops", rearmed);
        }
        rearmed
    }
}
