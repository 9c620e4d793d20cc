use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{ExchangeError, JwtSigner};
use crate::types::{Candle, TimeFrame};

const API_HOST: &str = "api.coinbase.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct Account {
    pub currency: String,
    pub available_balance: Decimal,
}

#[derive(Debug, Clone)]
pub struct PortfolioRef {
    pub uuid: String,
    pub portfolio_type: String,
}

#[derive(Debug, Clone)]
pub struct BreakdownPosition {
    pub asset: String,
    pub total_balance_crypto: Decimal,
    pub total_balance_fiat: Decimal,
    pub average_entry_price: Decimal,
    pub cost_basis: Decimal,
    pub unrealized_pnl: Decimal,
    pub is_cash: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductInfo {
    pub product_id: String,
    pub price: Decimal,
    pub quote_min_size: Decimal,
    pub base_min_size: Decimal,
    pub base_increment: Decimal,
    pub volume_24h_usd: Decimal,
}

#[derive(Debug, Clone)]
pub struct BidAsk {
    pub product_id: String,
    pub bid: Decimal,
    pub ask: Decimal,
}

impl BidAsk {
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::from(2)
    }

    pub fn spread_bps(&self) -> f64 {
        use rust_decimal::prelude::ToPrimitive;
        let mid = self.mid();
        if mid.is_zero() {
            return 0.0;
        }
        ((self.ask - self.bid) / mid * Decimal::from(10_000))
            .to_f64()
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone)]
pub struct OrderAck {
    pub order_id: String,
    pub client_order_id: String,
}

#[derive(Debug, Clone)]
pub struct OrderStatus {
    pub order_id: String,
    pub status: String,
    pub filled_size: Decimal,
    pub average_filled_price: Decimal,
}

impl OrderStatus {
    pub fn is_filled(&self) -> bool {
        self.status == "FILLED"
    }
}

/// Typed Coinbase Advanced Trade REST client.
///
/// Construct `public_only` for paper mode (market data endpoints only) or
/// `with_credentials` for live trading. Every call has a 10 s hard timeout.
#[derive(Clone)]
pub struct CoinbaseClient {
    http: reqwest::Client,
    base_url: String,
    signer: Option<JwtSigner>,
}

impl CoinbaseClient {
    pub fn public_only() -> Self {
        Self::build(None, None)
    }

    pub fn with_credentials(key_name: &str, private_key_pem: &str) -> Result<Self, ExchangeError> {
        let signer = JwtSigner::new(key_name, private_key_pem)?;
        Ok(Self::build(Some(signer), None))
    }

    /// Test hook: point the client at a local stub server.
    pub fn with_base_url(base_url: &str) -> Self {
        Self::build(None, Some(base_url.to_string()))
    }

    fn build(signer: Option<JwtSigner>, base_url: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.unwrap_or_else(|| format!("https://{}", API_HOST)),
            signer,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.signer.is_some()
    }

    fn auth_header(&self, method: &str, path: &str) -> Result<Option<String>, ExchangeError> {
        match &self.signer {
            Some(signer) => Ok(Some(signer.rest_token(method, API_HOST, path)?)),
            None => Ok(None),
        }
    }

    pub fn ws_token(&self) -> Result<Option<String>, ExchangeError> {
        match &self.signer {
            Some(signer) => Ok(Some(signer.ws_token()?)),
            None => Ok(None),
        }
    }

    async fn get_json(&self, path: &str, query: &[(String, String)]) -> Result<serde_json::Value, ExchangeError> {
        let mut request = self.http.get(format!("{}{}", self.base_url, path));
        if let Some(token) = self.auth_header("GET", path)? {
            request = request.bearer_auth(token);
        }
        if !query.is_empty() {
            request = request.query(query);
        }
        let response = request.send().await?;
        Self::check_status(response).await
    }

    async fn post_json(&self, path: &str, body: serde_json::Value) -> Result<serde_json::Value, ExchangeError> {
        let mut request = self.http.post(format!("{}{}", self.base_url, path)).json(&body);
        if let Some(token) = self.auth_header("POST", path)? {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        Self::check_status(response).await
    }

    async fn check_status(response: reqwest::Response) -> Result<serde_json::Value, ExchangeError> {
        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ExchangeError::RateLimited);
        }
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ExchangeError::Rejected(format!("{}: {}", status, body)));
        }
        serde_json::from_str(&body).map_err(|e| ExchangeError::Parse(e.to_string()))
    }

    pub async fn get_accounts(&self) -> Result<Vec<Account>, ExchangeError> {
        let value = self
            .get_json("/api/v3/brokerage/accounts", &[("limit".into(), "250".into())])
            .await?;
        let accounts = value["accounts"]
            .as_array()
            .ok_or_else(|| ExchangeError::Parse("missing accounts".into()))?
            .iter()
            .map(|a| Account {
                currency: a["currency"].as_str().unwrap_or_default().to_string(),
                available_balance: parse_decimal(&a["available_balance"]["value"]),
            })
            .collect();
        Ok(accounts)
    }

    pub async fn get_portfolios(&self) -> Result<Vec<PortfolioRef>, ExchangeError> {
        let value = self.get_json("/api/v3/brokerage/portfolios", &[]).await?;
        let portfolios = value["portfolios"]
            .as_array()
            .ok_or_else(|| ExchangeError::Parse("missing portfolios".into()))?
            .iter()
            .map(|p| PortfolioRef {
                uuid: p["uuid"].as_str().unwrap_or_default().to_string(),
                portfolio_type: p["type"].as_str().unwrap_or_default().to_string(),
            })
            .collect();
        Ok(portfolios)
    }

    pub async fn get_portfolio_breakdown(
        &self,
        uuid: &str,
    ) -> Result<Vec<BreakdownPosition>, ExchangeError> {
        let path = format!("/api/v3/brokerage/portfolios/{}", uuid);
        let value = self.get_json(&path, &[]).await?;
        let positions = value["breakdown"]["spot_positions"]
            .as_array()
            .ok_or_else(|| ExchangeError::Parse("missing spot_positions".into()))?
            .iter()
            .map(|p| BreakdownPosition {
                asset: p["asset"].as_str().unwrap_or_default().to_string(),
                total_balance_crypto: parse_decimal(&p["total_balance_crypto"]),
                total_balance_fiat: parse_decimal(&p["total_balance_fiat"]),
                average_entry_price: parse_decimal(&p["average_entry_price"]["value"]),
                cost_basis: parse_decimal(&p["cost_basis"]["value"]),
                unrealized_pnl: parse_decimal(&p["unrealized_pnl"]),
                is_cash: p["is_cash"].as_bool().unwrap_or(false),
            })
            .collect();
        Ok(positions)
    }

    pub async fn get_products(&self) -> Result<Vec<ProductInfo>, ExchangeError> {
        let value = self
            .get_json(
                "/api/v3/brokerage/products",
                &[("product_type".into(), "SPOT".into())],
            )
            .await?;
        let products = value["products"]
            .as_array()
            .ok_or_else(|| ExchangeError::Parse("missing products".into()))?
            .iter()
            .filter_map(parse_product)
            .collect();
        Ok(products)
    }

    pub async fn get_product(&self, product_id: &str) -> Result<ProductInfo, ExchangeError> {
        let path = format!("/api/v3/brokerage/products/{}", product_id);
        let value = self.get_json(&path, &[]).await?;
        parse_product(&value).ok_or_else(|| ExchangeError::Parse(format!("bad product {}", product_id)))
    }

    pub async fn get_best_bid_ask(
        &self,
        product_ids: &[String],
    ) -> Result<Vec<BidAsk>, ExchangeError> {
        let query: Vec<(String, String)> = product_ids
            .iter()
            .map(|id| ("product_ids".to_string(), id.clone()))
            .collect();
        let value = self.get_json("/api/v3/brokerage/best_bid_ask", &query).await?;
        let books = value["pricebooks"]
            .as_array()
            .ok_or_else(|| ExchangeError::Parse("missing pricebooks".into()))?
            .iter()
            .filter_map(|b| {
                Some(BidAsk {
                    product_id: b["product_id"].as_str()?.to_string(),
                    bid: parse_decimal(&b["bids"][0]["price"]),
                    ask: parse_decimal(&b["asks"][0]["price"]),
                })
            })
            .collect();
        Ok(books)
    }

    /// Candles between start and end (unix seconds), ascending.
    pub async fn get_product_candles(
        &self,
        product_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        tf: TimeFrame,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let path = format!("/api/v3/brokerage/products/{}/candles", product_id);
        let value = self
            .get_json(
                &path,
                &[
                    ("start".into(), start.timestamp().to_string()),
                    ("end".into(), end.timestamp().to_string()),
                    ("granularity".into(), tf.granularity().to_string()),
                ],
            )
            .await?;
        let mut candles: Vec<Candle> = value["candles"]
            .as_array()
            .ok_or_else(|| ExchangeError::Parse("missing candles".into()))?
            .iter()
            .filter_map(parse_candle)
            .collect();
        candles.sort_by_key(|c| c.timestamp);
        debug!("[REST] {} {} candles for {}", candles.len(), tf, product_id);
        Ok(candles)
    }

    async fn place_order(
        &self,
        product_id: &str,
        side: &str,
        configuration: serde_json::Value,
    ) -> Result<OrderAck, ExchangeError> {
        let client_order_id = Uuid::new_v4().to_string();
        let body = json!({
            "client_order_id": client_order_id,
            "product_id": product_id,
            "side": side,
            "order_configuration": configuration,
        });
        let value = self.post_json("/api/v3/brokerage/orders", body).await?;
        if value["success"].as_bool() == Some(false) {
            let reason = value["error_response"]["message"]
                .as_str()
                .unwrap_or("order rejected")
                .to_string();
            return Err(ExchangeError::Rejected(reason));
        }
        Ok(OrderAck {
            order_id: value["success_response"]["order_id"]
                .as_str()
                .or_else(|| value["order_id"].as_str())
                .unwrap_or_default()
                .to_string(),
            client_order_id,
        })
    }

    pub async fn market_order_buy(
        &self,
        product_id: &str,
        quote_size: Decimal,
    ) -> Result<OrderAck, ExchangeError> {
        self.place_order(
            product_id,
            "BUY",
            json!({"market_market_ioc": {"quote_size": quote_size.to_string()}}),
        )
        .await
    }

    pub async fn market_order_sell(
        &self,
        product_id: &str,
        base_size: Decimal,
    ) -> Result<OrderAck, ExchangeError> {
        self.place_order(
            product_id,
            "SELL",
            json!({"market_market_ioc": {"base_size": base_size.to_string()}}),
        )
        .await
    }

    pub async fn limit_order_gtc_buy(
        &self,
        product_id: &str,
        base_size: Decimal,
        limit_price: Decimal,
    ) -> Result<OrderAck, ExchangeError> {
        self.place_order(
            product_id,
            "BUY",
            json!({"limit_limit_gtc": {
                "base_size": base_size.to_string(),
                "limit_price": limit_price.to_string(),
            }}),
        )
        .await
    }

    pub async fn limit_order_gtc_sell(
        &self,
        product_id: &str,
        base_size: Decimal,
        limit_price: Decimal,
    ) -> Result<OrderAck, ExchangeError> {
        self.place_order(
            product_id,
            "SELL",
            json!({"limit_limit_gtc": {
                "base_size": base_size.to_string(),
                "limit_price": limit_price.to_string(),
            }}),
        )
        .await
    }

    /// Stop-limit sell used for protective stops.
    pub async fn stop_limit_sell(
        &self,
        product_id: &str,
        base_size: Decimal,
        stop_price: Decimal,
        limit_price: Decimal,
    ) -> Result<OrderAck, ExchangeError> {
        self.place_order(
            product_id,
            "SELL",
            json!({"stop_limit_stop_limit_gtc": {
                "base_size": base_size.to_string(),
                "stop_price": stop_price.to_string(),
                "limit_price": limit_price.to_string(),
                "stop_direction": "STOP_DIRECTION_STOP_DOWN",
            }}),
        )
        .await
    }

    pub async fn cancel_orders(&self, order_ids: &[String]) -> Result<(), ExchangeError> {
        if order_ids.is_empty() {
            return Ok(());
        }
        let body = json!({"order_ids": order_ids});
        let value = self
            .post_json("/api/v3/brokerage/orders/batch_cancel", body)
            .await?;
        if value["results"].as_array().is_none() {
            warn!("[REST] cancel_orders returned no results field");
        }
        Ok(())
    }

    pub async fn get_order(&self, order_id: &str) -> Result<OrderStatus, ExchangeError> {
        let path = format!("/api/v3/brokerage/orders/historical/{}", order_id);
        let value = self.get_json(&path, &[]).await?;
        let order = &value["order"];
        Ok(OrderStatus {
            order_id: order_id.to_string(),
            status: order["status"].as_str().unwrap_or_default().to_string(),
            filled_size: parse_decimal(&order["filled_size"]),
            average_filled_price: parse_decimal(&order["average_filled_price"]),
        })
    }
}

fn parse_decimal(value: &serde_json::Value) -> Decimal {
    match value {
        serde_json::Value::String(s) => Decimal::from_str(s).unwrap_or_default(),
        serde_json::Value::Number(n) => {
            Decimal::from_str(&n.to_string()).unwrap_or_default()
        }
        _ => Decimal::ZERO,
    }
}

fn parse_product(value: &serde_json::Value) -> Option<ProductInfo> {
    let product_id = value["product_id"].as_str()?.to_string();
    let price = parse_decimal(&value["price"]);
    // volume_24h is in base units; approximate quote volume at current price
    let volume_24h = parse_decimal(&value["volume_24h"]);
    Some(ProductInfo {
        product_id,
        price,
        quote_min_size: parse_decimal(&value["quote_min_size"]),
        base_min_size: parse_decimal(&value["base_min_size"]),
        base_increment: parse_decimal(&value["base_increment"]),
        volume_24h_usd: volume_24h * price,
    })
}

fn parse_candle(value: &serde_json::Value) -> Option<Candle> {
    let start = match &value["start"] {
        serde_json::Value::String(s) => s.parse::<i64>().ok()?,
        serde_json::Value::Number(n) => n.as_i64()?,
        _ => return None,
    };
    Some(Candle {
        timestamp: Utc.timestamp_opt(start, 0).single()?,
        open: parse_decimal(&value["open"]),
        high: parse_decimal(&value["high"]),
        low: parse_decimal(&value["low"]),
        close: parse_decimal(&value["close"]),
        volume: parse_decimal(&value["volume"]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_candle_from_wire() {
        let value = json!({
            "start": "1700000000",
            "open": "100.5",
            "high": "101.0",
            "low": "99.5",
            "close": "100.9",
            "volume": "12.5"
        });
        let candle = parse_candle(&value).unwrap();
        assert_eq!(candle.open, dec!(100.5));
        assert_eq!(candle.timestamp.timestamp(), 1_700_000_000);
        assert!(candle.is_valid());
    }

    #[test]
    fn test_parse_product_computes_quote_volume() {
        let value = json!({
            "product_id": "BTC-USD",
            "price": "50000",
            "quote_min_size": "1",
            "base_min_size": "0.00001",
            "base_increment": "0.00000001",
            "volume_24h": "2"
        });
        let product = parse_product(&value).unwrap();
        assert_eq!(product.volume_24h_usd, dec!(100000));
    }

    #[test]
    fn test_spread_bps() {
        let book = BidAsk {
            product_id: "BTC-USD".into(),
            bid: dec!(99.95),
            ask: dec!(100.05),
        };
        let bps = book.spread_bps();
        assert!((bps - 10.0).abs() < 0.01);
    }

    #[test]
    fn test_malformed_candle_skipped() {
        assert!(parse_candle(&json!({"open": "1"})).is_none());
    }

    #[test]
    fn test_public_client_has_no_signer() {
        let client = CoinbaseClient::public_only();
        assert!(!client.is_authenticated());
        assert!(client.ws_token().unwrap().is_none());
    }
}
