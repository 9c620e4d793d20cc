use chrono::{TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::BTreeSet;
use std::str::FromStr;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::CoinbaseClient;
use crate::types::{Candle, TimeFrame};

const COINBASE_WS: &str = "wss://advanced-trade-ws.coinbase.com";
const MAX_BACKOFF_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub enum MarketEvent {
    /// A candle from the candles channel (5m granularity on the wire).
    Candle {
        symbol: String,
        tf: TimeFrame,
        candle: Candle,
    },
    /// A trade tick from the ticker channel.
    Tick {
        symbol: String,
        price: Decimal,
        volume: Decimal,
    },
    Connected,
    Disconnected,
    Error(String),
}

#[derive(Debug, Clone)]
pub enum WsCommand {
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
    Shutdown,
}

/// Market-data WebSocket with dynamic subscriptions.
///
/// Runs a reconnect loop with exponential backoff; on every (re)connect it
/// re-subscribes the current symbol set with a fresh JWT. Subscription
/// changes arrive over the command channel so tier reassignment never
/// tears the connection down.
pub struct CoinbaseWebSocket {
    url: String,
    client: CoinbaseClient,
}

impl CoinbaseWebSocket {
    pub fn new(client: CoinbaseClient) -> Self {
        Self {
            url: COINBASE_WS.to_string(),
            client,
        }
    }

    pub fn with_url(client: CoinbaseClient, url: &str) -> Self {
        Self {
            url: url.to_string(),
            client,
        }
    }

    /// Spawn the connection task. Returns the command sender and the
    /// market-event receiver.
    pub fn start(
        self,
        initial_symbols: Vec<String>,
    ) -> (mpsc::Sender<WsCommand>, mpsc::Receiver<MarketEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(2048);

        tokio::spawn(async move {
            self.run(initial_symbols, cmd_rx, event_tx).await;
        });

        (cmd_tx, event_rx)
    }

    async fn run(
        self,
        initial_symbols: Vec<String>,
        mut cmd_rx: mpsc::Receiver<WsCommand>,
        event_tx: mpsc::Sender<MarketEvent>,
    ) {
        let mut symbols: BTreeSet<String> = initial_symbols.into_iter().collect();
        let mut backoff_secs = 1u64;

        loop {
            match self
                .run_connection(&mut symbols, &mut cmd_rx, &event_tx, &mut backoff_secs)
                .await
            {
                ConnectionOutcome::Shutdown => {
                    info!("[WS] shutdown requested");
                    return;
                }
                ConnectionOutcome::Dropped => {
                    let _ = event_tx.send(MarketEvent::Disconnected).await;
                    warn!("[WS] disconnected, reconnecting in {}s", backoff_secs);
                    tokio::time::sleep(std::time::Duration::from_secs(backoff_secs)).await;
                    backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                }
            }
        }
    }

    async fn run_connection(
        &self,
        symbols: &mut BTreeSet<String>,
        cmd_rx: &mut mpsc::Receiver<WsCommand>,
        event_tx: &mpsc::Sender<MarketEvent>,
        backoff_secs: &mut u64,
    ) -> ConnectionOutcome {
        let (ws_stream, _) = match connect_async(self.url.as_str()).await {
            Ok(ok) => ok,
            Err(e) => {
                let _ = event_tx.send(MarketEvent::Error(e.to_string())).await;
                return ConnectionOutcome::Dropped;
            }
        };
        let (mut write, mut read) = ws_stream.split();
        info!("[WS] connected ({} symbols)", symbols.len());

        let token = match self.client.ws_token() {
            Ok(token) => token,
            Err(e) => {
                error!("[WS] token build failed: {}", e);
                None
            }
        };

        if !symbols.is_empty() {
            let product_ids: Vec<String> = symbols.iter().cloned().collect();
            for channel in ["candles", "ticker"] {
                let msg = subscribe_message("subscribe", channel, &product_ids, token.as_deref());
                if write.send(Message::Text(msg)).await.is_err() {
                    return ConnectionOutcome::Dropped;
                }
            }
        }
        let _ = event_tx.send(MarketEvent::Connected).await;
        // a session that got as far as subscribing resets the backoff
        *backoff_secs = 1;

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            for event in parse_message(&text) {
                                if event_tx.send(event).await.is_err() {
                                    return ConnectionOutcome::Shutdown;
                                }
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let _ = write.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return ConnectionOutcome::Dropped;
                        }
                        Some(Err(e)) => {
                            let _ = event_tx.send(MarketEvent::Error(e.to_string())).await;
                            return ConnectionOutcome::Dropped;
                        }
                        _ => {}
                    }
                }
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(WsCommand::Subscribe(new_symbols)) => {
                            let fresh: Vec<String> = new_symbols
                                .into_iter()
                                .filter(|s| symbols.insert(s.clone()))
                                .collect();
                            if !fresh.is_empty() {
                                debug!("[WS] subscribing {} symbols", fresh.len());
                                for channel in ["candles", "ticker"] {
                                    let msg = subscribe_message(
                                        "subscribe", channel, &fresh, token.as_deref(),
                                    );
                                    if write.send(Message::Text(msg)).await.is_err() {
                                        return ConnectionOutcome::Dropped;
                                    }
                                }
                            }
                        }
                        Some(WsCommand::Unsubscribe(old_symbols)) => {
                            let removed: Vec<String> = old_symbols
                                .into_iter()
                                .filter(|s| symbols.remove(s))
                                .collect();
                            if !removed.is_empty() {
                                debug!("[WS] unsubscribing {} symbols", removed.len());
                                for channel in ["candles", "ticker"] {
                                    let msg = subscribe_message(
                                        "unsubscribe", channel, &removed, token.as_deref(),
                                    );
                                    if write.send(Message::Text(msg)).await.is_err() {
                                        return ConnectionOutcome::Dropped;
                                    }
                                }
                            }
                        }
                        Some(WsCommand::Shutdown) | None => {
                            let _ = write.send(Message::Close(None)).await;
                            return ConnectionOutcome::Shutdown;
                        }
                    }
                }
            }
        }
    }
}

enum ConnectionOutcome {
    Dropped,
    Shutdown,
}

fn subscribe_message(
    kind: &str,
    channel: &str,
    product_ids: &[String],
    token: Option<&str>,
) -> String {
    let mut msg = json!({
        "type": kind,
        "channel": channel,
        "product_ids": product_ids,
    });
    if let Some(token) = token {
        msg["jwt"] = json!(token);
    }
    msg.to_string()
}

/// Parse one WS frame into zero or more market events. Unknown channels
/// and malformed frames produce nothing.
pub fn parse_message(text: &str) -> Vec<MarketEvent> {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(_) => return Vec::new(),
    };
    match value["channel"].as_str() {
        Some("candles") => parse_candles(&value),
        Some("ticker") => parse_ticker(&value),
        _ => Vec::new(),
    }
}

fn parse_candles(value: &serde_json::Value) -> Vec<MarketEvent> {
    let mut out = Vec::new();
    let Some(events) = value["events"].as_array() else {
        return out;
    };
    for event in events {
        let Some(candles) = event["candles"].as_array() else {
            continue;
        };
        for c in candles {
            let Some(symbol) = c["product_id"].as_str() else {
                continue;
            };
            let Some(start) = c["start"]
                .as_str()
                .and_then(|s| s.parse::<i64>().ok())
                .or_else(|| c["start"].as_i64())
            else {
                continue;
            };
            let Some(timestamp) = Utc.timestamp_opt(start, 0).single() else {
                continue;
            };
            let candle = Candle {
                timestamp,
                open: decimal_field(c, "open"),
                high: decimal_field(c, "high"),
                low: decimal_field(c, "low"),
                close: decimal_field(c, "close"),
                volume: decimal_field(c, "volume"),
            };
            if candle.is_valid() {
                out.push(MarketEvent::Candle {
                    symbol: symbol.to_string(),
                    tf: TimeFrame::M5,
                    candle,
                });
            }
        }
    }
    out
}

fn parse_ticker(value: &serde_json::Value) -> Vec<MarketEvent> {
    let mut out = Vec::new();
    let Some(events) = value["events"].as_array() else {
        return out;
    };
    for event in events {
        let Some(tickers) = event["tickers"].as_array() else {
            continue;
        };
        for t in tickers {
            let (Some(symbol), price) = (t["product_id"].as_str(), decimal_field(t, "price"))
            else {
                continue;
            };
            if price > Decimal::ZERO {
                out.push(MarketEvent::Tick {
                    symbol: symbol.to_string(),
                    price,
                    volume: decimal_field(t, "last_size"),
                });
            }
        }
    }
    out
}

fn decimal_field(value: &serde_json::Value, key: &str) -> Decimal {
    value[key]
        .as_str()
        .and_then(|s| Decimal::from_str(s).ok())
        .unwrap_or_default()
}
