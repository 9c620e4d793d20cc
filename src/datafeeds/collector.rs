use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use super::market_data::MarketData;
use crate::exchange::{MarketEvent, WsCommand};

/// Tier-1 data collector: owns the WebSocket subscription set and feeds
/// every tick/candle into the market-data hub.
pub struct WsCollector {
    data: Arc<MarketData>,
    cmd_tx: mpsc::Sender<WsCommand>,
    symbols: RwLock<BTreeSet<String>>,
}

impl WsCollector {
    /// Wire the collector to an already-started WebSocket task and spawn
    /// the event-drain loop.
    pub fn start(
        data: Arc<MarketData>,
        cmd_tx: mpsc::Sender<WsCommand>,
        mut event_rx: mpsc::Receiver<MarketEvent>,
        initial_symbols: Vec<String>,
    ) -> Arc<Self> {
        let collector = Arc::new(Self {
            data,
            cmd_tx,
            symbols: RwLock::new(initial_symbols.into_iter().collect()),
        });

        let drain = Arc::clone(&collector);
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                drain.handle_event(event).await;
            }
            debug!("[COLLECT] event channel closed");
        });

        collector
    }

    async fn handle_event(&self, event: MarketEvent) {
        match event {
            MarketEvent::Candle { symbol, tf, candle } => {
                self.data.health.touch_ws();
                self.data.apply_candle(&symbol, tf, candle, "ws").await;
            }
            MarketEvent::Tick { symbol, price, volume } => {
                self.data.apply_tick(&symbol, price, volume).await;
            }
            MarketEvent::Connected => {
                info!("[COLLECT] WS stream connected");
                self.data.health.touch_ws();
            }
            MarketEvent::Disconnected => {
                self.data.health.record_ws_reconnect();
                warn!("[COLLECT] WS stream dropped");
            }
            MarketEvent::Error(e) => {
                debug!("[COLLECT] WS error: {}", e);
            }
        }
    }

    /// Atomically swap the subscription set to `new_list`.
    ///
    /// Symbols that remain keep their buffers untouched; removals are sent
    /// before additions so the connection never exceeds its quota.
    pub async fn update_symbols(&self, new_list: Vec<String>) {
        let new_set: BTreeSet<String> = new_list.into_iter().collect();
        let (removed, added) = {
            let mut current = self.symbols.write().await;
            let removed: Vec<String> = current.difference(&new_set).cloned().collect();
            let added: Vec<String> = new_set.difference(&current).cloned().collect();
            *current = new_set;
            (removed, added)
        };

        if !removed.is_empty() {
            let _ = self.cmd_tx.send(WsCommand::Unsubscribe(removed)).await;
        }
        if !added.is_empty() {
            let _ = self.cmd_tx.send(WsCommand::Subscribe(added)).await;
        }
    }

    pub async fn current_symbols(&self) -> Vec<String> {
        self.symbols.read().await.iter().cloned().collect()
    }

    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(WsCommand::Shutdown).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datafeeds::health::DataHealth;
    use crate::datafeeds::tiers::{TierConfig, TierScheduler};
    use crate::storage::CandleStore;
    use crate::types::TimeFrame;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn collector_harness() -> (
        tempfile::TempDir,
        Arc<WsCollector>,
        mpsc::Receiver<WsCommand>,
        mpsc::Sender<MarketEvent>,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CandleStore::new(dir.path()));
        let scheduler = Arc::new(RwLock::new(TierScheduler::new(TierConfig::default())));
        let health = Arc::new(DataHealth::new());
        let data = Arc::new(MarketData::new(store, scheduler, health));

        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, event_rx) = mpsc::channel(16);
        let collector = WsCollector::start(
            data,
            cmd_tx,
            event_rx,
            vec!["BTC-USD".to_string(), "ETH-USD".to_string()],
        );
        (dir, collector, cmd_rx, event_tx)
    }

    #[tokio::test]
    async fn test_update_symbols_diffs_and_orders() {
        let (_dir, collector, mut cmd_rx, _event_tx) = collector_harness();

        collector
            .update_symbols(vec![
                "BTC-USD".to_string(),
                "SOL-USD".to_string(),
                "SOL-USD".to_string(), // duplicate collapses
            ])
            .await;

        // unsubscribe arrives before subscribe
        match cmd_rx.recv().await.unwrap() {
            WsCommand::Unsubscribe(removed) => assert_eq!(removed, vec!["ETH-USD".to_string()]),
            other => panic!("expected unsubscribe, got {:?}", other),
        }
        match cmd_rx.recv().await.unwrap() {
            WsCommand::Subscribe(added) => assert_eq!(added, vec!["SOL-USD".to_string()]),
            other => panic!("expected subscribe, got {:?}", other),
        }

        let current = collector.current_symbols().await;
        assert_eq!(current, vec!["BTC-USD".to_string(), "SOL-USD".to_string()]);
    }

    #[tokio::test]
    async fn test_unchanged_set_sends_nothing() {
        let (_dir, collector, mut cmd_rx, _event_tx) = collector_harness();
        collector
            .update_symbols(vec!["BTC-USD".to_string(), "ETH-USD".to_string()])
            .await;
        assert!(cmd_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_events_flow_into_buffers() {
        let (_dir, collector, _cmd_rx, event_tx) = collector_harness();
        event_tx
            .send(MarketEvent::Candle {
                symbol: "BTC-USD".to_string(),
                tf: TimeFrame::M5,
                candle: crate::types::Candle {
                    timestamp: Utc::now(),
                    open: dec!(100),
                    high: dec!(101),
                    low: dec!(99),
                    close: dec!(100.5),
                    volume: dec!(3),
                },
            })
            .await
            .unwrap();

        // drain task is async; give it a moment
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let buffer = collector.data.buffer_snapshot("BTC-USD").await.unwrap();
        assert_eq!(buffer.len(TimeFrame::M5), 1);
        assert!(collector.data.health.ws_ok(5));
    }
}
