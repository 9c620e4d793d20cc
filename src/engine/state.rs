use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::gates::GateCheck;
use crate::datafeeds::{BurstMetrics, TierStats};
use crate::storage::{atomic_write_json_logged, ModePaths};
use crate::types::{OrderEvent, RejectionRecord, TradingMode};

pub const STATE_VERSION: u32 = 2;

/// Engine lifecycle phase surfaced to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnginePhase {
    Booting,
    Warmup,
    Trading,
    Paused,
    ShuttingDown,
}

#[derive(Debug, Clone, Serialize)]
pub struct PositionView {
    pub symbol: String,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub size_usd: Decimal,
    pub size_qty: Decimal,
    pub stop_price: Decimal,
    pub tp1_price: Decimal,
    pub tp2_price: Decimal,
    pub pnl: Decimal,
    pub pnl_pct: Decimal,
    pub strategy_id: String,
    pub state: crate::types::PositionState,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignalView {
    pub ts: DateTime<Utc>,
    pub symbol: String,
    pub strategy_id: String,
    pub edge_score: f64,
    pub confluence: u32,
    pub accepted: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GateTraceView {
    pub ts: DateTime<Utc>,
    pub symbol: String,
    pub passed: bool,
    pub trace: Vec<GateCheck>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineCounters {
    pub ticks_last_5s: usize,
    pub candles_last_5s: usize,
    pub rest_requests: u64,
    pub rest_429s: u64,
    pub ws_reconnects: u64,
    pub rest_rate_degraded: bool,
    pub ws_ok: bool,
    pub ws_last_age_s: Option<i64>,
    pub truth_age_s: i64,
    pub truth_stale: bool,
    pub symbols_tracked: usize,
    pub signals_seen: u64,
    pub orders_placed: u64,
}

/// The versioned, read-only state bundle dashboards and probes consume.
/// Produced by the coordinator, published by atomic swap.
#[derive(Debug, Clone, Serialize)]
pub struct BotState {
    pub version: u32,
    pub ts: DateTime<Utc>,
    pub mode: TradingMode,
    pub phase: EnginePhase,
    pub portfolio_value: Decimal,
    pub cash_balance: Decimal,
    pub holdings_value: Decimal,
    pub daily_pnl: Decimal,
    pub positions: Vec<PositionView>,
    pub burst_leaderboard: Vec<BurstMetrics>,
    pub recent_signals: Vec<SignalView>,
    pub recent_orders: Vec<OrderEvent>,
    pub gate_traces: Vec<GateTraceView>,
    pub rejections: HashMap<String, u64>,
    pub recent_rejections: Vec<RejectionRecord>,
    pub tiers: Option<TierStats>,
    pub engine: EngineCounters,
    pub kill_switch: bool,
    pub kill_reason: String,
    pub focus_coin: Option<String>,
    pub current_signal: Option<SignalView>,
}

impl BotState {
    pub fn initial(mode: TradingMode) -> Self {
        Self {
            version: STATE_VERSION,
            ts: Utc::now(),
            mode,
            phase: EnginePhase::Booting,
            portfolio_value: Decimal::ZERO,
            cash_balance: Decimal::ZERO,
            holdings_value: Decimal::ZERO,
            daily_pnl: Decimal::ZERO,
            positions: Vec::new(),
            burst_leaderboard: Vec::new(),
            recent_signals: Vec::new(),
            recent_orders: Vec::new(),
            gate_traces: Vec::new(),
            rejections: HashMap::new(),
            recent_rejections: Vec::new(),
            tiers: None,
            engine: EngineCounters::default(),
            kill_switch: false,
            kill_reason: String::new(),
            focus_coin: None,
            current_signal: None,
        }
    }
}

/// Published state: writers swap in a fresh Arc, readers clone the Arc and
/// never block the coordinator.
pub struct StateStore {
    current: RwLock<Arc<BotState>>,
    status_path: std::path::PathBuf,
}

impl StateStore {
    pub fn new(mode: TradingMode, paths: &ModePaths) -> Self {
        Self {
            current: RwLock::new(Arc::new(BotState::initial(mode))),
            status_path: paths.status_path(),
        }
    }

    pub async fn publish(&self, state: BotState) {
        let state = Arc::new(state);
        *self.current.write().await = Arc::clone(&state);
    }

    pub async fn snapshot(&self) -> Arc<BotState> {
        Arc::clone(&*self.current.read().await)
    }

    /// Lightweight health snapshot for external probes.
    pub async fn write_status_file(&self) {
        let state = self.snapshot().await;
        let status = serde_json::json!({
            "version": state.version,
            "ts": state.ts.to_rfc3339(),
            "mode": state.mode,
            "phase": state.phase,
            "portfolio_value": state.portfolio_value,
            "positions": state.positions.len(),
            "ws_ok": state.engine.ws_ok,
            "rest_rate_degraded": state.engine.rest_rate_degraded,
            "truth_stale": state.engine.truth_stale,
            "kill_switch": state.kill_switch,
            "daily_pnl": state.daily_pnl,
        });
        atomic_write_json_logged(&self.status_path, &status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_publish_swaps_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ModePaths::with_root(dir.path(), TradingMode::Paper);
        let store = StateStore::new(TradingMode::Paper, &paths);

        let before = store.snapshot().await;
        assert_eq!(before.phase, EnginePhase::Booting);

        let mut next = BotState::initial(TradingMode::Paper);
        next.phase = EnginePhase::Trading;
        next.portfolio_value = dec!(1000);
        store.publish(next).await;

        let after = store.snapshot().await;
        assert_eq!(after.phase, EnginePhase::Trading);
        assert_eq!(after.portfolio_value, dec!(1000));
        // old snapshot stays valid for readers that hold it
        assert_eq!(before.phase, EnginePhase::Booting);
    }

    #[tokio::test]
    async fn test_status_file_written() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ModePaths::with_root(dir.path(), TradingMode::Paper);
        let store = StateStore::new(TradingMode::Paper, &paths);
        store.write_status_file().await;

        let body = std::fs::read_to_string(paths.status_path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["mode"], "paper");
        assert_eq!(value["phase"], "booting");
    }

    #[test]
    fn test_state_serializes_with_iso_timestamps() {
        let state = BotState::initial(TradingMode::Live);
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["version"], STATE_VERSION);
        assert!(json["ts"].as_str().unwrap().contains('T'));
        assert_eq!(json["mode"], "live");
    }
}
