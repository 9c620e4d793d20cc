use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

use super::executor::{ExecError, Executor, StopOrderManager};
use super::registry::PositionRegistry;
use crate::config::Settings;
use crate::datafeeds::MarketData;
use crate::risk::{Cooldowns, DailyStats};
use crate::storage::EventLog;
use crate::types::{
    OrderEvent, OrderEventType, Position, PositionState, Side, TradePlan, TradingMode,
};

/// Why the monitor closed (or partially closed) a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    StopLoss,
    TakeProfit1,
    TakeProfit2,
    TrailingStop,
    TimeStop,
    ThesisInvalidated,
    Manual,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit1 => "tp1_partial",
            ExitReason::TakeProfit2 => "tp2",
            ExitReason::TrailingStop => "trailing_stop",
            ExitReason::TimeStop => "time_stop",
            ExitReason::ThesisInvalidated => "thesis_invalidated",
            ExitReason::Manual => "manual",
        }
    }
}

/// Routes gated plans into fills and owns the open-position lifecycle:
/// entries (including stacking merges), brackets, the monitor loop's
/// exits, and the accounting that follows every close.
pub struct OrderRouter {
    mode: TradingMode,
    executor: Arc<dyn Executor>,
    stops: Arc<dyn StopOrderManager>,
    registry: Arc<RwLock<PositionRegistry>>,
    data: Arc<MarketData>,
    daily_stats: Arc<RwLock<DailyStats>>,
    cooldowns: Arc<RwLock<Cooldowns>>,
    event_log: Arc<EventLog>,
    settings: Arc<RwLock<Settings>>,
    /// Closed-position notifications for strategy resets.
    reset_tx: mpsc::UnboundedSender<String>,
    /// Order events for the UI stream.
    event_tx: mpsc::UnboundedSender<OrderEvent>,
}

impl OrderRouter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mode: TradingMode,
        executor: Arc<dyn Executor>,
        stops: Arc<dyn StopOrderManager>,
        registry: Arc<RwLock<PositionRegistry>>,
        data: Arc<MarketData>,
        daily_stats: Arc<RwLock<DailyStats>>,
        cooldowns: Arc<RwLock<Cooldowns>>,
        event_log: Arc<EventLog>,
        settings: Arc<RwLock<Settings>>,
        reset_tx: mpsc::UnboundedSender<String>,
        event_tx: mpsc::UnboundedSender<OrderEvent>,
    ) -> Self {
        Self {
            mode,
            executor,
            stops,
            registry,
            data,
            daily_stats,
            cooldowns,
            event_log,
            settings,
            reset_tx,
            event_tx,
        }
    }

    fn emit(&self, event: OrderEvent) {
        self.event_log.log_trade(&event);
        let _ = self.event_tx.send(event);
    }

    /// Execute a plan that survived the funnel. On fill the position is
    /// registered (or merged into an existing one when stacking) and the
    /// protective stop armed.
    pub async fn open_position(&self, plan: &TradePlan) -> Result<Position, ExecError> {
        let symbol = plan.intent.symbol.clone();
        let fill = self.executor.execute_buy(plan).await?;

        let position = {
            let mut registry = self.registry.write().await;
            if let Some(existing) = registry.get_mut(&symbol) {
                // stacking: merge at weighted entry, bump the add counter
                let total_qty = existing.size_qty + fill.qty;
                if total_qty > Decimal::ZERO {
                    existing.entry_price = (existing.entry_price * existing.size_qty
                        + fill.price * fill.qty)
                        / total_qty;
                }
                existing.size_qty = total_qty;
                existing.size_usd += fill.quote_spent;
                existing.cost_basis += fill.quote_spent;
                existing.stack_count += 1;
                existing.current_price = fill.price;
                let merged = existing.clone();
                registry.save();
                merged
            } else {
                let deadline = Utc::now() + ChronoDuration::minutes(plan.time_stop_min as i64);
                let mut position = Position::new(
                    &symbol,
                    fill.price,
                    fill.quote_spent,
                    fill.qty,
                    plan.stop_price,
                    plan.tp1_price,
                    plan.tp2_price,
                    deadline,
                    &plan.intent.strategy_id,
                );
                position.trail_pct = self.settings.read().await.trail_lock_pct;
                registry.add_position(position.clone());
                position
            }
        };

        self.cooldowns.write().await.record_order(&symbol);
        self.stops.arm_stop(&position).await;

        self.emit(OrderEvent {
            event_type: OrderEventType::Open,
            symbol: symbol.clone(),
            side: Side::Buy,
            mode: self.mode,
            price: position.current_price,
            size_usd: fill.quote_spent,
            size_qty: fill.qty,
            pnl: None,
            pnl_pct: None,
            timestamp: Utc::now(),
            reason: plan.intent.strategy_id.clone(),
        });
        info!(
            "[ROUTER] opened {} {} ${} ({})",
            symbol, plan.tier, fill.quote_spent, plan.intent.strategy_id
        );
        Ok(position)
    }

    /// Close a fraction (0..=1] of a position. Full closes clear the
    /// registry entry, record daily PnL, and request a strategy reset.
    pub async fn close_position(
        &self,
        symbol: &str,
        fraction: Decimal,
        reason: ExitReason,
    ) -> Result<Decimal, ExecError> {
        let (qty, entry_price, full_close) = {
            let registry = self.registry.read().await;
            let Some(position) = registry.get(symbol) else {
                return Err(ExecError::Rejected(format!("no position for {}", symbol)));
            };
            let fraction = fraction.clamp(dec!(0.01), Decimal::ONE);
            let qty = position.size_qty * fraction;
            (qty, position.entry_price, fraction >= Decimal::ONE)
        };

        let fill = self.executor.execute_sell(symbol, qty, reason.as_str()).await?;
        let pnl = (fill.price - entry_price) * fill.qty;
        let pnl_pct = if entry_price.is_zero() {
            Decimal::ZERO
        } else {
            (fill.price - entry_price) / entry_price * dec!(100)
        };

        if full_close {
            let removed = self.registry.write().await.remove_position(symbol);
            let total_pnl = removed
                .map(|p| p.realized_pnl + pnl)
                .unwrap_or(pnl);
            self.daily_stats.write().await.record_trade(total_pnl);
            let _ = self.reset_tx.send(symbol.to_string());
            self.emit(OrderEvent {
                event_type: OrderEventType::Close,
                symbol: symbol.to_string(),
                side: Side::Sell,
                mode: self.mode,
                price: fill.price,
                size_usd: fill.quote_spent,
                size_qty: fill.qty,
                pnl: Some(total_pnl),
                pnl_pct: Some(pnl_pct),
                timestamp: Utc::now(),
                reason: reason.as_str().to_string(),
            });
            info!(
                "[ROUTER] closed {} @ {} pnl={} ({})",
                symbol,
                fill.price,
                total_pnl,
                reason.as_str()
            );
        } else {
            let mut registry = self.registry.write().await;
            if let Some(position) = registry.get_mut(symbol) {
                position.size_qty -= fill.qty;
                position.size_usd -= fill.quote_spent;
                position.cost_basis =
                    (position.cost_basis - entry_price * fill.qty).max(Decimal::ZERO);
                position.realized_pnl += pnl;
                position.state = PositionState::PartialClosed;
            }
            registry.save();
            self.emit(OrderEvent {
                event_type: OrderEventType::PartialClose,
                symbol: symbol.to_string(),
                side: Side::Sell,
                mode: self.mode,
                price: fill.price,
                size_usd: fill.quote_spent,
                size_qty: fill.qty,
                pnl: Some(pnl),
                pnl_pct: Some(pnl_pct),
                timestamp: Utc::now(),
                reason: reason.as_str().to_string(),
            });
        }
        Ok(pnl)
    }

    /// Close every open position (kill switch / shutdown path).
    pub async fn close_all(&self, reason: ExitReason) -> usize {
        let symbols: Vec<String> = {
            let registry = self.registry.read().await;
            registry.active_positions().keys().cloned().collect()
        };
        let mut closed = 0;
        for symbol in symbols {
            match self.close_position(&symbol, Decimal::ONE, reason).await {
                Ok(_) => closed += 1,
                Err(e) => warn!("[ROUTER] close_all failed for {}: {}", symbol, e),
            }
        }
        closed
    }

    /// One monitoring pass over open positions: marks, exits, trailing.
    /// Runs at ~1 Hz from the monitor loop.
    pub async fn monitor_positions(&self) {
        let settings = self.settings.read().await.clone();
        let symbols: Vec<String> = {
            let registry = self.registry.read().await;
            registry
                .active_positions()
                .keys()
                .chain(registry.dust_positions().keys())
                .cloned()
                .collect()
        };

        for symbol in symbols {
            let Some(price) = self.data.last_price(&symbol).await else {
                continue;
            };
            let trend_15m = self.data_trend(&symbol).await;
            let action = {
                let mut registry = self.registry.write().await;
                registry.update_position_value(&symbol, price);
                let Some(position) = registry.get_mut(&symbol) else {
                    continue;
                };
                Self::decide_exit(position, price, &settings, trend_15m)
            };

            match action {
                ExitAction::None => {}
                ExitAction::Partial(fraction, reason) => {
                    if let Err(e) = self.close_position(&symbol, fraction, reason).await {
                        warn!("[ROUTER] partial exit failed for {}: {}", symbol, e);
                    } else {
                        // after TP1, the remainder rides with a breakeven stop
                        let mut registry = self.registry.write().await;
                        if let Some(position) = registry.get_mut(&symbol) {
                            let be = position.entry_price
                                * (Decimal::ONE + settings.fee_buffer_pct);
                            position.stop_price = position.stop_price.max(be);
                            position.breakeven_locked = true;
                        }
                        registry.save();
                    }
                }
                ExitAction::Full(reason) => {
                    if let Err(e) = self.close_position(&symbol, Decimal::ONE, reason).await {
                        warn!("[ROUTER] exit failed for {}: {}", symbol, e);
                    }
                }
            }
        }
    }

    async fn data_trend(&self, symbol: &str) -> f64 {
        match self.data.buffer_snapshot(symbol).await {
            Some(buffer) => crate::features::compute_features(&buffer, 0.0).trend_15m,
            None => 0.0,
        }
    }

    /// Pure exit decision for one position at one mark. Also mutates
    /// trailing/breakeven bookkeeping on the position.
    fn decide_exit(
        position: &mut Position,
        price: Decimal,
        settings: &Settings,
        trend_15m: f64,
    ) -> ExitAction {
        position.update_price(price);

        // hard stop (includes trailed/breakeven stop)
        if price <= position.stop_price {
            let reason = if position.trailing_active {
                ExitReason::TrailingStop
            } else {
                ExitReason::StopLoss
            };
            return ExitAction::Full(reason);
        }

        // final target
        if price >= position.tp2_price {
            return ExitAction::Full(ExitReason::TakeProfit2);
        }

        // first target: partial out once
        if position.state == PositionState::Open && price >= position.tp1_price {
            return ExitAction::Partial(settings.tp1_partial_pct, ExitReason::TakeProfit1);
        }

        let r = position.r_multiple();
        use rust_decimal::prelude::ToPrimitive;
        let r_f = r.to_f64().unwrap_or(0.0);

        // breakeven lock
        if !position.breakeven_locked && r_f >= settings.trail_be_trigger_r {
            let be = position.entry_price * (Decimal::ONE + settings.fee_buffer_pct);
            if be > position.stop_price {
                position.stop_price = be;
            }
            position.breakeven_locked = true;
        }

        // trailing activation and ratchet
        if !position.trailing_active && r_f >= settings.trail_start_r {
            position.trailing_active = true;
            position.trail_high = price;
        }
        if position.trailing_active {
            position.trail_high = position.trail_high.max(price);
            // lock a fraction of the open gain
            let locked_gain =
                (position.trail_high - position.entry_price) * settings.trail_lock_pct;
            let trail_stop = position.entry_price + locked_gain;
            if trail_stop > position.stop_price {
                position.stop_price = trail_stop;
            }
        }

        // time stop
        if Utc::now() >= position.time_stop_deadline {
            return ExitAction::Full(ExitReason::TimeStop);
        }

        // thesis invalidation: short-term trend flipped hard against a
        // losing position
        let losing = price < position.entry_price;
        if losing && trend_15m < -0.02 {
            return ExitAction::Full(ExitReason::ThesisInvalidated);
        }

        ExitAction::None
    }

    /// Stop health check on its own cadence (live only does real work).
    pub async fn stop_health_check(&self) -> usize {
        let positions: Vec<Position> = {
            let registry = self.registry.read().await;
            registry.active_positions().values().cloned().collect()
        };
        self.stops.health_check(&positions).await
    }
}

#[derive(Debug, PartialEq)]
enum ExitAction {
    None,
    Partial(Decimal, ExitReason),
    Full(ExitReason),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::gates::test_support::open_position;
    use crate::portfolio::PortfolioManager;

    fn settings() -> Settings {
        Settings::default()
    }

    fn position() -> Position {
        // entry 100, stop 97, tp1 105, tp2 108
        open_position("BTC-USD")
    }

    #[test]
    fn test_stop_loss_fires() {
        let mut pos = position();
        let action = OrderRouter::decide_exit(&mut pos, dec!(96.9), &settings(), 0.0);
        assert_eq!(action, ExitAction::Full(ExitReason::StopLoss));
        // exactly at the stop also exits
        let mut pos = position();
        let action = OrderRouter::decide_exit(&mut pos, dec!(97), &settings(), 0.0);
        assert_eq!(action, ExitAction::Full(ExitReason::StopLoss));
    }

    #[test]
    fn test_tp1_partial_then_tp2_full() {
        let mut pos = position();
        let action = OrderRouter::decide_exit(&mut pos, dec!(105.5), &settings(), 0.0);
        assert_eq!(
            action,
            ExitAction::Partial(settings().tp1_partial_pct, ExitReason::TakeProfit1)
        );

        // after the partial the state advances; tp1 no longer re-fires
        pos.state = PositionState::PartialClosed;
        let action = OrderRouter::decide_exit(&mut pos, dec!(106), &settings(), 0.0);
        assert_eq!(action, ExitAction::None);

        let action = OrderRouter::decide_exit(&mut pos, dec!(108.2), &settings(), 0.0);
        assert_eq!(action, ExitAction::Full(ExitReason::TakeProfit2));
    }

    #[test]
    fn test_breakeven_lock_at_one_r() {
        let mut pos = position();
        pos.state = PositionState::PartialClosed; // keep tp1 out of the way
        // +1R = 103 triggers breakeven (entry * (1 + fee buffer))
        let action = OrderRouter::decide_exit(&mut pos, dec!(103), &settings(), 0.0);
        assert_eq!(action, ExitAction::None);
        assert!(pos.breakeven_locked);
        assert!(pos.stop_price >= dec!(100));
        assert!(pos.stop_price < dec!(101));
    }

    #[test]
    fn test_trailing_ratchets_and_exits() {
        let mut pos = position();
        pos.state = PositionState::PartialClosed;
        let s = settings();
        // +1.5R = 104.5 activates trailing
        OrderRouter::decide_exit(&mut pos, dec!(104.5), &s, 0.0);
        assert!(pos.trailing_active);

        // push higher: stop ratchets to entry + 50% of open gain
        OrderRouter::decide_exit(&mut pos, dec!(106.5), &s, 0.0);
        assert_eq!(pos.trail_high, dec!(106.5));
        assert_eq!(pos.stop_price, dec!(103.25));

        // pullback through the trailed stop exits as trailing stop
        let action = OrderRouter::decide_exit(&mut pos, dec!(103.0), &s, 0.0);
        assert_eq!(action, ExitAction::Full(ExitReason::TrailingStop));
    }

    #[test]
    fn test_time_stop() {
        let mut pos = position();
        pos.time_stop_deadline = Utc::now() - ChronoDuration::minutes(1);
        let action = OrderRouter::decide_exit(&mut pos, dec!(101), &settings(), 0.0);
        assert_eq!(action, ExitAction::Full(ExitReason::TimeStop));
    }

    #[test]
    fn test_thesis_invalidation_only_when_losing() {
        let mut pos = position();
        // losing and trend flipped hard down
        let action = OrderRouter::decide_exit(&mut pos, dec!(98.5), &settings(), -0.03);
        assert_eq!(action, ExitAction::Full(ExitReason::ThesisInvalidated));

        // winning position rides the same trend reading
        let mut pos = position();
        let action = OrderRouter::decide_exit(&mut pos, dec!(101.5), &settings(), -0.03);
        assert_eq!(action, ExitAction::None);
    }

    #[test]
    fn test_quiet_market_no_action() {
        let mut pos = position();
        let action = OrderRouter::decide_exit(&mut pos, dec!(100.5), &settings(), 0.0);
        assert_eq!(action, ExitAction::None);
        assert!(!pos.breakeven_locked);
        assert!(!pos.trailing_active);
    }

    mod paper_flow {
        use super::*;
        use crate::datafeeds::{DataHealth, MarketData, TierConfig, TierScheduler};
        use crate::engine::executor::PaperExecutor;
        use crate::portfolio::PaperPortfolio;
        use crate::risk::CooldownStatus;
        use crate::storage::{CandleStore, ModePaths};
        use crate::types::{Candle, SizingTier, TimeFrame, TradePlan};
        use chrono::Utc;

        struct Harness {
            _dir: tempfile::TempDir,
            router: OrderRouter,
            data: Arc<MarketData>,
            registry: Arc<RwLock<PositionRegistry>>,
            daily_stats: Arc<RwLock<DailyStats>>,
            cooldowns: Arc<RwLock<Cooldowns>>,
            portfolio: Arc<PaperPortfolio>,
            reset_rx: mpsc::UnboundedReceiver<String>,
            event_rx: mpsc::UnboundedReceiver<OrderEvent>,
        }

        async fn harness() -> Harness {
            let dir = tempfile::tempdir().unwrap();
            let paths = ModePaths::with_root(dir.path(), TradingMode::Paper);
            let boot = Settings::default();

            let store = Arc::new(CandleStore::new(paths.candles_dir()));
            let scheduler = Arc::new(RwLock::new(TierScheduler::new(TierConfig::default())));
            let health = Arc::new(DataHealth::new());
            let data = Arc::new(MarketData::new(store, scheduler, health));
            let portfolio = Arc::new(PaperPortfolio::new(
                &paths,
                Arc::clone(&data),
                dec!(1000),
                true,
            ));
            let executor = Arc::new(PaperExecutor::new(
                Arc::clone(&portfolio),
                Arc::clone(&data),
                Decimal::ZERO,
            ));
            let registry = Arc::new(RwLock::new(PositionRegistry::load(&paths, &boot)));
            let daily_stats = Arc::new(RwLock::new(DailyStats::load(&paths)));
            let cooldowns = Arc::new(RwLock::new(Cooldowns::load(&paths, 120, 900)));
            let settings = Arc::new(RwLock::new(boot));
            let (reset_tx, reset_rx) = mpsc::unbounded_channel();
            let (event_tx, event_rx) = mpsc::unbounded_channel();

            let router = OrderRouter::new(
                TradingMode::Paper,
                executor,
                Arc::new(crate::engine::executor::NullStopManager),
                Arc::clone(&registry),
                Arc::clone(&data),
                Arc::clone(&daily_stats),
                Arc::clone(&cooldowns),
                Arc::new(crate::storage::EventLog::new(paths.clone())),
                settings,
                reset_tx,
                event_tx,
            );
            Harness {
                _dir: dir,
                router,
                data,
                registry,
                daily_stats,
                cooldowns,
                portfolio,
                reset_rx,
                event_rx,
            }
        }

        async fn set_price(data: &MarketData, symbol: &str, price: Decimal) {
            data.apply_candle(
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

        fn plan(symbol: &str) -> TradePlan {
            TradePlan {
                intent: crate::engine::gates::test_support::intent(symbol, 72.0, 10.0),
                size_usd: dec!(15),
                stop_price: dec!(97),
                tp1_price: dec!(105),
                tp2_price: dec!(108),
                time_stop_min: 120,
                rr_ratio: 5.0 / 3.0,
                tier: SizingTier::Strong,
                entry_score: 72.0,
                available_budget: dec!(850),
                session_mult: 1.0,
                current_exposure: Decimal::ZERO,
            }
        }

        #[tokio::test]
        async fn test_open_fills_registers_and_cools_down() {
            let mut h = harness().await;
            set_price(&h.data, "BTC-USD", dec!(100)).await;

            let position = h.router.open_position(&plan("BTC-USD")).await.unwrap();
            assert_eq!(position.entry_price, dec!(100));
            assert_eq!(position.size_qty, dec!(0.15));

            assert!(h.registry.read().await.has_active_position("BTC-USD"));
            assert_eq!(h.portfolio.get_available_balance().await, dec!(985.00));
            assert!(matches!(
                h.cooldowns.read().await.status("BTC-USD"),
                CooldownStatus::Hard { .. }
            ));
            let event = h.event_rx.recv().await.unwrap();
            assert_eq!(event.event_type, OrderEventType::Open);
            assert_eq!(event.size_usd, dec!(15.00));
        }

        #[tokio::test]
        async fn test_full_close_records_pnl_and_resets() {
            let mut h = harness().await;
            set_price(&h.data, "ETH-USD", dec!(100)).await;
            h.router.open_position(&plan("ETH-USD")).await.unwrap();
            let _ = h.event_rx.recv().await;

            set_price(&h.data, "ETH-USD", dec!(110)).await;
            let pnl = h
                .router
                .close_position("ETH-USD", Decimal::ONE, ExitReason::TakeProfit2)
                .await
                .unwrap();
            assert_eq!(pnl, dec!(1.50)); // 0.15 qty x $10

            assert!(!h.registry.read().await.has_position("ETH-USD"));
            assert_eq!(h.daily_stats.read().await.total_pnl, dec!(1.50));
            assert_eq!(h.reset_rx.recv().await.unwrap(), "ETH-USD");
            let event = h.event_rx.recv().await.unwrap();
            assert_eq!(event.event_type, OrderEventType::Close);
            assert_eq!(event.pnl, Some(dec!(1.50)));
        }

        #[tokio::test]
        async fn test_partial_close_keeps_remainder() {
            let mut h = harness().await;
            set_price(&h.data, "SOL-USD", dec!(100)).await;
            h.router.open_position(&plan("SOL-USD")).await.unwrap();
            let _ = h.event_rx.recv().await;

            set_price(&h.data, "SOL-USD", dec!(105)).await;
            h.router
                .close_position("SOL-USD", dec!(0.5), ExitReason::TakeProfit1)
                .await
                .unwrap();

            let registry = h.registry.read().await;
            let position = registry.get("SOL-USD").unwrap();
            assert_eq!(position.state, PositionState::PartialClosed);
            assert_eq!(position.size_qty, dec!(0.075));
            assert!(position.realized_pnl > Decimal::ZERO);
        }

        #[tokio::test]
        async fn test_stacking_merge_weights_entry() {
            let mut h = harness().await;
            set_price(&h.data, "BTC-USD", dec!(100)).await;
            h.router.open_position(&plan("BTC-USD")).await.unwrap();
            let _ = h.event_rx.recv().await;

            set_price(&h.data, "BTC-USD", dec!(110)).await;
            let merged = h.router.open_position(&plan("BTC-USD")).await.unwrap();
            assert_eq!(merged.stack_count, 1);
            // weighted entry sits between the two fills
            assert!(merged.entry_price > dec!(100) && merged.entry_price < dec!(110));
            assert!(merged.cost_basis > dec!(29));
        }

        #[tokio::test]
        async fn test_close_all_sweeps_positions() {
            let mut h = harness().await;
            for symbol in ["BTC-USD", "ETH-USD"] {
                set_price(&h.data, symbol, dec!(100)).await;
                h.router.open_position(&plan(symbol)).await.unwrap();
                let _ = h.event_rx.recv().await;
            }
            let closed = h.router.close_all(ExitReason::Manual).await;
            assert_eq!(closed, 2);
            assert_eq!(h.registry.read().await.active_positions().len(), 0);
        }
    }
}
