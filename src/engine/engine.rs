use anyhow::Result;
use rust_decimal::Decimal;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{error, info, warn};

use super::batch::SignalBatcher;
use super::controller::{CommandResult, ControlCommand, ControlHandle, ControlRequest};
use super::executor::{Executor, LiveExecutor, LiveStopManager, NullStopManager, PaperExecutor, StopOrderManager};
use super::gates::{check_all_gates, GateContext, GateResult};
use super::registry::PositionRegistry;
use super::router::{ExitReason, OrderRouter};
use super::sizer::plan_trade;
use super::state::{
    BotState, EngineCounters, EnginePhase, GateTraceView, PositionView, SignalView, StateStore,
};
use crate::config::{RuntimeConfigStore, Settings};
use crate::datafeeds::{
    BackgroundBackfill, DataHealth, MarketData, RestPoller, TierScheduler, UniverseScanner,
    WsCollector,
};
use crate::exchange::{CoinbaseClient, CoinbaseWebSocket};
use crate::features::compute_features;
use crate::portfolio::{LivePortfolio, PaperPortfolio, PortfolioManager};
use crate::risk::{
    CircuitBreaker, Cooldowns, DailyStats, DefaultIntelligence, Intelligence, KillSwitch,
    RejectionTracker,
};
use crate::storage::{CandleStore, EventLog, ModePaths};
use crate::strategies::{MarketContext, StrategyOrchestrator};
use crate::types::{Intent, OrderEvent, TradingMode};

const TICK_INTERVAL: std::time::Duration = std::time::Duration::from_secs(1);
const MONITOR_INTERVAL: std::time::Duration = std::time::Duration::from_secs(1);
const SYNC_INTERVAL: std::time::Duration = std::time::Duration::from_secs(10);
const SCANNER_CHECK_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);
const STATE_PUBLISH_INTERVAL: std::time::Duration = std::time::Duration::from_secs(2);
const RECENT_SIGNALS_CAP: usize = 50;
const GATE_TRACES_CAP: usize = 25;
const RECENT_ORDERS_CAP: usize = 50;

/// Concrete instances chosen at boot, wired once. No runtime introspection:
/// paper and live differ only in which executor/portfolio/stop manager the
/// container holds.
pub struct TradingContainer {
    pub mode: TradingMode,
    pub paths: ModePaths,
    pub settings: Arc<RwLock<Settings>>,
    pub config_store: Arc<RuntimeConfigStore>,
    pub client: CoinbaseClient,
    pub data: Arc<MarketData>,
    pub scheduler: Arc<RwLock<TierScheduler>>,
    pub health: Arc<DataHealth>,
    pub scanner: Arc<UniverseScanner>,
    pub orchestrator: Arc<Mutex<StrategyOrchestrator>>,
    pub intelligence: Arc<DefaultIntelligence>,
    pub registry: Arc<RwLock<PositionRegistry>>,
    pub daily_stats: Arc<RwLock<DailyStats>>,
    pub circuit_breaker: Arc<RwLock<CircuitBreaker>>,
    pub cooldowns: Arc<RwLock<Cooldowns>>,
    pub rejections: Arc<RwLock<RejectionTracker>>,
    pub kill_switch: Arc<KillSwitch>,
    pub portfolio: Arc<dyn PortfolioManager>,
    pub paper_portfolio: Option<Arc<PaperPortfolio>>,
    pub executor: Arc<dyn Executor>,
    pub stops: Arc<dyn StopOrderManager>,
    pub event_log: Arc<EventLog>,
    pub state_store: Arc<StateStore>,
}

impl TradingContainer {
    /// Assemble every component for the configured mode.
    pub async fn build(settings: Settings) -> Result<Self> {
        let mode = settings.mode;
        let paths = ModePaths::new(mode);
        let event_log = Arc::new(EventLog::new(paths.clone()));

        let client = match (&settings.api_key, &settings.api_secret) {
            (Some(key), Some(secret)) if mode == TradingMode::Live => {
                CoinbaseClient::with_credentials(key, secret)
                    .map_err(|e| anyhow::anyhow!("exchange credentials: {}", e))?
            }
            (Some(key), Some(secret)) => CoinbaseClient::with_credentials(key, secret)
                .unwrap_or_else(|_| CoinbaseClient::public_only()),
            _ => CoinbaseClient::public_only(),
        };

        let settings = Arc::new(RwLock::new(settings));
        let config_store = Arc::new(RuntimeConfigStore::new(Arc::clone(&settings), &paths).await);

        let store = Arc::new(CandleStore::new(paths.candles_dir()));
        let scheduler = Arc::new(RwLock::new(TierScheduler::default()));
        let health = Arc::new(DataHealth::new());
        let data = Arc::new(MarketData::new(
            Arc::clone(&store),
            Arc::clone(&scheduler),
            Arc::clone(&health),
        ));

        let scanner = Arc::new(UniverseScanner::new(
            client.clone(),
            Arc::clone(&data),
            Arc::clone(&settings),
        ));
        let orchestrator = Arc::new(Mutex::new(StrategyOrchestrator::default()));

        let boot = settings.read().await.clone();
        let intelligence = Arc::new(DefaultIntelligence::new(boot.entry_score_min));
        let registry = Arc::new(RwLock::new(PositionRegistry::load(&paths, &boot)));
        let daily_stats = Arc::new(RwLock::new(DailyStats::load(&paths)));
        let circuit_breaker = Arc::new(RwLock::new(CircuitBreaker::new(
            boot.circuit_breaker_max_failures,
            boot.circuit_breaker_reset_seconds,
        )));
        let cooldowns = Arc::new(RwLock::new(Cooldowns::load(
            &paths,
            boot.order_cooldown_min_seconds,
            boot.order_cooldown_seconds,
        )));
        let rejections = Arc::new(RwLock::new(RejectionTracker::new(Some(EventLog::new(
            paths.clone(),
        )))));
        let kill_switch = Arc::new(KillSwitch::new());
        let state_store = Arc::new(StateStore::new(mode, &paths));

        let (portfolio, paper_portfolio, executor, stops): (
            Arc<dyn PortfolioManager>,
            Option<Arc<PaperPortfolio>>,
            Arc<dyn Executor>,
            Arc<dyn StopOrderManager>,
        ) = match mode {
            TradingMode::Paper => {
                let paper = Arc::new(PaperPortfolio::new(
                    &paths,
                    Arc::clone(&data),
                    boot.paper_start_balance,
                    boot.paper_reset_state,
                ));
                let executor = Arc::new(PaperExecutor::new(
                    Arc::clone(&paper),
                    Arc::clone(&data),
                    boot.paper_slippage_bps,
                ));
                let portfolio: Arc<dyn PortfolioManager> = Arc::clone(&paper) as Arc<dyn PortfolioManager>;
                let executor: Arc<dyn Executor> = executor;
                let stops: Arc<dyn StopOrderManager> = Arc::new(NullStopManager);
                (portfolio, Some(paper), executor, stops)
            }
            TradingMode::Live => {
                let live = Arc::new(LivePortfolio::new(client.clone(), boot.truth_staleness_s));
                let executor = Arc::new(LiveExecutor::new(
                    client.clone(),
                    boot.use_limit_orders,
                    boot.limit_buffer_pct,
                ));
                let portfolio: Arc<dyn PortfolioManager> = live;
                let executor: Arc<dyn Executor> = executor;
                let stops: Arc<dyn StopOrderManager> = Arc::new(LiveStopManager::new(client.clone()));
                (portfolio, None, executor, stops)
            }
        };

        Ok(Self {
            mode,
            paths,
            settings,
            config_store,
            client,
            data,
            scheduler,
            health,
            scanner,
            orchestrator,
            intelligence,
            registry,
            daily_stats,
            circuit_breaker,
            cooldowns,
            rejections,
            kill_switch,
            portfolio,
            paper_portfolio,
            executor,
            stops,
            event_log,
            state_store,
        })
    }
}

/// The coordinating loop plus its long-running tasks.
pub struct TradingEngine {
    container: TradingContainer,
    router: Arc<OrderRouter>,
    collector: Arc<WsCollector>,
    stop_tx: Arc<watch::Sender<bool>>,
    stop_rx: watch::Receiver<bool>,
    control_rx: Option<mpsc::Receiver<ControlRequest>>,
    control_handle: ControlHandle,
    reset_rx: Option<mpsc::UnboundedReceiver<String>>,
    order_event_rx: Option<mpsc::UnboundedReceiver<OrderEvent>>,
    signals_seen: Arc<AtomicU64>,
    orders_placed: Arc<AtomicU64>,
    recent_signals: VecDeque<SignalView>,
    recent_orders: VecDeque<OrderEvent>,
    gate_traces: VecDeque<GateTraceView>,
    current_signal: Option<SignalView>,
    batcher: SignalBatcher,
    phase: EnginePhase,
}

impl TradingEngine {
    pub async fn new(container: TradingContainer) -> Result<Self> {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (control_handle, control_rx) = ControlHandle::channel(64);
        let (reset_tx, reset_rx) = mpsc::unbounded_channel();
        let (order_event_tx, order_event_rx) = mpsc::unbounded_channel();

        let ws = CoinbaseWebSocket::new(container.client.clone());
        let initial_tier1 = container.scheduler.read().await.tier1_symbols();
        let (cmd_tx, event_rx) = ws.start(initial_tier1.clone());
        let collector = WsCollector::start(
            Arc::clone(&container.data),
            cmd_tx,
            event_rx,
            initial_tier1,
        );

        let router = Arc::new(OrderRouter::new(
            container.mode,
            Arc::clone(&container.executor),
            Arc::clone(&container.stops),
            Arc::clone(&container.registry),
            Arc::clone(&container.data),
            Arc::clone(&container.daily_stats),
            Arc::clone(&container.cooldowns),
            Arc::clone(&container.event_log),
            Arc::clone(&container.settings),
            reset_tx,
            order_event_tx,
        ));

        let batch_window = container.settings.read().await.batch_window_seconds;

        Ok(Self {
            container,
            router,
            collector,
            stop_tx: Arc::new(stop_tx),
            stop_rx,
            control_rx: Some(control_rx),
            control_handle,
            reset_rx: Some(reset_rx),
            order_event_rx: Some(order_event_rx),
            signals_seen: Arc::new(AtomicU64::new(0)),
            orders_placed: Arc::new(AtomicU64::new(0)),
            recent_signals: VecDeque::new(),
            recent_orders: VecDeque::new(),
            gate_traces: VecDeque::new(),
            current_signal: None,
            batcher: SignalBatcher::new(batch_window),
            phase: EnginePhase::Booting,
        })
    }

    pub fn control_handle(&self) -> ControlHandle {
        self.control_handle.clone()
    }

    /// Boot sequence: rehydrate buffers, first universe scan, spawn tasks,
    /// then run the coordinator until shutdown.
    pub async fn run(mut self) -> Result<()> {
        info!("[ENGINE] starting in {} mode", self.container.mode);

        // restart recovery before any live data lands
        let known = self.container.scheduler.read().await.known_symbols();
        if !known.is_empty() {
            self.container.data.rehydrate(&known, 4).await;
        }

        // first universe build seeds the tiers and the WS subscription
        match self.container.scanner.scan().await {
            Ok(ranked) => {
                // reassignment returns removals-before-additions; the
                // collector applies them in that order
                let _changes = self.container.scheduler.write().await.reassign_tiers(&ranked);
                let tier1 = self.container.scheduler.read().await.tier1_symbols();
                self.collector.update_symbols(tier1.clone()).await;
                self.container.data.rehydrate(&tier1, 4).await;
            }
            Err(e) => warn!("[ENGINE] initial universe scan failed: {}", e),
        }

        self.phase = EnginePhase::Warmup;
        self.spawn_background_tasks();

        let mut control_rx = self.control_rx.take().expect("run called once");
        let mut reset_rx = self.reset_rx.take().expect("run called once");
        let mut order_event_rx = self.order_event_rx.take().expect("run called once");
        let mut stop_rx = self.stop_rx.clone();

        // coordinator loop
        let mut tick = tokio::time::interval(TICK_INTERVAL);
        let mut publish = tokio::time::interval(STATE_PUBLISH_INTERVAL);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.run_tick().await;
                }
                _ = publish.tick() => {
                    let state = self.build_state().await;
                    self.container.state_store.publish(state).await;
                    self.container.state_store.write_status_file().await;
                }
                Some(request) = control_rx.recv() => {
                    let result = self.handle_command(request.command).await;
                    if let Some(reply) = request.reply {
                        let _ = reply.send(result);
                    }
                }
                Some(symbol) = reset_rx.recv() => {
                    self.container.orchestrator.lock().await.reset(&symbol);
                }
                Some(event) = order_event_rx.recv() => {
                    if self.recent_orders.len() >= RECENT_ORDERS_CAP {
                        self.recent_orders.pop_back();
                    }
                    self.recent_orders.push_front(event);
                }
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    fn spawn_background_tasks(&self) {
        let c = &self.container;

        // REST poller (tiers 2/3)
        let poller = Arc::new(RestPoller::new(
            c.client.clone(),
            Arc::clone(&c.data),
            Arc::clone(&c.scheduler),
        ));
        tokio::spawn(poller.run(self.stop_rx.clone()));

        // background backfill for cold tier-1 symbols
        let backfill = Arc::new(BackgroundBackfill::new(
            c.client.clone(),
            Arc::clone(&c.data),
            Arc::clone(&c.scheduler),
            Arc::clone(&c.orchestrator),
        ));
        tokio::spawn(backfill.run(self.stop_rx.clone()));

        // universe scanner timer
        {
            let scanner = Arc::clone(&c.scanner);
            let scheduler = Arc::clone(&c.scheduler);
            let collector = Arc::clone(&self.collector);
            let mut stop_rx = self.stop_rx.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(SCANNER_CHECK_INTERVAL) => {}
                        _ = stop_rx.changed() => { if *stop_rx.borrow() { break; } else { continue; } }
                    }
                    let due = scheduler.read().await.needs_reassign();
                    if !due {
                        continue;
                    }
                    match scanner.scan().await {
                        Ok(ranked) => {
                            let changes = scheduler.write().await.reassign_tiers(&ranked);
                            if !changes.is_empty() {
                                let tier1 = scheduler.read().await.tier1_symbols();
                                collector.update_symbols(tier1).await;
                            }
                        }
                        Err(e) => warn!("[SCAN] universe rebuild failed: {}", e),
                    }
                }
            });
        }

        // position monitor loop
        {
            let router = Arc::clone(&self.router);
            let settings = Arc::clone(&c.settings);
            let mut stop_rx = self.stop_rx.clone();
            tokio::spawn(async move {
                let mut last_stop_check = std::time::Instant::now();
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(MONITOR_INTERVAL) => {}
                        _ = stop_rx.changed() => { if *stop_rx.borrow() { break; } else { continue; } }
                    }
                    router.monitor_positions().await;
                    let interval = settings.read().await.stop_health_check_interval_s;
                    if last_stop_check.elapsed().as_secs() >= interval {
                        router.stop_health_check().await;
                        last_stop_check = std::time::Instant::now();
                    }
                }
            });
        }

        // portfolio sync loop
        {
            let portfolio = Arc::clone(&c.portfolio);
            let registry = Arc::clone(&c.registry);
            let circuit_breaker = Arc::clone(&c.circuit_breaker);
            let mut stop_rx = self.stop_rx.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(SYNC_INTERVAL) => {}
                        _ = stop_rx.changed() => { if *stop_rx.borrow() { break; } else { continue; } }
                    }
                    match portfolio.update_portfolio_state().await {
                        Ok(()) => {
                            let snapshot = portfolio.snapshot().await;
                            let symbols: HashSet<String> =
                                snapshot.positions.keys().cloned().collect();
                            registry.write().await.set_exchange_symbols(Some(symbols));
                        }
                        Err(e) => {
                            warn!("[SYNC] portfolio refresh failed: {}", e);
                            circuit_breaker.write().await.record_failure();
                        }
                    }
                }
            });
        }

        // runtime config reload watcher
        {
            let config_store = Arc::clone(&c.config_store);
            let registry = Arc::clone(&c.registry);
            let settings = Arc::clone(&c.settings);
            let intelligence = Arc::clone(&c.intelligence);
            let mut stop_rx = self.stop_rx.clone();
            tokio::spawn(async move {
                let mut changes = config_store.subscribe();
                loop {
                    tokio::select! {
                        changed = changes.recv() => {
                            match changed {
                                Ok(_) => {
                                    let snapshot = settings.read().await.clone();
                                    registry.write().await.update_config(&snapshot);
                                    intelligence.set_entry_score_min(snapshot.entry_score_min);
                                }
                                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                                Err(_) => break,
                            }
                        }
                        _ = tokio::time::sleep(std::time::Duration::from_secs(30)) => {
                            config_store.reload_if_changed().await;
                        }
                        _ = stop_rx.changed() => { if *stop_rx.borrow() { break; } }
                    }
                }
            });
        }
    }

    /// One coordinator tick: refresh market context, then run the signal
    /// pipeline over every warm tier-1/2 symbol sequentially.
    async fn run_tick(&mut self) {
        let c = &self.container;

        // market context from the BTC tape
        let btc_context = match c.data.buffer_snapshot("BTC-USD").await {
            Some(buffer) => {
                let features = compute_features(&buffer, 0.0);
                c.intelligence.update_market_state(features.trend_1h);
                MarketContext {
                    btc_trend_1h: features.trend_1h,
                    btc_trend_15m: features.trend_15m,
                    regime: c.intelligence.market_regime(),
                }
            }
            None => MarketContext::default(),
        };

        let warm_symbols: Vec<String> = {
            let scheduler = c.scheduler.read().await;
            let mut symbols = scheduler.tier1_symbols();
            symbols.extend(scheduler.tier_symbols(crate::datafeeds::Tier::RestFast));
            symbols.retain(|s| scheduler.is_symbol_warm(s));
            symbols
        };
        if !warm_symbols.is_empty() && self.phase == EnginePhase::Warmup {
            self.phase = EnginePhase::Trading;
            info!("[ENGINE] warmup complete, {} symbols warm", warm_symbols.len());
        }

        for symbol in warm_symbols {
            self.evaluate_symbol(&symbol, &btc_context).await;
        }

        // flush any batched entries whose window closed
        if self.batcher.is_enabled() && self.batcher.window_elapsed() {
            let (max_new, available_slots) = {
                let settings = self.container.settings.read().await;
                let registry = self.container.registry.read().await;
                let slots = settings
                    .max_positions
                    .saturating_sub(registry.reconciled_active_count());
                (settings.batch_max_new, slots)
            };
            let batch = self.batcher.flush(max_new.min(available_slots));
            for intent in batch {
                self.execute_intent(&intent).await;
            }
        }
    }

    /// The per-symbol chain: features -> orchestrator -> gates -> plan ->
    /// execute. Runs to completion before the next symbol starts.
    async fn evaluate_symbol(&mut self, symbol: &str, context: &MarketContext) {
        let c = &self.container;
        if self.kill_or_stopped().await {
            return;
        }

        let Some(buffer) = c.data.buffer_snapshot(symbol).await else {
            return;
        };
        let spread_bps = c.scanner.spread_bps(symbol).await.unwrap_or(0.0);
        let features = compute_features(&buffer, spread_bps);
        if features.is_stale() {
            return;
        }

        let signal = {
            let mut orchestrator = c.orchestrator.lock().await;
            orchestrator.analyze(symbol, &buffer, &features, context)
        };
        let Some(signal) = signal else {
            return;
        };
        self.signals_seen.fetch_add(1, Ordering::Relaxed);

        let mut intent = Intent::from_signal(&signal, spread_bps);
        if let Some(burst) = c.scanner.burst_metrics(symbol).await {
            intent.vol_spike = burst.vol_spike;
            intent.range_spike = burst.range_spike;
            intent.trend_15m = burst.trend_15m;
            intent.vwap_distance = burst.vwap_distance;
        }
        if let Some(info) = c.scanner.info(symbol).await {
            intent.tier = info.tier_label;
        }

        let view = SignalView {
            ts: signal.timestamp,
            symbol: symbol.to_string(),
            strategy_id: signal.strategy_id.clone(),
            edge_score: signal.edge_score_base,
            confluence: signal.confluence_count,
            accepted: false,
            detail: signal.reason.clone(),
        };
        self.current_signal = Some(view.clone());
        self.push_signal(view);

        if self.batcher.is_enabled() {
            self.batcher.push(
                intent,
                features.trend_1h,
                features.trend_15m,
                features.vol_spike_5m,
            );
            return;
        }
        self.execute_intent(&intent).await;
    }

    /// Gate funnel, sizing, truth check, execution, bookkeeping.
    async fn execute_intent(&mut self, intent: &Intent) {
        let symbol = &intent.symbol;

        let settings = self.container.settings.read().await.clone();
        let pause =
            self.container.config_store.pause_new_entries().await || self.kill_or_stopped().await;
        let buffer = self.container.data.buffer_snapshot(symbol).await;
        let holding_value = self.container.portfolio.holding_value(symbol).await;
        let is_warm = self.container.scheduler.read().await.is_symbol_warm(symbol);

        let (gate_result, entry_score) = {
            let daily_stats = self.container.daily_stats.read().await;
            let mut circuit_breaker = self.container.circuit_breaker.write().await;
            let cooldowns = self.container.cooldowns.read().await;
            let registry = self.container.registry.read().await;
            let mut ctx = GateContext {
                settings: &settings,
                pause_new_entries: pause,
                daily_stats: &daily_stats,
                circuit_breaker: &mut circuit_breaker,
                cooldowns: &cooldowns,
                registry: &registry,
                exchange_holding_value: holding_value,
                buffer: buffer.as_ref(),
                is_warm,
                intelligence: self.container.intelligence.as_ref(),
                is_test: false,
            };
            check_all_gates(intent, &mut ctx)
        };

        self.push_gate_trace(symbol, &gate_result);
        if !gate_result.passed {
            self.container.rejections.write().await.record(
                symbol,
                gate_result.gate,
                &gate_result.reason,
            );
            return;
        }
        let Some(entry_score) = entry_score else {
            return;
        };

        // sizing and the truth gate (after sizing, by contract)
        let portfolio_value = self.container.portfolio.get_total_portfolio_value().await;
        let truth = self.container.portfolio.validate_before_trade(symbol).await;
        let session_mult = self.container.intelligence.get_size_multiplier();
        let plan = {
            let registry = self.container.registry.read().await;
            plan_trade(
                intent,
                &entry_score,
                portfolio_value,
                &registry,
                &settings,
                session_mult,
                truth,
                false,
            )
        };
        let plan = match plan {
            Ok(plan) => plan,
            Err(rejection) => {
                self.container
                    .rejections
                    .write()
                    .await
                    .record(symbol, rejection.gate, &rejection.reason);
                return;
            }
        };

        match self.router.open_position(&plan).await {
            Ok(_) => {
                self.orders_placed.fetch_add(1, Ordering::Relaxed);
                self.container.circuit_breaker.write().await.record_success();
                if let Some(view) = &mut self.current_signal {
                    view.accepted = true;
                }
            }
            Err(e) => {
                error!("[ENGINE] execution failed for {}: {}", symbol, e);
                self.container.circuit_breaker.write().await.record_failure();
                self.container
                    .rejections
                    .write()
                    .await
                    .record(symbol, crate::types::GateReason::Truth, &e.to_string());
                // anything that might be state drift forces a truth refresh
                if let Err(sync_err) = self.container.portfolio.update_portfolio_state().await {
                    warn!("[ENGINE] post-reject sync failed: {}", sync_err);
                }
            }
        }
    }

    async fn kill_or_stopped(&self) -> bool {
        self.container.kill_switch.is_engaged() || *self.stop_rx.borrow()
    }

    async fn handle_command(&mut self, command: ControlCommand) -> CommandResult {
        let c = &self.container;
        c.event_log.log_event(&command);
        match command {
            ControlCommand::PauseNewEntries => {
                let result = c
                    .config_store
                    .update_param("pause_new_entries", serde_json::Value::from(true), "control")
                    .await;
                match result {
                    Ok(()) => {
                        self.phase = EnginePhase::Paused;
                        CommandResult::ok("new entries paused")
                    }
                    Err(e) => CommandResult::err(e),
                }
            }
            ControlCommand::Resume => {
                let result = c
                    .config_store
                    .update_param(
                        "pause_new_entries",
                        serde_json::Value::from(false),
                        "control",
                    )
                    .await;
                match result {
                    Ok(()) => {
                        self.phase = EnginePhase::Trading;
                        CommandResult::ok("resumed")
                    }
                    Err(e) => CommandResult::err(e),
                }
            }
            ControlCommand::CloseSymbol { symbol, reason } => {
                match self
                    .router
                    .close_position(&symbol, Decimal::ONE, ExitReason::Manual)
                    .await
                {
                    Ok(pnl) => CommandResult::ok(format!(
                        "closed {} (pnl {}, reason: {})",
                        symbol, pnl, reason
                    )),
                    Err(e) => CommandResult::err(format!("close {} failed: {}", symbol, e)),
                }
            }
            ControlCommand::CloseAll { reason } => {
                let closed = self.router.close_all(ExitReason::Manual).await;
                CommandResult::ok(format!("closed {} positions ({})", closed, reason))
            }
            ControlCommand::UpdateConfig { param, value } => {
                match c.config_store.update_param(&param, value, "control").await {
                    Ok(()) => CommandResult::ok(format!("{} updated", param)),
                    Err(e) => CommandResult::err(e),
                }
            }
            ControlCommand::ToggleKillSwitch { reason } => {
                let engaged = c.kill_switch.toggle(&reason);
                if engaged {
                    CommandResult::ok("kill switch engaged")
                } else {
                    CommandResult::ok("kill switch released")
                }
            }
        }
    }

    fn push_signal(&mut self, view: SignalView) {
        if self.recent_signals.len() >= RECENT_SIGNALS_CAP {
            self.recent_signals.pop_back();
        }
        self.recent_signals.push_front(view);
    }

    fn push_gate_trace(&mut self, symbol: &str, result: &GateResult) {
        if self.gate_traces.len() >= GATE_TRACES_CAP {
            self.gate_traces.pop_back();
        }
        self.gate_traces.push_front(GateTraceView {
            ts: chrono::Utc::now(),
            symbol: symbol.to_string(),
            passed: result.passed,
            trace: result.trace.clone(),
        });
    }

    async fn build_state(&self) -> BotState {
        let c = &self.container;
        let snapshot = c.portfolio.snapshot().await;
        let truth_age = c.portfolio.snapshot_age_s().await;
        let settings = c.settings.read().await;

        let positions: Vec<PositionView> = {
            let registry = c.registry.read().await;
            registry
                .active_positions()
                .values()
                .map(|p| PositionView {
                    symbol: p.symbol.clone(),
                    entry_price: p.entry_price,
                    current_price: p.current_price,
                    size_usd: p.size_usd,
                    size_qty: p.size_qty,
                    stop_price: p.stop_price,
                    tp1_price: p.tp1_price,
                    tp2_price: p.tp2_price,
                    pnl: p.unrealized_pnl(),
                    pnl_pct: p.pnl_pct(),
                    strategy_id: p.strategy_id.clone(),
                    state: p.state,
                    opened_at: p.entry_time,
                })
                .collect()
        };

        let tier1 = c.scheduler.read().await.tier1_symbols();
        let leaderboard = c.scanner.burst_leaderboard(&tier1, 10).await;
        let focus_coin = leaderboard.first().map(|m| m.symbol.clone());

        let engine = EngineCounters {
            ticks_last_5s: c.health.ticks.count_last(std::time::Duration::from_secs(5)),
            candles_last_5s: c.health.candles.count_last(std::time::Duration::from_secs(5)),
            rest_requests: c.health.rest_requests.load(Ordering::Relaxed),
            rest_429s: c.health.rest_429s.load(Ordering::Relaxed),
            ws_reconnects: c.health.ws_reconnects.load(Ordering::Relaxed),
            rest_rate_degraded: c.health.rest_rate_degraded(),
            ws_ok: c.health.ws_ok(30),
            ws_last_age_s: c.health.ws_last_age_s(),
            truth_age_s: truth_age.min(i64::MAX / 2),
            truth_stale: truth_age > settings.truth_staleness_s,
            symbols_tracked: c.data.symbol_count().await,
            signals_seen: self.signals_seen.load(Ordering::Relaxed),
            orders_placed: self.orders_placed.load(Ordering::Relaxed),
        };

        let (rejections, recent_rejections) = {
            let tracker = c.rejections.read().await;
            (tracker.counters(), tracker.recent())
        };

        BotState {
            version: super::state::STATE_VERSION,
            ts: chrono::Utc::now(),
            mode: c.mode,
            phase: self.phase,
            portfolio_value: snapshot.total_value,
            cash_balance: snapshot.total_cash,
            holdings_value: snapshot.total_crypto,
            daily_pnl: c.daily_stats.read().await.total_pnl,
            positions,
            burst_leaderboard: leaderboard,
            recent_signals: self.recent_signals.iter().cloned().collect(),
            recent_orders: self.recent_orders.iter().cloned().collect(),
            gate_traces: self.gate_traces.iter().cloned().collect(),
            rejections,
            recent_rejections,
            tiers: Some(c.scheduler.read().await.stats()),
            engine,
            kill_switch: c.kill_switch.is_engaged(),
            kill_reason: c.kill_switch.reason(),
            focus_coin,
            current_signal: self.current_signal.clone(),
        }
    }

    /// Request a graceful stop from outside the coordinator.
    pub fn stop_handle(&self) -> Arc<watch::Sender<bool>> {
        Arc::clone(&self.stop_tx)
    }

    /// Drain in-flight work, flush persistence, and exit.
    async fn shutdown(&mut self) {
        info!("[ENGINE] shutting down");
        self.phase = EnginePhase::ShuttingDown;

        // no new orders once the stop flag is set; the flag is already
        // true when we reach here
        self.collector.shutdown().await;
        self.container.data.store().flush_all();
        self.container.cooldowns.read().await.save();
        self.container.registry.read().await.save();
        let state = self.build_state().await;
        self.container.state_store.publish(state).await;
        self.container.state_store.write_status_file().await;
        info!("[ENGINE] shutdown complete");
    }
}
