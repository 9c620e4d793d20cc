use rust_decimal::Decimal;
use serde_json::{json, Value};

use super::registry::PositionRegistry;
use crate::config::Settings;
use crate::datafeeds::STABLECOINS;
use crate::risk::{
    categorize_score_rejection, CircuitBreaker, CooldownStatus, Cooldowns, DailyStats, EntryScore,
    Intelligence,
};
use crate::types::{base_asset, CandleBuffer, GateReason, Intent, SignalType, TimeFrame};

/// One gate evaluation, recorded in order for the UI and audit trail.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GateCheck {
    pub name: &'static str,
    pub passed: bool,
    pub reason: String,
    pub details: Value,
}

/// Outcome of the funnel: pass/fail, categorized reason, and the full
/// trace up to and including the first failure.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GateResult {
    pub passed: bool,
    pub reason: String,
    pub gate: GateReason,
    pub details: Value,
    pub trace: Vec<GateCheck>,
}

impl GateResult {
    fn pass(trace: Vec<GateCheck>) -> Self {
        Self {
            passed: true,
            reason: String::new(),
            gate: GateReason::Score,
            details: Value::Null,
            trace,
        }
    }

    fn fail(reason: &str, gate: GateReason, details: Value, trace: Vec<GateCheck>) -> Self {
        Self {
            passed: false,
            reason: reason.to_string(),
            gate,
            details,
            trace,
        }
    }
}

/// Everything the funnel needs, pre-fetched so gate evaluation itself has
/// no suspension points.
pub struct GateContext<'a> {
    pub settings: &'a Settings,
    pub pause_new_entries: bool,
    pub daily_stats: &'a DailyStats,
    pub circuit_breaker: &'a mut CircuitBreaker,
    pub cooldowns: &'a Cooldowns,
    pub registry: &'a PositionRegistry,
    /// Current USD value of any exchange holding on this symbol.
    pub exchange_holding_value: Decimal,
    pub buffer: Option<&'a CandleBuffer>,
    pub is_warm: bool,
    pub intelligence: &'a dyn Intelligence,
    /// Test mode relaxes environment-dependent gates, never the risk gates.
    pub is_test: bool,
}

/// Signal types the funnel accepts into execution.
fn signal_type_accepted(signal_type: SignalType) -> bool {
    // every orchestrator strategy maps to a closed, known type; anything
    // else (future experiments) is refused here rather than sized
    matches!(
        signal_type,
        SignalType::FlagBreakout
            | SignalType::FastBreakout
            | SignalType::VwapReclaim
            | SignalType::MeanReversion
            | SignalType::DailyMomentum
            | SignalType::RangeBreakout
            | SignalType::RelativeStrength
            | SignalType::SupportBounce
            | SignalType::GapFill
            | SignalType::BreakoutRetest
            | SignalType::CorrelationPlay
            | SignalType::LiquiditySweep
            | SignalType::Momentum1h
            | SignalType::RsiMomentum
            | SignalType::BbExpansion
    )
}

/// Stacking (adding to a winner) is allowed only when every condition
/// holds: enabled, profit threshold, add count, and a green-candle streak.
fn check_stacking_allowed(symbol: &str, ctx: &GateContext) -> Result<String, String> {
    let settings = ctx.settings;
    if !settings.stacking_enabled {
        return Err("stacking_disabled".to_string());
    }
    let Some(position) = ctx.registry.get(symbol) else {
        if ctx.exchange_holding_value > Decimal::ZERO {
            // on-exchange but untracked: no entry price to stack against
            return Err("untracked_position".to_string());
        }
        return Err("no_position".to_string());
    };

    let pnl_pct = position.pnl_pct();
    if pnl_pct < settings.stacking_min_profit_pct {
        return Err(format!(
            "profit_{:.1}%_below_{}%",
            pnl_pct, settings.stacking_min_profit_pct
        ));
    }
    if position.stack_count >= settings.stacking_max_adds {
        return Err(format!(
            "max_adds_{}/{}",
            position.stack_count, settings.stacking_max_adds
        ));
    }

    let green_required = settings.stacking_green_candles;
    let Some(buffer) = ctx.buffer else {
        return Err("no_candle_data".to_string());
    };
    if buffer.len(TimeFrame::M1) < green_required {
        return Err("no_candle_data".to_string());
    }
    let green = buffer.green_count(TimeFrame::M1, green_required);
    if green < green_required {
        return Err(format!("incline_{}/{}_green", green, green_required));
    }

    Ok(format!("profit_{:.1}%_incline_ok", pnl_pct))
}

/// Predictive timing veto: refuse to chase a tape that is already
/// vertically extended; a pullback entry will come or the move is missed.
fn should_wait_for_entry(intent: &Intent) -> Option<String> {
    if intent.vwap_distance > 0.025 && intent.trend_15m > 0.02 {
        return Some("extended_wait_for_pullback".to_string());
    }
    None
}

/// Run the canonical gate funnel over one intent.
///
/// Gates evaluate in fixed order; the first failure short-circuits, but
/// the trace carries every gate up to and including it. The entry score
/// is returned alongside so the sizer reuses it without rescoring.
pub fn check_all_gates(
    intent: &Intent,
    ctx: &mut GateContext<'_>,
) -> (GateResult, Option<EntryScore>) {
    let symbol = &intent.symbol;
    let mut trace: Vec<GateCheck> = Vec::new();

    macro_rules! record {
        ($name:expr, $passed:expr, $reason:expr, $details:expr) => {
            trace.push(GateCheck {
                name: $name,
                passed: $passed,
                reason: $reason.to_string(),
                details: $details,
            });
        };
    }

    // Gate 1: daily loss limit
    let limit = ctx.settings.daily_max_loss_usd;
    let details = json!({"total_pnl": ctx.daily_stats.total_pnl, "limit_usd": limit});
    if ctx.daily_stats.should_stop(limit) {
        record!("daily_loss_limit", false, "daily_loss_limit", details.clone());
        return (
            GateResult::fail("daily_loss_limit", GateReason::Risk, details, trace),
            None,
        );
    }
    record!("daily_loss_limit", true, "", details);

    // Gate 2: manual pause
    if ctx.pause_new_entries {
        let details = json!({"reason": "pause_new_entries"});
        record!("pause_new_entries", false, "pause_new_entries", details.clone());
        return (
            GateResult::fail("pause_new_entries", GateReason::Risk, details, trace),
            None,
        );
    }
    record!("pause_new_entries", true, "", Value::Null);

    // Gate 3: circuit breaker
    if !ctx.circuit_breaker.can_trade() {
        let details = json!({"state": format!("{:?}", ctx.circuit_breaker.state())});
        record!("circuit_breaker", false, "circuit_breaker_open", details.clone());
        return (
            GateResult::fail(
                "circuit_breaker_open",
                GateReason::CircuitBreaker,
                details,
                trace,
            ),
            None,
        );
    }
    record!(
        "circuit_breaker",
        true,
        "",
        json!({"state": format!("{:?}", ctx.circuit_breaker.state())})
    );

    // Gate 4: signal type
    if !signal_type_accepted(intent.signal_type) {
        let details = json!({"signal_type": intent.signal_type.as_str()});
        record!("signal_type", false, "invalid_signal_type", details.clone());
        return (
            GateResult::fail("invalid_signal_type", GateReason::Score, details, trace),
            None,
        );
    }
    record!(
        "signal_type",
        true,
        "",
        json!({"signal_type": intent.signal_type.as_str()})
    );

    // Gate 5: duplicate position (stacking may override)
    if ctx.registry.has_position(symbol) {
        match check_stacking_allowed(symbol, ctx) {
            Ok(why) => {
                record!("duplicate_position", true, "stacking_allowed", json!({"reason": why}));
            }
            Err(why) => {
                let details = json!({"reason": "already_have_position", "stack_blocked": why});
                record!("duplicate_position", false, "already_have_position", details.clone());
                return (
                    GateResult::fail("already_have_position", GateReason::Limits, details, trace),
                    None,
                );
            }
        }
    } else {
        record!("duplicate_position", true, "", Value::Null);
    }

    // Gate 6: stablecoin filter
    let base = base_asset(symbol);
    if STABLECOINS.contains(&base) {
        let details = json!({"reason": "stablecoin", "base": base});
        record!("stablecoin_filter", false, "stablecoin", details.clone());
        return (
            GateResult::fail("stablecoin", GateReason::Limits, details, trace),
            None,
        );
    }
    record!("stablecoin_filter", true, "", json!({"base": base}));

    // Gate 7: exchange holdings (dust ignored, stacking may override)
    if ctx.exchange_holding_value >= ctx.settings.min_position_usd {
        if ctx.registry.has_position(symbol) {
            // tracked position: already settled by gate 5
            record!(
                "exchange_holdings",
                true,
                "tracked_position",
                json!({"value": ctx.exchange_holding_value})
            );
        } else {
            match check_stacking_allowed(symbol, ctx) {
                Ok(why) => {
                    record!("exchange_holdings", true, "stacking_allowed", json!({"reason": why}));
                }
                Err(why) => {
                    let details = json!({
                        "reason": "already_holding",
                        "value": ctx.exchange_holding_value,
                        "stack_blocked": why,
                    });
                    record!("exchange_holdings", false, "already_holding", details.clone());
                    return (
                        GateResult::fail("already_holding", GateReason::Limits, details, trace),
                        None,
                    );
                }
            }
        }
    } else if ctx.exchange_holding_value > Decimal::ZERO {
        record!(
            "exchange_holdings",
            true,
            "dust_ignored",
            json!({"value": ctx.exchange_holding_value})
        );
    } else {
        record!("exchange_holdings", true, "", Value::Null);
    }

    // Gate 8: cooldown
    match ctx.cooldowns.status(symbol) {
        CooldownStatus::Hard { remaining_s } => {
            let details = json!({"remaining": remaining_s, "window": "hard"});
            record!("cooldown", false, "hard_cooldown", details.clone());
            return (
                GateResult::fail("hard_cooldown", GateReason::Cooldown, details, trace),
                None,
            );
        }
        CooldownStatus::Soft { remaining_s } => {
            let details = json!({"remaining": remaining_s, "window": "soft"});
            record!("cooldown", false, "cooldown", details.clone());
            return (
                GateResult::fail("cooldown", GateReason::Cooldown, details, trace),
                None,
            );
        }
        CooldownStatus::Clear => {
            record!("cooldown", true, "", json!({"remaining": 0}));
        }
    }

    // Gate 9: warmth
    if !ctx.is_test && !ctx.is_warm {
        let (have_1m, have_5m) = ctx
            .buffer
            .map(|b| (b.len(TimeFrame::M1), b.len(TimeFrame::M5)))
            .unwrap_or((0, 0));
        let details = json!({"have_1m": have_1m, "have_5m": have_5m});
        record!("warmth", false, "not_warm", details.clone());
        return (
            GateResult::fail("not_warm", GateReason::Warmth, details, trace),
            None,
        );
    }
    record!("warmth", true, "", Value::Null);

    // Gate 10: per-symbol exposure (strict >=)
    let current_exposure = ctx.registry.cost_basis_for(symbol);
    let cap = ctx.settings.per_symbol_exposure_usd;
    if !ctx.is_test && current_exposure >= cap {
        let details = json!({"current": current_exposure, "limit": cap});
        record!("symbol_exposure", false, "symbol_exposure", details.clone());
        return (
            GateResult::fail("symbol_exposure", GateReason::Limits, details, trace),
            None,
        );
    }
    record!(
        "symbol_exposure",
        true,
        "",
        json!({"current": current_exposure, "limit": cap})
    );

    // Gate 11: intelligence position limits (sector caps)
    let positions = ctx.registry.all_positions();
    ctx.intelligence.update_sector_counts(&positions);
    if let Err(why) =
        ctx.intelligence
            .check_position_limits(symbol, ctx.settings.max_trade_usd, &positions)
    {
        let details = json!({"reason": why});
        record!("position_limits", false, why, details.clone());
        return (
            GateResult::fail(&why, GateReason::Limits, details, trace),
            None,
        );
    }
    record!("position_limits", true, "", Value::Null);

    // Gate 12: spread filter
    let spread = intent.spread_bps;
    let max_spread = ctx.settings.spread_max_bps;
    if !ctx.is_test && spread > max_spread {
        let details = json!({"spread_bps": spread, "max_spread_bps": max_spread});
        record!("spread_filter", false, "spread_too_high", details.clone());
        return (
            GateResult::fail("spread_too_high", GateReason::Spread, details, trace),
            None,
        );
    }
    record!(
        "spread_filter",
        true,
        "",
        json!({"spread_bps": spread, "max_spread_bps": max_spread})
    );

    // Gate 13: whitelist
    if !ctx.is_test && ctx.settings.use_whitelist {
        if !ctx.settings.watch_coins.iter().any(|s| s == symbol) {
            let details = json!({"symbol": symbol});
            record!("whitelist", false, "not_in_whitelist", details.clone());
            return (
                GateResult::fail("not_in_whitelist", GateReason::Whitelist, details, trace),
                None,
            );
        }
        record!("whitelist", true, "", Value::Null);
    } else {
        record!("whitelist", true, "disabled", Value::Null);
    }

    // score once, reuse for gates 14-15 and later sizing
    let entry_score = ctx.intelligence.score_entry(intent, &positions);

    // Gate 14: spread-adjusted score; wide spreads demand extra edge
    if !ctx.is_test && spread > max_spread * 0.7 {
        let required = ctx.settings.entry_score_min + 5.0;
        if entry_score.total_score < required {
            let details = json!({"spread_bps": spread, "score": entry_score.total_score, "required": required});
            record!("spread_score", false, "spread_requires_higher_score", details.clone());
            return (
                GateResult::fail(
                    "spread_requires_higher_score",
                    GateReason::Spread,
                    details,
                    trace,
                ),
                Some(entry_score),
            );
        }
    }
    record!(
        "spread_score",
        true,
        "",
        json!({"spread_bps": spread, "score": entry_score.total_score})
    );

    // Gate 15: entry score threshold
    if !entry_score.should_enter {
        let gate = categorize_score_rejection(&entry_score);
        let details = json!({
            "score": entry_score.total_score,
            "min_score": ctx.settings.entry_score_min,
            "btc_trend_ok": entry_score.btc_trend_ok,
        });
        record!("entry_score", false, "score_too_low", details.clone());
        return (
            GateResult::fail("score_too_low", gate, details, trace),
            Some(entry_score),
        );
    }
    record!(
        "entry_score",
        true,
        "",
        json!({"score": entry_score.total_score, "min_score": ctx.settings.entry_score_min})
    );

    // Gate 16: trading halted
    if let Some(reason) = ctx.intelligence.is_trading_halted() {
        let details = json!({"reason": "trading_halted", "message": reason});
        record!("trading_halted", false, reason, details.clone());
        return (
            GateResult::fail(&reason, GateReason::Risk, details, trace),
            Some(entry_score),
        );
    }
    record!("trading_halted", true, "", Value::Null);

    // Gate 17: predictive timing (don't chase)
    if !ctx.is_test {
        if let Some(reason) = should_wait_for_entry(intent) {
            let details = json!({"reason": reason});
            record!("predictive_timing", false, reason, details.clone());
            return (
                GateResult::fail(&reason, GateReason::Score, details, trace),
                Some(entry_score),
            );
        }
    }
    record!("predictive_timing", true, "", Value::Null);

    // Gate 18: registry limits (rough pre-sizing check)
    let estimated = ctx.settings.max_trade_usd;
    if let Err(why) = ctx.registry.can_open_position(&intent.strategy_id, estimated) {
        let details = json!({"reason": why, "estimated_size": estimated});
        record!("registry_limits", false, why, details.clone());
        return (
            GateResult::fail(&why, GateReason::Limits, details, trace),
            Some(entry_score),
        );
    }
    record!("registry_limits", true, "", json!({"estimated_size": estimated}));

    (GateResult::pass(trace), Some(entry_score))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::risk::DefaultIntelligence;
    use crate::storage::ModePaths;
    use crate::types::TradingMode;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    /// Owns every collaborator the funnel borrows.
    pub struct GateHarness {
        pub dir: tempfile::TempDir,
        pub settings: Settings,
        pub daily_stats: DailyStats,
        pub circuit_breaker: CircuitBreaker,
        pub cooldowns: Cooldowns,
        pub registry: PositionRegistry,
        pub intelligence: DefaultIntelligence,
        pub pause_new_entries: bool,
        pub exchange_holding_value: Decimal,
        pub buffer: Option<CandleBuffer>,
        pub is_warm: bool,
    }

    impl GateHarness {
        pub fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let paths = ModePaths::with_root(dir.path(), TradingMode::Paper);
            let settings = Settings::default();
            let intelligence = DefaultIntelligence::new(settings.entry_score_min);
            intelligence.update_market_state(0.005);
            Self {
                daily_stats: DailyStats::load(&paths),
                circuit_breaker: CircuitBreaker::new(
                    settings.circuit_breaker_max_failures,
                    settings.circuit_breaker_reset_seconds,
                ),
                cooldowns: Cooldowns::load(
                    &paths,
                    settings.order_cooldown_min_seconds,
                    settings.order_cooldown_seconds,
                ),
                registry: PositionRegistry::load(&paths, &settings),
                intelligence,
                settings,
                pause_new_entries: false,
                exchange_holding_value: Decimal::ZERO,
                buffer: None,
                is_warm: true,
                dir,
            }
        }

        pub fn check(&mut self, intent: &Intent) -> (GateResult, Option<EntryScore>) {
            let mut ctx = GateContext {
                settings: &self.settings,
                pause_new_entries: self.pause_new_entries,
                daily_stats: &self.daily_stats,
                circuit_breaker: &mut self.circuit_breaker,
                cooldowns: &self.cooldowns,
                registry: &self.registry,
                exchange_holding_value: self.exchange_holding_value,
                buffer: self.buffer.as_ref(),
                is_warm: self.is_warm,
                intelligence: &self.intelligence,
                is_test: false,
            };
            check_all_gates(intent, &mut ctx)
        }
    }

    pub fn intent(symbol: &str, edge_score: f64, spread_bps: f64) -> Intent {
        Intent {
            symbol: symbol.to_string(),
            signal_type: SignalType::FlagBreakout,
            timestamp: Utc::now(),
            price: dec!(100),
            stop_price: dec!(97),
            tp1_price: dec!(105),
            tp2_price: dec!(108),
            strategy_id: "burst_flag".to_string(),
            edge_score,
            confidence: edge_score / 100.0,
            spread_bps,
            vol_spike: 1.0,
            range_spike: 1.0,
            trend_15m: 0.0,
            vwap_distance: 0.0,
            tier: "large_cap".to_string(),
            confluence_count: 2,
            reasons: vec!["confluence_2".to_string()],
        }
    }

    pub fn open_position(symbol: &str) -> crate::types::Position {
        crate::types::Position::new(
            symbol,
            dec!(100),
            dec!(15),
            dec!(0.15),
            dec!(97),
            dec!(105),
            dec!(108),
            Utc::now() + chrono::Duration::hours(2),
            "burst_flag",
        )
    }
}
