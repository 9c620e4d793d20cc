use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use super::registry::PositionRegistry;
use crate::config::Settings;
use crate::risk::{risk_profile, EntryScore};
use crate::types::{GateReason, Intent, SignalType, SizingTier, TradePlan};

/// Sizing failure routed into the rejection funnel.
#[derive(Debug, Clone)]
pub struct PlanRejection {
    pub gate: GateReason,
    pub reason: String,
}

impl PlanRejection {
    fn new(gate: GateReason, reason: impl Into<String>) -> Self {
        Self {
            gate,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SizingOutcome {
    pub size_usd: Decimal,
    pub tier: SizingTier,
    pub score: f64,
    pub confluence: u32,
    pub available_budget: Decimal,
    pub current_exposure: Decimal,
    pub session_mult: f64,
}

fn dec_from(v: f64) -> Decimal {
    Decimal::from_f64(v).unwrap_or(Decimal::ONE)
}

/// Tiered position sizing. Each step is monotonically non-increasing:
/// tier USD -> session multiplier -> portfolio guardrails -> max trade ->
/// exposure remaining -> minimum order.
pub fn calculate_size(
    entry_score: &EntryScore,
    intent: &Intent,
    portfolio_value: Decimal,
    registry: &PositionRegistry,
    settings: &Settings,
    session_mult: f64,
) -> Result<SizingOutcome, PlanRejection> {
    let score = entry_score.total_score;
    let confluence = intent.confluence_count;
    let pv = if portfolio_value > Decimal::ZERO {
        portfolio_value
    } else {
        dec!(500)
    };
    let min_trade = settings.min_trade_usd;

    // count open positions per tier by entry cost (80% of tier size marks
    // membership, entries get clamped below their tier's nominal size)
    let whale_threshold = settings.whale_trade_usd * dec!(0.8);
    let strong_threshold = settings.strong_trade_usd * dec!(0.8);
    let scout_threshold = settings.scout_trade_usd * dec!(0.8);
    let mut whale_count = 0usize;
    let mut strong_count = 0usize;
    let mut scout_count = 0usize;
    for position in registry.active_positions().values() {
        let cost = position.cost_basis;
        if cost >= whale_threshold {
            whale_count += 1;
        } else if cost >= strong_threshold {
            strong_count += 1;
        } else if cost >= scout_threshold {
            scout_count += 1;
        }
    }

    let is_whale =
        score >= settings.whale_score_min && confluence >= settings.whale_confluence_min;
    let is_strong = score >= settings.strong_score_min;
    let is_normal = score >= settings.entry_score_min;
    let is_scout = score >= settings.scout_score_min && score < settings.entry_score_min;

    let tier_size = |pct: Decimal, floor_usd: Decimal| -> Decimal {
        let by_pct = pv * pct;
        if by_pct >= min_trade {
            by_pct.max(floor_usd)
        } else {
            floor_usd
        }
    };

    let (mut size_usd, tier) = if is_whale && whale_count < settings.whale_max_positions {
        (
            tier_size(settings.whale_trade_pct, settings.whale_trade_usd),
            SizingTier::Whale,
        )
    } else if is_strong && strong_count < settings.strong_max_positions {
        (
            tier_size(settings.strong_trade_pct, settings.strong_trade_usd),
            SizingTier::Strong,
        )
    } else if is_normal {
        (
            tier_size(settings.normal_trade_pct, settings.normal_trade_usd),
            SizingTier::Normal,
        )
    } else if is_scout && scout_count < settings.scout_max_positions {
        (
            tier_size(settings.scout_trade_pct, settings.scout_trade_usd),
            SizingTier::Scout,
        )
    } else {
        (
            tier_size(settings.normal_trade_pct, settings.normal_trade_usd),
            SizingTier::Normal,
        )
    };

    // session multiplier only ever shrinks
    if session_mult < 1.0 {
        size_usd *= dec_from(session_mult);
    }

    // portfolio guardrails
    let min_pct_size = pv * settings.position_min_pct;
    let max_pct_size = pv * settings.position_max_pct;
    size_usd = size_usd.clamp(min_pct_size, max_pct_size);

    // hard per-trade cap
    size_usd = size_usd.min(settings.max_trade_usd);

    // exposure budget
    let current_exposure = registry.total_cost_basis();
    let budget = pv * settings.portfolio_max_exposure_pct;
    let available = (budget - current_exposure).max(Decimal::ZERO);
    if available <= Decimal::ZERO {
        return Err(PlanRejection::new(
            GateReason::Budget,
            format!("no budget: exposure {} of {}", current_exposure, budget),
        ));
    }
    size_usd = size_usd.min(available);

    // minimum order
    if size_usd < settings.min_position_usd {
        return Err(PlanRejection::new(
            GateReason::Limits,
            format!("size {} below minimum {}", size_usd, settings.min_position_usd),
        ));
    }

    debug!(
        "[SIZE] {} {} -> ${} (score={:.0}, conf={}, avail={})",
        intent.symbol, tier, size_usd, score, confluence, available
    );

    Ok(SizingOutcome {
        size_usd,
        tier,
        score,
        confluence,
        available_budget: available,
        current_exposure,
        session_mult,
    })
}

/// Stop/target geometry when the signal carries no usable hints.
///
/// Fast breakouts use the fast knobs; anything with a classified asset
/// class uses that class's risk profile; empty symbols fall back to the
/// config defaults. Returns (stop, tp1, tp2, time_stop_min).
pub fn calculate_stops(
    price: Decimal,
    signal_type: SignalType,
    symbol: &str,
    settings: &Settings,
) -> (Decimal, Decimal, Decimal, u32) {
    if signal_type == SignalType::FastBreakout {
        return (
            price * (Decimal::ONE - settings.fast_stop_pct),
            price * (Decimal::ONE + settings.fast_tp1_pct),
            price * (Decimal::ONE + settings.fast_tp2_pct),
            settings.fast_time_stop_min,
        );
    }
    if !symbol.is_empty() {
        let profile = risk_profile(symbol);
        let stop = price * (Decimal::ONE - profile.stop_loss_pct);
        let tp1 = price * (Decimal::ONE + profile.take_profit_pct);
        let tp2 = price * (Decimal::ONE + profile.take_profit_pct * dec!(1.5));
        return (stop, tp1, tp2, profile.max_hold_hours * 60);
    }
    (
        price * (Decimal::ONE - settings.fixed_stop_pct),
        price * (Decimal::ONE + settings.tp1_pct),
        price * (Decimal::ONE + settings.tp2_pct),
        settings.max_hold_minutes,
    )
}

/// Reward:risk validation. A stop at or above entry is always invalid;
/// a ratio below the floor fails outside test mode.
pub fn validate_rr(
    price: Decimal,
    stop_price: Decimal,
    tp1_price: Decimal,
    min_rr_ratio: f64,
    is_test: bool,
) -> Result<f64, PlanRejection> {
    use rust_decimal::prelude::ToPrimitive;
    let risk = price - stop_price;
    if risk <= Decimal::ZERO {
        return Err(PlanRejection::new(GateReason::Rr, "invalid_stop"));
    }
    let reward = tp1_price - price;
    let rr_ratio = (reward / risk).to_f64().unwrap_or(0.0);
    if !is_test && rr_ratio < min_rr_ratio {
        return Err(PlanRejection::new(
            GateReason::Rr,
            format!("rr_too_low: {:.2} < {:.2}", rr_ratio, min_rr_ratio),
        ));
    }
    Ok(rr_ratio)
}

/// Assemble the final trade plan: sizing, truth gate, geometry, R:R.
///
/// `truth` is the exchange-sync verdict, checked only after sizing
/// survives, so truth staleness shows up as a sized-then-blocked plan.
pub fn plan_trade(
    intent: &Intent,
    entry_score: &EntryScore,
    portfolio_value: Decimal,
    registry: &PositionRegistry,
    settings: &Settings,
    session_mult: f64,
    truth: Result<(), String>,
    is_test: bool,
) -> Result<TradePlan, PlanRejection> {
    let sizing = calculate_size(
        entry_score,
        intent,
        portfolio_value,
        registry,
        settings,
        session_mult,
    )?;

    if let Err(why) = truth {
        return Err(PlanRejection::new(GateReason::Truth, why));
    }

    // prefer the strategy's own geometry; derive when absent
    let (stop_price, tp1_price, tp2_price, time_stop_min) =
        if intent.stop_price > Decimal::ZERO && intent.tp1_price > Decimal::ZERO {
            let hold_min = risk_profile(&intent.symbol).max_hold_hours * 60;
            (
                intent.stop_price,
                intent.tp1_price,
                intent.tp2_price.max(intent.tp1_price),
                if intent.signal_type == SignalType::FastBreakout {
                    settings.fast_time_stop_min
                } else {
                    hold_min
                },
            )
        } else {
            calculate_stops(intent.price, intent.signal_type, &intent.symbol, settings)
        };

    let rr_ratio = validate_rr(
        intent.price,
        stop_price,
        tp1_price,
        settings.min_rr_ratio,
        is_test,
    )?;

    Ok(TradePlan {
        intent: intent.clone(),
        size_usd: sizing.size_usd,
        stop_price,
        tp1_price,
        tp2_price,
        time_stop_min,
        rr_ratio,
        tier: sizing.tier,
        entry_score: sizing.score,
        available_budget: sizing.available_budget,
        session_mult: sizing.session_mult,
        current_exposure: sizing.current_exposure,
    })
}
