use std::collections::HashMap;
use tracing::debug;

use super::{
    bb_expansion::BbExpansionStrategy, breakout_retest::BreakoutRetestStrategy,
    burst_flag::BurstFlagStrategy, correlation_play::CorrelationPlayStrategy,
    daily_momentum::DailyMomentumStrategy, gap_fill::GapFillStrategy,
    liquidity_sweep::LiquiditySweepStrategy, mean_reversion::MeanReversionStrategy,
    momentum_1h::Momentum1hStrategy, range_breakout::RangeBreakoutStrategy,
    relative_strength::RelativeStrengthStrategy, rsi_momentum::RsiMomentumStrategy,
    support_bounce::SupportBounceStrategy, vwap_reclaim::VwapReclaimStrategy, MarketContext,
    Strategy,
};
use crate::features::FeatureVector;
use crate::types::{CandleBuffer, StrategySignal};

/// Which strategies are enabled, plus confluence scoring knobs.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub enable_burst_flag: bool,
    pub enable_vwap_reclaim: bool,
    pub enable_mean_reversion: bool,
    pub enable_daily_momentum: bool,
    pub enable_range_breakout: bool,
    pub enable_relative_strength: bool,
    pub enable_support_bounce: bool,
    pub enable_gap_fill: bool,
    pub enable_breakout_retest: bool,
    pub enable_correlation_play: bool,
    pub enable_liquidity_sweep: bool,
    pub enable_momentum_1h: bool,
    pub enable_rsi_momentum: bool,
    pub enable_bb_expansion: bool,
    /// Score boost applied to the winner when 2+ strategies agree.
    pub confluence_boost: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            enable_burst_flag: true,
            enable_vwap_reclaim: true,
            enable_mean_reversion: false,
            enable_daily_momentum: true,
            enable_range_breakout: true,
            enable_relative_strength: true,
            enable_support_bounce: true,
            enable_gap_fill: false,
            enable_breakout_retest: false,
            enable_correlation_play: false,
            enable_liquidity_sweep: false,
            enable_momentum_1h: true,
            enable_rsi_momentum: true,
            enable_bb_expansion: true,
            confluence_boost: 20.0,
        }
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct OrchestratorStats {
    pub signals_generated: HashMap<String, u64>,
    pub signals_selected: HashMap<String, u64>,
    pub strategies_enabled: Vec<String>,
}

/// Runs every enabled strategy per symbol per tick and selects one signal:
/// the highest base edge score, boosted when multiple strategies agree.
/// Selection never applies gates; the funnel owns filtering.
pub struct StrategyOrchestrator {
    config: OrchestratorConfig,
    strategies: Vec<Box<dyn Strategy>>,
    signal_counts: HashMap<String, u64>,
    selection_counts: HashMap<String, u64>,
}

impl StrategyOrchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        let mut strategies: Vec<Box<dyn Strategy>> = Vec::new();
        if config.enable_burst_flag {
            strategies.push(Box::new(BurstFlagStrategy::new()));
        }
        if config.enable_vwap_reclaim {
            strategies.push(Box::new(VwapReclaimStrategy::new()));
        }
        if config.enable_mean_reversion {
            strategies.push(Box::new(MeanReversionStrategy::new()));
        }
        if config.enable_daily_momentum {
            strategies.push(Box::new(DailyMomentumStrategy::new()));
        }
        if config.enable_range_breakout {
            strategies.push(Box::new(RangeBreakoutStrategy::new()));
        }
        if config.enable_relative_strength {
            strategies.push(Box::new(RelativeStrengthStrategy::new()));
        }
        if config.enable_support_bounce {
            strategies.push(Box::new(SupportBounceStrategy::new()));
        }
        if config.enable_gap_fill {
            strategies.push(Box::new(GapFillStrategy::new()));
        }
        if config.enable_breakout_retest {
            strategies.push(Box::new(BreakoutRetestStrategy::new()));
        }
        if config.enable_correlation_play {
            strategies.push(Box::new(CorrelationPlayStrategy::new()));
        }
        if config.enable_liquidity_sweep {
            strategies.push(Box::new(LiquiditySweepStrategy::new()));
        }
        if config.enable_momentum_1h {
            strategies.push(Box::new(Momentum1hStrategy::new()));
        }
        if config.enable_rsi_momentum {
            strategies.push(Box::new(RsiMomentumStrategy::new()));
        }
        if config.enable_bb_expansion {
            strategies.push(Box::new(BbExpansionStrategy::new()));
        }

        Self {
            config,
            strategies,
            signal_counts: HashMap::new(),
            selection_counts: HashMap::new(),
        }
    }

    /// One signal per symbol per tick: highest `edge_score_base` wins,
    /// confluence boosts the winner (capped at 100).
    pub fn analyze(
        &mut self,
        symbol: &str,
        buffer: &CandleBuffer,
        features: &FeatureVector,
        context: &MarketContext,
    ) -> Option<StrategySignal> {
        let mut candidates: Vec<StrategySignal> = Vec::new();
        for strategy in &mut self.strategies {
            if let Some(signal) = strategy.analyze(symbol, buffer, features, context) {
                if signal.is_valid() {
                    *self
                        .signal_counts
                        .entry(signal.strategy_id.clone())
                        .or_insert(0) += 1;
                    candidates.push(signal);
                } else {
                    debug!(
                        "[ORCH] {} emitted invalid signal on {}",
                        strategy.strategy_id(),
                        symbol
                    );
                }
            }
        }

        if candidates.is_empty() {
            return None;
        }
        let confluence_count = candidates.len() as u32;

        let mut best = candidates
            .into_iter()
            .max_by(|a, b| {
                a.edge_score_base
                    .partial_cmp(&b.edge_score_base)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })?;

        if confluence_count >= 2 {
            best.edge_score_base =
                (best.edge_score_base + self.config.confluence_boost).min(100.0);
            best.confluence_count = confluence_count;
            best.reasons.push(format!("confluence_{}", confluence_count));
        } else {
            best.confluence_count = 1;
            best.reasons.push("solo_signal".to_string());
        }

        *self
            .selection_counts
            .entry(best.strategy_id.clone())
            .or_insert(0) += 1;
        Some(best)
    }

    /// Reset all strategy state for a symbol after its position closes or
    /// the pattern invalidates.
    pub fn reset(&mut self, symbol: &str) {
        for strategy in &mut self.strategies {
            strategy.reset(symbol);
        }
    }

    pub fn stats(&self) -> OrchestratorStats {
        OrchestratorStats {
            signals_generated: self.signal_counts.clone(),
            signals_selected: self.selection_counts.clone(),
            strategies_enabled: self
                .strategies
                .iter()
                .map(|s| s.strategy_id().to_string())
                .collect(),
        }
    }
}

impl Default for StrategyOrchestrator {
    fn default() -> Self {
        Self::new(OrchestratorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SignalDirection, SignalType, TimeFrame};
    use rust_decimal_macros::dec;

    use std::sync::{Arc, Mutex};

    /// Fixed-output strategy double for selection tests.
    struct Scripted {
        id: &'static str,
        score: Option<f64>,
        resets: Arc<Mutex<Vec<String>>>,
    }

    impl Strategy for Scripted {
        fn strategy_id(&self) -> &'static str {
            self.id
        }

        fn analyze(
            &mut self,
            symbol: &str,
            _buffer: &CandleBuffer,
            _features: &FeatureVector,
            _context: &MarketContext,
        ) -> Option<StrategySignal> {
            let score = self.score?;
            let mut signal = StrategySignal::new(symbol, self.id, SignalType::FlagBreakout);
            signal.direction = SignalDirection::Long;
            signal.edge_score_base = score;
            signal.entry_price = dec!(100);
            signal.stop_price = dec!(97);
            signal.tp1_price = dec!(105);
            signal.tp2_price = dec!(108);
            Some(signal)
        }

        fn reset(&mut self, symbol: &str) {
            self.resets.lock().unwrap().push(symbol.to_string());
        }
    }

    fn scripted_orchestrator(
        scores: &[(&'static str, Option<f64>)],
    ) -> (StrategyOrchestrator, Arc<Mutex<Vec<String>>>) {
        let resets = Arc::new(Mutex::new(Vec::new()));
        let mut orchestrator = StrategyOrchestrator::new(OrchestratorConfig {
            // start empty: disable everything, then inject doubles
            enable_burst_flag: false,
            enable_vwap_reclaim: false,
            enable_daily_momentum: false,
            enable_range_breakout: false,
            enable_relative_strength: false,
            enable_support_bounce: false,
            enable_momentum_1h: false,
            enable_rsi_momentum: false,
            enable_bb_expansion: false,
            ..OrchestratorConfig::default()
        });
        for (id, score) in scores {
            orchestrator.strategies.push(Box::new(Scripted {
                id,
                score: *score,
                resets: Arc::clone(&resets),
            }));
        }
        (orchestrator, resets)
    }

    fn tick(orchestrator: &mut StrategyOrchestrator) -> Option<StrategySignal> {
        let buffer = CandleBuffer::new("ETH-USD");
        let features = crate::features::compute_features(&buffer, 10.0);
        orchestrator.analyze("ETH-USD", &buffer, &features, &MarketContext::default())
    }

    #[test]
    fn test_confluence_boost_applies_to_winner() {
        let (mut orchestrator, _) =
            scripted_orchestrator(&[("a", Some(70.0)), ("b", Some(62.0))]);
        let best = tick(&mut orchestrator).unwrap();
        assert_eq!(best.strategy_id, "a");
        assert_eq!(best.edge_score_base, 85.0); // 70 + 20 boost, capped later
        assert_eq!(best.confluence_count, 2);
        assert!(best.reasons.iter().any(|r| r == "confluence_2"));
    }

    #[test]
    fn test_solo_signal_marked() {
        let (mut orchestrator, _) = scripted_orchestrator(&[("a", Some(70.0)), ("b", None)]);
        let best = tick(&mut orchestrator).unwrap();
        assert_eq!(best.edge_score_base, 70.0);
        assert_eq!(best.confluence_count, 1);
        assert!(best.reasons.iter().any(|r| r == "solo_signal"));
    }

    #[test]
    fn test_boost_caps_at_100() {
        let (mut orchestrator, _) =
            scripted_orchestrator(&[("a", Some(95.0)), ("b", Some(60.0))]);
        let best = tick(&mut orchestrator).unwrap();
        assert_eq!(best.edge_score_base, 100.0);
    }

    #[test]
    fn test_no_candidates_no_signal() {
        let (mut orchestrator, _) = scripted_orchestrator(&[("a", None)]);
        assert!(tick(&mut orchestrator).is_none());
    }

    #[test]
    fn test_reset_fans_out() {
        let (mut orchestrator, resets) =
            scripted_orchestrator(&[("a", Some(70.0)), ("b", Some(60.0))]);
        orchestrator.reset("ETH-USD");
        assert_eq!(resets.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_stats_track_selection() {
        let (mut orchestrator, _) =
            scripted_orchestrator(&[("a", Some(70.0)), ("b", Some(62.0))]);
        tick(&mut orchestrator);
        tick(&mut orchestrator);
        let stats = orchestrator.stats();
        assert_eq!(stats.signals_generated.get("a"), Some(&2));
        assert_eq!(stats.signals_generated.get("b"), Some(&2));
        assert_eq!(stats.signals_selected.get("a"), Some(&2));
        assert_eq!(stats.signals_selected.get("b"), None);
    }

    #[test]
    fn test_default_orchestrator_strategy_set() {
        let orchestrator = StrategyOrchestrator::default();
        let stats = orchestrator.stats();
        // safe-mode defaults: 9 of 14 enabled
        assert_eq!(stats.strategies_enabled.len(), 9);
        assert!(stats
            .strategies_enabled
            .contains(&"burst_flag".to_string()));
        assert!(!stats
            .strategies_enabled
            .contains(&"gap_fill".to_string()));
    }
}
