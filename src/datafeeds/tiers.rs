use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tracing::info;

/// Data tier for a symbol: WebSocket real-time, fast REST polling, or
/// slow REST polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    WsRealtime,
    RestFast,
    RestSlow,
    Unassigned,
}

#[derive(Debug, Clone)]
pub struct TierConfig {
    pub tier1_size: usize,
    pub tier2_size: usize,
    pub tier2_interval_s: u64,
    pub tier3_interval_s: u64,
    pub reassign_interval_s: u64,
    pub min_candles_1m: usize,
    pub min_candles_5m: usize,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            tier1_size: 75,
            tier2_size: 15,
            tier2_interval_s: 15,
            tier3_interval_s: 60,
            reassign_interval_s: 1800,
            min_candles_1m: 5,
            min_candles_5m: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SymbolTierInfo {
    pub symbol: String,
    pub tier: Tier,
    pub last_polled: Option<DateTime<Utc>>,
    pub candle_count_1m: usize,
    pub candle_count_5m: usize,
    pub is_warm: bool,
    pub is_backfilling: bool,
    pub backfill_started: Option<DateTime<Utc>>,
}

impl SymbolTierInfo {
    fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            tier: Tier::Unassigned,
            last_polled: None,
            candle_count_1m: 0,
            candle_count_5m: 0,
            is_warm: false,
            is_backfilling: false,
            backfill_started: None,
        }
    }

    fn needs_poll(&self, config: &TierConfig, now: DateTime<Utc>) -> bool {
        let interval = match self.tier {
            Tier::WsRealtime | Tier::Unassigned => return false,
            Tier::RestFast => config.tier2_interval_s,
            Tier::RestSlow => config.tier3_interval_s,
        };
        match self.last_polled {
            None => true,
            Some(last) => (now - last).num_seconds() >= interval as i64,
        }
    }

    fn check_warmth(&mut self, config: &TierConfig) {
        self.is_warm = self.candle_count_1m >= config.min_candles_1m
            && self.candle_count_5m >= config.min_candles_5m;
    }
}

/// Result of one tier reassignment.
///
/// Consumers must process `ws_removed` before `ws_added` so the collector
/// unsubscribes old channels before subscribing new ones and never exceeds
/// its subscription quota.
#[derive(Debug, Default, Clone)]
pub struct TierChanges {
    pub ws_removed: Vec<String>,
    pub ws_added: Vec<String>,
}

impl TierChanges {
    pub fn is_empty(&self) -> bool {
        self.ws_removed.is_empty() && self.ws_added.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TierStats {
    pub total_symbols: usize,
    pub tier1_ws: usize,
    pub tier2_fast: usize,
    pub tier3_slow: usize,
    pub warm: usize,
    pub cold: usize,
    pub total_reassigns: u64,
    pub promotions: u64,
    pub demotions: u64,
}

/// Assigns symbols to data tiers and schedules REST polls.
///
/// Top `tier1_size` ranked symbols ride the WebSocket; the next
/// `tier2_size` poll every 15 s; the rest poll every 60 s. Membership is
/// recomputed on the universe scanner's cadence.
pub struct TierScheduler {
    pub config: TierConfig,
    symbols: HashMap<String, SymbolTierInfo>,
    last_reassign: Option<DateTime<Utc>>,
    total_reassigns: u64,
    promotions: u64,
    demotions: u64,
}

impl TierScheduler {
    pub fn new(config: TierConfig) -> Self {
        Self {
            config,
            symbols: HashMap::new(),
            last_reassign: None,
            total_reassigns: 0,
            promotions: 0,
            demotions: 0,
        }
    }

    pub fn tier_symbols(&self, tier: Tier) -> Vec<String> {
        self.symbols
            .values()
            .filter(|info| info.tier == tier)
            .map(|info| info.symbol.clone())
            .collect()
    }

    pub fn tier1_symbols(&self) -> Vec<String> {
        self.tier_symbols(Tier::WsRealtime)
    }

    pub fn symbol_info(&self, symbol: &str) -> Option<&SymbolTierInfo> {
        self.symbols.get(symbol)
    }

    pub fn known_symbols(&self) -> Vec<String> {
        self.symbols.keys().cloned().collect()
    }

    /// REST-due symbols, split (tier2_due, tier3_due). WS symbols are
    /// never due.
    pub fn symbols_needing_poll(&self) -> (Vec<String>, Vec<String>) {
        let now = Utc::now();
        let mut tier2_due = Vec::new();
        let mut tier3_due = Vec::new();
        for info in self.symbols.values() {
            if info.needs_poll(&self.config, now) {
                match info.tier {
                    Tier::RestFast => tier2_due.push(info.symbol.clone()),
                    Tier::RestSlow => tier3_due.push(info.symbol.clone()),
                    _ => {}
                }
            }
        }
        (tier2_due, tier3_due)
    }

    pub fn record_poll(&mut self, symbol: &str, count_1m: usize, count_5m: usize) {
        let config = self.config.clone();
        let info = self
            .symbols
            .entry(symbol.to_string())
            .or_insert_with(|| SymbolTierInfo::new(symbol));
        info.last_polled = Some(Utc::now());
        info.candle_count_1m = count_1m;
        info.candle_count_5m = count_5m;
        info.check_warmth(&config);
    }

    /// Called by the buffer path after every candle insert.
    pub fn update_candle_counts(&mut self, symbol: &str, count_1m: usize, count_5m: usize) {
        let config = self.config.clone();
        let info = self
            .symbols
            .entry(symbol.to_string())
            .or_insert_with(|| SymbolTierInfo::new(symbol));
        info.candle_count_1m = count_1m;
        info.candle_count_5m = count_5m;
        info.check_warmth(&config);
    }

    pub fn is_symbol_warm(&self, symbol: &str) -> bool {
        self.symbols
            .get(symbol)
            .map(|info| info.is_warm)
            .unwrap_or(false)
    }

    /// Reassign all symbols from a fresh ranking (best first).
    ///
    /// Existing per-symbol state (warmth, counts) is preserved across
    /// reassignment; only the tier field changes. Repeating the same
    /// ranking yields empty changes.
    pub fn reassign_tiers(&mut self, ranked_symbols: &[String]) -> TierChanges {
        let old_tier1: std::collections::HashSet<String> =
            self.tier1_symbols().into_iter().collect();

        let mut new_tier1 = std::collections::HashSet::new();
        for (rank, symbol) in ranked_symbols.iter().enumerate() {
            let info = self
                .symbols
                .entry(symbol.clone())
                .or_insert_with(|| SymbolTierInfo::new(symbol));
            let old_tier = info.tier;
            info.tier = if rank < self.config.tier1_size {
                new_tier1.insert(symbol.clone());
                Tier::WsRealtime
            } else if rank < self.config.tier1_size + self.config.tier2_size {
                Tier::RestFast
            } else {
                Tier::RestSlow
            };

            if old_tier != info.tier {
                if info.tier == Tier::WsRealtime {
                    self.promotions += 1;
                } else if old_tier == Tier::WsRealtime {
                    self.demotions += 1;
                }
            }
        }

        let mut ws_removed: Vec<String> = old_tier1.difference(&new_tier1).cloned().collect();
        let mut ws_added: Vec<String> = new_tier1.difference(&old_tier1).cloned().collect();
        ws_removed.sort();
        ws_added.sort();

        self.last_reassign = Some(Utc::now());
        self.total_reassigns += 1;

        let tier2_count = ranked_symbols
            .len()
            .min(self.config.tier1_size + self.config.tier2_size)
            .saturating_sub(new_tier1.len());
        let tier3_count = ranked_symbols
            .len()
            .saturating_sub(self.config.tier1_size + self.config.tier2_size);
        info!(
            "[TIER] Reassigned: T1={}, T2={}, T3={} (+{} -{})",
            new_tier1.len(),
            tier2_count,
            tier3_count,
            ws_added.len(),
            ws_removed.len(),
        );

        TierChanges { ws_removed, ws_added }
    }

    pub fn needs_reassign(&self) -> bool {
        match self.last_reassign {
            None => true,
            Some(last) => {
                (Utc::now() - last).num_seconds() >= self.config.reassign_interval_s as i64
            }
        }
    }

    pub fn mark_backfilling(&mut self, symbol: &str, is_backfilling: bool) {
        if let Some(info) = self.symbols.get_mut(symbol) {
            info.is_backfilling = is_backfilling;
            if is_backfilling {
                info.backfill_started = Some(Utc::now());
            }
        }
    }

    /// Tier-1 symbols still cold and not already backfilling.
    pub fn cold_tier1_symbols(&self) -> Vec<String> {
        self.symbols
            .values()
            .filter(|info| {
                info.tier == Tier::WsRealtime && !info.is_warm && !info.is_backfilling
            })
            .map(|info| info.symbol.clone())
            .collect()
    }

    pub fn stats(&self) -> TierStats {
        let mut stats = TierStats {
            total_symbols: self.symbols.len(),
            tier1_ws: 0,
            tier2_fast: 0,
            tier3_slow: 0,
            warm: 0,
            cold: 0,
            total_reassigns: self.total_reassigns,
            promotions: self.promotions,
            demotions: self.demotions,
        };
        for info in self.symbols.values() {
            match info.tier {
                Tier::WsRealtime => stats.tier1_ws += 1,
                Tier::RestFast => stats.tier2_fast += 1,
                Tier::RestSlow => stats.tier3_slow += 1,
                Tier::Unassigned => {}
            }
            if info.is_warm {
                stats.warm += 1;
            } else {
                stats.cold += 1;
            }
        }
        stats
    }
}

impl Default for TierScheduler {
    fn default() -> Self {
        Self::new(TierConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_scheduler() -> TierScheduler {
        TierScheduler::new(TierConfig {
            tier1_size: 2,
            tier2_size: 2,
            ..TierConfig::default()
        })
    }

    fn symbols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_reassign_splits_by_rank() {
        let mut scheduler = small_scheduler();
        let ranking = symbols(&["BTC-USD", "ETH-USD", "SOL-USD", "DOGE-USD", "ADA-USD"]);
        let changes = scheduler.reassign_tiers(&ranking);

        assert_eq!(changes.ws_added.len(), 2);
        assert!(changes.ws_removed.is_empty());
        assert_eq!(
            scheduler.symbol_info("BTC-USD").unwrap().tier,
            Tier::WsRealtime
        );
        assert_eq!(scheduler.symbol_info("SOL-USD").unwrap().tier, Tier::RestFast);
        assert_eq!(scheduler.symbol_info("ADA-USD").unwrap().tier, Tier::RestSlow);
    }

    #[test]
    fn test_reassign_idempotent() {
        let mut scheduler = small_scheduler();
        let ranking = symbols(&["BTC-USD", "ETH-USD", "SOL-USD"]);
        let first = scheduler.reassign_tiers(&ranking);
        assert!(!first.is_empty());

        let second = scheduler.reassign_tiers(&ranking);
        assert!(second.is_empty());
    }

    #[test]
    fn test_promotion_preserves_warmth() {
        let mut scheduler = small_scheduler();
        scheduler.reassign_tiers(&symbols(&["BTC-USD", "ETH-USD", "SOL-USD"]));
        scheduler.update_candle_counts("SOL-USD", 10, 5);
        assert!(scheduler.is_symbol_warm("SOL-USD"));

        // SOL promoted into tier 1
        let changes = scheduler.reassign_tiers(&symbols(&["SOL-USD", "BTC-USD", "ETH-USD"]));
        assert_eq!(changes.ws_added, vec!["SOL-USD".to_string()]);
        assert_eq!(changes.ws_removed, vec!["ETH-USD".to_string()]);
        assert!(scheduler.is_symbol_warm("SOL-USD"));
        let stats = scheduler.stats();
        assert_eq!(stats.promotions, 3); // 2 initial + SOL
        assert_eq!(stats.demotions, 1);
    }

    #[test]
    fn test_ws_symbols_never_due_for_poll() {
        let mut scheduler = small_scheduler();
        scheduler.reassign_tiers(&symbols(&["BTC-USD", "ETH-USD", "SOL-USD", "ADA-USD"]));
        let (tier2_due, tier3_due) = scheduler.symbols_needing_poll();
        assert!(!tier2_due.contains(&"BTC-USD".to_string()));
        assert!(tier2_due.contains(&"SOL-USD".to_string()));
        assert!(tier2_due.contains(&"ADA-USD".to_string()));
        assert!(tier3_due.is_empty()); // nothing ranked below tier 2 here
    }

    #[test]
    fn test_poll_recency_suppresses_due() {
        let mut scheduler = small_scheduler();
        scheduler.reassign_tiers(&symbols(&["BTC-USD", "ETH-USD", "SOL-USD"]));
        scheduler.record_poll("SOL-USD", 3, 1);
        let (tier2_due, _) = scheduler.symbols_needing_poll();
        assert!(!tier2_due.contains(&"SOL-USD".to_string()));
    }

    #[test]
    fn test_warmth_thresholds() {
        let mut scheduler = TierScheduler::default();
        scheduler.update_candle_counts("FOO-USD", 4, 2);
        assert!(!scheduler.is_symbol_warm("FOO-USD")); // 1m below threshold
        scheduler.update_candle_counts("FOO-USD", 5, 2);
        assert!(scheduler.is_symbol_warm("FOO-USD"));
        assert!(!scheduler.is_symbol_warm("UNKNOWN-USD"));
    }

    #[test]
    fn test_needs_reassign_initially_true() {
        let mut scheduler = TierScheduler::default();
        assert!(scheduler.needs_reassign());
        scheduler.reassign_tiers(&symbols(&["BTC-USD"]));
        assert!(!scheduler.needs_reassign());
    }

    #[test]
    fn test_cold_tier1_listing() {
        let mut scheduler = small_scheduler();
        scheduler.reassign_tiers(&symbols(&["BTC-USD", "ETH-USD", "SOL-USD"]));
        scheduler.update_candle_counts("BTC-USD", 10, 5);
        let mut cold = scheduler.cold_tier1_symbols();
        cold.sort();
        assert_eq!(cold, vec!["ETH-USD".to_string()]);

        scheduler.mark_backfilling("ETH-USD", true);
        assert!(scheduler.cold_tier1_symbols().is_empty());
    }
}
