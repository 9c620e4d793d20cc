use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::config::Settings;
use crate::storage::{atomic_write_json_logged, load_json, ModePaths};
use crate::types::Position;

#[derive(Debug, Clone)]
pub struct PositionLimits {
    pub min_position_usd: Decimal,
    pub dust_threshold_usd: Decimal,
    pub max_positions: usize,
    pub min_hold_seconds: u64,
    pub max_positions_per_strategy: Option<usize>,
}

impl PositionLimits {
    fn from_settings(settings: &Settings) -> Self {
        Self {
            min_position_usd: settings.min_position_usd,
            dust_threshold_usd: settings.dust_threshold_usd,
            max_positions: settings.max_positions,
            min_hold_seconds: settings.min_hold_seconds,
            max_positions_per_strategy: settings.max_positions_per_strategy,
        }
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RegistryStats {
    pub active_positions: usize,
    pub dust_positions: usize,
    pub total_cost_basis: Decimal,
    pub by_strategy: HashMap<String, usize>,
}

/// Single source of truth for tracked positions.
///
/// Two disjoint maps: `active` and `dust`. A symbol lives in exactly one
/// of them or neither; `update_position_value` moves entries across the
/// dust boundary in one consistent step. All mutation flows through here.
pub struct PositionRegistry {
    active: HashMap<String, Position>,
    dust: HashMap<String, Position>,
    limits: PositionLimits,
    exchange_symbols: Option<HashSet<String>>,
    persist_path: PathBuf,
}

impl PositionRegistry {
    pub fn load(paths: &ModePaths, settings: &Settings) -> Self {
        let persist_path = paths.positions_path();
        let stored: HashMap<String, Position> =
            load_json(&persist_path).ok().flatten().unwrap_or_default();
        let mut registry = Self {
            active: HashMap::new(),
            dust: HashMap::new(),
            limits: PositionLimits::from_settings(settings),
            exchange_symbols: None,
            persist_path,
        };
        let restored = stored.len();
        for (_, position) in stored {
            registry.place(position);
        }
        if restored > 0 {
            info!(
                "[REGISTRY] Restored {} positions ({} active, {} dust)",
                restored,
                registry.active.len(),
                registry.dust.len()
            );
        }
        registry
    }

    /// Recompute limits after a config change. Existing positions are never
    /// retroactively rejected.
    pub fn update_config(&mut self, settings: &Settings) {
        self.limits = PositionLimits::from_settings(settings);
    }

    pub fn limits(&self) -> &PositionLimits {
        &self.limits
    }

    /// The sync loop feeds the authoritative exchange holding set here for
    /// count reconciliation.
    pub fn set_exchange_symbols(&mut self, symbols: Option<HashSet<String>>) {
        self.exchange_symbols = symbols;
    }

    fn place(&mut self, position: Position) -> bool {
        let value = position.size_qty * position.current_price.max(position.entry_price);
        let symbol = position.symbol.clone();
        if value >= self.limits.dust_threshold_usd {
            self.active.insert(symbol, position);
            true
        } else {
            self.dust.insert(symbol, position);
            false
        }
    }

    /// Track a new position. Returns true when it landed in `active`.
    pub fn add_position(&mut self, position: Position) -> bool {
        let is_active = self.place(position);
        self.save();
        is_active
    }

    pub fn get(&self, symbol: &str) -> Option<&Position> {
        self.active.get(symbol).or_else(|| self.dust.get(symbol))
    }

    pub fn get_mut(&mut self, symbol: &str) -> Option<&mut Position> {
        match self.active.get_mut(symbol) {
            Some(position) => Some(position),
            None => self.dust.get_mut(symbol),
        }
    }

    pub fn has_position(&self, symbol: &str) -> bool {
        self.active.contains_key(symbol) || self.dust.contains_key(symbol)
    }

    pub fn has_active_position(&self, symbol: &str) -> bool {
        self.active.contains_key(symbol)
    }

    pub fn remove_position(&mut self, symbol: &str) -> Option<Position> {
        let removed = self
            .active
            .remove(symbol)
            .or_else(|| self.dust.remove(symbol));
        if removed.is_some() {
            self.save();
        }
        removed
    }

    /// Refresh a position's mark and migrate across the dust boundary when
    /// its value crossed the threshold.
    pub fn update_position_value(&mut self, symbol: &str, current_price: Decimal) {
        let Some(position) = self.get_mut(symbol) else {
            return;
        };
        position.update_price(current_price);
        let value = position.size_qty * current_price;

        let is_active = self.active.contains_key(symbol);
        let should_be_active = value >= self.limits.dust_threshold_usd;
        if is_active && !should_be_active {
            if let Some(position) = self.active.remove(symbol) {
                debug!("[REGISTRY] {} -> dust (${})", symbol, value);
                self.dust.insert(symbol.to_string(), position);
            }
        } else if !is_active && should_be_active {
            if let Some(position) = self.dust.remove(symbol) {
                debug!("[REGISTRY] {} -> active (${})", symbol, value);
                self.active.insert(symbol.to_string(), position);
            }
        }
    }

    pub fn active_positions(&self) -> &HashMap<String, Position> {
        &self.active
    }

    pub fn dust_positions(&self) -> &HashMap<String, Position> {
        &self.dust
    }

    pub fn all_positions(&self) -> HashMap<String, Position> {
        let mut all = self.active.clone();
        all.extend(self.dust.clone());
        all
    }

    pub fn total_cost_basis(&self) -> Decimal {
        self.active.values().map(|p| p.cost_basis).sum()
    }

    pub fn cost_basis_for(&self, symbol: &str) -> Decimal {
        self.active
            .values()
            .chain(self.dust.values())
            .filter(|p| p.symbol == symbol)
            .map(|p| p.cost_basis)
            .sum()
    }

    /// Active count reconciled against exchange holdings when available,
    /// so a desynced registry cannot wedge the entry gate.
    pub fn reconciled_active_count(&self) -> usize {
        match &self.exchange_symbols {
            Some(exchange) => self
                .active
                .keys()
                .filter(|symbol| exchange.contains(*symbol))
                .count(),
            None => self.active.len(),
        }
    }

    pub fn can_open_position(
        &self,
        strategy_id: &str,
        estimated_size_usd: Decimal,
    ) -> Result<(), String> {
        if estimated_size_usd < self.limits.min_position_usd {
            return Err(format!(
                "below minimum ${}",
                self.limits.min_position_usd
            ));
        }
        let active_count = self.reconciled_active_count();
        if active_count >= self.limits.max_positions {
            return Err(format!(
                "max positions ({}) reached (currently {})",
                self.limits.max_positions, active_count
            ));
        }
        if let Some(cap) = self.limits.max_positions_per_strategy {
            let strategy_count = self
                .active
                .values()
                .filter(|p| p.strategy_id == strategy_id)
                .count();
            if strategy_count >= cap {
                return Err(format!("max {} positions ({}) reached", strategy_id, cap));
            }
        }
        Ok(())
    }

    pub fn can_close_position(&self, symbol: &str) -> Result<(), String> {
        let position = self
            .get(symbol)
            .ok_or_else(|| "position not found".to_string())?;
        let held = position.hold_seconds();
        if (held as u64) < self.limits.min_hold_seconds {
            return Err(format!(
                "min hold: {}s remaining",
                self.limits.min_hold_seconds as i64 - held
            ));
        }
        Ok(())
    }

    pub fn stats(&self) -> RegistryStats {
        let mut by_strategy: HashMap<String, usize> = HashMap::new();
        for position in self.active.values() {
            *by_strategy.entry(position.strategy_id.clone()).or_insert(0) += 1;
        }
        RegistryStats {
            active_positions: self.active.len(),
            dust_positions: self.dust.len(),
            total_cost_basis: self.total_cost_basis(),
            by_strategy,
        }
    }

    pub fn save(&self) {
        let all = self.all_positions();
        atomic_write_json_logged(&self.persist_path, &all);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TradingMode;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn registry_in(dir: &std::path::Path) -> PositionRegistry {
        let paths = ModePaths::with_root(dir, TradingMode::Paper);
        PositionRegistry::load(&paths, &Settings::default())
    }

    fn position(symbol: &str, size_usd: Decimal, qty: Decimal) -> Position {
        Position::new(
            symbol,
            size_usd / qty,
            size_usd,
            qty,
            size_usd / qty * dec!(0.97),
            size_usd / qty * dec!(1.05),
            size_usd / qty * dec!(1.08),
            Utc::now() + chrono::Duration::hours(2),
            "burst_flag",
        )
    }

    #[test]
    fn test_active_dust_disjoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = registry_in(dir.path());
        assert!(registry.add_position(position("BTC-USD", dec!(15), dec!(0.15))));
        assert!(!registry.add_position(position("PEPE-USD", dec!(0.25), dec!(100))));

        assert!(registry.has_active_position("BTC-USD"));
        assert!(!registry.has_active_position("PEPE-USD"));
        assert!(registry.has_position("PEPE-USD"));
        // a symbol never appears in both maps
        for symbol in registry.active_positions().keys() {
            assert!(!registry.dust_positions().contains_key(symbol));
        }
    }

    #[test]
    fn test_dust_boundary_transitions() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = registry_in(dir.path());
        registry.add_position(position("SOL-USD", dec!(10), dec!(10))); // $1/coin

        // price collapse moves it to dust
        registry.update_position_value("SOL-USD", dec!(0.04));
        assert!(!registry.has_active_position("SOL-USD"));
        assert!(registry.has_position("SOL-USD"));

        // recovery moves it back
        registry.update_position_value("SOL-USD", dec!(1.2));
        assert!(registry.has_active_position("SOL-USD"));
    }

    #[test]
    fn test_boundary_exactly_at_threshold_is_active() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = registry_in(dir.path());
        registry.add_position(position("ADA-USD", dec!(10), dec!(10)));
        // dust_threshold_usd default 0.50; value exactly at threshold stays active
        registry.update_position_value("ADA-USD", dec!(0.05));
        assert!(registry.has_active_position("ADA-USD"));
        registry.update_position_value("ADA-USD", dec!(0.0499));
        assert!(!registry.has_active_position("ADA-USD"));
    }

    #[test]
    fn test_max_positions_gate() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.max_positions = 2;
        let mut registry = PositionRegistry::load(
            &ModePaths::with_root(dir.path(), TradingMode::Paper),
            &settings,
        );
        registry.add_position(position("BTC-USD", dec!(15), dec!(0.15)));
        registry.add_position(position("ETH-USD", dec!(15), dec!(0.5)));

        let err = registry.can_open_position("burst_flag", dec!(10)).unwrap_err();
        assert!(err.contains("max positions"));
    }

    #[test]
    fn test_reconciled_count_ignores_ghosts() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.max_positions = 2;
        let mut registry = PositionRegistry::load(
            &ModePaths::with_root(dir.path(), TradingMode::Paper),
            &settings,
        );
        registry.add_position(position("BTC-USD", dec!(15), dec!(0.15)));
        registry.add_position(position("ETH-USD", dec!(15), dec!(0.5)));

        // exchange only knows about one of them: the other is a ghost
        let exchange: HashSet<String> = ["BTC-USD".to_string()].into_iter().collect();
        registry.set_exchange_symbols(Some(exchange));
        assert_eq!(registry.reconciled_active_count(), 1);
        assert!(registry.can_open_position("vwap_reclaim", dec!(10)).is_ok());
    }

    #[test]
    fn test_per_strategy_cap() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.max_positions_per_strategy = Some(1);
        let mut registry = PositionRegistry::load(
            &ModePaths::with_root(dir.path(), TradingMode::Paper),
            &settings,
        );
        registry.add_position(position("BTC-USD", dec!(15), dec!(0.15)));
        let err = registry.can_open_position("burst_flag", dec!(10)).unwrap_err();
        assert!(err.contains("burst_flag"));
        assert!(registry.can_open_position("vwap_reclaim", dec!(10)).is_ok());
    }

    #[test]
    fn test_min_hold_blocks_instant_close() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = registry_in(dir.path());
        registry.add_position(position("BTC-USD", dec!(15), dec!(0.15)));
        let err = registry.can_close_position("BTC-USD").unwrap_err();
        assert!(err.contains("min hold"));

        registry.get_mut("BTC-USD").unwrap().entry_time =
            Utc::now() - chrono::Duration::seconds(60);
        assert!(registry.can_close_position("BTC-USD").is_ok());
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut registry = registry_in(dir.path());
            registry.add_position(position("BTC-USD", dec!(15), dec!(0.15)));
        }
        let restored = registry_in(dir.path());
        assert!(restored.has_active_position("BTC-USD"));
        assert_eq!(restored.total_cost_basis(), dec!(15));
    }
}
