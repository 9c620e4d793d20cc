use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::info;

use crate::storage::{atomic_write_json_logged, load_json, ModePaths};

/// Outcome of a cooldown check: the hard window blocks unconditionally,
/// the soft window blocks normal re-entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownStatus {
    Clear,
    /// Inside `order_cooldown_min_seconds`.
    Hard { remaining_s: i64 },
    /// Past the hard window but inside `order_cooldown_seconds`.
    Soft { remaining_s: i64 },
}

/// Per-symbol order cooldowns with disk persistence. Expired entries are
/// purged on load so restarts do not resurrect old blocks.
pub struct Cooldowns {
    last_order: HashMap<String, DateTime<Utc>>,
    hard_seconds: u64,
    soft_seconds: u64,
    persist_path: PathBuf,
}

impl Cooldowns {
    pub fn load(paths: &ModePaths, hard_seconds: u64, soft_seconds: u64) -> Self {
        let persist_path = paths.cooldowns_path();
        let raw: HashMap<String, DateTime<Utc>> =
            load_json(&persist_path).ok().flatten().unwrap_or_default();
        let now = Utc::now();
        let last_order: HashMap<String, DateTime<Utc>> = raw
            .into_iter()
            .filter(|(_, ts)| (now - *ts).num_seconds() < soft_seconds as i64)
            .collect();
        if !last_order.is_empty() {
            info!("[COOLDOWN] Loaded {} active cooldowns", last_order.len());
        }
        Self {
            last_order,
            hard_seconds,
            soft_seconds,
            persist_path,
        }
    }

    pub fn record_order(&mut self, symbol: &str) {
        self.last_order.insert(symbol.to_string(), Utc::now());
        self.save();
    }

    pub fn status(&self, symbol: &str) -> CooldownStatus {
        let Some(last) = self.last_order.get(symbol) else {
            return CooldownStatus::Clear;
        };
        let elapsed = (Utc::now() - *last).num_seconds();
        if elapsed < self.hard_seconds as i64 {
            CooldownStatus::Hard {
                remaining_s: self.hard_seconds as i64 - elapsed,
            }
        } else if elapsed < self.soft_seconds as i64 {
            CooldownStatus::Soft {
                remaining_s: self.soft_seconds as i64 - elapsed,
            }
        } else {
            CooldownStatus::Clear
        }
    }

    pub fn clear(&mut self, symbol: &str) {
        self.last_order.remove(symbol);
        self.save();
    }

    pub fn active_count(&self) -> usize {
        let now = Utc::now();
        self.last_order
            .values()
            .filter(|ts| (now - **ts).num_seconds() < self.soft_seconds as i64)
            .count()
    }

    pub fn save(&self) {
        atomic_write_json_logged(&self.persist_path, &self.last_order);
    }

    #[cfg(test)]
    pub(crate) fn backdate(&mut self, symbol: &str, seconds_ago: i64) {
        self.last_order.insert(
            symbol.to_string(),
            Utc::now() - chrono::Duration::seconds(seconds_ago),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TradingMode;

    fn cooldowns_in(dir: &std::path::Path) -> Cooldowns {
        Cooldowns::load(&ModePaths::with_root(dir, TradingMode::Paper), 120, 900)
    }

    #[test]
    fn test_windows_hard_then_soft_then_clear() {
        let dir = tempfile::tempdir().unwrap();
        let mut cooldowns = cooldowns_in(dir.path());
        cooldowns.record_order("BTC-USD");
        assert!(matches!(
            cooldowns.status("BTC-USD"),
            CooldownStatus::Hard { .. }
        ));

        cooldowns.backdate("BTC-USD", 300);
        assert!(matches!(
            cooldowns.status("BTC-USD"),
            CooldownStatus::Soft { .. }
        ));

        cooldowns.backdate("BTC-USD", 901);
        assert_eq!(cooldowns.status("BTC-USD"), CooldownStatus::Clear);
        assert_eq!(cooldowns.status("NEVER-USD"), CooldownStatus::Clear);
    }

    #[test]
    fn test_persistence_roundtrip_purges_expired() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut cooldowns = cooldowns_in(dir.path());
            cooldowns.record_order("BTC-USD");
            cooldowns.backdate("OLD-USD", 2000);
            cooldowns.save();
        }
        let reloaded = cooldowns_in(dir.path());
        assert!(matches!(
            reloaded.status("BTC-USD"),
            CooldownStatus::Hard { .. }
        ));
        // expired entry was dropped at load
        assert_eq!(reloaded.active_count(), 1);
    }
}
