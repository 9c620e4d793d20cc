use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

use crate::storage::{atomic_write_json_logged, load_json, ModePaths};

/// Persisted daily trading accounting. Auto-resets on UTC date change;
/// `record_trade` is the only mutator and saves after every call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DailyStats {
    pub stats_date: String,
    pub trades: u32,
    pub wins: u32,
    pub losses: u32,
    pub total_pnl: Decimal,
    pub total_win_pnl: Decimal,
    pub total_loss_pnl: Decimal,
    pub peak_pnl: Decimal,
    pub max_drawdown: Decimal,
    pub biggest_win: Decimal,
    pub biggest_loss: Decimal,
    #[serde(skip)]
    persist_path: Option<PathBuf>,
}

impl DailyStats {
    pub fn load(paths: &ModePaths) -> Self {
        let path = paths.daily_stats_path();
        let mut stats: DailyStats = load_json(&path).ok().flatten().unwrap_or_default();
        stats.persist_path = Some(path);
        if stats.trades > 0 {
            info!(
                "[STATS] Loaded daily stats: {} trades, {} W / {} L, ${} PnL",
                stats.trades, stats.wins, stats.losses, stats.total_pnl
            );
        }
        stats.check_reset();
        stats
    }

    /// Zero everything when the UTC date has rolled over.
    pub fn check_reset(&mut self) {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        if self.stats_date != today {
            if !self.stats_date.is_empty() {
                info!(
                    "[STATS] New day ({} -> {}), resetting daily stats",
                    self.stats_date, today
                );
            }
            let path = self.persist_path.clone();
            *self = DailyStats {
                stats_date: today,
                persist_path: path,
                ..DailyStats::default()
            };
            self.save();
        }
    }

    pub fn record_trade(&mut self, pnl: Decimal) {
        self.check_reset();
        self.trades += 1;
        if pnl > Decimal::ZERO {
            self.wins += 1;
            self.total_win_pnl += pnl;
            self.biggest_win = self.biggest_win.max(pnl);
        } else if pnl < Decimal::ZERO {
            // breakeven trades count in `trades` but not wins/losses
            self.losses += 1;
            self.total_loss_pnl += pnl.abs();
            self.biggest_loss = self.biggest_loss.max(pnl.abs());
        }
        self.total_pnl += pnl;
        self.peak_pnl = self.peak_pnl.max(self.total_pnl);
        self.max_drawdown = self.max_drawdown.min(self.total_pnl - self.peak_pnl);
        self.save();
    }

    fn save(&self) {
        if let Some(path) = &self.persist_path {
            atomic_write_json_logged(path, self);
        }
    }

    pub fn should_stop(&self, daily_max_loss_usd: Decimal) -> bool {
        self.total_pnl <= -daily_max_loss_usd
    }

    pub fn win_rate(&self) -> f64 {
        if self.trades == 0 {
            return 0.0;
        }
        self.wins as f64 / self.trades as f64
    }

    pub fn avg_win(&self) -> Decimal {
        if self.wins == 0 {
            return Decimal::ZERO;
        }
        self.total_win_pnl / Decimal::from(self.wins)
    }

    pub fn avg_loss(&self) -> Decimal {
        if self.losses == 0 {
            return Decimal::ZERO;
        }
        self.total_loss_pnl / Decimal::from(self.losses)
    }

    pub fn profit_factor(&self) -> Option<f64> {
        use rust_decimal::prelude::ToPrimitive;
        if self.total_loss_pnl.is_zero() {
            return None; // undefined until there is a loss
        }
        (self.total_win_pnl / self.total_loss_pnl).to_f64()
    }

    /// How close to the daily loss limit, 0-100.
    pub fn loss_limit_pct(&self, daily_max_loss_usd: Decimal) -> f64 {
        use rust_decimal::prelude::ToPrimitive;
        if self.total_pnl >= Decimal::ZERO {
            return 0.0;
        }
        if daily_max_loss_usd <= Decimal::ZERO {
            return 100.0;
        }
        (self.total_pnl.abs() / daily_max_loss_usd * Decimal::from(100))
            .to_f64()
            .unwrap_or(100.0)
            .min(100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TradingMode;
    use rust_decimal_macros::dec;

    fn stats_in(dir: &std::path::Path) -> DailyStats {
        DailyStats::load(&ModePaths::with_root(dir, TradingMode::Paper))
    }

    #[test]
    fn test_record_trade_accumulates() {
        let dir = tempfile::tempdir().unwrap();
        let mut stats = stats_in(dir.path());
        stats.record_trade(dec!(5));
        stats.record_trade(dec!(-2));
        stats.record_trade(Decimal::ZERO);

        assert_eq!(stats.trades, 3);
        assert_eq!(stats.wins, 1);
        assert_eq!(stats.losses, 1);
        assert_eq!(stats.total_pnl, dec!(3));
        assert_eq!(stats.peak_pnl, dec!(5));
        assert_eq!(stats.max_drawdown, dec!(-2));
        assert_eq!(stats.biggest_win, dec!(5));
        assert_eq!(stats.biggest_loss, dec!(2));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut stats = stats_in(dir.path());
            stats.record_trade(dec!(7.5));
            stats.record_trade(dec!(-1.25));
        }
        let reloaded = stats_in(dir.path());
        assert_eq!(reloaded.trades, 2);
        assert_eq!(reloaded.total_pnl, dec!(6.25));
    }

    #[test]
    fn test_stale_date_resets() {
        let dir = tempfile::tempdir().unwrap();
        let mut stats = stats_in(dir.path());
        stats.record_trade(dec!(5));
        stats.stats_date = "2020-01-01".to_string();
        stats.check_reset();
        assert_eq!(stats.trades, 0);
        assert_eq!(stats.total_pnl, Decimal::ZERO);
    }

    #[test]
    fn test_should_stop_at_limit() {
        let dir = tempfile::tempdir().unwrap();
        let mut stats = stats_in(dir.path());
        stats.record_trade(dec!(-12));
        assert!(stats.should_stop(dec!(12)));
        assert!(!stats.should_stop(dec!(12.01)));
        assert_eq!(stats.loss_limit_pct(dec!(24)), 50.0);
    }

    #[test]
    fn test_derived_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let mut stats = stats_in(dir.path());
        stats.record_trade(dec!(10));
        stats.record_trade(dec!(6));
        stats.record_trade(dec!(-4));
        assert_eq!(stats.avg_win(), dec!(8));
        assert_eq!(stats.avg_loss(), dec!(4));
        assert_eq!(stats.profit_factor(), Some(4.0));
        assert!((stats.win_rate() - 2.0 / 3.0).abs() < 1e-9);
    }
}
