use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::settings::Settings;

/// Runtime-adjustable parameters, a closed whitelist.
///
/// Values are held in UI units (percent fields 0-100); `apply_to_settings`
/// converts into the internal 0-1 representation. Unknown parameter names
/// are rejected, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // Risk controls
    pub max_exposure_pct: f64,
    pub daily_loss_limit_usd: f64,
    pub position_base_pct: f64,
    pub position_min_pct: f64,
    pub position_max_pct: f64,

    // Position sizing tiers
    pub whale_trade_usd: f64,
    pub strong_trade_usd: f64,
    pub normal_trade_usd: f64,
    pub scout_trade_usd: f64,

    // Entry filters
    pub entry_score_min: f64,
    pub spread_max_bps: f64,
    pub min_rr_ratio: f64,
    pub vol_spike_threshold: f64,

    // Stop / TP settings
    pub fixed_stop_pct: f64,
    pub tp1_pct: f64,
    pub tp2_pct: f64,
    pub tp1_partial_pct: f64,
    pub max_hold_minutes: u32,

    // Trading controls
    pub pause_new_entries: bool,

    // Audit fields
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default = "default_updated_by")]
    pub updated_by: String,
}

fn default_updated_by() -> String {
    "system".to_string()
}

fn dec(v: f64) -> Decimal {
    Decimal::from_f64(v).unwrap_or_default()
}

impl RuntimeConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        use rust_decimal::prelude::ToPrimitive;
        let pct = |d: Decimal| (d * Decimal::from(100)).to_f64().unwrap_or(0.0);
        let usd = |d: Decimal| d.to_f64().unwrap_or(0.0);
        Self {
            max_exposure_pct: pct(settings.portfolio_max_exposure_pct),
            daily_loss_limit_usd: usd(settings.daily_max_loss_usd),
            position_base_pct: pct(settings.position_base_pct),
            position_min_pct: pct(settings.position_min_pct),
            position_max_pct: pct(settings.position_max_pct),
            whale_trade_usd: usd(settings.whale_trade_usd),
            strong_trade_usd: usd(settings.strong_trade_usd),
            normal_trade_usd: usd(settings.normal_trade_usd),
            scout_trade_usd: usd(settings.scout_trade_usd),
            entry_score_min: settings.entry_score_min,
            spread_max_bps: settings.spread_max_bps,
            min_rr_ratio: settings.min_rr_ratio,
            vol_spike_threshold: settings.vol_spike_threshold,
            fixed_stop_pct: pct(settings.fixed_stop_pct),
            tp1_pct: pct(settings.tp1_pct),
            tp2_pct: pct(settings.tp2_pct),
            tp1_partial_pct: pct(settings.tp1_partial_pct),
            max_hold_minutes: settings.max_hold_minutes,
            pause_new_entries: settings.pause_new_entries,
            updated_at: None,
            updated_by: "system".to_string(),
        }
    }

    /// All whitelisted parameter names.
    pub fn param_names() -> &'static [&'static str] {
        &[
            "max_exposure_pct",
            "daily_loss_limit_usd",
            "position_base_pct",
            "position_min_pct",
            "position_max_pct",
            "whale_trade_usd",
            "strong_trade_usd",
            "normal_trade_usd",
            "scout_trade_usd",
            "entry_score_min",
            "spread_max_bps",
            "min_rr_ratio",
            "vol_spike_threshold",
            "fixed_stop_pct",
            "tp1_pct",
            "tp2_pct",
            "tp1_partial_pct",
            "max_hold_minutes",
            "pause_new_entries",
        ]
    }

    /// Range-check a value for one parameter. Unknown names are rejected.
    pub fn validate_param(name: &str, value: &Value) -> Result<(), String> {
        let number = || {
            value
                .as_f64()
                .ok_or_else(|| format!("{} expects a number, got {}", name, value))
        };
        let in_range = |lo: f64, hi: f64| -> Result<(), String> {
            let v = number()?;
            if v >= lo && v <= hi {
                Ok(())
            } else {
                Err(format!("{}={} outside [{}, {}]", name, v, lo, hi))
            }
        };

        match name {
            "max_exposure_pct" => in_range(10.0, 100.0),
            "daily_loss_limit_usd" => in_range(5.0, 500.0),
            "position_base_pct" => in_range(1.0, 20.0),
            "position_min_pct" => in_range(0.5, 10.0),
            "position_max_pct" => in_range(2.0, 25.0),
            "whale_trade_usd" => in_range(5.0, 200.0),
            "strong_trade_usd" => in_range(5.0, 100.0),
            "normal_trade_usd" => in_range(2.0, 50.0),
            "scout_trade_usd" => in_range(1.0, 25.0),
            "entry_score_min" => in_range(20.0, 90.0),
            "spread_max_bps" => in_range(5.0, 100.0),
            "min_rr_ratio" => in_range(1.0, 5.0),
            "vol_spike_threshold" => in_range(1.0, 10.0),
            "fixed_stop_pct" => in_range(0.5, 20.0),
            "tp1_pct" => in_range(0.5, 50.0),
            "tp2_pct" => in_range(0.5, 100.0),
            "tp1_partial_pct" => in_range(10.0, 100.0),
            "max_hold_minutes" => in_range(5.0, 2880.0),
            "pause_new_entries" => {
                if value.is_boolean() {
                    Ok(())
                } else {
                    Err(format!("pause_new_entries expects a bool, got {}", value))
                }
            }
            _ => Err(format!("unknown parameter: {}", name)),
        }
    }

    /// Apply a validated value. Callers must have run `validate_param`.
    pub fn set(&mut self, name: &str, value: &Value) -> Result<(), String> {
        Self::validate_param(name, value)?;
        let num = value.as_f64().unwrap_or(0.0);
        match name {
            "max_exposure_pct" => self.max_exposure_pct = num,
            "daily_loss_limit_usd" => self.daily_loss_limit_usd = num,
            "position_base_pct" => self.position_base_pct = num,
            "position_min_pct" => self.position_min_pct = num,
            "position_max_pct" => self.position_max_pct = num,
            "whale_trade_usd" => self.whale_trade_usd = num,
            "strong_trade_usd" => self.strong_trade_usd = num,
            "normal_trade_usd" => self.normal_trade_usd = num,
            "scout_trade_usd" => self.scout_trade_usd = num,
            "entry_score_min" => self.entry_score_min = num,
            "spread_max_bps" => self.spread_max_bps = num,
            "min_rr_ratio" => self.min_rr_ratio = num,
            "vol_spike_threshold" => self.vol_spike_threshold = num,
            "fixed_stop_pct" => self.fixed_stop_pct = num,
            "tp1_pct" => self.tp1_pct = num,
            "tp2_pct" => self.tp2_pct = num,
            "tp1_partial_pct" => self.tp1_partial_pct = num,
            "max_hold_minutes" => self.max_hold_minutes = num as u32,
            "pause_new_entries" => self.pause_new_entries = value.as_bool().unwrap_or(false),
            _ => return Err(format!("unknown parameter: {}", name)),
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        let v = match name {
            "max_exposure_pct" => Value::from(self.max_exposure_pct),
            "daily_loss_limit_usd" => Value::from(self.daily_loss_limit_usd),
            "position_base_pct" => Value::from(self.position_base_pct),
            "position_min_pct" => Value::from(self.position_min_pct),
            "position_max_pct" => Value::from(self.position_max_pct),
            "whale_trade_usd" => Value::from(self.whale_trade_usd),
            "strong_trade_usd" => Value::from(self.strong_trade_usd),
            "normal_trade_usd" => Value::from(self.normal_trade_usd),
            "scout_trade_usd" => Value::from(self.scout_trade_usd),
            "entry_score_min" => Value::from(self.entry_score_min),
            "spread_max_bps" => Value::from(self.spread_max_bps),
            "min_rr_ratio" => Value::from(self.min_rr_ratio),
            "vol_spike_threshold" => Value::from(self.vol_spike_threshold),
            "fixed_stop_pct" => Value::from(self.fixed_stop_pct),
            "tp1_pct" => Value::from(self.tp1_pct),
            "tp2_pct" => Value::from(self.tp2_pct),
            "tp1_partial_pct" => Value::from(self.tp1_partial_pct),
            "max_hold_minutes" => Value::from(self.max_hold_minutes),
            "pause_new_entries" => Value::from(self.pause_new_entries),
            _ => return None,
        };
        Some(v)
    }

    /// Write all parameters back into Settings, converting UI units
    /// (percent 0-100) to the internal 0-1 representation.
    pub fn apply_to_settings(&self, settings: &mut Settings) {
        let hundred = Decimal::from(100);
        settings.portfolio_max_exposure_pct = dec(self.max_exposure_pct) / hundred;
        settings.daily_max_loss_usd = dec(self.daily_loss_limit_usd);
        settings.position_base_pct = dec(self.position_base_pct) / hundred;
        settings.position_min_pct = dec(self.position_min_pct) / hundred;
        settings.position_max_pct = dec(self.position_max_pct) / hundred;
        settings.whale_trade_usd = dec(self.whale_trade_usd);
        settings.strong_trade_usd = dec(self.strong_trade_usd);
        settings.normal_trade_usd = dec(self.normal_trade_usd);
        settings.scout_trade_usd = dec(self.scout_trade_usd);
        settings.entry_score_min = self.entry_score_min;
        settings.spread_max_bps = self.spread_max_bps;
        settings.min_rr_ratio = self.min_rr_ratio;
        settings.vol_spike_threshold = self.vol_spike_threshold;
        settings.fixed_stop_pct = dec(self.fixed_stop_pct) / hundred;
        settings.tp1_pct = dec(self.tp1_pct) / hundred;
        settings.tp2_pct = dec(self.tp2_pct) / hundred;
        settings.tp1_partial_pct = dec(self.tp1_partial_pct) / hundred;
        settings.max_hold_minutes = self.max_hold_minutes;
        settings.pause_new_entries = self.pause_new_entries;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec as d;

    #[test]
    fn test_unknown_param_rejected() {
        let err = RuntimeConfig::validate_param("leverage", &Value::from(10.0)).unwrap_err();
        assert!(err.contains("unknown parameter"));
    }

    #[test]
    fn test_range_validation() {
        assert!(RuntimeConfig::validate_param("entry_score_min", &Value::from(55.0)).is_ok());
        assert!(RuntimeConfig::validate_param("entry_score_min", &Value::from(95.0)).is_err());
        assert!(RuntimeConfig::validate_param("pause_new_entries", &Value::from(true)).is_ok());
        assert!(RuntimeConfig::validate_param("pause_new_entries", &Value::from(1.0)).is_err());
    }

    #[test]
    fn test_set_then_get_roundtrip() {
        let mut config = RuntimeConfig::from_settings(&Settings::default());
        for name in RuntimeConfig::param_names() {
            let value = config.get(name).unwrap();
            // every accepted value survives a set/get cycle unchanged
            config.set(name, &value).unwrap();
            assert_eq!(config.get(name).unwrap(), value, "param {}", name);
        }
    }

    #[test]
    fn test_unit_conversion_to_settings() {
        let mut settings = Settings::default();
        let mut config = RuntimeConfig::from_settings(&settings);
        config.set("max_exposure_pct", &Value::from(85.0)).unwrap();
        config.set("tp1_pct", &Value::from(8.0)).unwrap();
        config.apply_to_settings(&mut settings);
        assert_eq!(settings.portfolio_max_exposure_pct, d!(0.85));
        assert_eq!(settings.tp1_pct, d!(0.08));
    }

    #[test]
    fn test_from_settings_roundtrips_units() {
        let settings = Settings::default();
        let config = RuntimeConfig::from_settings(&settings);
        let mut applied = Settings::default();
        config.apply_to_settings(&mut applied);
        assert_eq!(applied.portfolio_max_exposure_pct, settings.portfolio_max_exposure_pct);
        assert_eq!(applied.tp1_partial_pct, settings.tp1_partial_pct);
    }
}
