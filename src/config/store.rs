use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

use super::runtime::RuntimeConfig;
use super::settings::Settings;
use crate::storage::{append_jsonl, atomic_write_json, load_json, warn_persistence, ModePaths};

/// One applied parameter change, broadcast to subscribed components.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigChange {
    pub param: String,
    pub value: Value,
    pub source: String,
}

#[derive(Debug, Serialize)]
struct AuditRecord {
    ts: String,
    param: String,
    old: Value,
    new: Value,
    source: String,
}

/// Live-mutable configuration store.
///
/// Owns the persisted `runtime_config.json`, maps accepted updates into the
/// shared Settings snapshot, appends every change to the audit JSONL, and
/// notifies subscribers over a broadcast channel. Components re-read their
/// snapshot at the top of their next loop iteration.
pub struct RuntimeConfigStore {
    settings: Arc<RwLock<Settings>>,
    runtime: RwLock<RuntimeConfig>,
    path: PathBuf,
    audit_path: PathBuf,
    last_mtime: RwLock<Option<SystemTime>>,
    change_tx: broadcast::Sender<ConfigChange>,
}

impl RuntimeConfigStore {
    /// Build the store: load a persisted runtime config when present,
    /// otherwise derive one from boot settings and persist it.
    pub async fn new(settings: Arc<RwLock<Settings>>, paths: &ModePaths) -> Self {
        let path = paths.runtime_config_path();
        let audit_path = paths.config_audit_path();
        let (change_tx, _) = broadcast::channel(64);

        let runtime = match load_json::<RuntimeConfig>(&path) {
            Ok(Some(loaded)) => {
                info!("[CONFIG] Loaded runtime config from {}", path.display());
                let mut guard = settings.write().await;
                loaded.apply_to_settings(&mut guard);
                loaded
            }
            Ok(None) => {
                let fresh = RuntimeConfig::from_settings(&*settings.read().await);
                if let Err(e) = atomic_write_json(&path, &fresh) {
                    warn_persistence(&path, &e);
                }
                fresh
            }
            Err(e) => {
                warn!("[CONFIG] Corrupt runtime config ({}), rebuilding from settings", e);
                RuntimeConfig::from_settings(&*settings.read().await)
            }
        };

        let last_mtime = std::fs::metadata(&path).and_then(|m| m.modified()).ok();

        Self {
            settings,
            runtime: RwLock::new(runtime),
            path,
            audit_path,
            last_mtime: RwLock::new(last_mtime),
            change_tx,
        }
    }

    pub async fn get_config(&self) -> RuntimeConfig {
        self.runtime.read().await.clone()
    }

    pub async fn get_param(&self, name: &str) -> Option<Value> {
        self.runtime.read().await.get(name)
    }

    pub async fn pause_new_entries(&self) -> bool {
        self.runtime.read().await.pause_new_entries
    }

    /// Validate and apply one parameter, persist, audit, notify.
    pub async fn update_param(
        &self,
        name: &str,
        value: Value,
        source: &str,
    ) -> Result<(), String> {
        RuntimeConfig::validate_param(name, &value)?;

        let old;
        {
            let mut runtime = self.runtime.write().await;
            old = runtime.get(name).unwrap_or(Value::Null);
            runtime.set(name, &value)?;
            runtime.updated_at = Some(Utc::now().to_rfc3339());
            runtime.updated_by = source.to_string();

            let mut settings = self.settings.write().await;
            runtime.apply_to_settings(&mut settings);

            if let Err(e) = atomic_write_json(&self.path, &*runtime) {
                warn_persistence(&self.path, &e);
            }
        }
        *self.last_mtime.write().await = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok();

        let audit = AuditRecord {
            ts: Utc::now().to_rfc3339(),
            param: name.to_string(),
            old,
            new: value.clone(),
            source: source.to_string(),
        };
        if let Err(e) = append_jsonl(&self.audit_path, &audit) {
            warn_persistence(&self.audit_path, &e);
        }

        info!("[CONFIG] {} updated to {} (source={})", name, value, source);
        let _ = self.change_tx.send(ConfigChange {
            param: name.to_string(),
            value,
            source: source.to_string(),
        });
        Ok(())
    }

    /// Re-read the file if its mtime advanced. Returns true when reloaded.
    pub async fn reload_if_changed(&self) -> bool {
        let mtime = match std::fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(mtime) => mtime,
            Err(_) => return false,
        };
        let changed = {
            let last = self.last_mtime.read().await;
            last.map(|l| mtime > l).unwrap_or(true)
        };
        if !changed {
            return false;
        }
        self.do_reload().await
    }

    /// Re-read the persisted config and reapply it. With `force` false this
    /// is equivalent to `reload_if_changed`.
    pub async fn reload_from_disk(&self, force: bool) -> bool {
        if force {
            self.do_reload().await
        } else {
            self.reload_if_changed().await
        }
    }

    async fn do_reload(&self) -> bool {
        let loaded = match load_json::<RuntimeConfig>(&self.path) {
            Ok(Some(loaded)) => loaded,
            Ok(None) => return false,
            Err(e) => {
                warn!("[CONFIG] reload failed: {}", e);
                return false;
            }
        };

        {
            let mut runtime = self.runtime.write().await;
            *runtime = loaded;
            let mut settings = self.settings.write().await;
            runtime.apply_to_settings(&mut settings);
        }
        *self.last_mtime.write().await = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok();

        info!("[CONFIG] Reloaded runtime config from disk");
        let _ = self.change_tx.send(ConfigChange {
            param: "*".to_string(),
            value: Value::Null,
            source: "disk".to_string(),
        });
        true
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChange> {
        self.change_tx.subscribe()
    }

    pub fn settings_arc(&self) -> Arc<RwLock<Settings>> {
        Arc::clone(&self.settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TradingMode;
    use rust_decimal_macros::dec;

    async fn store_in(dir: &std::path::Path) -> RuntimeConfigStore {
        let settings = Arc::new(RwLock::new(Settings::default()));
        let paths = ModePaths::with_root(dir, TradingMode::Paper);
        RuntimeConfigStore::new(settings, &paths).await
    }

    #[tokio::test]
    async fn test_update_param_persists_and_applies() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path()).await;

        store
            .update_param("entry_score_min", Value::from(60.0), "test")
            .await
            .unwrap();

        assert_eq!(store.get_param("entry_score_min").await, Some(Value::from(60.0)));
        let settings = store.settings_arc();
        assert_eq!(settings.read().await.entry_score_min, 60.0);

        // survives a fresh store instance
        let reloaded = store_in(dir.path()).await;
        assert_eq!(
            reloaded.get_param("entry_score_min").await,
            Some(Value::from(60.0))
        );
    }

    #[tokio::test]
    async fn test_invalid_value_rejected_without_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path()).await;
        let before = store.get_config().await;

        let err = store
            .update_param("entry_score_min", Value::from(999.0), "test")
            .await
            .unwrap_err();
        assert!(err.contains("outside"));
        assert_eq!(store.get_config().await, before);
    }

    #[tokio::test]
    async fn test_unknown_param_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path()).await;
        assert!(store
            .update_param("nope", Value::from(1.0), "test")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_change_broadcast() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path()).await;
        let mut rx = store.subscribe();

        store
            .update_param("pause_new_entries", Value::from(true), "dashboard")
            .await
            .unwrap();

        let change = rx.recv().await.unwrap();
        assert_eq!(change.param, "pause_new_entries");
        assert_eq!(change.source, "dashboard");
        assert!(store.pause_new_entries().await);
    }

    #[tokio::test]
    async fn test_audit_trail_appended() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path()).await;
        store
            .update_param("spread_max_bps", Value::from(40.0), "test")
            .await
            .unwrap();
        store
            .update_param("spread_max_bps", Value::from(45.0), "test")
            .await
            .unwrap();

        let audit = std::fs::read_to_string(
            dir.path().join("data").join("paper").join("config_audit.jsonl"),
        )
        .unwrap();
        assert_eq!(audit.lines().count(), 2);
        assert!(audit.contains("\"param\":\"spread_max_bps\""));
    }

    #[tokio::test]
    async fn test_unit_conversion_flows_to_settings() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path()).await;
        store
            .update_param("max_exposure_pct", Value::from(85.0), "test")
            .await
            .unwrap();
        let settings = store.settings_arc();
        assert_eq!(
            settings.read().await.portfolio_max_exposure_pct,
            dec!(0.85)
        );
    }
}
