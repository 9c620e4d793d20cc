use std::path::{Path, PathBuf};

use crate::types::TradingMode;

/// Mode-scoped filesystem layout. All persistent state lives under
/// `data/<mode>/` and `logs/<mode>/` so paper and live never share files.
#[derive(Debug, Clone)]
pub struct ModePaths {
    root: PathBuf,
    mode: TradingMode,
}

impl ModePaths {
    pub fn new(mode: TradingMode) -> Self {
        Self {
            root: PathBuf::from("."),
            mode,
        }
    }

    pub fn with_root(root: impl AsRef<Path>, mode: TradingMode) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            mode,
        }
    }

    pub fn mode(&self) -> TradingMode {
        self.mode
    }

    fn ensured(&self, path: PathBuf) -> PathBuf {
        if let Err(e) = std::fs::create_dir_all(&path) {
            tracing::warn!("[PATHS] could not create {}: {}", path.display(), e);
        }
        path
    }

    pub fn data_dir(&self) -> PathBuf {
        self.ensured(self.root.join("data").join(self.mode.as_str()))
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.ensured(self.root.join("logs").join(self.mode.as_str()))
    }

    pub fn candles_dir(&self) -> PathBuf {
        self.ensured(self.data_dir().join("candles"))
    }

    pub fn status_path(&self) -> PathBuf {
        self.data_dir().join("status.json")
    }

    pub fn runtime_config_path(&self) -> PathBuf {
        self.data_dir().join("runtime_config.json")
    }

    pub fn config_audit_path(&self) -> PathBuf {
        self.data_dir().join("config_audit.jsonl")
    }

    pub fn paper_state_path(&self) -> PathBuf {
        self.data_dir().join("paper_state.json")
    }

    pub fn positions_path(&self) -> PathBuf {
        self.data_dir()
            .join(format!("{}_positions.json", self.mode.as_str()))
    }

    pub fn daily_stats_path(&self) -> PathBuf {
        self.data_dir()
            .join(format!("{}_daily_stats.json", self.mode.as_str()))
    }

    pub fn cooldowns_path(&self) -> PathBuf {
        self.data_dir()
            .join(format!("{}_cooldowns.json", self.mode.as_str()))
    }
}
