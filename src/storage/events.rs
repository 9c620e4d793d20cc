use chrono::Utc;
use serde::Serialize;
use std::path::PathBuf;

use super::{append_jsonl, paths::ModePaths, warn_persistence};
use crate::types::{OrderEvent, RejectionRecord};

/// Daily-rotated JSONL streams under `logs/<mode>/` for trades, gate
/// rejections, and engine events. Pure append; rotation is by file name.
pub struct EventLog {
    paths: ModePaths,
}

impl EventLog {
    pub fn new(paths: ModePaths) -> Self {
        Self { paths }
    }

    fn daily_path(&self, prefix: &str) -> PathBuf {
        let date = Utc::now().format("%Y-%m-%d");
        self.paths.logs_dir().join(format!("{}_{}.jsonl", prefix, date))
    }

    pub fn log_trade(&self, event: &OrderEvent) {
        self.append("trades", event);
    }

    pub fn log_rejection(&self, record: &RejectionRecord) {
        self.append("rejections", record);
    }

    pub fn log_event<T: Serialize>(&self, event: &T) {
        self.append("events", event);
    }

    fn append<T: Serialize>(&self, prefix: &str, value: &T) {
        let path = self.daily_path(prefix);
        if let Err(e) = append_jsonl(&path, value) {
            warn_persistence(&path, &e);
        }
    }
}
