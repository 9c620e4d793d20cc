use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{info, warn};

use crate::types::{safe_symbol, Candle, TimeFrame};

const FLUSH_EVERY: usize = 10;

/// On-disk candle form: one JSONL line per candle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCandle {
    pub ts: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub tf: String,
    pub source: String,
}

impl StoredCandle {
    pub fn from_candle(candle: &Candle, tf: TimeFrame, source: &str) -> Self {
        Self {
            ts: candle.timestamp,
            open: candle.open,
            high: candle.high,
            low: candle.low,
            close: candle.close,
            volume: candle.volume,
            tf: tf.as_str().to_string(),
            source: source.to_string(),
        }
    }

    pub fn to_candle(&self) -> Candle {
        Candle {
            timestamp: self.ts,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }
}

/// Append-only JSONL candle storage under `<base>/<safe-symbol>/<tf>.jsonl`.
///
/// Single-candle writes are buffered per (symbol, tf) and flushed every
/// few lines; bulk writes go straight to disk. Readers stream, filter by
/// age, sort, dedupe (first write wins) and truncate to the newest rows.
pub struct CandleStore {
    base_dir: PathBuf,
    buffers: Mutex<HashMap<(String, TimeFrame), Vec<String>>>,
    candles_written: AtomicU64,
    candles_loaded: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CandleStoreStats {
    pub symbols: usize,
    pub files: usize,
    pub size_bytes: u64,
    pub candles_written: u64,
    pub candles_loaded: u64,
}

impl CandleStore {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            buffers: Mutex::new(HashMap::new()),
            candles_written: AtomicU64::new(0),
            candles_loaded: AtomicU64::new(0),
        }
    }

    fn file_path(&self, symbol: &str, tf: TimeFrame) -> PathBuf {
        self.base_dir
            .join(safe_symbol(symbol))
            .join(format!("{}.jsonl", tf.as_str()))
    }

    fn append_lines(&self, symbol: &str, tf: TimeFrame, lines: &[String]) {
        if lines.is_empty() {
            return;
        }
        let path = self.file_path(symbol, tf);
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!("[STORE] could not create {}: {}", parent.display(), e);
                return;
            }
        }
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut f| writeln!(f, "{}", lines.join("\n")));
        match result {
            Ok(()) => {
                self.candles_written
                    .fetch_add(lines.len() as u64, Ordering::Relaxed);
            }
            Err(e) => warn!("[STORE] append failed for {}: {}", path.display(), e),
        }
    }

    /// Write one candle (buffered).
    pub fn write_candle(&self, symbol: &str, candle: &Candle, tf: TimeFrame, source: &str) {
        let line = match serde_json::to_string(&StoredCandle::from_candle(candle, tf, source)) {
            Ok(line) => line,
            Err(e) => {
                warn!("[STORE] serialize failed for {}: {}", symbol, e);
                return;
            }
        };

        let flushable = {
            let mut buffers = self.buffers.lock().unwrap_or_else(|p| p.into_inner());
            let buffer = buffers
                .entry((symbol.to_string(), tf))
                .or_default();
            buffer.push(line);
            if buffer.len() >= FLUSH_EVERY {
                Some(std::mem::take(buffer))
            } else {
                None
            }
        };
        if let Some(lines) = flushable {
            self.append_lines(symbol, tf, &lines);
        }
    }

    /// Write a batch of candles directly (REST poll results).
    pub fn write_candles(&self, symbol: &str, candles: &[Candle], tf: TimeFrame, source: &str) {
        if candles.is_empty() {
            return;
        }
        let lines: Vec<String> = candles
            .iter()
            .filter_map(|c| {
                serde_json::to_string(&StoredCandle::from_candle(c, tf, source)).ok()
            })
            .collect();
        self.append_lines(symbol, tf, &lines);
    }

    /// Flush all buffered single-candle writes.
    pub fn flush_all(&self) {
        let drained: Vec<((String, TimeFrame), Vec<String>)> = {
            let mut buffers = self.buffers.lock().unwrap_or_else(|p| p.into_inner());
            buffers
                .iter_mut()
                .filter(|(_, lines)| !lines.is_empty())
                .map(|(key, lines)| (key.clone(), std::mem::take(lines)))
                .collect()
        };
        for ((symbol, tf), lines) in drained {
            self.append_lines(&symbol, tf, &lines);
        }
    }

    /// Load candles: age-filtered, ascending, deduped by timestamp
    /// (first wins), truncated to the newest `max_count`. Malformed lines
    /// are skipped.
    pub fn load_candles(
        &self,
        symbol: &str,
        tf: TimeFrame,
        max_age_hours: i64,
        max_count: usize,
    ) -> Vec<Candle> {
        let path = self.file_path(symbol, tf);
        let file = match std::fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!("[STORE] open failed for {}: {}", path.display(), e);
                return Vec::new();
            }
        };

        let cutoff = Utc::now() - Duration::hours(max_age_hours);
        let mut candles: Vec<Candle> = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!("[STORE] read failed for {}: {}", path.display(), e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            let stored: StoredCandle = match serde_json::from_str(&line) {
                Ok(stored) => stored,
                Err(_) => continue,
            };
            if stored.ts >= cutoff {
                candles.push(stored.to_candle());
            }
        }

        candles.sort_by_key(|c| c.timestamp);
        let mut seen = HashSet::new();
        candles.retain(|c| seen.insert(c.timestamp));
        if candles.len() > max_count {
            candles.drain(..candles.len() - max_count);
        }

        self.candles_loaded
            .fetch_add(candles.len() as u64, Ordering::Relaxed);
        candles
    }

    /// Seed data for restart recovery: 1m + 5m per symbol.
    pub fn rehydrate_buffers(
        &self,
        symbols: &[String],
        max_age_hours: i64,
    ) -> HashMap<String, (Vec<Candle>, Vec<Candle>)> {
        let mut result = HashMap::new();
        for symbol in symbols {
            let candles_1m = self.load_candles(symbol, TimeFrame::M1, max_age_hours, 500);
            let candles_5m = self.load_candles(symbol, TimeFrame::M5, max_age_hours, 500);
            if !candles_1m.is_empty() || !candles_5m.is_empty() {
                result.insert(symbol.clone(), (candles_1m, candles_5m));
            }
        }
        let total: usize = result.values().map(|(a, b)| a.len() + b.len()).sum();
        info!(
            "[STORE] Rehydrated {} candles for {} symbols",
            total,
            result.len()
        );
        result
    }

    /// Remove candle files whose mtime is older than `max_age_days`.
    pub fn cleanup_old_files(&self, max_age_days: u64) -> usize {
        let cutoff = std::time::SystemTime::now()
            - std::time::Duration::from_secs(max_age_days * 24 * 3600);
        let mut removed = 0;

        let Ok(entries) = std::fs::read_dir(&self.base_dir) else {
            return 0;
        };
        for symbol_dir in entries.flatten() {
            let Ok(files) = std::fs::read_dir(symbol_dir.path()) else {
                continue;
            };
            for file in files.flatten() {
                let path = file.path();
                if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                    continue;
                }
                let is_old = file
                    .metadata()
                    .and_then(|m| m.modified())
                    .map(|mtime| mtime < cutoff)
                    .unwrap_or(false);
                if is_old && std::fs::remove_file(&path).is_ok() {
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            info!("[STORE] Cleaned up {} old candle files", removed);
        }
        removed
    }

    pub fn stats(&self) -> CandleStoreStats {
        let mut symbols = 0;
        let mut files = 0;
        let mut size_bytes = 0u64;
        if let Ok(entries) = std::fs::read_dir(&self.base_dir) {
            for symbol_dir in entries.flatten() {
                if !symbol_dir.path().is_dir() {
                    continue;
                }
                symbols += 1;
                if let Ok(inner) = std::fs::read_dir(symbol_dir.path()) {
                    for file in inner.flatten() {
                        if file.path().extension().and_then(|e| e.to_str()) == Some("jsonl") {
                            files += 1;
                            size_bytes += file.metadata().map(|m| m.len()).unwrap_or(0);
                        }
                    }
                }
            }
        }
        CandleStoreStats {
            symbols,
            files,
            size_bytes,
            candles_written: self.candles_written.load(Ordering::Relaxed),
            candles_loaded: self.candles_loaded.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candle(ts: DateTime<Utc>, close: Decimal) -> Candle {
        Candle {
            timestamp: ts,
            open: close - dec!(1),
            high: close + dec!(1),
            low: close - dec!(2),
            close,
            volume: dec!(10),
        }
    }

    #[test]
    fn test_stored_candle_roundtrip() {
        let c = candle(Utc::now(), dec!(101.25));
        let stored = StoredCandle::from_candle(&c, TimeFrame::M1, "ws");
        assert_eq!(stored.to_candle(), c);
    }

    #[test]
    fn test_write_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CandleStore::new(dir.path());
        let now = Utc::now();
        let candles: Vec<Candle> = (0..5)
            .map(|i| candle(now - Duration::minutes(5 - i), Decimal::from(100 + i)))
            .collect();
        store.write_candles("BTC-USD", &candles, TimeFrame::M1, "rest");

        let loaded = store.load_candles("BTC-USD", TimeFrame::M1, 24, 500);
        assert_eq!(loaded.len(), 5);
        assert!(loaded.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn test_load_dedupes_first_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = CandleStore::new(dir.path());
        let ts = Utc::now();
        store.write_candles("BTC-USD", &[candle(ts, dec!(100))], TimeFrame::M1, "ws");
        store.write_candles("BTC-USD", &[candle(ts, dec!(999))], TimeFrame::M1, "rest");

        let loaded = store.load_candles("BTC-USD", TimeFrame::M1, 24, 500);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].close, dec!(100));
    }

    #[test]
    fn test_load_skips_malformed_and_old() {
        let dir = tempfile::tempdir().unwrap();
        let store = CandleStore::new(dir.path());
        let now = Utc::now();
        store.write_candles(
            "ETH-USD",
            &[candle(now - Duration::hours(48), dec!(50)), candle(now, dec!(60))],
            TimeFrame::M5,
            "rest",
        );
        // corrupt a line
        let path = dir.path().join("ETH-USD").join("5m.jsonl");
        let mut body = std::fs::read_to_string(&path).unwrap();
        body.push_str("{not json}\n");
        std::fs::write(&path, body).unwrap();

        let loaded = store.load_candles("ETH-USD", TimeFrame::M5, 24, 500);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].close, dec!(60));
    }

    #[test]
    fn test_max_count_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        let store = CandleStore::new(dir.path());
        let now = Utc::now();
        let candles: Vec<Candle> = (0..10)
            .map(|i| candle(now - Duration::minutes(10 - i), Decimal::from(100 + i)))
            .collect();
        store.write_candles("SOL-USD", &candles, TimeFrame::M1, "rest");

        let loaded = store.load_candles("SOL-USD", TimeFrame::M1, 24, 3);
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[2].close, dec!(109));
    }

    #[test]
    fn test_buffered_writes_flush() {
        let dir = tempfile::tempdir().unwrap();
        let store = CandleStore::new(dir.path());
        let now = Utc::now();
        for i in 0..3 {
            store.write_candle(
                "BTC-USD",
                &candle(now - Duration::minutes(3 - i), Decimal::from(100 + i)),
                TimeFrame::M1,
                "ws",
            );
        }
        // below the flush threshold, nothing durable yet
        assert!(store.load_candles("BTC-USD", TimeFrame::M1, 24, 500).is_empty());
        store.flush_all();
        assert_eq!(store.load_candles("BTC-USD", TimeFrame::M1, 24, 500).len(), 3);
    }

    #[test]
    fn test_symbol_is_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let store = CandleStore::new(dir.path());
        store.write_candles(
            "BTC/USD",
            &[candle(Utc::now(), dec!(100))],
            TimeFrame::M1,
            "rest",
        );
        assert!(dir.path().join("BTC-USD").join("1m.jsonl").exists());
    }
}
