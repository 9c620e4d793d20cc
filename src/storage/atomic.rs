use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

use super::PersistenceError;

const LOCK_RETRIES: u32 = 50;
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(10);
const WARN_THROTTLE: Duration = Duration::from_secs(5);

static WARN_TIMES: Mutex<Option<HashMap<PathBuf, Instant>>> = Mutex::new(None);

/// Cross-process exclusive lock: a `<file>.lock` created with O_EXCL.
/// Held for the duration of one atomic write, removed on drop.
struct FileLock {
    path: PathBuf,
}

impl FileLock {
    fn acquire(target: &Path) -> Result<Self, PersistenceError> {
        let path = target.with_extension("lock");
        for _ in 0..LOCK_RETRIES {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok(Self { path }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    std::thread::sleep(LOCK_RETRY_DELAY);
                }
                Err(source) => {
                    return Err(PersistenceError::Io {
                        path: path.display().to_string(),
                        source,
                    })
                }
            }
        }
        Err(PersistenceError::Lock {
            path: path.display().to_string(),
        })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Atomic JSON write: serialize to `<file>.tmp` in the same directory,
/// fsync, rename over the target. Guarded by an exclusive lock file so
/// concurrent processes do not interleave.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| PersistenceError::Io {
            path: parent.display().to_string(),
            source,
        })?;
    }

    let _lock = FileLock::acquire(path)?;

    let body = serde_json::to_string_pretty(value).map_err(|source| PersistenceError::Serialize {
        path: path.display().to_string(),
        source,
    })?;

    let tmp = path.with_extension("tmp");
    let io_err = |source| PersistenceError::Io {
        path: tmp.display().to_string(),
        source,
    };

    let mut file = File::create(&tmp).map_err(io_err)?;
    file.write_all(body.as_bytes()).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    drop(file);

    fs::rename(&tmp, path).map_err(|source| {
        let _ = fs::remove_file(&tmp);
        PersistenceError::Io {
            path: path.display().to_string(),
            source,
        }
    })
}

/// Load a JSON file; missing file returns None, parse failures are errors.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistenceError> {
    let body = match fs::read_to_string(path) {
        Ok(body) => body,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(PersistenceError::Io {
                path: path.display().to_string(),
                source,
            })
        }
    };
    serde_json::from_str(&body)
        .map(Some)
        .map_err(|source| PersistenceError::Serialize {
            path: path.display().to_string(),
            source,
        })
}

/// Append one JSON object as a line to a JSONL file.
pub fn append_jsonl<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| PersistenceError::Io {
            path: parent.display().to_string(),
            source,
        })?;
    }
    let line = serde_json::to_string(value).map_err(|source| PersistenceError::Serialize {
        path: path.display().to_string(),
        source,
    })?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| PersistenceError::Io {
            path: path.display().to_string(),
            source,
        })?;
    writeln!(file, "{}", line).map_err(|source| PersistenceError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Log a persistence failure without crashing the trading loop; identical
/// paths warn at most once per 5 seconds.
pub fn warn_persistence(path: &Path, err: &PersistenceError) {
    let mut guard = WARN_TIMES.lock().unwrap_or_else(|p| p.into_inner());
    let map = guard.get_or_insert_with(HashMap::new);
    let now = Instant::now();
    let should_warn = map
        .get(path)
        .map(|last| now.duration_since(*last) >= WARN_THROTTLE)
        .unwrap_or(true);
    if should_warn {
        map.insert(path.to_path_buf(), now);
        warn!("[PERSIST] write failed for {}: {}", path.display(), err);
    }
}

/// Fire-and-forget atomic write for callers that must not propagate errors.
pub fn atomic_write_json_logged<T: Serialize>(path: &Path, value: &T) {
    if let Err(e) = atomic_write_json(path, value) {
        warn_persistence(path, &e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn test_atomic_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        let value = Sample {
            name: "btc".to_string(),
            count: 3,
        };
        atomic_write_json(&path, &value).unwrap();
        let loaded: Sample = load_json(&path).unwrap().unwrap();
        assert_eq!(loaded, value);
        // no tmp or lock residue
        assert!(!path.with_extension("tmp").exists());
        assert!(!path.with_extension("lock").exists());
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded: Option<Sample> = load_json(&dir.path().join("missing.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_overwrite_replaces_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        atomic_write_json(&path, &Sample { name: "long-name-here".into(), count: 1 }).unwrap();
        atomic_write_json(&path, &Sample { name: "x".into(), count: 2 }).unwrap();
        let loaded: Sample = load_json(&path).unwrap().unwrap();
        assert_eq!(loaded.count, 2);
    }

    #[test]
    fn test_append_jsonl_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        append_jsonl(&path, &Sample { name: "a".into(), count: 1 }).unwrap();
        append_jsonl(&path, &Sample { name: "b".into(), count: 2 }).unwrap();
        let body = std::fs::read_to_string(&path).unwrap();
        assert_eq!(body.lines().count(), 2);
    }

    #[test]
    fn test_stale_lock_blocks_then_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locked.json");
        // simulate a crashed writer holding the lock
        std::fs::write(path.with_extension("lock"), b"").unwrap();
        let result = atomic_write_json(&path, &Sample { name: "a".into(), count: 1 });
        assert!(matches!(result, Err(PersistenceError::Lock { .. })));
    }
}
