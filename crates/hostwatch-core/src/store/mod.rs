//! Durable storage for breach-tracking state
//!
//! State lives in a single JSON file. Writes go to a temporary file in the
//! same directory which is then renamed over the target, so readers only
//! ever see a complete document. Loading is forgiving: anything it cannot
//! make sense of is treated as "no prior knowledge".

mod lock;

pub use lock::{LockPolicy, RunLock};

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::{BreachState, BreachStatus, EngineState, MetricKey};

/// Current on-disk format version
pub const STATE_VERSION: u32 = 1;

#[derive(Serialize)]
struct StateFileOut<'a> {
    version: u32,
    updated_at: DateTime<Utc>,
    metrics: BTreeMap<String, &'a BreachState>,
}

#[derive(Deserialize)]
struct StateFileIn {
    #[serde(default)]
    metrics: BTreeMap<String, serde_json::Value>,
}

/// JSON file holding the [`EngineState`]
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// Store backed by `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the state file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the advisory lock file guarding this store
    ///
    /// The state file itself is replaced on every save, so the lock lives
    /// on a sibling file whose inode stays put.
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(ToOwned::to_owned).unwrap_or_default();
        name.push(".lock");
        self.path.with_file_name(name)
    }

    /// Load state, falling back to empty on any problem
    pub fn load(&self) -> EngineState {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No state file yet, starting fresh");
                return EngineState::new();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Could not read state file, starting fresh");
                return EngineState::new();
            }
        };

        let file: StateFileIn = match serde_json::from_slice(&raw) {
            Ok(file) => file,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Malformed state file, starting fresh");
                return EngineState::new();
            }
        };

        file.metrics
            .into_iter()
            .filter_map(|(key, value)| {
                let key = match key.parse::<MetricKey>() {
                    Ok(key) => key,
                    Err(e) => {
                        debug!(error = %e, "Ignoring unknown key in state file");
                        return None;
                    }
                };
                match serde_json::from_value::<BreachState>(value) {
                    Ok(record) => Some((key, normalize(record))),
                    Err(e) => {
                        warn!(key = %key, error = %e, "Ignoring unreadable state record");
                        None
                    }
                }
            })
            .collect()
    }

    /// Atomically replace the state file
    pub fn save(&self, state: &EngineState) -> Result<()> {
        self.write(state).map_err(|source| Error::StatePersist {
            path: self.path.clone(),
            source,
        })
    }

    fn write(&self, state: &EngineState) -> io::Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let document = StateFileOut {
            version: STATE_VERSION,
            updated_at: Utc::now(),
            metrics: state.iter().map(|(key, record)| (key.to_string(), record)).collect(),
        };

        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, &document)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        debug!(path = %self.path.display(), keys = state.len(), "State saved");
        Ok(())
    }
}

/// Repair records that break the status/timer invariant
fn normalize(mut record: BreachState) -> BreachState {
    if !record.is_consistent() {
        debug!(status = ?record.status, "Repairing inconsistent state record");
        record.status = BreachStatus::Normal;
        record.breach_started_at = None;
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::{ThresholdEvaluator, Thresholds};
    use crate::models::MetricSample;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn store() -> (tempfile::TempDir, StateStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state").join("state.json"));
        (dir, store)
    }

    fn sample_state() -> EngineState {
        let t = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        [
            (
                MetricKey::Cpu,
                BreachState {
                    status: BreachStatus::Alerted,
                    breach_started_at: Some(t),
                    last_alert_sent_at: Some(t + Duration::minutes(15)),
                },
            ),
            (
                MetricKey::disk("/var"),
                BreachState {
                    status: BreachStatus::Normal,
                    breach_started_at: None,
                    last_alert_sent_at: Some(t),
                },
            ),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let (_dir, store) = store();
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let (_dir, store) = store();
        let state = sample_state();

        store.save(&state).unwrap();

        assert_eq!(store.load(), state);
    }

    #[test]
    fn test_malformed_file_loads_empty() {
        let (_dir, store) = store();
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), b"{ not json").unwrap();

        assert!(store.load().is_empty());
    }

    #[test]
    fn test_unknown_fields_and_keys_are_ignored() {
        let (_dir, store) = store();
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(
            store.path(),
            r#"{
                "version": 7,
                "future_field": true,
                "metrics": {
                    "cpu": { "status": "breaching", "breach_started_at": "2024-06-01T12:00:00Z", "extra": 1 },
                    "gpu": { "status": "alerted" },
                    "memory": { "status": "exploded" }
                }
            }"#,
        )
        .unwrap();

        let state = store.load();

        assert_eq!(state.len(), 1);
        assert_eq!(state.get(&MetricKey::Cpu).unwrap().status, BreachStatus::Breaching);
    }

    #[test]
    fn test_inconsistent_record_is_repaired() {
        let (_dir, store) = store();
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), r#"{ "metrics": { "memory": { "status": "alerted" } } }"#).unwrap();

        let record = store.load().get(&MetricKey::Memory).cloned().unwrap();
        assert_eq!(record.status, BreachStatus::Normal);
        assert!(record.is_consistent());
    }

    #[test]
    fn test_save_leaves_no_temp_files() {
        let (_dir, store) = store();
        store.save(&sample_state()).unwrap();
        store.save(&EngineState::new()).unwrap();

        let entries: Vec<_> = fs::read_dir(store.path().parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("state.json")]);
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_lock_path_is_sibling() {
        let store = StateStore::new("/var/lib/hostwatch/state.json");
        assert_eq!(store.lock_path(), PathBuf::from("/var/lib/hostwatch/state.json.lock"));
    }

    #[test]
    fn test_reloaded_state_replays_identically() {
        let (_dir, store) = store();
        let evaluator = ThresholdEvaluator::new(Thresholds::default());
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let history: Vec<f64> = (0..40).map(|i| if i % 17 == 16 { 40.0 } else { 95.0 }).collect();

        // warm up some state, persist it, then replay the same tail on both copies
        let mut state = EngineState::new();
        for (i, value) in history.iter().take(20).enumerate() {
            let now = start + Duration::minutes(i as i64);
            state = evaluator.evaluate(state, &[MetricSample::cpu(*value)], now).state;
        }
        store.save(&state).unwrap();
        let mut reloaded = store.load();

        for (i, value) in history.iter().enumerate().skip(20) {
            let now = start + Duration::minutes(i as i64);
            let a = evaluator.evaluate(state, &[MetricSample::cpu(*value)], now);
            let b = evaluator.evaluate(reloaded, &[MetricSample::cpu(*value)], now);
            assert_eq!(a, b);
            state = a.state;
            reloaded = b.state;
        }
    }
}
