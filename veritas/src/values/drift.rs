//! Per-user EMA of value totals with drift reporting.
//!
//! The tracker keeps one exponential moving average per user. Updates are
//! serialized under the value-core lock and persisted with an atomic JSON
//! write plus directory fsync, so a crash never leaves a torn state file.

use std::path::PathBuf;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::fsio::{self, FsIoError};

/// Smoothing factor: weight of the newest observation.
pub const DEFAULT_ALPHA: f32 = 0.2;

/// Persisted EMA state for one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmaState {
    /// Current exponential moving average.
    pub ema: f32,
    /// First observed total; drift is measured against this.
    pub baseline: f32,
    /// Number of updates applied.
    pub updates: u64,
}

/// Read-only view returned to callers.
#[derive(Debug, Clone, Serialize)]
pub struct DriftSnapshot {
    /// Current EMA.
    pub ema: f32,
    /// Baseline the drift is measured against.
    pub baseline: f32,
    /// Drift percentage vs baseline (0.0 when no baseline exists).
    pub drift_pct: f32,
    /// Updates applied so far.
    pub updates: u64,
}

/// The value-core EMA store.
pub struct DriftTracker {
    path: PathBuf,
    alpha: f32,
    // value_core_lock: single writer, readers observe last-written state.
    state: Mutex<FxHashMap<String, EmaState>>,
}

impl DriftTracker {
    /// Open the tracker backed by `path` (loaded if present).
    ///
    /// # Errors
    ///
    /// Returns [`FsIoError`] on unreadable or malformed state.
    pub fn open(path: impl Into<PathBuf>, alpha: f32) -> Result<Self, FsIoError> {
        let path = path.into();
        let state = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(|source| FsIoError::Io {
                path: path.clone(),
                source,
            })?;
            serde_json::from_str(&raw).map_err(|source| FsIoError::Serde {
                path: path.clone(),
                source,
            })?
        } else {
            FxHashMap::default()
        };
        Ok(Self {
            path,
            alpha: alpha.clamp(0.01, 1.0),
            state: Mutex::new(state),
        })
    }

    /// Fold `total` into the user's EMA and persist.
    ///
    /// # Errors
    ///
    /// Returns [`FsIoError`] when the state file cannot be written; the
    /// in-memory state is rolled back so memory and disk stay consistent.
    pub fn update(&self, user_id: &str, total: f32) -> Result<DriftSnapshot, FsIoError> {
        let mut state = self.state.lock();
        let previous = state.get(user_id).cloned();

        let entry = state
            .entry(user_id.to_string())
            .or_insert_with(|| EmaState {
                ema: total,
                baseline: total,
                updates: 0,
            });
        if entry.updates > 0 {
            entry.ema = self.alpha * total + (1.0 - self.alpha) * entry.ema;
        }
        entry.updates += 1;
        let snapshot = snapshot_of(entry);

        if let Err(err) = fsio::atomic_write_json(&self.path, &*state) {
            match previous {
                Some(prev) => {
                    state.insert(user_id.to_string(), prev);
                }
                None => {
                    state.remove(user_id);
                }
            }
            return Err(err);
        }

        debug!(user_id, ema = snapshot.ema, drift_pct = snapshot.drift_pct, "ema updated");
        Ok(snapshot)
    }

    /// Current EMA and drift for the user, if any updates were recorded.
    #[must_use]
    pub fn current(&self, user_id: &str) -> Option<DriftSnapshot> {
        self.state.lock().get(user_id).map(snapshot_of)
    }
}

fn snapshot_of(entry: &EmaState) -> DriftSnapshot {
    let drift_pct = if entry.baseline.abs() > f32::EPSILON {
        (entry.ema - entry.baseline) / entry.baseline * 100.0
    } else {
        0.0
    };
    DriftSnapshot {
        ema: entry.ema,
        baseline: entry.baseline,
        drift_pct,
        updates: entry.updates,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn first_update_sets_baseline() {
        let dir = tempdir().unwrap();
        let tracker = DriftTracker::open(dir.path().join("ema.json"), DEFAULT_ALPHA).unwrap();
        let snap = tracker.update("u1", 0.6).unwrap();
        assert!((snap.ema - 0.6).abs() < f32::EPSILON);
        assert!((snap.baseline - 0.6).abs() < f32::EPSILON);
        assert_eq!(snap.updates, 1);
        assert!(snap.drift_pct.abs() < f32::EPSILON);
    }

    #[test]
    fn ema_smooths_toward_new_values() {
        let dir = tempdir().unwrap();
        let tracker = DriftTracker::open(dir.path().join("ema.json"), 0.5).unwrap();
        tracker.update("u1", 0.4).unwrap();
        let snap = tracker.update("u1", 0.8).unwrap();
        assert!((snap.ema - 0.6).abs() < 1e-6);
        assert!(snap.drift_pct > 0.0);
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ema.json");
        {
            let tracker = DriftTracker::open(&path, DEFAULT_ALPHA).unwrap();
            tracker.update("u1", 0.5).unwrap();
            tracker.update("u1", 0.7).unwrap();
        }
        let tracker = DriftTracker::open(&path, DEFAULT_ALPHA).unwrap();
        let snap = tracker.current("u1").unwrap();
        assert_eq!(snap.updates, 2);
        assert!((snap.baseline - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn users_tracked_independently() {
        let dir = tempdir().unwrap();
        let tracker = DriftTracker::open(dir.path().join("ema.json"), DEFAULT_ALPHA).unwrap();
        tracker.update("u1", 0.9).unwrap();
        tracker.update("u2", 0.1).unwrap();
        assert!(tracker.current("u1").unwrap().ema > tracker.current("u2").unwrap().ema);
    }
}
