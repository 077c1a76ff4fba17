//! Snapshot storage for FleetWatch.
//!
//! Keeps one ordered time series per asset, keyed by snapshot timestamp.
//! Writes are idempotent on `(asset_id, timestamp)`, retention is enforced by
//! [`SnapshotStore::prune`], and the whole store can optionally be flushed to
//! a JSON file between cycles.

#![forbid(unsafe_code)]

pub mod persist;

use fw_proto::Snapshot;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

pub use error::{Result, StoreError};
pub use persist::SnapshotFile;

/// Default number of snapshots retained per asset.
pub const DEFAULT_RETENTION: usize = 1000;

pub mod error {
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum StoreError {
        #[error("failed to persist snapshots to {path}: {source}")]
        Persist {
            path: String,
            #[source]
            source: std::io::Error,
        },
    }

    pub type Result<T> = std::result::Result<T, StoreError>;
}

type Series = BTreeMap<i64, Snapshot>;

/// Per-asset snapshot time series.
#[derive(Default)]
pub struct SnapshotStore {
    series: RwLock<HashMap<String, Series>>,
    file: Option<SnapshotFile>,
}

/// Shared reference to a snapshot store.
pub type SharedSnapshotStore = Arc<SnapshotStore>;

impl SnapshotStore {
    /// An empty, memory-only store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store persisted under `state_path`, loading what is on disk.
    pub fn open(state_path: &Path) -> Self {
        let file = SnapshotFile::new(state_path);
        let mut series: HashMap<String, Series> = HashMap::new();
        for (asset_id, snapshots) in file.load() {
            let entry = series.entry(asset_id).or_default();
            for snap in snapshots {
                entry.entry(snap.timestamp).or_insert(snap);
            }
        }
        let loaded: usize = series.values().map(BTreeMap::len).sum();
        info!(path = %file.path().display(), assets = series.len(), snapshots = loaded, "opened snapshot store");

        Self {
            series: RwLock::new(series),
            file: Some(file),
        }
    }

    /// Insert a snapshot. Returns `false` when one already exists for the same
    /// asset and timestamp; the stored snapshot is left untouched.
    pub fn put(&self, snapshot: Snapshot) -> bool {
        let mut series = self.series.write();
        let entry = series.entry(snapshot.asset_id.clone()).or_default();
        if entry.contains_key(&snapshot.timestamp) {
            debug!(asset = %snapshot.asset_id, timestamp = snapshot.timestamp, "duplicate snapshot ignored");
            return false;
        }
        entry.insert(snapshot.timestamp, snapshot);
        true
    }

    /// The most recent `limit` snapshots, oldest first.
    pub fn history(&self, asset_id: &str, limit: usize) -> Vec<Snapshot> {
        let series = self.series.read();
        let Some(entry) = series.get(asset_id) else {
            return Vec::new();
        };
        let mut recent: Vec<Snapshot> = entry.values().rev().take(limit).cloned().collect();
        recent.reverse();
        recent
    }

    /// Every snapshot of one asset with `timestamp >= since_ms`, oldest first.
    pub fn range(&self, asset_id: &str, since_ms: i64) -> Vec<Snapshot> {
        self.series
            .read()
            .get(asset_id)
            .map(|entry| entry.range(since_ms..).map(|(_, s)| s.clone()).collect())
            .unwrap_or_default()
    }

    /// Snapshots of every asset with `since_ms <= timestamp < until_ms`.
    pub fn range_all(&self, since_ms: i64, until_ms: i64) -> Vec<Snapshot> {
        if since_ms >= until_ms {
            return Vec::new();
        }
        self.series
            .read()
            .values()
            .flat_map(|entry| entry.range(since_ms..until_ms).map(|(_, s)| s.clone()))
            .collect()
    }

    pub fn latest(&self, asset_id: &str) -> Option<Snapshot> {
        self.series
            .read()
            .get(asset_id)
            .and_then(|entry| entry.last_key_value().map(|(_, s)| s.clone()))
    }

    /// Latest snapshot of every asset with at least one snapshot.
    pub fn latest_all(&self) -> Vec<Snapshot> {
        self.series
            .read()
            .values()
            .filter_map(|entry| entry.last_key_value().map(|(_, s)| s.clone()))
            .collect()
    }

    pub fn asset_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .series
            .read()
            .iter()
            .filter(|(_, entry)| !entry.is_empty())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Number of snapshots held for one asset.
    pub fn count(&self, asset_id: &str) -> usize {
        self.series.read().get(asset_id).map_or(0, BTreeMap::len)
    }

    /// Total number of snapshots across all assets.
    pub fn len(&self) -> usize {
        self.series.read().values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delete the oldest snapshots of an asset so at most `max_retained`
    /// remain. Returns how many were removed.
    pub fn prune(&self, asset_id: &str, max_retained: usize) -> usize {
        let mut series = self.series.write();
        let Some(entry) = series.get_mut(asset_id) else {
            return 0;
        };
        let excess = entry.len().saturating_sub(max_retained);
        for _ in 0..excess {
            entry.pop_first();
        }
        if excess > 0 {
            debug!(asset = %asset_id, removed = excess, retained = entry.len(), "pruned snapshots");
        }
        excess
    }

    /// Drop the whole series of an asset. Returns how many snapshots it held.
    pub fn remove(&self, asset_id: &str) -> usize {
        let removed = self.series.write().remove(asset_id).map_or(0, |entry| entry.len());
        if removed > 0 {
            debug!(asset = %asset_id, removed, "removed asset series");
        }
        removed
    }

    /// Write the store to its backing file, if it has one.
    pub fn flush(&self) -> Result<()> {
        let Some(file) = &self.file else {
            return Ok(());
        };
        let data: HashMap<String, Vec<Snapshot>> = self
            .series
            .read()
            .iter()
            .map(|(id, entry)| (id.clone(), entry.values().cloned().collect()))
            .collect();
        file.save(&data).map_err(|source| StoreError::Persist {
            path: file.path().display().to_string(),
            source,
        })
    }
}

// ─── Uptime ──────────────────────────────────────────────────────────────────

/// Percentage of healthy snapshots. An empty series counts as fully up.
pub fn uptime(snapshots: &[Snapshot]) -> f64 {
    if snapshots.is_empty() {
        return 100.0;
    }
    let healthy = snapshots.iter().filter(|s| s.is_healthy()).count();
    100.0 * healthy as f64 / snapshots.len() as f64
}

/// Uptime over the snapshots with `timestamp >= now_ms - window_ms`.
pub fn uptime_within(snapshots: &[Snapshot], now_ms: i64, window_ms: i64) -> f64 {
    let cutoff = now_ms - window_ms;
    let windowed: Vec<Snapshot> = snapshots
        .iter()
        .filter(|s| s.timestamp >= cutoff)
        .cloned()
        .collect();
    uptime(&windowed)
}
