//! JSON file backing for the snapshot store.

use fw_proto::Snapshot;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Snapshot series on disk at `{state_path}/state/snapshots.json`,
/// keyed by asset id.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(state_path: &Path) -> Self {
        Self {
            path: state_path.join("state").join("snapshots.json"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every persisted series. A missing or corrupt file yields an empty map.
    pub fn load(&self) -> HashMap<String, Vec<Snapshot>> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(path = %self.path.display(), error = %e, "corrupt snapshot file, starting fresh");
                HashMap::new()
            }),
            Err(_) => {
                debug!(path = %self.path.display(), "no snapshot file, starting fresh");
                HashMap::new()
            }
        }
    }

    /// Write all series, creating parent directories as needed. The file is
    /// replaced atomically via a sibling temp file.
    pub fn save(&self, data: &HashMap<String, Vec<Snapshot>>) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string(data).map_err(std::io::Error::other)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fw_proto::{AssetType, HealthStatus, Metrics};

    fn snap(ts: i64) -> Snapshot {
        Snapshot {
            asset_id: "fn-1".to_string(),
            asset_type: AssetType::Function,
            project: "shop".to_string(),
            timestamp: ts,
            metrics: Metrics::new(),
            status: HealthStatus::Healthy,
            error: None,
        }
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = SnapshotFile::new(dir.path());

        let mut data = HashMap::new();
        data.insert("fn-1".to_string(), vec![snap(1), snap(2)]);
        file.save(&data).expect("save");

        let loaded = file.load();
        assert_eq!(loaded["fn-1"].len(), 2);
        assert!(!file.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(SnapshotFile::new(dir.path()).load().is_empty());
    }

    #[test]
    fn test_corrupt_file_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = dir.path().join("state");
        std::fs::create_dir_all(&state).expect("mkdir");
        std::fs::write(state.join("snapshots.json"), "{not json").expect("write");

        assert!(SnapshotFile::new(dir.path()).load().is_empty());
    }

    #[test]
    fn test_creates_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = SnapshotFile::new(&dir.path().join("a").join("b"));
        file.save(&HashMap::new()).expect("save");
        assert!(file.path().exists());
    }
}
