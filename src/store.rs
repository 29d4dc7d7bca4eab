// SensorCache - Sensor telemetry cache and aggregation engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Persistence gateway
//!
//! The engine only needs three operations from durable storage, captured by
//! [`SensorStore`]: save one sensor's serialized record, load it back, and list
//! the sensors present. [`FsStore`] keeps one `<sensor>.json` file per sensor;
//! [`MemoryStore`] is an in-process store with failure injection for tests.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info};

use crate::error::{Result, TelemetryError};
use crate::record::{validate_sensor_id, SensorId};

/// Directory name used under the user's home when no data dir is given
pub const DEFAULT_STORE_DIR: &str = "temperatures";

/// Durable storage of serialized sensor records, keyed by sensor id
pub trait SensorStore: Send + Sync {
    /// Store a sensor's serialized record, replacing any previous one
    fn save(&self, sensor_id: &str, data: &[u8]) -> Result<()>;

    /// Load a sensor's serialized record; `Ok(None)` if it does not exist
    fn load(&self, sensor_id: &str) -> Result<Option<Vec<u8>>>;

    /// List every sensor present in the store
    fn list(&self) -> Result<Vec<SensorId>>;
}

/// Save on the blocking pool so slow storage never stalls a runtime worker
pub async fn save_blocking(
    store: &Arc<dyn SensorStore>,
    sensor_id: &str,
    data: Vec<u8>,
) -> Result<()> {
    let store = Arc::clone(store);
    let sensor_id = sensor_id.to_string();
    tokio::task::spawn_blocking(move || store.save(&sensor_id, &data))
        .await
        .map_err(|e| TelemetryError::Transient(format!("Save task failed: {}", e)))?
}

/// One JSON file per sensor under a root directory
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Open (and create if needed) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if root.is_dir() {
            info!("Temperature store folder already exists: {}", root.display());
        } else {
            info!("Creating temperature store folder at: {}", root.display());
            fs::create_dir_all(&root)?;
        }
        Ok(Self { root })
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, sensor_id: &str) -> PathBuf {
        self.root.join(format!("{}.json", sensor_id))
    }
}

impl SensorStore for FsStore {
    fn save(&self, sensor_id: &str, data: &[u8]) -> Result<()> {
        validate_sensor_id(sensor_id)?;
        let path = self.record_path(sensor_id);
        let tmp = self.root.join(format!("{}.json.tmp", sensor_id));

        // Records are replaced whole, never partially written
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &path)?;
        debug!("Saved {} bytes to {}", data.len(), path.display());
        Ok(())
    }

    fn load(&self, sensor_id: &str) -> Result<Option<Vec<u8>>> {
        validate_sensor_id(sensor_id)?;
        match fs::read(self.record_path(sensor_id)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> Result<Vec<SensorId>> {
        let mut sensors = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                sensors.push(stem.to_string());
            }
        }
        sensors.sort();
        Ok(sensors)
    }
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<SensorId, Vec<u8>>>,
    fail_saves: AtomicBool,
    fail_listing: AtomicBool,
    saves: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `save` fail (or succeed again)
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `list` fail (or succeed again)
    pub fn fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves so far
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::SeqCst)
    }

    /// Raw stored bytes of a sensor
    pub fn get(&self, sensor_id: &str) -> Option<Vec<u8>> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(sensor_id)
            .cloned()
    }

    /// Number of stored sensors
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SensorStore for MemoryStore {
    fn save(&self, sensor_id: &str, data: &[u8]) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(TelemetryError::Transient(format!(
                "Store unavailable, could not save sensor {}",
                sensor_id
            )));
        }
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(sensor_id.to_string(), data.to_vec());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn load(&self, sensor_id: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.get(sensor_id))
    }

    fn list(&self) -> Result<Vec<SensorId>> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(TelemetryError::Transient("Store unavailable".to_string()));
        }
        let mut sensors: Vec<SensorId> = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        sensors.sort();
        Ok(sensors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_fs_store_save_load() {
        let dir = tempdir().unwrap();
        let store = FsStore::open(dir.path()).unwrap();

        store.save("s1", br#"{"id":"s1","dates":{}}"#).unwrap();
        let loaded = store.load("s1").unwrap().unwrap();
        assert_eq!(loaded, br#"{"id":"s1","dates":{}}"#.to_vec());
        assert!(dir.path().join("s1.json").is_file());
        assert!(!dir.path().join("s1.json.tmp").exists());
    }

    #[test]
    fn test_fs_store_load_missing() {
        let dir = tempdir().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        assert!(store.load("nobody").unwrap().is_none());
    }

    #[test]
    fn test_fs_store_list_only_json() {
        let dir = tempdir().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        store.save("b", b"{}").unwrap();
        store.save("a", b"{}").unwrap();
        fs::write(dir.path().join("notes.txt"), b"ignore me").unwrap();
        fs::write(dir.path().join("c.json.tmp"), b"partial").unwrap();
        fs::create_dir(dir.path().join("nested.json")).unwrap();

        assert_eq!(store.list().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_fs_store_creates_root() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("deep").join(DEFAULT_STORE_DIR);
        let store = FsStore::open(&root).unwrap();
        assert!(root.is_dir());
        assert_eq!(store.root(), root.as_path());
    }

    #[test]
    fn test_fs_store_rejects_path_ids() {
        let dir = tempdir().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        assert!(store.save("../escape", b"{}").unwrap_err().is_malformed());
        assert!(store.load("a/b").unwrap_err().is_malformed());
    }

    #[tokio::test]
    async fn test_save_blocking_writes_through() {
        let dir = tempdir().unwrap();
        let store: Arc<dyn SensorStore> = Arc::new(FsStore::open(dir.path()).unwrap());

        save_blocking(&store, "porch", b"{}".to_vec()).await.unwrap();
        assert!(dir.path().join("porch.json").is_file());

        let err = save_blocking(&store, "../escape", b"{}".to_vec())
            .await
            .unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn test_memory_store_failures() {
        let store = MemoryStore::new();
        store.save("s1", b"x").unwrap();
        assert_eq!(store.save_count(), 1);

        store.fail_saves(true);
        assert!(store.save("s1", b"y").unwrap_err().is_transient());
        assert_eq!(store.get("s1"), Some(b"x".to_vec()));

        store.fail_listing(true);
        assert!(store.list().is_err());
        store.fail_listing(false);
        assert_eq!(store.list().unwrap(), vec!["s1".to_string()]);
    }
}
