//! JSON-file-backed session store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::debug;
use upwell_protocol::ResumeRecord;

use crate::{SessionStore, StoreError};

/// Session store persisted to a JSON file.
///
/// Records are cached in memory and rewritten to disk on every mutation.
pub struct JsonFileStore {
    path: PathBuf,
    records: RwLock<HashMap<String, ResumeRecord>>,
}

impl JsonFileStore {
    /// Creates a store, loading existing records from disk.
    pub fn new(path: PathBuf) -> Result<Self, StoreError> {
        let records = load_records(&path)?;
        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    /// Creates a store at the platform default path.
    pub fn at_default_path() -> Result<Self, StoreError> {
        let path = default_store_path().ok_or(StoreError::NoStoreDir)?;
        Self::new(path)
    }

    /// Writes the current records to disk.
    fn persist(&self) -> Result<(), StoreError> {
        let map = self.records.read().unwrap();
        let json = serde_json::to_string_pretty(&*map)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, json)?;
        debug!("persisted {} session record(s) to {:?}", map.len(), self.path);
        Ok(())
    }
}

impl SessionStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<ResumeRecord>, StoreError> {
        Ok(self.records.read().unwrap().get(key).cloned())
    }

    fn set(&self, key: &str, record: &ResumeRecord) -> Result<(), StoreError> {
        {
            let mut map = self.records.write().unwrap();
            map.insert(key.to_string(), record.clone());
        }
        self.persist()
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        {
            let mut map = self.records.write().unwrap();
            map.remove(key);
        }
        self.persist()
    }
}

/// Loads records from a JSON file on disk.
fn load_records(path: &Path) -> Result<HashMap<String, ResumeRecord>, StoreError> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let data = std::fs::read_to_string(path)?;
    let records: HashMap<String, ResumeRecord> = serde_json::from_str(&data)?;
    debug!("loaded {} session record(s) from {:?}", records.len(), path);
    Ok(records)
}

/// Returns the default session store path.
pub fn default_store_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("upwell").join("sessions.json"))
}

/// Returns the platform-specific config directory.
fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }
}
