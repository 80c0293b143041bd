//! In-memory session store.

use std::collections::HashMap;
use std::sync::RwLock;

use upwell_protocol::ResumeRecord;

use crate::{SessionStore, StoreError};

/// Session store held entirely in memory.
///
/// Does not survive process restarts; intended for tests and for embedders
/// that handle persistence themselves.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, ResumeRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<ResumeRecord>, StoreError> {
        Ok(self.records.read().unwrap().get(key).cloned())
    }

    fn set(&self, key: &str, record: &ResumeRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .unwrap()
            .insert(key.to_string(), record.clone());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.records.write().unwrap().remove(key);
        Ok(())
    }
}
