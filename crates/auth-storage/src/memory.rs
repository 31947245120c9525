//! In-memory storage backend.

use crate::{LocalStorage, StorageResult};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Process-local storage. Contents are lost when the value is dropped.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently held.
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }
}

impl LocalStorage for MemoryStorage {
    fn store(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.data.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn retrieve(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.data.lock().get(key).cloned())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        if self.data.lock().remove(key).is_some() {
            tracing::trace!(key, "Removed storage entry");
        }
        Ok(())
    }
}
