//! Storage trait definitions.

use crate::StorageResult;

/// Trait for local storage backends.
///
/// Values are opaque bytes. Implementations only need to provide
/// last-write-wins semantics per key.
pub trait LocalStorage: Send + Sync {
    /// Store a value, replacing any previous value under `key`
    fn store(&self, key: &str, value: &[u8]) -> StorageResult<()>;

    /// Retrieve a value
    fn retrieve(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Remove a value. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> StorageResult<()>;

    /// Check if a key exists
    fn has(&self, key: &str) -> StorageResult<bool> {
        Ok(self.retrieve(key)?.is_some())
    }

    /// Retrieve a value as UTF-8 text.
    fn retrieve_string(&self, key: &str) -> StorageResult<Option<String>> {
        match self.retrieve(key)? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| crate::StorageError::Encoding(e.to_string())),
            None => Ok(None),
        }
    }
}
