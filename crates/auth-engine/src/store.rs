//! Persistence of the single current session.

use crate::types::Session;
use auth_storage::{LocalStorage, StorageResult};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Legacy wrapper written by older clients: the session plus a separately
/// tracked expiration date.
#[derive(Deserialize)]
struct LegacyStoredSession {
    session: Session,
    #[allow(dead_code)]
    #[serde(default, alias = "expirationDate")]
    expiration_date: Option<serde_json::Value>,
}

/// Reads and writes the serialized session under one storage key.
///
/// A record that cannot be read or decoded is reported as absent, so a
/// corrupt store degrades to "signed out" instead of failing callers.
#[derive(Clone)]
pub struct SessionStore {
    storage: Arc<dyn LocalStorage>,
    key: String,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn LocalStorage>, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Load the stored session, migrating a legacy record in place.
    pub fn get(&self) -> Option<Session> {
        let bytes = match self.storage.retrieve(&self.key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                error!(key = %self.key, error = %e, "Failed to read stored session");
                return None;
            }
        };

        match serde_json::from_slice::<Session>(&bytes) {
            Ok(session) => Some(session),
            Err(current_err) => match serde_json::from_slice::<LegacyStoredSession>(&bytes) {
                Ok(legacy) => {
                    info!(key = %self.key, "Migrating legacy stored session");
                    if let Err(e) = self.store(&legacy.session) {
                        warn!(error = %e, "Failed to rewrite migrated session");
                    }
                    Some(legacy.session)
                }
                Err(_) => {
                    warn!(
                        key = %self.key,
                        error = %current_err,
                        "Stored session is unreadable, treating as missing"
                    );
                    None
                }
            },
        }
    }

    pub fn store(&self, session: &Session) -> StorageResult<()> {
        let encoded = serde_json::to_vec(session)
            .map_err(|e| auth_storage::StorageError::Encoding(e.to_string()))?;
        self.storage.store(&self.key, &encoded)?;
        debug!(user_id = %session.user.id, expires_at = session.expires_at, "Session stored");
        Ok(())
    }

    pub fn delete(&self) -> StorageResult<()> {
        self.storage.remove(&self.key)?;
        debug!(key = %self.key, "Session deleted");
        Ok(())
    }
}
