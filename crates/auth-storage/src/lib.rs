//! Local storage abstraction for persisted auth sessions.
//!
//! The auth engine never talks to a keychain, file or browser store directly.
//! It writes opaque bytes under a single configurable key through the
//! [`LocalStorage`] trait, and platform integrations provide the backend.
//!
//! This crate ships one backend, [`MemoryStorage`], which is the default for
//! clients that do not need persistence across process restarts.

mod keys;
mod memory;
mod traits;

pub use keys::StorageKeys;
pub use memory::MemoryStorage;
pub use traits::LocalStorage;

use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backend-specific storage error
    #[error("Platform storage error: {0}")]
    Platform(String),

    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
