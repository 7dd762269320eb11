//! Persistence for launch state across restarts.
//!
//! The store is deliberately whole-value: callers load, build a new
//! [`StoredState`], and replace it. Partial field writes of the persisted
//! form are not offered, so a crash between writes can never leave a
//! half-updated session on disk.

use crate::error::SmartError;
use crate::session::StoredState;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, warn};

/// Injectable persistence seam for [`StoredState`]
pub trait TokenStore: Send + Sync {
    /// Load the persisted state; unreadable or corrupt state loads as empty.
    fn load(&self) -> StoredState;

    /// Replace the entire persisted state.
    fn replace(&self, state: StoredState) -> Result<(), SmartError>;

    /// Drop all persisted state.
    fn clear(&self) -> Result<(), SmartError>;
}

/// JSON-file backed store under the user's home directory
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    /// Store at the default location (`~/.smart-vitals/launch_state.json`)
    pub fn new() -> Option<Self> {
        dirs::home_dir().map(|home| Self {
            path: home.join(".smart-vitals").join("launch_state.json"),
        })
    }

    pub fn at_path(path: PathBuf) -> Self {
        Self { path }
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> StoredState {
        if !self.path.exists() {
            return StoredState::default();
        }
        match std::fs::read_to_string(&self.path) {
            Ok(content) => match serde_json::from_str::<StoredState>(&content) {
                Ok(state) => state,
                Err(e) => {
                    warn!("Failed to parse saved launch state: {}", e);
                    StoredState::default()
                }
            },
            Err(e) => {
                warn!("Failed to read launch state file: {}", e);
                StoredState::default()
            }
        }
    }

    fn replace(&self, state: StoredState) -> Result<(), SmartError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SmartError::Storage(format!("create dir: {}", e)))?;
        }
        let json = serde_json::to_string_pretty(&state)?;
        std::fs::write(&self.path, json)
            .map_err(|e| SmartError::Storage(format!("write state: {}", e)))?;
        debug!("Saved launch state to {:?}", self.path);
        Ok(())
    }

    fn clear(&self) -> Result<(), SmartError> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)
                .map_err(|e| SmartError::Storage(format!("remove state: {}", e)))?;
            debug!("Deleted launch state file");
        }
        Ok(())
    }
}

/// In-memory store for tests and ephemeral sessions
#[derive(Default)]
pub struct MemoryTokenStore {
    inner: Mutex<StoredState>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> StoredState {
        self.inner.lock().expect("store lock poisoned").clone()
    }

    fn replace(&self, state: StoredState) -> Result<(), SmartError> {
        *self.inner.lock().expect("store lock poisoned") = state;
        Ok(())
    }

    fn clear(&self) -> Result<(), SmartError> {
        *self.inner.lock().expect("store lock poisoned") = StoredState::default();
        Ok(())
    }
}
