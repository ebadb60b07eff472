//! # Session persistence
//!
//! The identity provider keeps the current [`Session`] in a [`SessionStorage`] so
//! that a cold start can restore it without asking the user to sign in again.
//!
//! - [`FileSessionStorage`] writes `session.json` under a base directory. Use
//!   [`FileSessionStorage::default_location`] for the platform data directory
//!   (`~/.local/share/marketplace/` on Linux, the app container on mobile).
//! - [`MemorySessionStorage`] keeps it in process, for tests and for callers that
//!   do not want anything written to disk.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{AuthError, Result};
use crate::models::Session;

/// Where the provider keeps the session between launches.
pub trait SessionStorage: Send + Sync {
    fn load(&self) -> Result<Option<Session>>;
    fn save(&self, session: &Session) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Filesystem-backed session storage.
#[derive(Clone, Debug)]
pub struct FileSessionStorage {
    base: PathBuf,
}

impl FileSessionStorage {
    pub fn new(base: PathBuf) -> Self {
        Self { base }
    }

    /// `<data_dir>/marketplace/`, or `./marketplace/` when the platform has none.
    pub fn default_location() -> Self {
        let base = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("marketplace");
        Self::new(base)
    }

    fn session_path(&self) -> PathBuf {
        self.base.join("session.json")
    }
}

impl SessionStorage for FileSessionStorage {
    fn load(&self) -> Result<Option<Session>> {
        let content = match std::fs::read_to_string(self.session_path()) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AuthError::Storage(e.to_string())),
        };
        match serde_json::from_str(&content) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                // A corrupt file is treated as signed out rather than blocking startup.
                tracing::warn!("Discarding unreadable session file: {}", e);
                Ok(None)
            }
        }
    }

    fn save(&self, session: &Session) -> Result<()> {
        std::fs::create_dir_all(&self.base).map_err(|e| AuthError::Storage(e.to_string()))?;
        let content = serde_json::to_string(session)?;
        std::fs::write(self.session_path(), content).map_err(|e| AuthError::Storage(e.to_string()))
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(self.session_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AuthError::Storage(e.to_string())),
        }
    }
}

/// In-process session storage.
#[derive(Clone, Debug, Default)]
pub struct MemorySessionStorage {
    session: Arc<Mutex<Option<Session>>>,
}

impl MemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStorage for MemorySessionStorage {
    fn load(&self) -> Result<Option<Session>> {
        Ok(self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, session: &Session) -> Result<()> {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}
