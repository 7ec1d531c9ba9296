//! Persisted login credential.
//!
//! The bearer token returned by the backend is kept in
//! `~/.accorcia/credentials.json` so later commands can restore the session.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use accorcia_core::config::SessionSettings;
use accorcia_live::SessionManager;
use accorcia_live::session::SessionConfig;

/// Stored credential.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub token: String,
}

impl Credentials {
    /// Path to the credentials directory: `~/.accorcia/`.
    pub fn dir() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".accorcia"))
    }

    /// Path to the credentials file: `~/.accorcia/credentials.json`.
    pub fn default_path() -> Option<PathBuf> {
        Self::dir().map(|d| d.join("credentials.json"))
    }

    /// Load from disk. Missing or unreadable files count as "not logged in".
    pub fn load(path: &Path) -> Option<Self> {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Remove the stored credential. Returns whether one existed.
    pub fn clear(path: &Path) -> anyhow::Result<bool> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// A session manager holding this credential, logged out if it expired.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn restore(&self, settings: &SessionSettings) -> SessionManager {
        let session = SessionManager::new(SessionConfig::from(settings));
        session.restore(self.token.clone());
        session
    }
}
