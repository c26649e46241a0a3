//! Status document: the unit a client pushes and the server republishes.
//!
//! A document is plain data. The store swaps whole documents per client and
//! never patches individual fields, so nothing here carries behavior beyond
//! loading and redaction.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Who is working and on what.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Contributor {
    pub active: bool,
    pub focus: String,
    /// Pending work, highest priority first.
    pub queue: Vec<String>,
}

/// Settings for mirroring the contributor state to an external presence API.
///
/// Absent or default settings leave presence sync disabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceSettings {
    pub enabled: bool,
    /// Bearer credential for the presence API.
    #[serde(alias = "user_token")]
    pub credential: String,
    /// Emoji shown while the contributor is active.
    #[serde(alias = "status_emoji_active")]
    pub active_label: String,
    /// Emoji shown while the contributor is inactive.
    #[serde(alias = "status_emoji_inactive")]
    pub inactive_label: String,
    /// Lifetime of the published status; zero means the default.
    pub ttl_seconds: i64,
}

impl PresenceSettings {
    /// Whether a store write of this document should trigger presence sync.
    pub fn should_sync(&self) -> bool {
        self.enabled && !self.credential.is_empty()
    }
}

/// The synchronized status payload for one client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusDocument {
    pub name: String,
    pub description: String,
    pub user: String,
    pub contributor: Contributor,
    #[serde(alias = "slack")]
    pub presence: PresenceSettings,
}

impl StatusDocument {
    /// Load a document from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DocumentError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| DocumentError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| DocumentError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Copy of this document with the presence credential removed.
    ///
    /// Read-side surfaces publish redacted copies only.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.presence.credential.clear();
        copy
    }
}

/// Errors loading a document from disk.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}
