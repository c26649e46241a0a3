//! Concurrent map from client identifier to its latest status document.
//!
//! ```text
//! Session A ──┐  set()                 get() / get_all()  ┌── /status
//! Session B ──┼──────► ConfigStore ◄──────────────────────┼── /config
//! Session C ──┘           │                               └── /events
//!                         │ after unlock, presence enabled
//!                         ▼
//!                  PresenceSync::spawn_sync()  (detached)
//! ```
//!
//! Values are held as `Arc<StatusDocument>` and swapped whole under a single
//! write lock, so readers see either the old or the new document, never a
//! mix. Deep copies for callers are made after the lock is released.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::document::StatusDocument;
use crate::presence::PresenceSync;

/// The server's single source of truth for pushed documents.
#[derive(Debug, Default)]
pub struct ConfigStore {
    entries: RwLock<HashMap<String, Arc<StatusDocument>>>,
    presence: PresenceSync,
}

impl ConfigStore {
    /// Create an empty store syncing presence to the default endpoint.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store using the given presence client.
    pub fn with_presence(presence: PresenceSync) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            presence,
        }
    }

    /// Replace the document for `client_id`.
    ///
    /// When the document enables presence sync, a detached sync task is
    /// started after the write completes. Its outcome is only logged.
    pub fn set(&self, client_id: impl Into<String>, document: StatusDocument) {
        let client_id = client_id.into();
        let document = Arc::new(document);

        {
            let mut entries = self.write();
            entries.insert(client_id.clone(), Arc::clone(&document));
        }

        log::info!("Stored document for client {client_id} ({})", document.name);

        if document.presence.should_sync() {
            self.presence.spawn_sync(document);
        }
    }

    /// Current document for `client_id`, if any.
    pub fn get(&self, client_id: &str) -> Option<StatusDocument> {
        let entry = self.read().get(client_id).cloned();
        entry.map(|doc| (*doc).clone())
    }

    /// Point-in-time copy of every entry.
    pub fn get_all(&self) -> HashMap<String, StatusDocument> {
        let entries: Vec<(String, Arc<StatusDocument>)> = self
            .read()
            .iter()
            .map(|(id, doc)| (id.clone(), Arc::clone(doc)))
            .collect();
        entries
            .into_iter()
            .map(|(id, doc)| (id, (*doc).clone()))
            .collect()
    }

    /// Some entry of the store; which one is unspecified.
    pub fn first(&self) -> Option<(String, StatusDocument)> {
        let entry = self
            .read()
            .iter()
            .next()
            .map(|(id, doc)| (id.clone(), Arc::clone(doc)));
        entry.map(|(id, doc)| (id, (*doc).clone()))
    }

    /// Number of clients with a stored document.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether no client has pushed yet.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // Values are replaced whole, so a poisoned map still holds complete documents.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<StatusDocument>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<StatusDocument>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}
