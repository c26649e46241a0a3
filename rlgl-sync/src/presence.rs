//! Best-effort propagation of contributor status to an external presence API.
//!
//! ## Flow
//!
//! ```text
//! ConfigStore::set()
//!       │  (document.presence enabled + credential)
//!       ▼
//! PresenceSync::spawn_sync()      ── detached tokio task
//!       │
//!       ▼
//! status_for()  ── label / emoji / expiration
//!       │
//!       ▼
//! POST users.profile.set  (Bearer credential)
//!       │
//!       ▼
//! log success or failure  (never retried, never reported to the client)
//! ```
//!
//! The API shape follows Slack's `users.profile.set`: a JSON body with a
//! `profile` object and a response carrying `ok` and an optional `error`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::document::StatusDocument;

/// Default presence endpoint.
pub const DEFAULT_API_URL: &str = "https://slack.com/api/users.profile.set";
/// Per-request timeout for the presence API.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Labels longer than this many characters are truncated before sending.
pub const MAX_LABEL_LEN: usize = 100;
/// Status lifetime used when the document leaves `ttl_seconds` unset.
pub const DEFAULT_TTL_SECS: i64 = 3600;

const FALLBACK_ACTIVE_EMOJI: &str = ":large_green_circle:";
const FALLBACK_INACTIVE_EMOJI: &str = ":red_circle:";
const DEFAULT_BUSY_LABEL: &str = "Busy";

/// The status computed from a document, ready to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceStatus {
    pub label: String,
    pub emoji: String,
    /// Unix timestamp after which the presence API drops the status.
    pub expiration: i64,
}

impl PresenceStatus {
    /// An empty status that clears whatever was published before.
    pub fn cleared() -> Self {
        Self {
            label: String::new(),
            emoji: String::new(),
            expiration: 0,
        }
    }
}

#[derive(Debug, Serialize)]
struct ProfileStatus<'a> {
    status_text: &'a str,
    status_emoji: &'a str,
    status_expiration: i64,
}

#[derive(Debug, Serialize)]
struct ProfileRequest<'a> {
    profile: ProfileStatus<'a>,
}

#[derive(Debug, Deserialize)]
struct ProfileResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Presence sync failures. Logged, never surfaced to the pushing client.
#[derive(Debug, thiserror::Error)]
pub enum PresenceError {
    #[error("presence request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("presence API returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("failed to decode presence response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("presence API error: {0}")]
    Api(String),
}

/// Client for the presence API.
///
/// Cheap to clone; clones share one connection pool.
#[derive(Debug, Clone)]
pub struct PresenceSync {
    http: reqwest::Client,
    api_url: Arc<str>,
}

impl Default for PresenceSync {
    fn default() -> Self {
        Self::new(DEFAULT_API_URL)
    }
}

impl PresenceSync {
    /// Create a client posting to `api_url`.
    pub fn new(api_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                log::warn!("Falling back to default presence HTTP client: {e}");
                reqwest::Client::new()
            });
        Self {
            http,
            api_url: Arc::from(api_url.into()),
        }
    }

    /// Endpoint this client posts to.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Compute the status to publish for `doc` at time `now`.
    pub fn status_for(doc: &StatusDocument, now: DateTime<Utc>) -> PresenceStatus {
        let settings = &doc.presence;
        let contributor = &doc.contributor;

        let (label, emoji) = if contributor.active {
            (
                contributor.focus.clone(),
                non_empty_or(&settings.active_label, FALLBACK_ACTIVE_EMOJI),
            )
        } else {
            (
                non_empty_or(&contributor.focus, DEFAULT_BUSY_LABEL),
                non_empty_or(&settings.inactive_label, FALLBACK_INACTIVE_EMOJI),
            )
        };

        let ttl = if settings.ttl_seconds > 0 {
            settings.ttl_seconds
        } else {
            DEFAULT_TTL_SECS
        };

        PresenceStatus {
            label,
            emoji,
            expiration: now.timestamp() + ttl,
        }
    }

    /// Publish `status` with `credential` as bearer auth.
    pub async fn set_status(
        &self,
        credential: &str,
        status: &PresenceStatus,
    ) -> Result<(), PresenceError> {
        let label = truncate_label(&status.label);
        let body = ProfileRequest {
            profile: ProfileStatus {
                status_text: &label,
                status_emoji: &status.emoji,
                status_expiration: status.expiration,
            },
        };

        let response = self
            .http
            .post(self.api_url.as_ref())
            .bearer_auth(credential)
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/json; charset=utf-8",
            )
            .body(serde_json::to_vec(&body)?)
            .send()
            .await?;

        let status_code = response.status();
        if !status_code.is_success() {
            return Err(PresenceError::Status(status_code));
        }

        let bytes = response.bytes().await?;
        let parsed: ProfileResponse = serde_json::from_slice(&bytes)?;
        if !parsed.ok {
            return Err(PresenceError::Api(
                parsed.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        Ok(())
    }

    /// Clear any published status.
    pub async fn clear_status(&self, credential: &str) -> Result<(), PresenceError> {
        self.set_status(credential, &PresenceStatus::cleared()).await
    }

    /// Compute and publish the status for `doc`.
    pub async fn sync(&self, doc: &StatusDocument) -> Result<PresenceStatus, PresenceError> {
        let status = Self::status_for(doc, Utc::now());
        self.set_status(&doc.presence.credential, &status).await?;
        Ok(status)
    }

    /// Run [`sync`](Self::sync) on a detached task and log the outcome.
    ///
    /// Returns `None` when called outside a tokio runtime; the sync is
    /// skipped in that case.
    pub fn spawn_sync(&self, doc: Arc<StatusDocument>) -> Option<JoinHandle<()>> {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                log::warn!(
                    "No async runtime available, skipping presence sync for user {}",
                    doc.user
                );
                return None;
            }
        };

        let this = self.clone();
        Some(handle.spawn(async move {
            match this.sync(&doc).await {
                Ok(status) => log::info!(
                    "Synced presence for user {}: {} {}",
                    doc.user,
                    status.emoji,
                    status.label
                ),
                Err(e) => log::error!("Failed to sync presence for user {}: {e}", doc.user),
            }
        }))
    }
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

/// Truncate to [`MAX_LABEL_LEN`] characters without splitting a code point.
fn truncate_label(label: &str) -> String {
    match label.char_indices().nth(MAX_LABEL_LEN) {
        Some((cut, _)) => label[..cut].to_string(),
        None => label.to_string(),
    }
}
