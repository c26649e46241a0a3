//! Connection-time credential check and token helpers.
//!
//! A single shared secret is compared for exact equality against the
//! credential presented on the upgrade request. Sources, in order:
//!
//! 1. `Authorization: Bearer <token>` header
//! 2. `token=<token>` query parameter
//!
//! A present but malformed header is rejected outright; the query is only
//! consulted when no `Authorization` header was sent.
//!
//! The gate keeps only a SHA-256 digest of the secret and compares digests
//! without early exit.

use axum::http::{header, HeaderMap};
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Prefix of tokens produced by [`generate_token`].
pub const TOKEN_PREFIX: &str = "rlgl_";
const TOKEN_BYTES: usize = 32;
const BEARER_PREFIX: &str = "Bearer ";

/// Reasons a connection attempt is refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("no credential presented")]
    MissingCredential,
    #[error("malformed authorization header")]
    MalformedHeader,
    #[error("invalid credential")]
    InvalidCredential,
}

/// Validates the server-wide credential on each connection attempt.
#[derive(Clone)]
pub struct AuthGate {
    digest: [u8; 32],
}

impl std::fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGate").field("token", &"<redacted>").finish()
    }
}

impl AuthGate {
    /// Gate accepting exactly `token`.
    pub fn new(token: impl Into<String>) -> Self {
        let token: String = token.into();
        Self {
            digest: sha256(&token),
        }
    }

    /// Check the credential carried by a request's headers and raw query.
    pub fn authorize(&self, headers: &HeaderMap, query: Option<&str>) -> Result<(), AuthError> {
        let presented = match headers.get(header::AUTHORIZATION) {
            Some(value) => {
                let value = value.to_str().map_err(|_| AuthError::MalformedHeader)?;
                value
                    .strip_prefix(BEARER_PREFIX)
                    .ok_or(AuthError::MalformedHeader)?
                    .to_string()
            }
            None => query
                .and_then(token_from_query)
                .ok_or(AuthError::MissingCredential)?,
        };

        if presented.is_empty() {
            return Err(AuthError::MissingCredential);
        }
        if !digests_match(&self.digest, &sha256(&presented)) {
            return Err(AuthError::InvalidCredential);
        }
        Ok(())
    }
}

fn sha256(value: &str) -> [u8; 32] {
    Sha256::digest(value.as_bytes()).into()
}

/// Equality that always inspects every byte.
fn digests_match(expected: &[u8; 32], presented: &[u8; 32]) -> bool {
    expected
        .iter()
        .zip(presented)
        .fold(0u8, |diff, (a, b)| diff | (a ^ b))
        == 0
}

fn token_from_query(query: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "token")
        .map(|(_, value)| value.into_owned())
}

/// Generate a fresh random token: `rlgl_` followed by 32 random bytes in
/// unpadded URL-safe base64.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    let encoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);
    format!("{TOKEN_PREFIX}{encoded}")
}

/// Whether `token` looks like one produced by [`generate_token`].
pub fn validate_token_format(token: &str) -> bool {
    token.len() > TOKEN_PREFIX.len() && token.starts_with(TOKEN_PREFIX)
}
