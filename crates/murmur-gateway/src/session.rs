use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use murmur_db::Database;
use murmur_db::models::SessionRow;

use crate::store;

/// Random bytes behind each bearer token.
const TOKEN_BYTES: usize = 32;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid token")]
    InvalidToken,
    #[error("session expired")]
    Expired,
    #[error("session store unavailable: {0}")]
    Store(#[source] anyhow::Error),
}

/// Fresh opaque bearer token (URL-safe base64 of 32 random bytes).
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Only this digest is persisted; the token itself is handed to the client once.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Decide a token's fate from the sessions that matched it.
///
/// A session is valid iff its expiry is strictly after `now`. When several
/// match, the one expiring last decides.
pub fn check_sessions(sessions: &[SessionRow], now: DateTime<Utc>) -> Result<Uuid, AuthError> {
    let session = sessions
        .iter()
        .max_by_key(|s| s.expires_at)
        .ok_or(AuthError::InvalidToken)?;

    if session.expires_at <= now {
        return Err(AuthError::Expired);
    }
    Ok(session.user_id)
}

/// The authentication gate: resolve a bearer token to its owning user.
/// Read-only; expired sessions are left in place.
pub async fn authenticate(db: &Arc<Database>, token: &str) -> Result<Uuid, AuthError> {
    if token.is_empty() {
        return Err(AuthError::InvalidToken);
    }

    let token_hash = hash_token(token);
    let sessions = store::blocking(db, move |db| db.find_sessions_by_token_hash(&token_hash))
        .await
        .map_err(AuthError::Store)?;

    check_sessions(&sessions, Utc::now())
}
