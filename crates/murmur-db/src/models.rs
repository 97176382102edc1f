//! Database row types. Distinct from the murmur-types wire models to keep
//! the store independent of the HTTP surface.

use chrono::{DateTime, Utc};
use murmur_types::models::MessageStatus;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: Uuid,
    pub phone: String,
    pub name: String,
    pub photo_url: Option<String>,
    pub about: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SessionRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct VerificationRow {
    pub id: i64,
    pub phone: String,
    pub code: String,
    pub expires_at: DateTime<Utc>,
    pub attempts: u32,
    pub consumed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub text: Option<String>,
    pub ciphertext: Option<String>,
    pub nonce: Option<String>,
    pub status: MessageStatus,
    pub sent_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
}

impl MessageRow {
    /// A freshly sent message, not yet persisted.
    pub fn new_sent(
        sender_id: Uuid,
        recipient_id: Uuid,
        text: Option<String>,
        ciphertext: Option<String>,
        nonce: Option<String>,
        sent_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender_id,
            recipient_id,
            text,
            ciphertext,
            nonce,
            status: MessageStatus::Sent,
            sent_at,
            delivered_at: None,
            read_at: None,
        }
    }
}

/// One message moved to `read` by a read-receipt batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadMark {
    pub message_id: Uuid,
    pub sender_id: Uuid,
    pub read_at: DateTime<Utc>,
}
