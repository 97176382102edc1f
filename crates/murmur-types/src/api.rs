use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::MessageStatus;

// -- Auth --

#[derive(Debug, Deserialize)]
pub struct StartVerificationRequest {
    pub phone: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartVerificationResponse {
    pub phone: String,
    pub expires_at: DateTime<Utc>,
    /// Only populated when the server runs with code exposure enabled for development.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyCodeRequest {
    pub phone: String,
    pub code: String,
    pub name: Option<String>,
    pub photo_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyCodeResponse {
    pub token: String,
    pub user_id: Uuid,
}

// -- Messages --

/// Ids arrive as strings so malformed values map to a 400 with a reason
/// instead of a generic extractor rejection.
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub recipient_id: String,
    pub text: Option<String>,
    pub ciphertext: Option<String>,
    pub nonce: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendMessageResponse {
    pub message_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub peer_user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    #[serde(rename = "_id")]
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

#[derive(Debug, Deserialize)]
pub struct ReadReceiptRequest {
    pub message_ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReadReceiptResponse {
    pub updated: usize,
}

// -- Contacts --

#[derive(Debug, Deserialize)]
pub struct ContactSyncItem {
    pub name: Option<String>,
    pub phone: String,
}

#[derive(Debug, Deserialize)]
pub struct SyncContactsRequest {
    pub contacts: Vec<ContactSyncItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactResponse {
    pub user_id: Uuid,
    pub name: String,
    pub phone: String,
    pub photo_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SyncContactsResponse {
    pub matched: Vec<ContactResponse>,
}

// -- Misc --

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
    pub online_users: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}
