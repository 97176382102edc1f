use axum::{
    Extension, Json,
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
};
use tracing::debug;

use murmur_db::models::MessageRow;
use murmur_db::time;
use murmur_gateway::store;
use murmur_types::api::{
    HistoryQuery, MessageResponse, ReadReceiptRequest, ReadReceiptResponse, SendMessageRequest,
    SendMessageResponse,
};

use crate::error::{ApiError, parse_id};
use crate::middleware::AuthUser;
use crate::state::AppState;

/// Message body as accepted from a client.
#[derive(Debug, PartialEq)]
struct Payload {
    text: Option<String>,
    ciphertext: Option<String>,
    nonce: Option<String>,
}

/// A message needs plaintext, or ciphertext together with its nonce.
/// Ciphertext is stored as-is and never inspected.
fn validate_payload(
    text: Option<String>,
    ciphertext: Option<String>,
    nonce: Option<String>,
) -> Result<Payload, ApiError> {
    let text = text.filter(|t| !t.is_empty());
    let ciphertext = ciphertext.filter(|c| !c.is_empty());
    let nonce = nonce.filter(|n| !n.is_empty());

    if ciphertext.is_some() != nonce.is_some() {
        return Err(ApiError::invalid("ciphertext and nonce must be sent together"));
    }
    if text.is_none() && ciphertext.is_none() {
        return Err(ApiError::invalid("message has no content"));
    }
    Ok(Payload {
        text,
        ciphertext,
        nonce,
    })
}

/// POST /messages/send: durably record a direct message, then make one
/// best-effort push to the recipient if they are online.
///
/// Success means "recorded", not "delivered".
pub async fn send_message(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    body: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<Json<SendMessageResponse>, ApiError> {
    let Json(req) = body?;
    let recipient_id = parse_id(&req.recipient_id)?;
    let payload = validate_payload(req.text, req.ciphertext, req.nonce)?;

    let message = MessageRow::new_sent(
        user.user_id,
        recipient_id,
        payload.text,
        payload.ciphertext,
        payload.nonce,
        time::now(),
    );

    let row = message.clone();
    let stored = store::blocking(&state.db, move |db| {
        if db.get_user_by_id(row.recipient_id)?.is_none() {
            return Ok(false);
        }
        db.insert_message(&row)?;
        Ok(true)
    })
    .await?;
    if !stored {
        return Err(ApiError::not_found("recipient not found"));
    }

    let outcome = state.dispatcher.deliver(&message).await?;
    debug!("Message {} from {}: {:?}", message.id, user.user_id, outcome);

    Ok(Json(SendMessageResponse {
        message_id: message.id,
    }))
}

/// GET /messages/history?peer_user_id=: both directions of the
/// conversation, oldest first, with current status.
pub async fn get_history(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<Vec<MessageResponse>>, ApiError> {
    let Query(query) = query?;
    let peer = parse_id(&query.peer_user_id)?;
    let me = user.user_id;

    let rows = store::blocking(&state.db, move |db| db.get_conversation(me, peer)).await?;

    Ok(Json(rows.into_iter().map(message_response).collect()))
}

/// POST /messages/read: mark messages the caller received as read and
/// notify their senders.
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    body: Result<Json<ReadReceiptRequest>, JsonRejection>,
) -> Result<Json<ReadReceiptResponse>, ApiError> {
    let Json(req) = body?;
    let ids = req
        .message_ids
        .iter()
        .map(|raw| parse_id(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let updated = state.receipts.mark_read(user.user_id, ids).await?;

    Ok(Json(ReadReceiptResponse { updated }))
}

fn message_response(row: MessageRow) -> MessageResponse {
    MessageResponse {
        id: row.id,
        sender_id: row.sender_id,
        recipient_id: row.recipient_id,
        text: row.text,
        ciphertext: row.ciphertext,
        nonce: row.nonce,
        status: row.status,
        sent_at: row.sent_at,
        delivered_at: row.delivered_at,
        read_at: row.read_at,
    }
}
