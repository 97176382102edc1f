use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use murmur_db::Database;
use murmur_db::models::MessageRow;
use murmur_types::events::GatewayEvent;

use crate::presence::PresenceRegistry;
use crate::store;

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Recipient had no live connection; the message waits for a history pull.
    Offline,
    /// Pushed and marked delivered.
    Delivered { delivered_at: DateTime<Utc> },
    /// Pushed, but the message had already moved past `sent` (e.g. read in the meantime).
    AlreadyAdvanced,
    /// The push did not make it; the message stays `sent`.
    PushFailed,
}

/// Pushes freshly stored messages to recipients that are online.
#[derive(Clone)]
pub struct Dispatcher {
    presence: PresenceRegistry,
    db: Arc<Database>,
}

impl Dispatcher {
    pub fn new(presence: PresenceRegistry, db: Arc<Database>) -> Self {
        Self { presence, db }
    }

    /// One best-effort, at-most-once delivery attempt for a message that was
    /// just persisted with status `sent`. Push failures are swallowed; only
    /// store failures surface as errors.
    pub async fn deliver(&self, message: &MessageRow) -> Result<DeliveryOutcome> {
        let Some(connection) = self.presence.lookup(message.recipient_id) else {
            debug!("Recipient {} offline, message {} stays sent", message.recipient_id, message.id);
            return Ok(DeliveryOutcome::Offline);
        };

        let event = GatewayEvent::Message {
            id: message.id,
            sender_id: message.sender_id,
            recipient_id: message.recipient_id,
            text: message.text.clone(),
            ciphertext: message.ciphertext.clone(),
            nonce: message.nonce.clone(),
            sent_at: message.sent_at,
        };

        if let Err(e) = connection.push(event).await {
            info!(
                "Push of message {} to {} failed ({}), leaving it sent",
                message.id, message.recipient_id, e
            );
            return Ok(DeliveryOutcome::PushFailed);
        }

        let id = message.id;
        let stamped =
            store::blocking(&self.db, move |db| db.mark_delivered(id, murmur_db::time::now())).await?;

        Ok(match stamped {
            Some(delivered_at) => DeliveryOutcome::Delivered { delivered_at },
            None => DeliveryOutcome::AlreadyAdvanced,
        })
    }
}
