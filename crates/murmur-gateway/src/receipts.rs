use std::sync::Arc;

use anyhow::Result;
use tracing::debug;
use uuid::Uuid;

use murmur_db::Database;
use murmur_types::events::GatewayEvent;

use crate::presence::PresenceRegistry;
use crate::store;

/// Applies read-receipts and tells the original senders about them.
#[derive(Clone)]
pub struct ReceiptProcessor {
    presence: PresenceRegistry,
    db: Arc<Database>,
}

impl ReceiptProcessor {
    pub fn new(presence: PresenceRegistry, db: Arc<Database>) -> Self {
        Self { presence, db }
    }

    /// Mark `message_ids` read on behalf of `reader`.
    ///
    /// Only messages addressed to `reader` and not already read are updated;
    /// the rest are silently skipped. Each updated message's sender gets a
    /// `read` event if online. Returns the number of messages updated.
    pub async fn mark_read(&self, reader: Uuid, message_ids: Vec<Uuid>) -> Result<usize> {
        let marks = store::blocking(&self.db, move |db| {
            db.mark_read(reader, &message_ids, murmur_db::time::now())
        })
        .await?;

        for mark in &marks {
            let Some(connection) = self.presence.lookup(mark.sender_id) else {
                continue;
            };
            let event = GatewayEvent::Read {
                message_id: mark.message_id,
                read_at: mark.read_at,
                recipient_id: reader,
            };
            if let Err(e) = connection.push(event).await {
                debug!(
                    "Read notification for {} to {} dropped: {}",
                    mark.message_id, mark.sender_id, e
                );
            }
        }

        Ok(marks.len())
    }
}
