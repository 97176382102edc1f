use crate::models::{MessageRow, ReadMark, SessionRow, UserRow, VerificationRow};
use crate::{Database, time};
use anyhow::Result;
use chrono::{DateTime, Utc};
use murmur_types::models::MessageStatus;
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, Row, params, params_from_iter};
use uuid::Uuid;

const USER_COLUMNS: &str = "id, phone, name, photo_url, about, created_at";

const MESSAGE_COLUMNS: &str =
    "id, sender_id, recipient_id, text, ciphertext, nonce, status, sent_at, delivered_at, read_at";

/// Ids bound per `IN (...)` list. SQLite rejects statements with more than
/// 32766 host parameters, and `mark_read` binds the reader as well.
const MAX_BOUND_IDS: usize = 32_000;

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: Uuid,
        phone: &str,
        name: &str,
        photo_url: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, phone, name, photo_url, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id.to_string(), phone, name, photo_url, time::encode(&created_at)],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_id(&self, id: Uuid) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
            Ok(conn
                .query_row(&sql, [id.to_string()], user_from_row)
                .optional()?)
        })
    }

    pub fn get_user_by_phone(&self, phone: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE phone = ?1");
            Ok(conn.query_row(&sql, [phone], user_from_row).optional()?)
        })
    }

    /// Batch lookup of registered users among a set of phone numbers.
    pub fn get_users_by_phones(&self, phones: &[String]) -> Result<Vec<UserRow>> {
        if phones.is_empty() {
            return Ok(vec![]);
        }

        let mut phones: Vec<&String> = phones.iter().collect();
        phones.sort();
        phones.dedup();

        self.with_conn(|conn| {
            let mut users = Vec::new();
            for chunk in phones.chunks(MAX_BOUND_IDS) {
                let sql = format!(
                    "SELECT {USER_COLUMNS} FROM users WHERE phone IN ({})",
                    placeholders(1, chunk.len())
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params_from_iter(chunk.iter()), user_from_row)?;
                for row in rows {
                    users.push(row?);
                }
            }
            Ok(users)
        })
    }

    // -- Sessions --

    pub fn create_session(
        &self,
        id: Uuid,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, user_id, token_hash, expires_at, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id.to_string(),
                    user_id.to_string(),
                    token_hash,
                    time::encode(&expires_at),
                    time::encode(&created_at)
                ],
            )?;
            Ok(())
        })
    }

    pub fn find_sessions_by_token_hash(&self, token_hash: &str) -> Result<Vec<SessionRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT id, user_id, expires_at FROM sessions WHERE token_hash = ?1")?;
            let rows = stmt
                .query_map([token_hash], |row| {
                    Ok(SessionRow {
                        id: uuid_col(row, 0)?,
                        user_id: uuid_col(row, 1)?,
                        expires_at: time_col(row, 2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Verifications --

    /// Returns the new record's id; ids increase with creation order.
    pub fn create_verification(
        &self,
        phone: &str,
        code: &str,
        expires_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO verifications (phone, code, expires_at, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![phone, code, time::encode(&expires_at), time::encode(&created_at)],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// The most recently created verification for a phone, the only authoritative one.
    pub fn latest_verification(&self, phone: &str) -> Result<Option<VerificationRow>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, phone, code, expires_at, attempts, consumed_at
                     FROM verifications
                     WHERE phone = ?1
                     ORDER BY id DESC
                     LIMIT 1",
                    [phone],
                    |row| {
                        Ok(VerificationRow {
                            id: row.get(0)?,
                            phone: row.get(1)?,
                            code: row.get(2)?,
                            expires_at: time_col(row, 3)?,
                            attempts: row.get(4)?,
                            consumed_at: opt_time_col(row, 5)?,
                        })
                    },
                )
                .optional()?)
        })
    }

    pub fn record_verification_attempt(&self, id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE verifications SET attempts = attempts + 1 WHERE id = ?1",
                [id],
            )?;
            Ok(())
        })
    }

    /// Marks a verification used. Returns false if it was already consumed.
    pub fn consume_verification(&self, id: i64, at: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE verifications SET consumed_at = ?2 WHERE id = ?1 AND consumed_at IS NULL",
                params![id, time::encode(&at)],
            )?;
            Ok(changed == 1)
        })
    }

    // -- Messages --

    pub fn insert_message(&self, msg: &MessageRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, sender_id, recipient_id, text, ciphertext, nonce, status, sent_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    msg.id.to_string(),
                    msg.sender_id.to_string(),
                    msg.recipient_id.to_string(),
                    msg.text,
                    msg.ciphertext,
                    msg.nonce,
                    msg.status.as_str(),
                    time::encode(&msg.sent_at)
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_message(&self, id: Uuid) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1");
            Ok(conn
                .query_row(&sql, [id.to_string()], message_from_row)
                .optional()?)
        })
    }

    /// Every message exchanged between `a` and `b`, in either direction,
    /// oldest first. Insertion order breaks ties on equal `sent_at`.
    pub fn get_conversation(&self, a: Uuid, b: Uuid) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE (sender_id = ?1 AND recipient_id = ?2)
                    OR (sender_id = ?2 AND recipient_id = ?1)
                 ORDER BY sent_at ASC, rowid ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([a.to_string(), b.to_string()], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// sent → delivered. Returns the stamped `delivered_at`, or `None` when
    /// the message is unknown or already past `sent` (never downgrades `read`).
    pub fn mark_delivered(&self, id: Uuid, at: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let current = tx
                .query_row(
                    "SELECT status, sent_at FROM messages WHERE id = ?1",
                    [id.to_string()],
                    |row| Ok((status_col(row, 0)?, time_col(row, 1)?)),
                )
                .optional()?;

            let Some((status, sent_at)) = current else {
                return Ok(None);
            };
            if !status.can_advance_to(MessageStatus::Delivered) {
                return Ok(None);
            }

            let delivered_at = at.max(sent_at);
            tx.execute(
                "UPDATE messages SET status = 'delivered', delivered_at = ?2 WHERE id = ?1",
                params![id.to_string(), time::encode(&delivered_at)],
            )?;
            tx.commit()?;

            Ok(Some(delivered_at))
        })
    }

    /// Marks as read every message in `ids` that `reader` received and has
    /// not read yet. Messages addressed to anyone else are left untouched.
    pub fn mark_read(&self, reader: Uuid, ids: &[Uuid], at: DateTime<Utc>) -> Result<Vec<ReadMark>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let mut marks = Vec::new();
            // Each chunk sees the previous chunks' updates, so an id repeated
            // across chunks is still only marked once.
            for chunk in ids.chunks(MAX_BOUND_IDS) {
                let mut values: Vec<String> = Vec::with_capacity(chunk.len() + 1);
                values.push(reader.to_string());
                values.extend(chunk.iter().map(Uuid::to_string));

                let candidates = {
                    let sql = format!(
                        "SELECT id, sender_id, status, sent_at FROM messages
                         WHERE recipient_id = ?1 AND id IN ({})",
                        placeholders(2, chunk.len())
                    );
                    let mut stmt = tx.prepare(&sql)?;
                    stmt.query_map(params_from_iter(values.iter()), |row| {
                        Ok((
                            uuid_col(row, 0)?,
                            uuid_col(row, 1)?,
                            status_col(row, 2)?,
                            time_col(row, 3)?,
                        ))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?
                };

                for (message_id, sender_id, status, sent_at) in candidates {
                    if !status.can_advance_to(MessageStatus::Read) {
                        continue;
                    }
                    let read_at = at.max(sent_at);
                    // A message read before any push reached the reader counts as delivered at the same instant.
                    tx.execute(
                        "UPDATE messages
                         SET status = 'read', read_at = ?2, delivered_at = COALESCE(delivered_at, ?2)
                         WHERE id = ?1",
                        params![message_id.to_string(), time::encode(&read_at)],
                    )?;
                    marks.push(ReadMark {
                        message_id,
                        sender_id,
                        read_at,
                    });
                }
            }

            tx.commit()?;
            Ok(marks)
        })
    }

    // -- Contacts --

    /// One edge per (owner, contact); re-syncing refreshes name and phone.
    pub fn upsert_contact(
        &self,
        owner_id: Uuid,
        contact_user_id: Uuid,
        contact_name: Option<&str>,
        phone: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO contacts (owner_id, contact_user_id, contact_name, phone, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(owner_id, contact_user_id)
                 DO UPDATE SET contact_name = excluded.contact_name, phone = excluded.phone",
                params![
                    owner_id.to_string(),
                    contact_user_id.to_string(),
                    contact_name,
                    phone,
                    time::encode(&at)
                ],
            )?;
            Ok(())
        })
    }

    pub fn list_contacts(&self, owner_id: Uuid) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.phone, u.name, u.photo_url, u.about, u.created_at
                 FROM contacts c
                 JOIN users u ON u.id = c.contact_user_id
                 WHERE c.owner_id = ?1
                 ORDER BY c.created_at ASC",
            )?;
            let rows = stmt
                .query_map([owner_id.to_string()], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Health --

    pub fn ping(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
    }
}

/// `?start, ?start+1, ...` for `count` bound parameters.
fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: uuid_col(row, 0)?,
        phone: row.get(1)?,
        name: row.get(2)?,
        photo_url: row.get(3)?,
        about: row.get(4)?,
        created_at: time_col(row, 5)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: uuid_col(row, 0)?,
        sender_id: uuid_col(row, 1)?,
        recipient_id: uuid_col(row, 2)?,
        text: row.get(3)?,
        ciphertext: row.get(4)?,
        nonce: row.get(5)?,
        status: status_col(row, 6)?,
        sent_at: time_col(row, 7)?,
        delivered_at: opt_time_col(row, 8)?,
        read_at: opt_time_col(row, 9)?,
    })
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    time::decode(&raw).map_err(|e| conversion_error(idx, e))
}

fn opt_time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| time::decode(&s).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn status_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<MessageStatus> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}
