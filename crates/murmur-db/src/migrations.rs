use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);"
    )?;

    let version: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                phone       TEXT NOT NULL UNIQUE,
                name        TEXT NOT NULL,
                photo_url   TEXT,
                about       TEXT,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE sessions (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL REFERENCES users(id),
                token_hash  TEXT NOT NULL,
                expires_at  TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_sessions_token ON sessions(token_hash);

            CREATE TABLE verifications (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                phone        TEXT NOT NULL,
                code         TEXT NOT NULL,
                expires_at   TEXT NOT NULL,
                attempts     INTEGER NOT NULL DEFAULT 0,
                consumed_at  TEXT,
                created_at   TEXT NOT NULL
            );

            CREATE INDEX idx_verifications_phone ON verifications(phone, id);

            CREATE TABLE messages (
                id            TEXT PRIMARY KEY,
                sender_id     TEXT NOT NULL REFERENCES users(id),
                recipient_id  TEXT NOT NULL REFERENCES users(id),
                text          TEXT,
                ciphertext    TEXT,
                nonce         TEXT,
                status        TEXT NOT NULL DEFAULT 'sent'
                              CHECK (status IN ('sent', 'delivered', 'read')),
                sent_at       TEXT NOT NULL,
                delivered_at  TEXT,
                read_at       TEXT
            );

            CREATE INDEX idx_messages_pair
                ON messages(sender_id, recipient_id, sent_at);

            CREATE TABLE contacts (
                owner_id         TEXT NOT NULL REFERENCES users(id),
                contact_user_id  TEXT NOT NULL REFERENCES users(id),
                contact_name     TEXT,
                phone            TEXT NOT NULL,
                created_at       TEXT NOT NULL,
                UNIQUE(owner_id, contact_user_id)
            );

            INSERT INTO schema_version (version) VALUES (1);
            "
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
