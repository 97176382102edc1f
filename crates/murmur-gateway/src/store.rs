use std::sync::Arc;

use anyhow::{Result, anyhow};
use murmur_db::Database;

/// Run a store call on the blocking pool so SQLite I/O never stalls the
/// async workers driving live connections.
pub async fn blocking<F, T>(db: &Arc<Database>, f: F) -> Result<T>
where
    F: FnOnce(&Database) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| anyhow!("spawn_blocking join error: {}", e))?
}
