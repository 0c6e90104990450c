//! Shared `SQLite` connection setup.

use std::sync::Arc;

use tokio_rusqlite::Connection;
use tracing::debug;

use crate::conversation::core::config::StorageConfig;
use crate::conversation::core::errors::ChatResult;

/// Open (or create) the database file from config.
///
/// The returned connection is meant to be shared by every store of one database.
///
/// # Errors
/// Returns an error if the parent directory or the database cannot be created.
pub async fn open_database(config: &StorageConfig) -> ChatResult<Arc<Connection>> {
    if let Some(parent) = config.sqlite_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let conn = Connection::open(&config.sqlite_path).await?;
    enable_foreign_keys(&conn).await?;
    debug!(path = %config.sqlite_path.display(), "opened sqlite database");
    Ok(Arc::new(conn))
}

/// Open a private in-memory database.
///
/// # Errors
/// Returns an error if the connection cannot be created.
pub async fn open_in_memory() -> ChatResult<Arc<Connection>> {
    let conn = Connection::open_in_memory().await?;
    enable_foreign_keys(&conn).await?;
    Ok(Arc::new(conn))
}

async fn enable_foreign_keys(conn: &Connection) -> ChatResult<()> {
    conn.call(|conn| {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(())
    })
    .await?;
    Ok(())
}
