//! Database initialization
//!
//! Creates the SQLite file on first run and ensures the document table and
//! its indexes exist. Safe to call on every startup.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Default SQLite busy timeout; lock waits beyond this surface as errors
/// and are retried by the caller
pub const DEFAULT_BUSY_TIMEOUT_MS: u32 = 250;

/// Open (creating if missing) the database at `db_path` and prepare the schema
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL lets the API, scheduler and dispatchers read while one job writes
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    let pragma_sql = format!("PRAGMA busy_timeout = {}", DEFAULT_BUSY_TIMEOUT_MS);
    sqlx::query(&pragma_sql).execute(&pool).await?;

    create_documents_table(&pool).await?;

    info!("Database busy timeout set to {} ms", DEFAULT_BUSY_TIMEOUT_MS);

    Ok(pool)
}

/// In-memory database with the schema applied
///
/// A single connection is required: every new connection to `:memory:`
/// opens a separate, empty database.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;

    create_documents_table(&pool).await?;

    Ok(pool)
}

/// Create the document table
///
/// Every record is one row. The body holds the serialized document; the
/// tenant id is duplicated into its own column so tenant scans hit an index.
pub async fn create_documents_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            body TEXT NOT NULL CHECK (json_valid(body)),
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (collection, id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_tenant ON documents(collection, tenant_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
