//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::StorageError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial_schema",
    sql: r#"
        CREATE TABLE IF NOT EXISTS leads (
            id TEXT PRIMARY KEY,
            intent TEXT,
            rooms INTEGER,
            budget REAL,
            neighborhood TEXT,
            stage TEXT NOT NULL,
            status TEXT NOT NULL,
            mode TEXT NOT NULL DEFAULT 'none',
            property_id TEXT,
            pending_property_id TEXT,
            last_suggestions TEXT NOT NULL DEFAULT '[]',
            rejected_property_ids TEXT NOT NULL DEFAULT '[]',
            qualification TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_leads_stage ON leads(stage);

        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            lead_id TEXT NOT NULL,
            direction TEXT NOT NULL,
            text TEXT NOT NULL,
            sent_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_lead ON messages(lead_id, sent_at);

        CREATE TABLE IF NOT EXISTS properties (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            neighborhood TEXT NOT NULL,
            rooms INTEGER NOT NULL,
            price REAL NOT NULL,
            url TEXT NOT NULL DEFAULT '',
            active INTEGER NOT NULL DEFAULT 1
        );
        CREATE INDEX IF NOT EXISTS idx_properties_active ON properties(active);
        CREATE INDEX IF NOT EXISTS idx_properties_neighborhood ON properties(neighborhood);

        CREATE TABLE IF NOT EXISTS visits (
            id TEXT PRIMARY KEY,
            lead_id TEXT NOT NULL,
            property_id TEXT NOT NULL,
            visit_at TEXT NOT NULL,
            confirmed INTEGER NOT NULL DEFAULT 0,
            notes TEXT,
            created_at TEXT NOT NULL,
            UNIQUE (lead_id, property_id, visit_at)
        );
        CREATE INDEX IF NOT EXISTS idx_visits_lead ON visits(lead_id);
    "#,
}];

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` table if it doesn't exist.
pub async fn run_migrations(conn: &Connection) -> Result<(), StorageError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| StorageError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                StorageError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    Ok(())
}

async fn get_current_version(conn: &Connection) -> Result<i64, StorageError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| StorageError::Migration(format!("Failed to read migration version: {e}")))?;

    match rows.next().await {
        Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0)),
        Ok(None) => Ok(0),
        Err(e) => Err(StorageError::Migration(format!(
            "Failed to read migration version: {e}"
        ))),
    }
}

async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), StorageError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| StorageError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}
