//! Database schema migrations.
//!
//! Applies the initial schema: conversations, messages, the FTS5 table
//! holding each message's search vector, and schema_migrations.
//!
//! There are no triggers. The search vector and its FTS5 row are written by
//! the search index maintainer inside the same unit of work as the content.

use rusqlite::Connection;
use tracing::info;

use parley_core::error::ParleyError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), ParleyError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| ParleyError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| ParleyError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<(), ParleyError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS conversations (
            id              TEXT PRIMARY KEY NOT NULL,
            started_at      INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_conversations_started_at
            ON conversations (started_at DESC);

        -- created_at is epoch milliseconds. The implicit rowid keys the FTS row.
        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY NOT NULL,
            conversation_id TEXT NOT NULL,
            role            TEXT NOT NULL
                            CHECK (role IN ('user', 'assistant', 'system')),
            content         TEXT NOT NULL CHECK (length(trim(content)) > 0),
            metadata        TEXT NOT NULL DEFAULT '{}',
            created_at      INTEGER NOT NULL,
            search_vector   TEXT NOT NULL DEFAULT '',
            index_revision  INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages (conversation_id, created_at ASC);

        CREATE INDEX IF NOT EXISTS idx_messages_created_at
            ON messages (created_at DESC);

        CREATE VIRTUAL TABLE IF NOT EXISTS messages_fts USING fts5(search_vector);

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| ParleyError::Storage(format!("Failed to apply migration v1: {}", e)))?;

    Ok(())
}
