//! Conversation store.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::OptionalExtension;
use tracing::info;
use uuid::Uuid;

use parley_core::error::ParleyError;
use parley_core::types::Conversation;

use crate::db::Database;
use crate::messages::{millis_to_datetime, parse_uuid};

/// Repository for conversations.
pub struct ConversationStore {
    db: Arc<Database>,
}

impl ConversationStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Start a new, empty conversation.
    pub fn create(&self) -> Result<Conversation, ParleyError> {
        let conversation = Conversation {
            id: Uuid::new_v4(),
            started_at: millis_to_datetime(Utc::now().timestamp_millis()),
        };

        self.db.unit_of_work(|uow| {
            uow.execute(
                "INSERT INTO conversations (id, started_at) VALUES (?1, ?2)",
                rusqlite::params![
                    conversation.id.to_string(),
                    conversation.started_at.timestamp_millis()
                ],
            )
        })?;

        info!(conversation_id = %conversation.id, "Conversation created");
        Ok(conversation)
    }

    /// Find a conversation by ID.
    pub fn get(&self, id: Uuid) -> Result<Option<Conversation>, ParleyError> {
        self.db.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, started_at FROM conversations WHERE id = ?1",
                    rusqlite::params![id.to_string()],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
                )
                .optional()
                .map_err(|e| ParleyError::Storage(e.to_string()))?;

            match row {
                Some((id, started_at)) => Ok(Some(Conversation {
                    id: parse_uuid(&id)?,
                    started_at: millis_to_datetime(started_at),
                })),
                None => Ok(None),
            }
        })
    }

    /// Conversations ordered by most recent activity: the latest message,
    /// or the start time for conversations without messages.
    pub fn list_recent(&self, limit: u64) -> Result<Vec<Conversation>, ParleyError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT c.id, c.started_at
                     FROM conversations c
                     LEFT JOIN (
                         SELECT conversation_id, MAX(created_at) AS last_message_at
                         FROM messages
                         GROUP BY conversation_id
                     ) m ON m.conversation_id = c.id
                     ORDER BY COALESCE(m.last_message_at, c.started_at) DESC,
                              c.started_at DESC,
                              c.rowid DESC
                     LIMIT ?1",
                )
                .map_err(|e| ParleyError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(rusqlite::params![limit], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })
                .map_err(|e| ParleyError::Storage(e.to_string()))?;

            let mut conversations = Vec::new();
            for row in rows {
                let (id, started_at) = row.map_err(|e| ParleyError::Storage(e.to_string()))?;
                conversations.push(Conversation {
                    id: parse_uuid(&id)?,
                    started_at: millis_to_datetime(started_at),
                });
            }
            Ok(conversations)
        })
    }
}
