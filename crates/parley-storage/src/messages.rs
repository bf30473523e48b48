//! Message store.
//!
//! Every write goes through a unit of work that also runs the search index
//! maintainer, so a committed row never carries a search vector computed
//! from anything other than its committed content.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::OptionalExtension;
use tracing::{debug, info};
use uuid::Uuid;

use parley_core::error::ParleyError;
use parley_core::types::{Message, MessageUpdate, NewMessage, Role};

use crate::db::Database;
use crate::search_index;
use crate::unit_of_work::{persistence_error, UnitOfWork};

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, role, content, metadata, created_at, search_vector, index_revision";

/// Repository for conversation messages.
pub struct MessageStore {
    db: Arc<Database>,
}

impl MessageStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Persist a new message and its search vector atomically.
    ///
    /// Returns the stored message with its generated id and timestamp.
    /// Fails with `InvalidMessage` for blank content and `Persistence` when
    /// the store rejects the write (for example an unknown conversation).
    pub fn persist(&self, new: &NewMessage) -> Result<Message, ParleyError> {
        new.validate()?;

        let id = Uuid::new_v4();
        let created_at = millis_to_datetime(Utc::now().timestamp_millis());
        let metadata = serde_json::to_string(&new.metadata)?;

        let message = self.db.unit_of_work(|uow| {
            uow.execute(
                "INSERT INTO messages (id, conversation_id, role, content, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    id.to_string(),
                    new.conversation_id.to_string(),
                    new.role.as_str(),
                    new.content,
                    metadata,
                    created_at.timestamp_millis(),
                ],
            )?;
            let rowid = uow.conn().last_insert_rowid();
            let vector = search_index::maintain(uow, rowid, &new.content)?;

            Ok(Message {
                id,
                conversation_id: new.conversation_id,
                role: new.role,
                content: new.content.clone(),
                metadata: new.metadata.clone(),
                created_at,
                search_vector: vector.as_text(),
                index_revision: 1,
            })
        })?;

        info!(
            message_id = %message.id,
            conversation_id = %message.conversation_id,
            role = %message.role,
            "Message persisted"
        );
        Ok(message)
    }

    /// Apply a partial update.
    ///
    /// The search vector is recomputed only when the content actually
    /// changes. Metadata-only updates, and content updates that repeat the
    /// current content, leave the vector and its revision untouched.
    pub fn update(&self, id: Uuid, update: &MessageUpdate) -> Result<Message, ParleyError> {
        update.validate()?;

        self.db.unit_of_work(|uow| {
            let (rowid, current) = find_in(uow, id)?
                .ok_or_else(|| ParleyError::NotFound(format!("message {}", id)))?;

            if let Some(ref metadata) = update.metadata {
                uow.execute(
                    "UPDATE messages SET metadata = ?1 WHERE rowid = ?2",
                    rusqlite::params![serde_json::to_string(metadata)?, rowid],
                )?;
            }

            match update.content {
                Some(ref content) if *content != current.content => {
                    uow.execute(
                        "UPDATE messages SET content = ?1 WHERE rowid = ?2",
                        rusqlite::params![content, rowid],
                    )?;
                    search_index::maintain(uow, rowid, content)?;
                    debug!(message_id = %id, "Message content changed, search vector recomputed");
                }
                _ => {}
            }

            find_in(uow, id)?
                .map(|(_, message)| message)
                .ok_or_else(|| ParleyError::NotFound(format!("message {}", id)))
        })
    }

    /// Delete a message together with its search index entry.
    ///
    /// Returns `false` when no message has the given ID.
    pub fn delete(&self, id: Uuid) -> Result<bool, ParleyError> {
        let deleted = self.db.unit_of_work(|uow| {
            let Some((rowid, _)) = find_in(uow, id)? else {
                return Ok(false);
            };
            search_index::remove(uow, rowid)?;
            uow.execute("DELETE FROM messages WHERE rowid = ?1", rusqlite::params![rowid])?;
            Ok(true)
        })?;

        if deleted {
            info!(message_id = %id, "Message deleted");
        }
        Ok(deleted)
    }

    /// Find a message by ID.
    pub fn get(&self, id: Uuid) -> Result<Option<Message>, ParleyError> {
        self.db.with_conn(|conn| {
            let sql = format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS);
            let result = conn
                .query_row(&sql, rusqlite::params![id.to_string()], |row| {
                    Ok(row_to_message(row))
                })
                .optional()
                .map_err(|e| ParleyError::Storage(e.to_string()))?;

            result.transpose()
        })
    }

    /// Messages of a conversation in chronological order.
    pub fn list_by_conversation(
        &self,
        conversation_id: Uuid,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Message>, ParleyError> {
        // SQLite integers are signed.
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let offset = i64::try_from(offset).map_err(|_| {
            ParleyError::InvalidMessage(format!("offset {} is out of range", offset))
        })?;
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages
                 WHERE conversation_id = ?1
                 ORDER BY created_at ASC, rowid ASC
                 LIMIT ?2 OFFSET ?3",
                MESSAGE_COLUMNS
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| ParleyError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(
                    rusqlite::params![conversation_id.to_string(), limit, offset],
                    |row| Ok(row_to_message(row)),
                )
                .map_err(|e| ParleyError::Storage(e.to_string()))?;

            let mut messages = Vec::new();
            for row in rows {
                messages.push(row.map_err(|e| ParleyError::Storage(e.to_string()))??);
            }
            Ok(messages)
        })
    }

    /// The last `limit` messages of a conversation, oldest first.
    pub fn recent_history(
        &self,
        conversation_id: Uuid,
        limit: u64,
    ) -> Result<Vec<Message>, ParleyError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages
                 WHERE conversation_id = ?1
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?2",
                MESSAGE_COLUMNS
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| ParleyError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(rusqlite::params![conversation_id.to_string(), limit], |row| {
                    Ok(row_to_message(row))
                })
                .map_err(|e| ParleyError::Storage(e.to_string()))?;

            let mut messages = Vec::new();
            for row in rows {
                messages.push(row.map_err(|e| ParleyError::Storage(e.to_string()))??);
            }
            messages.reverse();
            Ok(messages)
        })
    }

    /// Count all stored messages.
    pub fn count(&self) -> Result<u64, ParleyError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
                .map_err(|e| ParleyError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }
}

/// Load a message and its rowid inside an open unit of work.
fn find_in(uow: &UnitOfWork<'_>, id: Uuid) -> Result<Option<(i64, Message)>, ParleyError> {
    let sql = format!("SELECT {}, rowid FROM messages WHERE id = ?1", MESSAGE_COLUMNS);
    let result = uow
        .conn()
        .query_row(&sql, rusqlite::params![id.to_string()], |row| {
            let rowid: i64 = row.get(8)?;
            Ok(row_to_message(row).map(|message| (rowid, message)))
        })
        .optional()
        .map_err(persistence_error)?;

    result.transpose()
}

/// Convert a row selected with `MESSAGE_COLUMNS` into a Message.
fn row_to_message(row: &rusqlite::Row<'_>) -> Result<Message, ParleyError> {
    let read = |e: rusqlite::Error| ParleyError::Storage(e.to_string());

    let id: String = row.get(0).map_err(read)?;
    let conversation_id: String = row.get(1).map_err(read)?;
    let role: String = row.get(2).map_err(read)?;
    let content: String = row.get(3).map_err(read)?;
    let metadata: String = row.get(4).map_err(read)?;
    let created_at: i64 = row.get(5).map_err(read)?;
    let search_vector: String = row.get(6).map_err(read)?;
    let index_revision: i64 = row.get(7).map_err(read)?;

    Ok(Message {
        id: parse_uuid(&id)?,
        conversation_id: parse_uuid(&conversation_id)?,
        role: role.parse::<Role>()?,
        content,
        metadata: serde_json::from_str(&metadata)?,
        created_at: millis_to_datetime(created_at),
        search_vector,
        index_revision,
    })
}

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid, ParleyError> {
    Uuid::parse_str(s).map_err(|e| ParleyError::Storage(format!("Invalid UUID: {}", e)))
}

pub(crate) fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
}
