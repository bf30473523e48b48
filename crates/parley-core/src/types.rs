use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ParleyError;

// =============================================================================
// Enums
// =============================================================================

/// Author of a conversation turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ParleyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(ParleyError::InvalidMessage(format!("unknown role: {}", other))),
        }
    }
}

// =============================================================================
// Records
// =============================================================================

/// A conversation groups an ordered sequence of messages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
}

/// One committed turn in a conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Generated by the store on insert; never changes afterwards.
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: Role,
    pub content: String,
    /// Free-form JSON object. Not part of the search representation.
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    /// Normalized lexemes derived from `content`, sorted and space separated.
    pub search_vector: String,
    /// Incremented every time `search_vector` is recomputed.
    pub index_revision: i64,
}

/// A message that has not been persisted yet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub role: Role,
    pub content: String,
    #[serde(default = "empty_object")]
    pub metadata: serde_json::Value,
}

impl NewMessage {
    pub fn new(conversation_id: Uuid, role: Role, content: impl Into<String>) -> Self {
        Self {
            conversation_id,
            role,
            content: content.into(),
            metadata: empty_object(),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Content must carry at least one non-whitespace character.
    pub fn validate(&self) -> Result<(), ParleyError> {
        validate_content(&self.content)?;
        validate_metadata(&self.metadata)
    }
}

/// Partial update of a stored message. `None` fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageUpdate {
    pub content: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl MessageUpdate {
    pub fn validate(&self) -> Result<(), ParleyError> {
        if let Some(ref content) = self.content {
            validate_content(content)?;
        }
        if let Some(ref metadata) = self.metadata {
            validate_metadata(metadata)?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_none() && self.metadata.is_none()
    }
}

fn validate_content(content: &str) -> Result<(), ParleyError> {
    if content.trim().is_empty() {
        return Err(ParleyError::InvalidMessage(
            "content cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_metadata(metadata: &serde_json::Value) -> Result<(), ParleyError> {
    if !metadata.is_object() {
        return Err(ParleyError::InvalidMessage(
            "metadata must be a JSON object".to_string(),
        ));
    }
    Ok(())
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}
