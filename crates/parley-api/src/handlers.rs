//! Route handler functions for all API endpoints.
//!
//! Each handler extracts query/path parameters via axum extractors,
//! interacts with AppState services, and returns JSON responses. The chat
//! endpoint instead answers with an event stream fed by a dispatcher task.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, info};
use uuid::Uuid;

use parley_core::types::{Conversation, Message, NewMessage, Role};
use parley_stream::{ChannelSink, GenerationRequest, StreamOutcome};

use crate::error::ApiError;
use crate::state::AppState;

/// Upper bound for list endpoints.
const MAX_PAGE_SIZE: u64 = 100;

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");
const X_CONVERSATION_ID: HeaderName = HeaderName::from_static("x-conversation-id");

// =============================================================================
// Request and query parameter types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// Existing conversation to continue. A new one is started when absent.
    pub conversation_id: Option<Uuid>,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
    pub conversation_id: Option<Uuid>,
    pub limit: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub messages: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationResponse {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
}

impl From<Conversation> for ConversationResponse {
    fn from(c: Conversation) -> Self {
        Self {
            id: c.id,
            started_at: c.started_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationsResponse {
    pub conversations: Vec<ConversationResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: Role,
    pub content: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl From<Message> for MessageResponse {
    fn from(m: Message) -> Self {
        Self {
            id: m.id,
            conversation_id: m.conversation_id,
            role: m.role,
            content: m.content,
            metadata: m.metadata,
            created_at: m.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessagesResponse {
    pub messages: Vec<MessageResponse>,
    pub offset: u64,
    pub limit: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResultResponse {
    pub message_id: Uuid,
    pub conversation_id: Uuid,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub score: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchResultResponse>,
    pub total: u64,
    pub limit: u64,
}

// =============================================================================
// Handler functions
// =============================================================================

/// POST /chat/stream - persist the user message and stream the reply.
///
/// The body is `text/event-stream`; every frame is flushed as soon as the
/// dispatcher writes it.
pub async fn chat_stream(
    State(state): State<AppState>,
    Json(body): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    if body.message.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "'message' must not be empty".to_string(),
        ));
    }

    let conversation = match body.conversation_id {
        Some(id) => state
            .conversations
            .get(id)?
            .ok_or_else(|| ApiError::NotFound(format!("Conversation {} not found", id)))?,
        None => state.conversations.create()?,
    };

    let user_message = state.messages.persist(&NewMessage::new(
        conversation.id,
        Role::User,
        body.message,
    ))?;
    let history = state
        .messages
        .recent_history(conversation.id, state.config.stream.history_turns)?;

    let request =
        GenerationRequest::new(conversation.id, user_message.content).with_history(history);

    let (mut sink, rx) = ChannelSink::channel(state.config.stream.channel_capacity);
    let dispatcher = state.dispatcher.clone();
    let source = Arc::clone(&state.generation);
    let conversation_id = conversation.id;

    tokio::spawn(async move {
        let outcome = dispatcher.dispatch(request, source.as_ref(), &mut sink).await;
        match outcome {
            StreamOutcome::Completed { message, frames } => {
                debug!(conversation_id = %conversation_id, message_id = %message.id, frames, "Chat reply delivered");
            }
            StreamOutcome::Failed { error, frames } => {
                debug!(conversation_id = %conversation_id, code = error.code(), frames, "Chat reply failed");
            }
            StreamOutcome::Cancelled { delivered } => {
                debug!(conversation_id = %conversation_id, delivered, "Chat reply cancelled");
            }
        }
    });

    info!(
        conversation_id = %conversation_id,
        message_id = %user_message.id,
        "Chat stream started"
    );

    let body = Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>));
    let headers = [
        (header::CONTENT_TYPE, "text/event-stream".to_string()),
        (header::CACHE_CONTROL, "no-cache".to_string()),
        (X_ACCEL_BUFFERING, "no".to_string()),
        (X_CONVERSATION_ID, conversation_id.to_string()),
    ];
    Ok((headers, body).into_response())
}

/// POST /conversations - start a new conversation.
pub async fn create_conversation(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<ConversationResponse>), ApiError> {
    let conversation = state.conversations.create()?;
    Ok((StatusCode::CREATED, Json(conversation.into())))
}

/// GET /conversations - most recently active conversations.
pub async fn list_conversations(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> Result<Json<ConversationsResponse>, ApiError> {
    let limit = params.limit.unwrap_or(20).min(MAX_PAGE_SIZE).max(1);
    let conversations = state
        .conversations
        .list_recent(limit)?
        .into_iter()
        .map(ConversationResponse::from)
        .collect();

    Ok(Json(ConversationsResponse { conversations }))
}

/// GET /conversations/{id}/messages - messages in chronological order.
pub async fn conversation_messages(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<PageParams>,
) -> Result<Json<MessagesResponse>, ApiError> {
    if state.conversations.get(id)?.is_none() {
        return Err(ApiError::NotFound(format!("Conversation {} not found", id)));
    }

    let limit = params.limit.unwrap_or(50).min(MAX_PAGE_SIZE).max(1);
    let offset = params.offset.unwrap_or(0);
    if offset > i64::MAX as u64 {
        return Err(ApiError::BadRequest(format!(
            "offset must be at most {}",
            i64::MAX
        )));
    }
    let messages = state
        .messages
        .list_by_conversation(id, limit, offset)?
        .into_iter()
        .map(MessageResponse::from)
        .collect();

    Ok(Json(MessagesResponse {
        messages,
        offset,
        limit,
    }))
}

/// GET /messages/{id} - a single message.
pub async fn get_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageResponse>, ApiError> {
    let message = state
        .messages
        .get(id)?
        .ok_or_else(|| ApiError::NotFound(format!("Message {} not found", id)))?;
    Ok(Json(message.into()))
}

/// GET /search - full-text search over committed messages.
pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, ApiError> {
    let q = params
        .q
        .ok_or_else(|| ApiError::BadRequest("Parameter 'q' is required for search".to_string()))?;

    if q.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "Parameter 'q' must not be empty".to_string(),
        ));
    }

    let search_config = &state.config.search;
    let limit = params
        .limit
        .unwrap_or(search_config.default_limit)
        .min(search_config.max_limit)
        .max(1);

    let results: Vec<SearchResultResponse> = state
        .search
        .search(&q, params.conversation_id, limit)?
        .into_iter()
        .map(|hit| SearchResultResponse {
            message_id: hit.message_id,
            conversation_id: hit.conversation_id,
            role: hit.role,
            content: hit.content,
            created_at: hit.created_at,
            score: hit.rank,
        })
        .collect();
    let total = state.search.count_matches(&q, params.conversation_id)?;

    Ok(Json(SearchResponse {
        query: q,
        results,
        total,
        limit,
    }))
}

/// GET /health - health check.
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let messages = state.messages.count()?;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        messages,
    }))
}
