//! Integration tests for the Parley API.
//!
//! Every test builds its own router over an in-memory database and a
//! scripted generation source, then drives it with `oneshot`. Event-stream
//! bodies are decoded with the same `FrameDecoder` clients use.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use parley_api::create_router;
use parley_api::handlers::{
    ConversationResponse, ConversationsResponse, HealthResponse, MessageResponse,
    MessagesResponse, SearchResponse,
};
use parley_api::state::AppState;
use parley_core::config::ParleyConfig;
use parley_core::types::Role;
use parley_storage::Database;
use parley_stream::{EventFrame, FrameDecoder, GenerationSource, ScriptedSource, StreamEvent};

// =============================================================================
// Helpers
// =============================================================================

fn make_state(source: impl GenerationSource + 'static) -> AppState {
    AppState::new(
        ParleyConfig::default(),
        Database::in_memory().unwrap(),
        Arc::new(source),
    )
}

fn make_app() -> (Router, AppState) {
    let state = make_state(ScriptedSource::new(["Hel", "lo, ", "world"]));
    (create_router(state.clone()), state)
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, json: &str) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(json.to_string()))
        .unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

async fn body_frames(response: axum::response::Response) -> Vec<EventFrame> {
    let bytes = body_bytes(response).await;
    FrameDecoder::decode_all(std::str::from_utf8(&bytes).unwrap()).unwrap()
}

fn conversation_header(response: &axum::response::Response) -> Uuid {
    response
        .headers()
        .get("x-conversation-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
        .expect("x-conversation-id header")
}

fn done_id(frames: &[EventFrame]) -> Uuid {
    match frames.last().map(|f| &f.event) {
        Some(StreamEvent::Done { message_id }) => *message_id,
        other => panic!("expected done frame, got {:?}", other),
    }
}

// =============================================================================
// Chat streaming
// =============================================================================

#[tokio::test]
async fn test_chat_stream_delivers_frames_and_persists_reply() {
    let (app, _state) = make_app();

    let response = app
        .clone()
        .oneshot(post_json("/chat/stream", r#"{"message":"greet the world"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/event-stream"
    );
    assert_eq!(response.headers().get("cache-control").unwrap(), "no-cache");
    assert_eq!(response.headers().get("x-accel-buffering").unwrap(), "no");
    let conversation_id = conversation_header(&response);

    let frames = body_frames(response).await;
    assert_eq!(frames.len(), 4);
    assert_eq!(frames[0].event, StreamEvent::delta("Hel"));
    assert_eq!(frames[1].event, StreamEvent::delta("lo, "));
    assert_eq!(frames[2].event, StreamEvent::delta("world"));
    let message_id = done_id(&frames);

    let response = app
        .clone()
        .oneshot(get(&format!("/messages/{}", message_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let reply: MessageResponse = body_json(response).await;
    assert_eq!(reply.content, "Hello, world");
    assert_eq!(reply.role, Role::Assistant);
    assert_eq!(reply.conversation_id, conversation_id);

    let response = app
        .oneshot(get(&format!("/conversations/{}/messages", conversation_id)))
        .await
        .unwrap();
    let page: MessagesResponse = body_json(response).await;
    let roles: Vec<Role> = page.messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant]);
    assert_eq!(page.messages[0].content, "greet the world");
}

#[tokio::test]
async fn test_chat_stream_continues_existing_conversation() {
    let (app, state) = make_app();
    let conversation = state.conversations.create().unwrap();

    let response = app
        .oneshot(post_json(
            "/chat/stream",
            &format!(
                r#"{{"conversation_id":"{}","message":"again"}}"#,
                conversation.id
            ),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(conversation_header(&response), conversation.id);

    let frames = body_frames(response).await;
    done_id(&frames);
    assert_eq!(
        state
            .messages
            .list_by_conversation(conversation.id, 10, 0)
            .unwrap()
            .len(),
        2
    );
}

#[tokio::test]
async fn test_chat_stream_rejects_empty_message() {
    let (app, state) = make_app();

    let response = app
        .oneshot(post_json("/chat/stream", r#"{"message":"   "}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = body_json(response).await;
    assert_eq!(body["error"], "bad_request");
    assert_eq!(state.messages.count().unwrap(), 0);
}

#[tokio::test]
async fn test_chat_stream_unknown_conversation() {
    let (app, state) = make_app();

    let response = app
        .oneshot(post_json(
            "/chat/stream",
            &format!(
                r#"{{"conversation_id":"{}","message":"hello"}}"#,
                Uuid::new_v4()
            ),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = body_json(response).await;
    assert_eq!(body["error"], "not_found");
    assert_eq!(state.messages.count().unwrap(), 0);
}

#[tokio::test]
async fn test_chat_stream_generation_failure() {
    let state = make_state(ScriptedSource::failing_after(["Par", "tial"], "model crashed"));
    let app = create_router(state.clone());

    let response = app
        .oneshot(post_json("/chat/stream", r#"{"message":"try it"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let frames = body_frames(response).await;
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[0].event, StreamEvent::delta("Par"));
    assert_eq!(frames[1].event, StreamEvent::delta("tial"));
    match frames[2].event {
        StreamEvent::Error { ref code, .. } => assert_eq!(code, "generation_failed"),
        ref other => panic!("expected error frame, got {:?}", other),
    }

    // Only the user's message was recorded.
    assert_eq!(state.messages.count().unwrap(), 1);
    assert_eq!(state.search.count_matches("partial", None).unwrap(), 0);
}

#[tokio::test]
async fn test_chat_stream_is_not_compressed() {
    let (app, _state) = make_app();

    let request = Request::post("/chat/stream")
        .header("content-type", "application/json")
        .header("accept-encoding", "gzip")
        .body(Body::from(r#"{"message":"compress me"}"#))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("content-encoding").is_none());
    done_id(&body_frames(response).await);
}

// =============================================================================
// JSON endpoints
// =============================================================================

#[tokio::test]
async fn test_health() {
    let (app, _state) = make_app();

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let health: HealthResponse = body_json(response).await;
    assert_eq!(health.status, "healthy");
    assert_eq!(health.messages, 0);
    assert!(!health.version.is_empty());
}

#[tokio::test]
async fn test_create_and_list_conversations() {
    let (app, _state) = make_app();

    let response = app
        .clone()
        .oneshot(Request::post("/conversations").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created: ConversationResponse = body_json(response).await;

    let response = app.oneshot(get("/conversations?limit=5")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let list: ConversationsResponse = body_json(response).await;
    assert_eq!(list.conversations.len(), 1);
    assert_eq!(list.conversations[0].id, created.id);
}

#[tokio::test]
async fn test_messages_of_unknown_conversation() {
    let (app, _state) = make_app();
    let response = app
        .oneshot(get(&format!("/conversations/{}/messages", Uuid::new_v4())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_messages_offset_out_of_range() {
    let (app, state) = make_app();
    let conversation = state.conversations.create().unwrap();

    let response = app
        .clone()
        .oneshot(get(&format!(
            "/conversations/{}/messages?offset={}",
            conversation.id,
            u64::MAX
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(get(&format!(
            "/conversations/{}/messages?offset={}",
            conversation.id,
            i64::MAX
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: MessagesResponse = body_json(response).await;
    assert!(body.messages.is_empty());
}

#[tokio::test]
async fn test_get_message_not_found() {
    let (app, _state) = make_app();
    let response = app
        .oneshot(get(&format!("/messages/{}", Uuid::new_v4())))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = body_json(response).await;
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_get_message_invalid_id() {
    let (app, _state) = make_app();
    let response = app.oneshot(get("/messages/not-a-uuid")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// =============================================================================
// Search
// =============================================================================

#[tokio::test]
async fn test_search_finds_streamed_reply() {
    let (app, _state) = make_app();

    let response = app
        .clone()
        .oneshot(post_json("/chat/stream", r#"{"message":"say something"}"#))
        .await
        .unwrap();
    let message_id = done_id(&body_frames(response).await);

    let response = app.oneshot(get("/search?q=worlds")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let result: SearchResponse = body_json(response).await;
    assert_eq!(result.query, "worlds");
    assert_eq!(result.total, 1);
    assert_eq!(result.results.len(), 1);
    assert_eq!(result.results[0].message_id, message_id);
    assert_eq!(result.results[0].role, Role::Assistant);
}

#[tokio::test]
async fn test_search_scoped_to_conversation() {
    let (app, state) = make_app();
    let first = state.conversations.create().unwrap();
    let second = state.conversations.create().unwrap();
    for conversation in [&first, &second] {
        state
            .messages
            .persist(&parley_core::types::NewMessage::new(
                conversation.id,
                Role::User,
                "budget review notes",
            ))
            .unwrap();
    }

    let response = app
        .oneshot(get(&format!(
            "/search?q=budget&conversation_id={}",
            second.id
        )))
        .await
        .unwrap();
    let result: SearchResponse = body_json(response).await;
    assert_eq!(result.total, 1);
    assert_eq!(result.results[0].conversation_id, second.id);
}

#[tokio::test]
async fn test_search_requires_query() {
    let (app, _state) = make_app();

    let response = app.clone().oneshot(get("/search")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.oneshot(get("/search?q=%20%20")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_search_stop_words_only_is_empty() {
    let (app, _state) = make_app();
    let response = app.oneshot(get("/search?q=the")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let result: SearchResponse = body_json(response).await;
    assert!(result.results.is_empty());
    assert_eq!(result.total, 0);
}

#[tokio::test]
async fn test_search_limit_is_clamped() {
    let (app, _state) = make_app();
    let response = app.oneshot(get("/search?q=anything&limit=5000")).await.unwrap();

    let result: SearchResponse = body_json(response).await;
    assert_eq!(result.limit, ParleyConfig::default().search.max_limit);
}
