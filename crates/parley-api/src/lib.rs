//! Parley API crate - axum HTTP server, route handlers, reply streaming.
//!
//! Exposes the chat streaming endpoint along with JSON endpoints for
//! conversations, message lookup, full-text search, and health.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
