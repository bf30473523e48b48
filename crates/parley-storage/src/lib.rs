//! Parley storage crate - SQLite persistence for conversations and messages.
//!
//! Provides a WAL-mode SQLite database with migrations, a scoped unit of
//! work (commit on success, rollback on any failure), the search index
//! maintainer that keeps each message's derived search vector in step with
//! its content, and FTS5-backed message search.

pub mod conversations;
pub mod db;
pub mod messages;
pub mod migrations;
pub mod search;
pub mod search_index;
pub mod unit_of_work;

pub use conversations::ConversationStore;
pub use db::Database;
pub use messages::MessageStore;
pub use search::{MessageSearch, SearchHit};
pub use search_index::SearchVector;
pub use unit_of_work::UnitOfWork;
