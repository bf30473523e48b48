//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use parley_core::config::ParleyConfig;
use parley_storage::{ConversationStore, Database, MessageSearch, MessageStore};
use parley_stream::{GenerationSource, StreamDispatcher};

/// Shared application state.
///
/// All fields use `Arc` for cheap cloning across handler tasks.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration. Read-only while the server runs.
    pub config: Arc<ParleyConfig>,
    pub messages: Arc<MessageStore>,
    pub conversations: Arc<ConversationStore>,
    pub search: Arc<MessageSearch>,
    /// Drives one streaming reply per chat request.
    pub dispatcher: StreamDispatcher,
    /// Produces reply fragments.
    pub generation: Arc<dyn GenerationSource>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Create a new AppState around an opened database.
    pub fn new(
        config: ParleyConfig,
        database: Database,
        generation: Arc<dyn GenerationSource>,
    ) -> Self {
        let database = Arc::new(database);
        let messages = Arc::new(MessageStore::new(Arc::clone(&database)));
        Self {
            config: Arc::new(config),
            conversations: Arc::new(ConversationStore::new(Arc::clone(&database))),
            search: Arc::new(MessageSearch::new(Arc::clone(&database))),
            dispatcher: StreamDispatcher::new(Arc::clone(&messages)),
            messages,
            generation,
            start_time: Instant::now(),
        }
    }
}
