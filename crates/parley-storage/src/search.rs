//! Full-text message search using SQLite FTS5.
//!
//! Queries are normalized with the same pipeline that builds each message's
//! search vector, then every resulting lexeme must be present (AND). Results
//! are ranked by BM25 relevance.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use parley_core::error::ParleyError;
use parley_core::types::Role;

use crate::db::Database;
use crate::messages::{millis_to_datetime, parse_uuid};
use crate::search_index::query_lexemes;

/// A single full-text search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub message_id: Uuid,
    pub conversation_id: Uuid,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// BM25 relevance, negated so that higher means more relevant.
    pub rank: f64,
}

/// Full-text search engine over committed messages.
pub struct MessageSearch {
    db: Arc<Database>,
}

impl MessageSearch {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Search messages, optionally within one conversation.
    ///
    /// A query that normalizes to no lexemes (empty, punctuation, only stop
    /// words) returns no results.
    pub fn search(
        &self,
        query: &str,
        conversation_id: Option<Uuid>,
        limit: u64,
    ) -> Result<Vec<SearchHit>, ParleyError> {
        let Some(fts_query) = build_match_expression(query) else {
            return Ok(Vec::new());
        };

        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT m.id, m.conversation_id, m.role, m.content, m.created_at, rank
                     FROM messages_fts
                     JOIN messages m ON m.rowid = messages_fts.rowid
                     WHERE messages_fts MATCH ?1
                       AND (?2 IS NULL OR m.conversation_id = ?2)
                     ORDER BY rank
                     LIMIT ?3",
                )
                .map_err(|e| ParleyError::Storage(format!("FTS5 query prepare failed: {}", e)))?;

            let rows = stmt
                .query_map(
                    rusqlite::params![
                        fts_query,
                        conversation_id.map(|id| id.to_string()),
                        limit
                    ],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, i64>(4)?,
                            row.get::<_, f64>(5)?,
                        ))
                    },
                )
                .map_err(|e| ParleyError::Storage(format!("FTS5 query failed: {}", e)))?;

            let mut hits = Vec::new();
            for row in rows {
                let (id, conversation_id, role, content, created_at, rank) =
                    row.map_err(|e| ParleyError::Storage(e.to_string()))?;

                hits.push(SearchHit {
                    message_id: parse_uuid(&id)?,
                    conversation_id: parse_uuid(&conversation_id)?,
                    role: role.parse()?,
                    content,
                    created_at: millis_to_datetime(created_at),
                    // FTS5 rank is negative (lower = better), negate for consistency.
                    rank: -rank,
                });
            }
            Ok(hits)
        })
    }

    /// Count messages matching a query, optionally within one conversation.
    pub fn count_matches(
        &self,
        query: &str,
        conversation_id: Option<Uuid>,
    ) -> Result<u64, ParleyError> {
        let Some(fts_query) = build_match_expression(query) else {
            return Ok(0);
        };

        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*)
                     FROM messages_fts
                     JOIN messages m ON m.rowid = messages_fts.rowid
                     WHERE messages_fts MATCH ?1
                       AND (?2 IS NULL OR m.conversation_id = ?2)",
                    rusqlite::params![fts_query, conversation_id.map(|id| id.to_string())],
                    |row| row.get(0),
                )
                .map_err(|e| ParleyError::Storage(format!("FTS5 count failed: {}", e)))?;
            Ok(count as u64)
        })
    }
}

/// Build an FTS5 expression requiring every query lexeme.
///
/// Lexemes contain only letters and digits, so quoting each one is enough
/// to keep user input out of the FTS5 query syntax.
fn build_match_expression(query: &str) -> Option<String> {
    let lexemes = query_lexemes(query);
    if lexemes.is_empty() {
        return None;
    }
    Some(
        lexemes
            .iter()
            .map(|lexeme| format!("\"{}\"", lexeme))
            .collect::<Vec<_>>()
            .join(" AND "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversations::ConversationStore;
    use crate::messages::MessageStore;
    use parley_core::types::{MessageUpdate, NewMessage};

    struct Fixture {
        search: MessageSearch,
        messages: MessageStore,
        conversations: ConversationStore,
        conv: Uuid,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(Database::in_memory().unwrap());
        let conversations = ConversationStore::new(Arc::clone(&db));
        let conv = conversations.create().unwrap().id;
        Fixture {
            search: MessageSearch::new(Arc::clone(&db)),
            messages: MessageStore::new(Arc::clone(&db)),
            conversations,
            conv,
        }
    }

    fn add(f: &Fixture, text: &str) -> Uuid {
        f.messages
            .persist(&NewMessage::new(f.conv, Role::User, text))
            .unwrap()
            .id
    }

    #[test]
    fn test_basic_search() {
        let f = fixture();
        let id1 = add(&f, "hello world from the browser");
        add(&f, "meeting about project status");

        let hits = f.search.search("hello", None, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].message_id, id1);
        assert_eq!(hits[0].content, "hello world from the browser");
    }

    #[test]
    fn test_matches_inflected_forms() {
        let f = fixture();
        let id = add(&f, "The deployment pipelines were failing");

        assert_eq!(f.search.search("pipeline", None, 10).unwrap()[0].message_id, id);
        assert_eq!(f.search.search("fails", None, 10).unwrap()[0].message_id, id);
        assert_eq!(f.search.search("FAILING", None, 10).unwrap()[0].message_id, id);
    }

    #[test]
    fn test_matches_derivational_forms() {
        let f = fixture();
        let dropped = add(&f, "The connection dropped");
        let idea = add(&f, "A generalization of the idea");

        for query in ["connected", "connecting", "connect", "connections"] {
            let hits = f.search.search(query, None, 10).unwrap();
            assert_eq!(hits.len(), 1, "{}", query);
            assert_eq!(hits[0].message_id, dropped);
        }
        for query in ["general", "generalize", "generalizations"] {
            let hits = f.search.search(query, None, 10).unwrap();
            assert_eq!(hits.len(), 1, "{}", query);
            assert_eq!(hits[0].message_id, idea);
        }
    }

    #[test]
    fn test_all_terms_required() {
        let f = fixture();
        add(&f, "rust programming language guide");
        add(&f, "rust web framework comparison");

        assert_eq!(f.search.search("rust", None, 10).unwrap().len(), 2);
        assert_eq!(f.search.search("rust web", None, 10).unwrap().len(), 1);
        assert!(f.search.search("rust python", None, 10).unwrap().is_empty());
    }

    #[test]
    fn test_empty_and_stop_word_queries() {
        let f = fixture();
        add(&f, "the quick brown fox");

        assert!(f.search.search("", None, 10).unwrap().is_empty());
        assert!(f.search.search("   ", None, 10).unwrap().is_empty());
        assert!(f.search.search("the", None, 10).unwrap().is_empty());
        assert_eq!(f.search.count_matches("!!!", None).unwrap(), 0);
    }

    #[test]
    fn test_query_syntax_is_not_interpreted() {
        let f = fixture();
        add(&f, "quick NEAR fox");
        // FTS5 operators and quotes in user input are plain words here.
        let hits = f.search.search("\"quick\" OR fox*", None, 10).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_no_matches() {
        let f = fixture();
        add(&f, "hello world");
        assert!(f.search.search("nonexistent", None, 10).unwrap().is_empty());
    }

    #[test]
    fn test_respects_limit() {
        let f = fixture();
        for i in 0..10 {
            add(&f, &format!("document about rust topic {}", i));
        }
        assert_eq!(f.search.search("rust", None, 3).unwrap().len(), 3);
        assert_eq!(f.search.count_matches("rust", None).unwrap(), 10);
    }

    #[test]
    fn test_conversation_filter() {
        let f = fixture();
        let other = f.conversations.create().unwrap().id;
        add(&f, "shared keyword here");
        f.messages
            .persist(&NewMessage::new(other, Role::Assistant, "shared keyword there"))
            .unwrap();

        assert_eq!(f.search.search("keyword", None, 10).unwrap().len(), 2);
        let scoped = f.search.search("keyword", Some(other), 10).unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].conversation_id, other);
        assert_eq!(scoped[0].role, Role::Assistant);
        assert_eq!(f.search.count_matches("keyword", Some(other)).unwrap(), 1);
    }

    #[test]
    fn test_content_update_moves_message_between_queries() {
        let f = fixture();
        let id = add(&f, "original wording");

        f.messages
            .update(
                id,
                &MessageUpdate {
                    content: Some("replacement text".to_string()),
                    metadata: None,
                },
            )
            .unwrap();

        assert!(f.search.search("original", None, 10).unwrap().is_empty());
        assert_eq!(f.search.search("replacement", None, 10).unwrap()[0].message_id, id);
        assert_eq!(f.search.count_matches("wording", None).unwrap(), 0);
    }

    #[test]
    fn test_metadata_update_keeps_message_searchable() {
        let f = fixture();
        let id = add(&f, "stable content");
        f.messages
            .update(
                id,
                &MessageUpdate {
                    content: None,
                    metadata: Some(serde_json::json!({"starred": true})),
                },
            )
            .unwrap();

        assert_eq!(f.search.search("stable", None, 10).unwrap()[0].message_id, id);
    }

    #[test]
    fn test_rank_ordering() {
        let f = fixture();
        add(&f, "learning rust basics with many other unrelated words around");
        add(&f, "rust rust rust advanced rust guide");

        let hits = f.search.search("rust", None, 10).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].rank >= hits[1].rank);
    }

    #[test]
    fn test_build_match_expression() {
        assert_eq!(
            build_match_expression("Hello, worlds!").as_deref(),
            Some("\"hello\" AND \"world\"")
        );
        assert!(build_match_expression("of the").is_none());
    }
}
