//! Search index maintainer.
//!
//! Derives the searchable representation of a message from its content:
//! lowercase word tokens, English stop words removed, each remaining word
//! reduced to its Snowball English stem. The result is a set of lexemes, so recomputing from
//! identical content always yields an identical vector regardless of word
//! order or repetition.
//!
//! [`maintain`] writes the vector to `messages.search_vector` and to the
//! `messages_fts` row for the message. It takes a [`UnitOfWork`] so it can
//! only run inside the same transaction as the content write.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};

use parley_core::error::ParleyError;

use crate::unit_of_work::UnitOfWork;

static WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{L}\p{N}]+").expect("Invalid word regex"));

/// English stop words (the snowball list used by PostgreSQL's `english`
/// text search configuration).
const STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any", "are",
    "as", "at", "be", "because", "been", "before", "being", "below", "between", "both", "but",
    "by", "can", "d", "did", "do", "does", "doing", "don", "down", "during", "each", "few",
    "for", "from", "further", "had", "has", "have", "having", "he", "her", "here", "hers",
    "herself", "him", "himself", "his", "how", "i", "if", "in", "into", "is", "it", "its",
    "itself", "just", "ll", "m", "me", "more", "most", "my", "myself", "no", "nor", "not", "now",
    "o", "of", "off", "on", "once", "only", "or", "other", "our", "ours", "ourselves", "out",
    "over", "own", "re", "s", "same", "she", "should", "so", "some", "such", "t", "than", "that",
    "the", "their", "theirs", "them", "themselves", "then", "there", "these", "they", "this",
    "those", "through", "to", "too", "under", "until", "up", "ve", "very", "was", "we", "were",
    "what", "when", "where", "which", "while", "who", "whom", "why", "will", "with", "y", "you",
    "your", "yours", "yourself", "yourselves",
];

static ENGLISH: LazyLock<Stemmer> = LazyLock::new(|| Stemmer::create(Algorithm::English));

/// Normalized, order-insensitive lexeme set for one piece of content.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SearchVector {
    lexemes: BTreeSet<String>,
}

impl SearchVector {
    /// Compute the vector for `content`. Empty content yields an empty vector.
    pub fn compute(content: &str) -> Self {
        Self {
            lexemes: normalize(content).collect(),
        }
    }

    /// Rebuild a vector from its stored text form.
    pub fn from_stored(text: &str) -> Self {
        Self {
            lexemes: text.split_whitespace().map(str::to_string).collect(),
        }
    }

    /// Sorted, space separated lexemes. This is the stored form.
    pub fn as_text(&self) -> String {
        self.lexemes
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn lexemes(&self) -> impl Iterator<Item = &str> {
        self.lexemes.iter().map(String::as_str)
    }

    pub fn contains(&self, lexeme: &str) -> bool {
        self.lexemes.contains(lexeme)
    }

    pub fn is_empty(&self) -> bool {
        self.lexemes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lexemes.len()
    }
}

impl fmt::Display for SearchVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_text())
    }
}

/// Normalize free text into query lexemes, in first-seen order without
/// duplicates. Uses the same pipeline as [`SearchVector::compute`].
pub fn query_lexemes(query: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    normalize(query)
        .filter(|lexeme| seen.insert(lexeme.clone()))
        .collect()
}

fn normalize(text: &str) -> impl Iterator<Item = String> + '_ {
    WORD.find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .filter(|word| !STOP_WORDS.contains(&word.as_str()))
        .map(|word| stem(&word))
        .filter(|lexeme| !lexeme.is_empty())
}

/// Recompute and store the search vector for the message at `rowid`.
///
/// Bumps `index_revision` so callers can tell a recomputation happened.
pub(crate) fn maintain(
    uow: &UnitOfWork<'_>,
    rowid: i64,
    content: &str,
) -> Result<SearchVector, ParleyError> {
    let vector = SearchVector::compute(content);
    let text = vector.as_text();

    let updated = uow.execute(
        "UPDATE messages
         SET search_vector = ?1, index_revision = index_revision + 1
         WHERE rowid = ?2",
        rusqlite::params![text, rowid],
    )?;
    if updated != 1 {
        return Err(ParleyError::Persistence(format!(
            "search index target row {} not found",
            rowid
        )));
    }

    remove(uow, rowid)?;
    if !vector.is_empty() {
        uow.execute(
            "INSERT INTO messages_fts (rowid, search_vector) VALUES (?1, ?2)",
            rusqlite::params![rowid, text],
        )?;
    }

    Ok(vector)
}

/// Drop the search index entry for the message at `rowid`.
pub(crate) fn remove(uow: &UnitOfWork<'_>, rowid: i64) -> Result<(), ParleyError> {
    uow.execute(
        "DELETE FROM messages_fts WHERE rowid = ?1",
        rusqlite::params![rowid],
    )?;
    Ok(())
}

/// Reduce an English word to its Snowball stem. Numbers are left alone.
fn stem(word: &str) -> String {
    if word.chars().all(|c| c.is_ascii_digit()) {
        return word.to_string();
    }
    ENGLISH.stem(word).into_owned()
}
