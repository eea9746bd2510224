// Knowledge Types
// Records, vector matches, and the memory error type

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A hydrated knowledge-base record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeRecord {
    pub id: i64,
    pub title: String,
    pub source: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Request to add a record to the knowledge base
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewKnowledgeRecord {
    pub title: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub content: String,
}

impl NewKnowledgeRecord {
    /// Text used to compute the record's embedding.
    pub fn embedding_text(&self) -> String {
        if self.title.trim().is_empty() {
            self.content.clone()
        } else {
            format!("{}\n\n{}", self.title.trim(), self.content)
        }
    }
}

/// A match returned by a vector index.
///
/// Identifiers are opaque strings at this boundary; the retriever is the one
/// that decides whether they resolve to stored records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorMatch {
    pub id: String,
    pub score: f64,
}

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

pub type MemoryResult<T> = Result<T, MemoryError>;

/// Default embedding dimension (OpenAI text-embedding-3-small)
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 1536;

/// Default number of vector matches to request
pub const DEFAULT_TOP_K: usize = 5;

/// Maximum characters of record content rendered into one context section
pub const DEFAULT_MAX_SECTION_CHARS: usize = 2000;
