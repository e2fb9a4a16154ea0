//! Core data models used throughout the retrieval pipeline.
//!
//! These types represent the chunks, embedded records, snapshots, matches
//! and display sources that flow from ingestion to the chat response.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A bounded slice of normalized corpus text.
///
/// Ids have the form `chunk-<n>` where `n` is the 1-based position of the
/// chunk in the source, so ids also encode document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: String,
    pub text: String,
}

/// A chunk together with its embedding vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddedRecord {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// The on-disk embedding index produced by `admit ingest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Embedding model every record was produced with.
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub count: usize,
    pub records: Vec<EmbeddedRecord>,
}

/// A record scored against one query vector.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMatch {
    pub id: String,
    pub text: String,
    pub score: f32,
}

/// Display-ready source: a matched chunk expanded to its section.
///
/// `id` is the 1-based position in the merged retrieval order, which is the
/// number the model sees as `[Source <id>]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub id: u32,
    pub text: String,
}

/// One turn of a chat conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == "user"
    }
}

/// Parse the numeric part of a `chunk-<n>` id.
pub fn chunk_number(id: &str) -> Option<u64> {
    let lower = id.to_ascii_lowercase();
    let start = lower.find("chunk-")? + "chunk-".len();
    let digits: String = lower[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}
