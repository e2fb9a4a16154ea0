//! Append-only JSONL logs of queries and user feedback.
//!
//! Every answered query goes to `queries.jsonl`. Answers containing the
//! configured "no clear answer" sentence are flagged ambiguous and also
//! written to `ambiguous.jsonl`, with the sentence itself as the reason.
//! Feedback payloads from the testing UI go to `feedback.jsonl`.

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryLogEntry {
    pub timestamp: String,
    pub query: String,
    pub ambiguous: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Case-insensitive search for the ambiguity marker.
///
/// Returns the marker as configured when it appears in `answer`.
pub fn detect_ambiguity<'a>(answer: &str, marker: &'a str) -> Option<&'a str> {
    if marker.is_empty() {
        return None;
    }
    answer
        .to_lowercase()
        .contains(&marker.to_lowercase())
        .then_some(marker)
}

pub struct QueryLog {
    dir: PathBuf,
    marker: String,
    // Serializes appends so concurrent lines never interleave.
    write_lock: Mutex<()>,
}

impl QueryLog {
    pub fn new(dir: impl Into<PathBuf>, marker: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            marker: marker.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn queries_path(&self) -> PathBuf {
        self.dir.join("queries.jsonl")
    }

    pub fn ambiguous_path(&self) -> PathBuf {
        self.dir.join("ambiguous.jsonl")
    }

    pub fn feedback_path(&self) -> PathBuf {
        self.dir.join("feedback.jsonl")
    }

    /// Record an answered query, classifying it by the ambiguity marker.
    pub fn log_query(&self, query: &str, answer: &str) -> Result<QueryLogEntry> {
        let reason = detect_ambiguity(answer, &self.marker).map(str::to_string);
        let entry = QueryLogEntry {
            timestamp: now_iso(),
            query: query.to_string(),
            ambiguous: reason.is_some(),
            reason,
        };

        let line = serde_json::to_string(&entry)?;
        self.append(&self.queries_path(), &line)?;
        if entry.ambiguous {
            self.append(&self.ambiguous_path(), &line)?;
        }
        Ok(entry)
    }

    /// Record a feedback object, stamping it with the current time.
    pub fn log_feedback(&self, payload: serde_json::Map<String, serde_json::Value>) -> Result<()> {
        let mut entry = serde_json::Map::new();
        entry.insert("timestamp".to_string(), now_iso().into());
        entry.extend(payload);
        let line = serde_json::to_string(&entry)?;
        self.append(&self.feedback_path(), &line)
    }

    fn append(&self, path: &Path, line: &str) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create log dir: {}", self.dir.display()))?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log: {}", path.display()))?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
