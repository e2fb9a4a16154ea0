//! Error taxonomy for the chat pipeline.
//!
//! Internals return `anyhow::Result`; the HTTP layer classifies failures
//! into [`ChatError`] so each class maps to one status code.

use thiserror::Error;

/// Raised by service clients when `OPENAI_API_KEY` is absent.
///
/// Carried inside `anyhow::Error` and recovered by downcast in
/// [`ChatError::classify`].
#[derive(Debug, Error)]
#[error("Missing OPENAI_API_KEY in environment.")]
pub struct MissingApiKey;

#[derive(Debug, Error)]
pub enum ChatError {
    /// Missing credential or missing index snapshot.
    #[error("{0}")]
    Config(String),
    /// Request body rejected before any external call.
    #[error("{0}")]
    Invalid(String),
    /// Embedding or completion service failure.
    #[error("{0:#}")]
    Upstream(anyhow::Error),
}

impl ChatError {
    /// Sort an upstream error into the taxonomy.
    pub fn classify(err: anyhow::Error) -> Self {
        if err.downcast_ref::<MissingApiKey>().is_some() {
            ChatError::Config(MissingApiKey.to_string())
        } else {
            ChatError::Upstream(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_classified_as_config() {
        let err = anyhow::Error::new(MissingApiKey).context("embedding query");
        assert!(matches!(ChatError::classify(err), ChatError::Config(_)));
    }

    #[test]
    fn test_other_errors_are_upstream() {
        let err = anyhow::anyhow!("connection reset");
        assert!(matches!(ChatError::classify(err), ChatError::Upstream(_)));
    }
}
