//! Retrieval-augmented chat pipeline.
//!
//! [`Pipeline::prepare`] turns a conversation into everything the model
//! call needs:
//!
//! 1. validate the message list and pick the latest user message,
//! 2. retrieve matches for it (plus anchor queries) from the index,
//! 3. expand each match into a display source,
//! 4. build the model input: system prompt, a context message with the
//!    labeled passages, then the recent conversation.
//!
//! The model sees passages labeled `[Source 1]` … `[Source N]` in merged
//! retrieval order, and the display sources carry the same numbers.

use std::sync::Arc;
use std::time::Instant;

use crate::chat::ChatModel;
use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::ChatError;
use crate::index::IndexHandle;
use crate::models::{ChatMessage, ScoredMatch, SourceEntry};
use crate::search;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an ER admitting guidelines assistant. \
Answer questions using ONLY the provided guidelines context. \
You MUST check the Medical Comorbidities section; if any listed diagnosis is present, \
the admission service is Medicine regardless of the primary diagnosis. \
If the guidelines do not answer the question, you MUST say: \"{marker}\" \
Then briefly explain what is missing or ambiguous and, if possible, provide the \
best-supported interpretation(s) grounded in the guidelines. \
Do not ask the user to change or interpret the guidelines. \
Provide a concise recommendation. \
Add inline citations in the form [Source N] immediately after the sentence they support. \
Do not add a Sources section. \
The final line of your response MUST be: \"If any diagnosis on the Medical Comorbidities list \
is present, admit to Medicine regardless of primary diagnosis.\"";

/// Everything needed to call the model for one chat request.
#[derive(Debug, Clone)]
pub struct PreparedChat {
    /// Content of the latest user message.
    pub query: String,
    pub matches: Vec<ScoredMatch>,
    pub sources: Vec<SourceEntry>,
    pub input: Vec<ChatMessage>,
    pub records: usize,
    pub load_ms: u128,
    pub embed_ms: u128,
    pub sim_ms: u128,
}

#[derive(Clone)]
pub struct Pipeline {
    pub config: Arc<Config>,
    pub index: Arc<IndexHandle>,
    pub embedder: Arc<dyn Embedder>,
    pub chat: Arc<dyn ChatModel>,
}

impl Pipeline {
    pub async fn prepare(&self, messages: &[ChatMessage]) -> Result<PreparedChat, ChatError> {
        let query = validate_messages(messages)?.content.clone();

        let t_load = Instant::now();
        let index = self
            .index
            .current()
            .map_err(ChatError::Upstream)?
            .ok_or_else(|| {
                ChatError::Config("Embeddings not found. Run `admit ingest`.".to_string())
            })?;
        let load_ms = t_load.elapsed().as_millis();

        let retrieval_cfg = &self.config.retrieval;
        let retrieval = search::retrieve(self.embedder.as_ref(), &index, &query, retrieval_cfg)
            .await
            .map_err(ChatError::classify)?;

        let sources = index
            .text_index
            .build_sources(&retrieval.matches, retrieval_cfg.max_section_chars);

        let input = build_model_input(
            &self.system_prompt(),
            &build_context(&retrieval.matches),
            messages,
            self.config.chat.history_messages,
        );

        Ok(PreparedChat {
            query,
            matches: retrieval.matches,
            sources,
            input,
            records: index.len(),
            load_ms,
            embed_ms: retrieval.embed_ms,
            sim_ms: retrieval.sim_ms,
        })
    }

    pub fn system_prompt(&self) -> String {
        match &self.config.chat.system_prompt {
            Some(prompt) => prompt.clone(),
            None => DEFAULT_SYSTEM_PROMPT.replace("{marker}", &self.config.chat.ambiguity_marker),
        }
    }
}

/// Reject empty conversations and conversations without a user turn.
///
/// Returns the latest user message.
pub fn validate_messages(messages: &[ChatMessage]) -> Result<&ChatMessage, ChatError> {
    if messages.is_empty() {
        return Err(ChatError::Invalid("messages array required".to_string()));
    }
    messages
        .iter()
        .rev()
        .find(|m| m.is_user())
        .filter(|m| !m.content.trim().is_empty())
        .ok_or_else(|| ChatError::Invalid("No user message provided.".to_string()))
}

/// Label each match as `[Source i]` in retrieval order.
pub fn build_context(matches: &[ScoredMatch]) -> String {
    matches
        .iter()
        .enumerate()
        .map(|(i, m)| format!("[Source {}]\n{}", i + 1, m.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// System prompt, context message, then the last `history` messages.
pub fn build_model_input(
    system_prompt: &str,
    context: &str,
    messages: &[ChatMessage],
    history: usize,
) -> Vec<ChatMessage> {
    let recent = &messages[messages.len().saturating_sub(history)..];
    let mut input = Vec::with_capacity(recent.len() + 2);
    input.push(ChatMessage::new("system", system_prompt));
    input.push(ChatMessage::new(
        "user",
        format!("Guidelines context:\n\n{context}"),
    ));
    input.extend(recent.iter().cloned());
    input
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: &str, content: &str) -> ChatMessage {
        ChatMessage::new(role, content)
    }

    #[test]
    fn test_validate_rejects_empty() {
        assert!(matches!(validate_messages(&[]), Err(ChatError::Invalid(_))));
    }

    #[test]
    fn test_validate_requires_user_message() {
        let msgs = vec![msg("assistant", "hello")];
        assert!(matches!(validate_messages(&msgs), Err(ChatError::Invalid(_))));
    }

    #[test]
    fn test_validate_picks_latest_user() {
        let msgs = vec![
            msg("user", "first"),
            msg("assistant", "answer"),
            msg("user", "second"),
        ];
        assert_eq!(validate_messages(&msgs).unwrap().content, "second");
    }

    #[test]
    fn test_build_context_labels() {
        let matches = vec![
            ScoredMatch {
                id: "chunk-4".into(),
                text: "Cardiology".into(),
                score: 0.9,
            },
            ScoredMatch {
                id: "chunk-1".into(),
                text: "Surgery".into(),
                score: 0.8,
            },
        ];
        assert_eq!(
            build_context(&matches),
            "[Source 1]\nCardiology\n\n[Source 2]\nSurgery"
        );
    }

    #[test]
    fn test_model_input_keeps_recent_history() {
        let msgs: Vec<ChatMessage> = (0..10).map(|i| msg("user", &format!("m{i}"))).collect();
        let input = build_model_input("sys", "ctx", &msgs, 6);
        assert_eq!(input.len(), 8);
        assert_eq!(input[0].role, "system");
        assert_eq!(input[1].content, "Guidelines context:\n\nctx");
        assert_eq!(input[2].content, "m4");
        assert_eq!(input[7].content, "m9");
    }

    #[test]
    fn test_default_prompt_mentions_marker() {
        let prompt = DEFAULT_SYSTEM_PROMPT.replace("{marker}", "No clear answer.");
        assert!(prompt.contains("\"No clear answer.\""));
        assert!(prompt.contains("[Source N]"));
    }
}
