//! Chat completion client.
//!
//! [`ChatModel`] is the narrow seam to the language model: a message list
//! in, either the full answer or a stream of text deltas out.
//! [`OpenAIChat`] implements it against the Responses API
//! (`POST {api_base}/responses`). Streaming responses arrive as
//! server-sent events; only `response.output_text.delta` events carry
//! answer text.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ChatConfig;
use crate::error::MissingApiKey;
use crate::models::ChatMessage;

/// Stream of answer text deltas.
pub type DeltaStream = BoxStream<'static, Result<String>>;

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Complete the conversation and return the whole answer.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Start a streamed completion.
    ///
    /// Errors before the first byte are returned directly; later failures
    /// arrive as an `Err` item in the stream.
    async fn stream(&self, messages: &[ChatMessage]) -> Result<DeltaStream>;
}

pub struct OpenAIChat {
    client: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAIChat {
    pub fn new(config: &ChatConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
            model: config.model.clone(),
        })
    }

    async fn send(&self, messages: &[ChatMessage], stream: bool) -> Result<reqwest::Response> {
        let api_key = self.api_key.as_deref().ok_or(MissingApiKey)?;
        let body = serde_json::json!({
            "model": self.model,
            "input": messages,
            "stream": stream,
        });

        let response = self
            .client
            .post(format!("{}/responses", self.api_base))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .context("Chat request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("OpenAI API error {}: {}", status, body_text);
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatModel for OpenAIChat {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let response = self.send(messages, false).await?;
        let json: serde_json::Value = response.json().await?;
        Ok(output_text(&json))
    }

    async fn stream(&self, messages: &[ChatMessage]) -> Result<DeltaStream> {
        let response = self.send(messages, true).await?;
        Ok(sse_deltas(response.bytes_stream()))
    }
}

pub fn create_chat_model(config: &ChatConfig) -> Result<Arc<dyn ChatModel>> {
    Ok(Arc::new(OpenAIChat::new(config)?))
}

/// Concatenate every `output_text` part of a non-streamed response.
pub fn output_text(json: &serde_json::Value) -> String {
    if let Some(text) = json.get("output_text").and_then(|t| t.as_str()) {
        return text.to_string();
    }

    let mut text = String::new();
    let items = json.get("output").and_then(|o| o.as_array());
    for item in items.into_iter().flatten() {
        let parts = item.get("content").and_then(|c| c.as_array());
        for part in parts.into_iter().flatten() {
            if part.get("type").and_then(|t| t.as_str()) == Some("output_text") {
                if let Some(t) = part.get("text").and_then(|t| t.as_str()) {
                    text.push_str(t);
                }
            }
        }
    }
    text
}

/// Turn a raw SSE byte stream into answer deltas.
fn sse_deltas<S, B, E>(bytes: S) -> DeltaStream
where
    S: futures::Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    bytes
        .scan(SseDecoder::default(), |decoder, chunk| {
            let out: Vec<Result<String>> = match chunk {
                Ok(chunk) => decoder
                    .push(chunk.as_ref())
                    .into_iter()
                    .filter_map(|data| delta_from_event(&data).transpose())
                    .collect(),
                Err(e) => vec![Err(anyhow::Error::new(e).context("Chat stream failed"))],
            };
            futures::future::ready(Some(futures::stream::iter(out)))
        })
        .flatten()
        .boxed()
}

/// Extract the text delta from one SSE `data:` payload.
///
/// `Ok(None)` for events that carry no answer text; `Err` for an `error`
/// or `response.failed` event.
fn delta_from_event(data: &str) -> Result<Option<String>> {
    if data == "[DONE]" {
        return Ok(None);
    }
    let event: serde_json::Value =
        serde_json::from_str(data).context("Malformed chat stream event")?;

    match event.get("type").and_then(|t| t.as_str()) {
        Some("response.output_text.delta") => Ok(event
            .get("delta")
            .and_then(|d| d.as_str())
            .filter(|d| !d.is_empty())
            .map(str::to_string)),
        Some("error") | Some("response.failed") => {
            bail!("Chat stream reported an error: {}", event)
        }
        _ => Ok(None),
    }
}

/// Incremental server-sent-events decoder.
///
/// Buffers bytes until a full line is available and returns the payload of
/// each complete event (its `data:` lines joined by `\n`).
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(self.data.join("\n"));
                    self.data.clear();
                }
            } else if let Some(rest) = line.strip_prefix("data:") {
                self.data.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
            }
        }
        events
    }
}
