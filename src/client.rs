//! `admit ask`: a terminal client for a running server.
//!
//! In streaming mode the response body is fed through the stream
//! assembler, printing text as it arrives. Once the answer is complete the
//! client exchanges the `X-Sources-Id` token for the display sources and
//! prints the ones the answer cited, under their remapped numbers.

use anyhow::{bail, Context, Result};
use futures::{Stream, StreamExt};
use std::io::Write;

use crate::citations::remap_citations;
use crate::models::{ChatMessage, SourceEntry};
use crate::server::{ChatAnswer, SourcesResponse, SOURCES_HEADER};
use crate::stream::{assemble, AssembledMessage, Renderer, DEFAULT_FLUSH_DELAY};

/// Characters of each source shown under the answer.
const SOURCE_PREVIEW_CHARS: usize = 400;

pub async fn run_ask(server: &str, question: &str, stream: bool) -> Result<()> {
    let base = server.trim_end_matches('/');
    let client = reqwest::Client::new();
    let body = serde_json::json!({ "messages": [ChatMessage::new("user", question)] });

    let mut request = client.post(format!("{base}/api/chat")).json(&body);
    if stream {
        request = request.header("x-stream", "1");
    }
    let response = request
        .send()
        .await
        .with_context(|| format!("Failed to reach server at {base}"))?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        bail!("Server error {}: {}", status, error_message(&text));
    }

    let token = response
        .headers()
        .get(SOURCES_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let mut out = std::io::stdout();
    let citations = if stream {
        let mut renderer = TerminalRenderer::new(&mut out);
        let message = assemble(
            utf8_chunks(response.bytes_stream()),
            &mut renderer,
            DEFAULT_FLUSH_DELAY,
        )
        .await;
        if let Some(reason) = &message.interrupted {
            eprintln!("\n(stream interrupted: {reason})");
        }
        message.citations
    } else {
        let answer: ChatAnswer = response.json().await?;
        let citations = remap_citations(&answer.answer);
        writeln!(out, "{}", citations.text)?;
        citations
    };

    let Some(token) = token else {
        return Ok(());
    };
    if citations.cited_ids.is_empty() {
        return Ok(());
    }

    let sources = fetch_sources(&client, base, &token).await?;
    writeln!(out, "\nSources:")?;
    for original in &citations.cited_ids {
        let Some(display) = citations.display_id(*original) else {
            continue;
        };
        match sources.iter().find(|s| s.id == *original) {
            Some(source) => writeln!(out, "[{display}] {}\n", preview(&source.text))?,
            None => writeln!(out, "[{display}] (source {original} not returned)\n")?,
        }
    }
    Ok(())
}

async fn fetch_sources(client: &reqwest::Client, base: &str, token: &str) -> Result<Vec<SourceEntry>> {
    let response = client
        .get(format!("{base}/api/sources/{token}"))
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        bail!("Failed to load sources ({}): {}", status, error_message(&text));
    }
    Ok(response.json::<SourcesResponse>().await?.sources)
}

/// Pull the message out of a JSON error body, or return the body as is.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            let err = v.get("error")?;
            err.get("message")
                .and_then(|m| m.as_str())
                .or_else(|| err.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

fn preview(text: &str) -> String {
    let mut out: String = text.chars().take(SOURCE_PREVIEW_CHARS).collect();
    if text.chars().count() > SOURCE_PREVIEW_CHARS {
        out.push('…');
    }
    out
}

/// Decode a byte stream as UTF-8 without splitting characters across chunks.
///
/// Bytes of an incomplete trailing character are held until the next
/// chunk. Invalid sequences are replaced with U+FFFD.
pub fn utf8_chunks<S, B, E>(bytes: S) -> impl Stream<Item = Result<String, E>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    bytes
        .scan(Utf8Decoder::default(), |decoder, chunk| {
            let item = chunk.map(|b| decoder.push(b.as_ref()));
            futures::future::ready(Some(item))
        })
        .filter(|item| futures::future::ready(!matches!(item, Ok(s) if s.is_empty())))
}

#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let valid = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            Err(e) => match e.error_len() {
                // Incomplete sequence at the end: keep it for later.
                None => e.valid_up_to(),
                Some(_) => {
                    let text = String::from_utf8_lossy(&self.pending).into_owned();
                    self.pending.clear();
                    return text;
                }
            },
        };
        let rest = self.pending.split_off(valid);
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending = rest;
        text
    }
}

/// Prints the growing answer to a terminal.
///
/// Each render writes only the part not yet printed. Terminals cannot
/// redraw, so when citation remapping changed the numbers the final text
/// is printed again in full. The first write error (a closed pipe, usually)
/// is logged once and silences the renderer.
pub struct TerminalRenderer<W: Write> {
    out: W,
    printed: usize,
    failed: bool,
}

impl<W: Write> TerminalRenderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            printed: 0,
            failed: false,
        }
    }

    fn write(&mut self, f: impl FnOnce(&mut W) -> std::io::Result<()>) {
        if self.failed {
            return;
        }
        if let Err(e) = f(&mut self.out).and_then(|_| self.out.flush()) {
            self.failed = true;
            tracing::warn!(error = %e, "stopped rendering answer: output closed");
        }
    }
}

impl<W: Write> Renderer for TerminalRenderer<W> {
    fn render(&mut self, text: &str) {
        if let Some(suffix) = text.get(self.printed..) {
            self.write(|out| out.write_all(suffix.as_bytes()));
            self.printed = text.len();
        }
    }

    fn complete(&mut self, message: &AssembledMessage) {
        let renumbered = (message.text() != message.raw).then(|| message.text());
        self.write(|out| {
            writeln!(out)?;
            if let Some(text) = renumbered {
                writeln!(out, "\n--- citations renumbered ---\n{text}")?;
            }
            Ok(())
        });
    }
}
