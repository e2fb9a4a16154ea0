//! Incremental assembly of a streamed answer.
//!
//! The text-processing core is a pure reducer: [`StreamState::apply`] takes
//! one [`StreamEvent`] and returns the [`RenderEffect`]s a presentation
//! layer should perform. Timers and I/O live in [`assemble`], which drives
//! the reducer from a delta stream and forwards effects to a [`Renderer`].
//!
//! ```text
//!            Append (non-empty)          Finalize
//!   Idle ─────────────────────▶ Streaming ─────────▶ Finalized
//!     └────────────────── Finalize ──────────────────────▲
//! ```
//!
//! Deltas are coalesced: the first append after a flush schedules one
//! flush after a fixed delay, and every append until then only grows the
//! pending buffer.

use futures::{Stream, StreamExt};
use std::time::Duration;
use tokio::time::Instant;

use crate::citations::{remap_citations, CitationRemap};

/// Default coalescing delay between render flushes.
pub const DEFAULT_FLUSH_DELAY: Duration = Duration::from_millis(35);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Streaming,
    Finalized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Append(String),
    FlushTick,
    Finalize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderEffect {
    /// First visible content arrived; emitted once per message.
    FirstChunk,
    /// Arm the flush timer.
    ScheduleFlush(Duration),
    /// Disarm a pending flush timer.
    CancelFlush,
    /// Redraw with the full text accumulated so far.
    Render(String),
    /// The message is complete.
    Complete(CitationRemap),
}

#[derive(Debug, Clone)]
pub struct StreamState {
    phase: Phase,
    rendered: String,
    pending: String,
    flush_scheduled: bool,
    flush_delay: Duration,
}

impl Default for StreamState {
    fn default() -> Self {
        Self::new(DEFAULT_FLUSH_DELAY)
    }
}

impl StreamState {
    pub fn new(flush_delay: Duration) -> Self {
        Self {
            phase: Phase::Idle,
            rendered: String::new(),
            pending: String::new(),
            flush_scheduled: false,
            flush_delay,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Text already flushed to the renderer.
    pub fn rendered(&self) -> &str {
        &self.rendered
    }

    pub fn apply(&mut self, event: StreamEvent) -> Vec<RenderEffect> {
        if self.phase == Phase::Finalized {
            return Vec::new();
        }

        match event {
            StreamEvent::Append(delta) => self.append(delta),
            StreamEvent::FlushTick => {
                self.flush_scheduled = false;
                self.flush().into_iter().collect()
            }
            StreamEvent::Finalize => self.finalize(),
        }
    }

    fn append(&mut self, delta: String) -> Vec<RenderEffect> {
        if delta.is_empty() {
            return Vec::new();
        }

        let mut effects = Vec::new();
        if self.phase == Phase::Idle {
            self.phase = Phase::Streaming;
            effects.push(RenderEffect::FirstChunk);
        }
        self.pending.push_str(&delta);
        if !self.flush_scheduled {
            self.flush_scheduled = true;
            effects.push(RenderEffect::ScheduleFlush(self.flush_delay));
        }
        effects
    }

    fn flush(&mut self) -> Option<RenderEffect> {
        if self.pending.is_empty() {
            return None;
        }
        self.rendered.push_str(&self.pending);
        self.pending.clear();
        Some(RenderEffect::Render(self.rendered.clone()))
    }

    fn finalize(&mut self) -> Vec<RenderEffect> {
        let mut effects = Vec::new();
        if self.flush_scheduled {
            self.flush_scheduled = false;
            effects.push(RenderEffect::CancelFlush);
        }
        effects.extend(self.flush());
        self.phase = Phase::Finalized;
        effects.push(RenderEffect::Complete(remap_citations(&self.rendered)));
        effects
    }
}

/// Presentation layer fed by [`assemble`].
pub trait Renderer {
    /// Called once, before the first render.
    fn first_chunk(&mut self) {}
    /// Redraw the message with the full accumulated text.
    fn render(&mut self, text: &str);
    /// The final, citation-remapped message.
    fn complete(&mut self, message: &AssembledMessage);
}

/// Outcome of one streamed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledMessage {
    /// Raw text as received.
    pub raw: String,
    pub citations: CitationRemap,
    /// Transport error that cut the stream short, if any.
    pub interrupted: Option<String>,
}

impl AssembledMessage {
    /// Text with remapped citation numbers.
    pub fn text(&self) -> &str {
        &self.citations.text
    }
}

/// Drive a [`StreamState`] from a stream of text deltas.
///
/// A transport error ends consumption but not the message: whatever was
/// received is flushed, finalized and returned with `interrupted` set.
pub async fn assemble<S, E, R>(stream: S, renderer: &mut R, flush_delay: Duration) -> AssembledMessage
where
    S: Stream<Item = Result<String, E>>,
    E: std::fmt::Display,
    R: Renderer + ?Sized,
{
    let mut stream = std::pin::pin!(stream);
    let mut state = StreamState::new(flush_delay);
    let mut deadline: Option<Instant> = None;
    let mut interrupted = None;

    loop {
        let timer = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        let event = tokio::select! {
            item = stream.next() => match item {
                Some(Ok(delta)) => StreamEvent::Append(delta),
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "stream interrupted");
                    interrupted = Some(e.to_string());
                    break;
                }
                None => break,
            },
            _ = timer => {
                deadline = None;
                StreamEvent::FlushTick
            }
        };

        for effect in state.apply(event) {
            dispatch(effect, renderer, &mut deadline);
        }
    }

    let mut completed = None;
    for effect in state.apply(StreamEvent::Finalize) {
        match effect {
            RenderEffect::Complete(citations) => completed = Some(citations),
            other => dispatch(other, renderer, &mut deadline),
        }
    }

    let message = AssembledMessage {
        raw: state.rendered().to_string(),
        citations: completed.unwrap_or_default(),
        interrupted,
    };
    renderer.complete(&message);
    message
}

fn dispatch<R: Renderer + ?Sized>(effect: RenderEffect, renderer: &mut R, deadline: &mut Option<Instant>) {
    match effect {
        RenderEffect::FirstChunk => renderer.first_chunk(),
        RenderEffect::ScheduleFlush(delay) => *deadline = Some(Instant::now() + delay),
        RenderEffect::CancelFlush => *deadline = None,
        RenderEffect::Render(text) => renderer.render(&text),
        RenderEffect::Complete(_) => {}
    }
}
