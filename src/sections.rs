//! Section-aware source reconstruction.
//!
//! A retrieved chunk is often a fragment of a guideline section. For
//! display, each match is widened to the heading-delimited section of the
//! reassembled document that contains it, capped at a maximum length.
//!
//! [`TextIndex`] is built once per loaded snapshot: records are reordered
//! by chunk number, joined with `\n`, and every chunk's byte range and every
//! heading line's start offset is recorded.

use std::collections::HashMap;

use crate::chunk::{is_heading_line, is_markdown_heading};
use crate::models::{chunk_number, EmbeddedRecord, ScoredMatch, SourceEntry};

/// A heading line of the reassembled document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heading {
    /// Byte offset of the start of the heading line.
    pub start: usize,
    pub text: String,
}

#[derive(Debug, Clone, Default)]
pub struct TextIndex {
    full_text: String,
    headings: Vec<Heading>,
    /// Chunk id → byte range `[start, end)` within `full_text`.
    chunk_positions: HashMap<String, (usize, usize)>,
}

impl TextIndex {
    /// Reassemble the document from its chunk records.
    ///
    /// Records whose id carries no chunk number are placed last, keeping
    /// their relative order.
    pub fn build(records: &[EmbeddedRecord]) -> Self {
        let mut ordered: Vec<&EmbeddedRecord> = records.iter().collect();
        ordered.sort_by_key(|r| chunk_number(&r.id).unwrap_or(u64::MAX));

        let mut full_text = String::new();
        let mut chunk_positions = HashMap::with_capacity(ordered.len());

        for (i, record) in ordered.iter().enumerate() {
            if i > 0 {
                full_text.push('\n');
            }
            let start = full_text.len();
            full_text.push_str(&record.text);
            chunk_positions.insert(record.id.clone(), (start, full_text.len()));
        }

        let mut headings = Vec::new();
        let mut line_start = 0;
        for line in full_text.split('\n') {
            if is_heading_line(line) {
                headings.push(Heading {
                    start: line_start,
                    text: line.trim().to_string(),
                });
            }
            line_start += line.len() + 1;
        }

        Self {
            full_text,
            headings,
            chunk_positions,
        }
    }

    pub fn full_text(&self) -> &str {
        &self.full_text
    }

    pub fn headings(&self) -> &[Heading] {
        &self.headings
    }

    /// Text of the section enclosing chunk `id`, or `None` for unknown ids.
    ///
    /// The section runs from the last heading starting at or before the
    /// chunk to the first heading starting after it, and is cut to its first
    /// `max_chars` characters.
    pub fn section_for(&self, id: &str, max_chars: usize) -> Option<String> {
        let &(chunk_start, chunk_end) = self.chunk_positions.get(id)?;

        let section_start = self
            .headings
            .iter()
            .rev()
            .find(|h| h.start <= chunk_start)
            .map_or(0, |h| h.start);
        let section_end = self
            .headings
            .iter()
            .find(|h| h.start > chunk_end)
            .map_or(self.full_text.len(), |h| h.start);

        let section = self.full_text[section_start..section_end].trim();
        Some(truncate_chars(section, max_chars))
    }

    /// Expand retrieved matches into numbered display sources.
    ///
    /// Numbering follows the match order, matching the `[Source n]` labels
    /// of the model context.
    pub fn build_sources(&self, matches: &[ScoredMatch], max_chars: usize) -> Vec<SourceEntry> {
        matches
            .iter()
            .enumerate()
            .map(|(i, m)| SourceEntry {
                id: (i + 1) as u32,
                text: self
                    .section_for(&m.id, max_chars)
                    .unwrap_or_else(|| truncate_chars(&m.text, max_chars)),
            })
            .collect()
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.to_string(),
    }
}

/// Extract an ATX-heading section from markdown by heading title.
///
/// The title is matched case-insensitively against the heading text after
/// the `#` marks. Returns the heading line plus every line up to the next
/// ATX heading, trimmed, or `None` when the heading is absent.
pub fn extract_markdown_section(markdown: &str, heading: &str) -> Option<String> {
    let wanted = heading.trim().to_lowercase();
    let mut lines = Vec::new();
    let mut in_section = false;

    for line in markdown.lines() {
        let trimmed = line.trim();
        if is_markdown_heading(trimmed) {
            if in_section {
                break;
            }
            let title = trimmed.trim_start_matches('#').trim().to_lowercase();
            if title == wanted {
                in_section = true;
                lines.push(trimmed);
            }
            continue;
        }
        if in_section {
            lines.push(line);
        }
    }

    let section = lines.join("\n").trim().to_string();
    if section.is_empty() {
        None
    } else {
        Some(section)
    }
}
