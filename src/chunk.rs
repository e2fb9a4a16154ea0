//! Heading-aware text chunker.
//!
//! Splits normalized corpus text into [`Chunk`]s that respect a character
//! budget. The text is first cut into sections at heading lines, whole
//! sections are packed greedily into chunks, and only sections that cannot
//! fit on their own are split further: at paragraph boundaries (`\n\n`)
//! first, then with a sliding character window that overlaps consecutive
//! windows.
//!
//! Chunk ids are `chunk-<n>` with `n` counting from 1 in document order.
//! [`crate::sections`] relies on that ordering to rebuild the document.

use regex::Regex;
use std::sync::LazyLock;

use crate::models::Chunk;

static MULTI_BLANK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("static regex"));
static MULTI_SPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" {2,}").expect("static regex"));
static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{2,}").expect("static regex"));

/// Heading lines are short and never longer than this many words.
const MAX_HEADING_WORDS: usize = 12;
const MIN_HEADING_CHARS: usize = 3;
const MAX_HEADING_CHARS: usize = 80;

/// Collapse whitespace the way the chunker expects its input.
///
/// Line endings become `\n`, runs of three or more newlines become a single
/// blank line, tabs become spaces, space runs collapse to one space, and the
/// result is trimmed.
pub fn normalize(text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let text = MULTI_BLANK.replace_all(&text, "\n\n");
    let text = text.replace('\t', " ");
    let text = MULTI_SPACE.replace_all(&text, " ");
    text.trim().to_string()
}

/// Whether a line looks like a section heading.
///
/// Markdown ATX headings always qualify. Otherwise a heading is a short
/// line with at least one letter, no terminal sentence punctuation and no
/// leading bullet.
pub fn is_heading_line(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return false;
    }
    if is_markdown_heading(trimmed) {
        return true;
    }
    if trimmed.starts_with('●') || trimmed.starts_with('-') || trimmed.starts_with('*') {
        return false;
    }
    if trimmed.ends_with(['.', '!', '?']) {
        return false;
    }
    let len = trimmed.chars().count();
    if !(MIN_HEADING_CHARS..=MAX_HEADING_CHARS).contains(&len) {
        return false;
    }
    if !trimmed.chars().any(|c| c.is_alphabetic()) {
        return false;
    }
    trimmed.split_whitespace().count() <= MAX_HEADING_WORDS
}

/// `#` to `######` followed by whitespace and some text.
pub fn is_markdown_heading(line: &str) -> bool {
    let hashes = line.chars().take_while(|&c| c == '#').count();
    (1..=6).contains(&hashes)
        && line[hashes..].starts_with(char::is_whitespace)
        && !line[hashes..].trim().is_empty()
}

/// Split text into sections, each starting at a heading line.
///
/// Text before the first heading forms its own section. Empty sections are
/// dropped.
pub fn split_sections(text: &str) -> Vec<String> {
    let mut sections = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    let mut flush = |current: &mut Vec<&str>| {
        if current.is_empty() {
            return;
        }
        let section = current.join("\n").trim().to_string();
        if !section.is_empty() {
            sections.push(section);
        }
        current.clear();
    };

    for line in text.lines() {
        if is_heading_line(line) {
            flush(&mut current);
        }
        current.push(line);
    }
    flush(&mut current);

    sections
}

/// Chunk normalized text.
///
/// Returns an empty vector for empty input. `chunk_overlap` may be any
/// value; windows always advance by at least one character.
pub fn chunk_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<Chunk> {
    let chunk_size = chunk_size.max(1);
    let mut packer = Packer::new(chunk_size);

    for section in split_sections(text) {
        if char_len(&section) <= chunk_size {
            packer.add(&section);
            continue;
        }

        packer.flush();
        for para in PARAGRAPH_BREAK.split(&section) {
            let trimmed = para.trim();
            if trimmed.is_empty() {
                continue;
            }
            if char_len(trimmed) <= chunk_size {
                packer.add(trimmed);
            } else {
                packer.flush();
                for window in sliding_windows(trimmed, chunk_size, chunk_overlap) {
                    packer.emit(&window);
                }
            }
        }
    }
    packer.flush();

    packer
        .pieces
        .into_iter()
        .enumerate()
        .map(|(i, text)| Chunk {
            id: format!("chunk-{}", i + 1),
            text,
        })
        .collect()
}

/// Cut `text` into windows of `size` characters, consecutive windows
/// sharing `overlap` characters.
pub fn sliding_windows(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let size = size.max(1);
    let step = size.saturating_sub(overlap).max(1);

    let mut windows = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + size).min(chars.len());
        windows.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    windows
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Greedy buffer that joins pieces with a blank line while under budget.
struct Packer {
    budget: usize,
    buffer: String,
    buffer_chars: usize,
    pieces: Vec<String>,
}

impl Packer {
    fn new(budget: usize) -> Self {
        Self {
            budget,
            buffer: String::new(),
            buffer_chars: 0,
            pieces: Vec::new(),
        }
    }

    fn add(&mut self, piece: &str) {
        let piece_chars = char_len(piece);
        if self.buffer.is_empty() {
            self.buffer.push_str(piece);
            self.buffer_chars = piece_chars;
        } else if self.buffer_chars + 2 + piece_chars <= self.budget {
            self.buffer.push_str("\n\n");
            self.buffer.push_str(piece);
            self.buffer_chars += 2 + piece_chars;
        } else {
            self.flush();
            self.buffer.push_str(piece);
            self.buffer_chars = piece_chars;
        }
    }

    fn flush(&mut self) {
        let text = std::mem::take(&mut self.buffer);
        self.buffer_chars = 0;
        self.emit(&text);
    }

    fn emit(&mut self, text: &str) {
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            self.pieces.push(trimmed.to_string());
        }
    }
}
