//! Citation remapping.
//!
//! The model cites context passages as `[Source <n>]`, where `n` is the
//! passage's position in the retrieval context. Readers see a dense
//! numbering instead: the first source cited becomes 1, the next distinct
//! one 2, and so on. Ids never cited receive no display number.

use regex::{Captures, Regex};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::LazyLock;

static CITATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[Source (\d+)\]").expect("static regex"));

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CitationRemap {
    /// Text with every marker rewritten to its display number.
    pub text: String,
    /// Original source id → display number.
    pub mapping: HashMap<u32, u32>,
    /// Original ids in order of first citation.
    pub cited_ids: Vec<u32>,
}

impl CitationRemap {
    pub fn display_id(&self, original: u32) -> Option<u32> {
        self.mapping.get(&original).copied()
    }
}

/// Renumber `[Source n]` markers by first appearance.
///
/// Markers whose number does not fit a `u32` are left untouched.
pub fn remap_citations(text: &str) -> CitationRemap {
    let mut mapping: HashMap<u32, u32> = HashMap::new();
    let mut cited_ids = Vec::new();

    let rewritten = CITATION.replace_all(text, |caps: &Captures| {
        let Ok(original) = caps[1].parse::<u32>() else {
            return caps[0].to_string();
        };
        let display = *mapping.entry(original).or_insert_with(|| {
            cited_ids.push(original);
            cited_ids.len() as u32
        });
        format!("[Source {display}]")
    });

    CitationRemap {
        text: rewritten.into_owned(),
        mapping,
        cited_ids,
    }
}
