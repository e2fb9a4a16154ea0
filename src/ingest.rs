//! Ingestion: corpus markdown → chunks → embeddings → snapshot file.
//!
//! ```text
//! markdown ─┐
//!           ├─▶ normalize ─▶ chunk_text ─▶ embed (batched) ─▶ embeddings.json
//! TSV dir ──┘  (optional "Phone directory:" appendix)
//! ```
//!
//! The snapshot is written in one piece after every batch has been
//! embedded, so a failed run never leaves a partial index behind.

use anyhow::{bail, Context, Result};
use chrono::Utc;

use crate::chunk::{chunk_text, normalize};
use crate::config::Config;
use crate::embedding::{self, embed_in_batches, Embedder};
use crate::index::write_snapshot;
use crate::models::{Chunk, EmbeddedRecord, IndexSnapshot};

const DIRECTORY_HEADER: &str = "Phone directory:";

/// `admit ingest`: rebuild the snapshot at `[index].path`.
pub async fn run_ingest(config: &Config) -> Result<()> {
    let embedder = embedding::create_embedder(&config.embedding)?;

    let md_path = &config.corpus.markdown_path;
    if !md_path.exists() {
        bail!("Markdown not found at {}", md_path.display());
    }
    let markdown = std::fs::read_to_string(md_path)
        .with_context(|| format!("Failed to read markdown: {}", md_path.display()))?;

    let directory = match &config.corpus.directory_tsv_url {
        Some(url) => Some(fetch_directory(url).await?),
        None => None,
    };

    let corpus = build_corpus(&markdown, directory.as_deref())?;
    let chunks = chunk_text(
        &corpus,
        config.chunking.chunk_size,
        config.chunking.chunk_overlap,
    );
    println!("Chunked corpus into {} chunks", chunks.len());

    let source = md_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned());
    let snapshot = embed_chunks(
        embedder.as_ref(),
        &config.embedding.model,
        chunks,
        config.embedding.batch_size,
        source,
    )
    .await?;

    write_snapshot(&config.index.path, &snapshot)?;
    println!(
        "Saved {} embeddings to {}",
        snapshot.count,
        config.index.path.display()
    );
    Ok(())
}

/// Normalize the markdown and append the directory, if any.
pub fn build_corpus(markdown: &str, directory: Option<&str>) -> Result<String> {
    let text = normalize(markdown);
    if text.is_empty() {
        bail!("No text found in markdown file.");
    }
    Ok(match directory {
        Some(dir) => format!("{text}\n\n{dir}"),
        None => text,
    })
}

/// Turn a TSV export into the directory appendix.
///
/// Lines are trimmed, blank lines dropped, and the result normalized like the
/// rest of the corpus. Errors when nothing is left.
pub fn directory_text(tsv: &str) -> Result<String> {
    let lines: Vec<&str> = tsv
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if lines.is_empty() {
        bail!("No data found in the directory sheet.");
    }
    Ok(normalize(&format!(
        "{DIRECTORY_HEADER}\n{}",
        lines.join("\n")
    )))
}

async fn fetch_directory(url: &str) -> Result<String> {
    let response = reqwest::get(url)
        .await
        .with_context(|| format!("Failed to fetch directory sheet: {url}"))?;
    let status = response.status();
    if !status.is_success() {
        bail!("Failed to fetch directory sheet ({status}).");
    }
    directory_text(&response.text().await?)
}

/// Embed every chunk and assemble the snapshot.
pub async fn embed_chunks(
    embedder: &dyn Embedder,
    model: &str,
    chunks: Vec<Chunk>,
    batch_size: usize,
    source: Option<String>,
) -> Result<IndexSnapshot> {
    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = embed_in_batches(embedder, model, &texts, batch_size).await?;

    let records: Vec<EmbeddedRecord> = chunks
        .into_iter()
        .zip(vectors)
        .map(|(chunk, embedding)| EmbeddedRecord {
            id: chunk.id,
            text: chunk.text,
            embedding,
        })
        .collect();

    Ok(IndexSnapshot {
        source,
        model: model.to_string(),
        created_at: Utc::now(),
        count: records.len(),
        records,
    })
}
