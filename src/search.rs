//! Vector retrieval with query anchoring.
//!
//! # Ranking
//!
//! [`top_k`] scores every record by cosine similarity against a query
//! vector and keeps the best `k`. The sort is stable, so records with equal
//! scores stay in snapshot order.
//!
//! # Anchoring
//!
//! Some guideline sections must be in the model's context regardless of the
//! question (the comorbidity override list is the canonical case). Each
//! configured anchor query is embedded in the same request as the user's
//! query and contributes its own small top-k. [`merge_matches`] combines
//! all lists keyed by chunk id:
//!
//! ```text
//! query top-k ──┐
//! anchor 1 ─────┼──▶ first-seen dedup ──▶ presentation order
//! anchor 2 ─────┘
//! ```
//!
//! A chunk found by several passes keeps the score of the pass that saw it
//! first, and the merged list is not re-sorted.

use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::time::Instant;

use crate::config::{Config, RetrievalConfig};
use crate::embedding::{self, cosine_similarity, Embedder};
use crate::index::{IndexHandle, LoadedIndex};
use crate::models::{EmbeddedRecord, ScoredMatch};

/// Top `k` records by descending cosine similarity.
pub fn top_k(query: &[f32], records: &[EmbeddedRecord], k: usize) -> Vec<ScoredMatch> {
    let mut scored: Vec<ScoredMatch> = records
        .iter()
        .map(|r| ScoredMatch {
            id: r.id.clone(),
            text: r.text.clone(),
            score: cosine_similarity(query, &r.embedding),
        })
        .collect();

    // `sort_by` is stable: ties keep snapshot order.
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(k);
    scored
}

/// Concatenate match lists, dropping ids already seen.
pub fn merge_matches(lists: impl IntoIterator<Item = Vec<ScoredMatch>>) -> Vec<ScoredMatch> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for list in lists {
        for m in list {
            if seen.insert(m.id.clone()) {
                merged.push(m);
            }
        }
    }
    merged
}

/// Result of one retrieval pass with its timings.
#[derive(Debug, Clone)]
pub struct Retrieval {
    pub matches: Vec<ScoredMatch>,
    pub embed_ms: u128,
    pub sim_ms: u128,
}

/// Embed the query together with the anchor queries and retrieve.
pub async fn retrieve(
    embedder: &dyn Embedder,
    index: &LoadedIndex,
    query: &str,
    cfg: &RetrievalConfig,
) -> Result<Retrieval> {
    let mut inputs = Vec::with_capacity(1 + cfg.anchor_queries.len());
    inputs.push(query.to_string());
    inputs.extend(cfg.anchor_queries.iter().cloned());

    let t_embed = Instant::now();
    let vectors = embedder
        .embed(index.model(), &inputs)
        .await
        .context("Failed to embed query")?;
    let embed_ms = t_embed.elapsed().as_millis();

    let Some((query_vec, anchor_vecs)) = vectors.split_first() else {
        bail!("Embedding service returned no vectors");
    };

    let t_sim = Instant::now();
    let records = index.records();
    let mut lists = vec![top_k(query_vec, records, cfg.top_k)];
    lists.extend(
        anchor_vecs
            .iter()
            .take(cfg.anchor_queries.len())
            .map(|v| top_k(v, records, cfg.anchor_k)),
    );
    let matches = merge_matches(lists);
    let sim_ms = t_sim.elapsed().as_millis();

    Ok(Retrieval {
        matches,
        embed_ms,
        sim_ms,
    })
}

/// `admit search`: print the merged retrieval for a query.
pub async fn run_search(config: &Config, query: &str, limit: Option<usize>) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let handle = IndexHandle::new(&config.index.path);
    let Some(index) = handle.current()? else {
        bail!(
            "Embeddings not found at {}. Run `admit ingest` first.",
            config.index.path.display()
        );
    };

    let mut retrieval_cfg = config.retrieval.clone();
    if let Some(limit) = limit {
        retrieval_cfg.top_k = limit.max(1);
    }

    let embedder = embedding::create_embedder(&config.embedding)?;
    let retrieval = retrieve(embedder.as_ref(), &index, query, &retrieval_cfg).await?;

    if retrieval.matches.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, m) in retrieval.matches.iter().enumerate() {
        let snippet: String = m.text.chars().take(160).collect();
        println!(
            "{}. [{:.4}] {}\n    {}",
            i + 1,
            m.score,
            m.id,
            snippet.replace('\n', " ")
        );
    }
    println!(
        "\n{} matches (embed {}ms, similarity {}ms)",
        retrieval.matches.len(),
        retrieval.embed_ms,
        retrieval.sim_ms
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;

    use crate::models::IndexSnapshot;

    fn rec(id: &str, v: Vec<f32>) -> EmbeddedRecord {
        EmbeddedRecord {
            id: id.to_string(),
            text: format!("text of {id}"),
            embedding: v,
        }
    }

    #[test]
    fn test_top_k_descending() {
        let records = vec![
            rec("chunk-1", vec![0.0, 1.0]),
            rec("chunk-2", vec![1.0, 0.0]),
            rec("chunk-3", vec![0.7, 0.7]),
        ];
        let top = top_k(&[1.0, 0.0], &records, 3);
        let ids: Vec<&str> = top.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["chunk-2", "chunk-3", "chunk-1"]);
        for pair in top.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_top_k_ties_keep_input_order() {
        let records = vec![
            rec("chunk-5", vec![1.0, 1.0]),
            rec("chunk-2", vec![1.0, 1.0]),
            rec("chunk-9", vec![1.0, 1.0]),
        ];
        let top = top_k(&[1.0, 1.0], &records, 2);
        let ids: Vec<&str> = top.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["chunk-5", "chunk-2"]);
    }

    #[test]
    fn test_top_k_zero_query() {
        let records = vec![rec("chunk-1", vec![1.0, 0.0])];
        let top = top_k(&[0.0, 0.0], &records, 5);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].score, 0.0);
    }

    #[test]
    fn test_merge_keeps_first_seen() {
        let a = vec![ScoredMatch {
            id: "chunk-1".into(),
            text: "t".into(),
            score: 0.4,
        }];
        let b = vec![
            ScoredMatch {
                id: "chunk-1".into(),
                text: "t".into(),
                score: 0.9,
            },
            ScoredMatch {
                id: "chunk-7".into(),
                text: "u".into(),
                score: 0.8,
            },
        ];
        let merged = merge_matches(vec![a, b]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].id, "chunk-1");
        assert_eq!(merged[0].score, 0.4);
        assert_eq!(merged[1].id, "chunk-7");
    }

    /// Maps known strings to fixed vectors.
    struct TableEmbedder;

    #[async_trait]
    impl Embedder for TableEmbedder {
        async fn embed(&self, _model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| match t.as_str() {
                    "anchor" => vec![0.0, 0.0, 1.0],
                    _ => vec![1.0, 0.0, 0.0],
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn test_retrieve_includes_anchor_matches() {
        let records = vec![
            rec("chunk-1", vec![1.0, 0.1, 0.0]),
            rec("chunk-2", vec![0.9, 0.2, 0.0]),
            rec("chunk-3", vec![0.0, 0.0, 1.0]),
            rec("chunk-4", vec![0.8, 0.3, 0.0]),
        ];
        let index = LoadedIndex::new(IndexSnapshot {
            source: None,
            model: "m".into(),
            created_at: Utc::now(),
            count: records.len(),
            records,
        })
        .unwrap();
        let cfg = RetrievalConfig {
            top_k: 2,
            anchor_k: 1,
            anchor_queries: vec!["anchor".into()],
            max_section_chars: 6000,
        };

        let r = retrieve(&TableEmbedder, &index, "question", &cfg).await.unwrap();
        let ids: Vec<&str> = r.matches.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["chunk-1", "chunk-2", "chunk-3"]);
    }
}
