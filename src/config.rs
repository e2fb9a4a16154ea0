//! TOML configuration.
//!
//! Every section has defaults, so a config file only needs the values that
//! differ from them. Credentials are never read from the file; the OpenAI
//! key comes from `OPENAI_API_KEY`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logs: LogsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Snapshot JSON written by `admit ingest` and loaded by the server.
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from("./data/embeddings.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    /// Normalized markdown rendition of the guidelines document.
    #[serde(default = "default_markdown_path")]
    pub markdown_path: PathBuf,
    /// Optional TSV export appended to the corpus as a phone directory.
    #[serde(default)]
    pub directory_tsv_url: Option<String>,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            markdown_path: default_markdown_path(),
            directory_tsv_url: None,
        }
    }
}

fn default_markdown_path() -> PathBuf {
    PathBuf::from("./docs/admitting_guidelines.md")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Character budget per chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Characters shared by consecutive sliding windows.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1200
}
fn default_chunk_overlap() -> usize {
    150
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_anchor_k")]
    pub anchor_k: usize,
    /// Policy queries embedded next to every user query.
    #[serde(default = "default_anchor_queries")]
    pub anchor_queries: Vec<String>,
    #[serde(default = "default_max_section_chars")]
    pub max_section_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            anchor_k: default_anchor_k(),
            anchor_queries: default_anchor_queries(),
            max_section_chars: default_max_section_chars(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_anchor_k() -> usize {
    2
}
fn default_anchor_queries() -> Vec<String> {
    vec![
        "Medical Comorbidities list of diagnoses admitted to medicine regardless of primary admitting diagnosis"
            .to_string(),
    ]
}
fn default_max_section_chars() -> usize {
    6000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model used when building a snapshot. Queries always use the
    /// snapshot's own model id.
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            api_base: default_api_base(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-large".to_string()
}
fn default_batch_size() -> usize {
    96
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_chat_model")]
    pub model: String,
    /// Overrides the built-in system prompt when set.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Number of trailing conversation messages forwarded to the model.
    #[serde(default = "default_history_messages")]
    pub history_messages: usize,
    /// Sentence the model must emit when the guidelines are silent.
    #[serde(default = "default_ambiguity_marker")]
    pub ambiguity_marker: String,
    #[serde(default = "default_chat_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: default_chat_model(),
            system_prompt: None,
            history_messages: default_history_messages(),
            ambiguity_marker: default_ambiguity_marker(),
            timeout_secs: default_chat_timeout_secs(),
            api_base: default_api_base(),
        }
    }
}

fn default_chat_model() -> String {
    "gpt-5".to_string()
}
fn default_history_messages() -> usize {
    6
}
fn default_ambiguity_marker() -> String {
    "The guidelines do not provide a clear answer.".to_string()
}
fn default_chat_timeout_secs() -> u64 {
    180
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_sources_ttl_secs")]
    pub sources_ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Directory of static chat UI assets served at `/`.
    #[serde(default)]
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            sources_ttl_secs: default_sources_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            static_dir: None,
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}
fn default_sources_ttl_secs() -> u64 {
    600
}
fn default_sweep_interval_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogsConfig {
    /// Directory for `queries.jsonl`, `ambiguous.jsonl` and `feedback.jsonl`.
    #[serde(default = "default_logs_dir")]
    pub dir: PathBuf,
    /// Default tracing filter when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            dir: default_logs_dir(),
            level: default_level(),
        }
    }
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("./data/logs")
}
fn default_level() -> String {
    "info".to_string()
}

impl Config {
    /// All-defaults configuration, used when no config file exists.
    pub fn minimal() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            anyhow::bail!("chunking.chunk_size must be > 0");
        }
        if self.retrieval.top_k == 0 {
            anyhow::bail!("retrieval.top_k must be >= 1");
        }
        if self.retrieval.max_section_chars < self.chunking.chunk_size {
            anyhow::bail!(
                "retrieval.max_section_chars ({}) must be >= chunking.chunk_size ({})",
                self.retrieval.max_section_chars,
                self.chunking.chunk_size
            );
        }
        if self.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be > 0");
        }
        if self.server.sources_ttl_secs == 0 {
            anyhow::bail!("server.sources_ttl_secs must be > 0");
        }
        if self.server.sweep_interval_secs == 0 {
            anyhow::bail!("server.sweep_interval_secs must be > 0");
        }

        match self.embedding.provider.as_str() {
            "disabled" | "openai" => {}
            other => anyhow::bail!(
                "Unknown embedding provider: '{}'. Must be disabled or openai.",
                other
            ),
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg.chunking.chunk_size, 1200);
        assert_eq!(cfg.chunking.chunk_overlap, 150);
        assert_eq!(cfg.retrieval.top_k, 5);
        assert_eq!(cfg.retrieval.anchor_k, 2);
        assert_eq!(cfg.retrieval.anchor_queries.len(), 1);
        assert_eq!(cfg.server.sources_ttl_secs, 600);
        assert_eq!(cfg.chat.history_messages, 6);
    }

    #[test]
    fn test_partial_override() {
        let cfg = parse_config(
            r#"
[retrieval]
top_k = 8
anchor_queries = []

[server]
bind = "0.0.0.0:8080"
"#,
        )
        .unwrap();
        assert_eq!(cfg.retrieval.top_k, 8);
        assert!(cfg.retrieval.anchor_queries.is_empty());
        assert_eq!(cfg.retrieval.max_section_chars, 6000);
        assert_eq!(cfg.server.bind, "0.0.0.0:8080");
    }

    #[test]
    fn test_rejects_zero_chunk_size() {
        let err = parse_config("[chunking]\nchunk_size = 0\n").unwrap_err();
        assert!(err.to_string().contains("chunk_size"));
    }

    #[test]
    fn test_rejects_zero_top_k() {
        assert!(parse_config("[retrieval]\ntop_k = 0\n").is_err());
    }

    #[test]
    fn test_rejects_section_smaller_than_chunk() {
        let err = parse_config("[retrieval]\nmax_section_chars = 100\n").unwrap_err();
        assert!(err.to_string().contains("max_section_chars"));
    }

    #[test]
    fn test_example_config_parses() {
        let cfg = parse_config(include_str!("../config/admit.example.toml")).unwrap();
        assert_eq!(cfg.embedding.model, "text-embedding-3-large");
        assert!(cfg.corpus.directory_tsv_url.is_none());
        assert!(cfg.server.static_dir.is_none());
    }

    #[test]
    fn test_rejects_unknown_provider() {
        assert!(parse_config("[embedding]\nprovider = \"carrier-pigeon\"\n").is_err());
    }
}
