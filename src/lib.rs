//! # Admitting RAG
//!
//! Retrieval-augmented question answering over a hospital's admitting
//! guidelines. Answers cite the guideline passages they rely on, and every
//! citation resolves to the full guideline section it came from.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌─────────────┐   ┌────────────────┐
//! │  Markdown  │──▶│ Chunk+Embed │──▶│ embeddings.json│
//! │ (+TSV dir) │   │  (ingest)   │   │   (snapshot)   │
//! └────────────┘   └─────────────┘   └───────┬────────┘
//!                                            │ load once, reload on demand
//!                                            ▼
//!   question ──▶ retrieve (+anchors) ──▶ sections ──▶ model ──▶ answer
//!                                            │                   │
//!                                            ▼                   ▼
//!                                    sources cache ◀── X-Sources-Id token
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! admit ingest                           # build data/embeddings.json
//! admit search "chest pain with troponin"
//! admit serve                            # HTTP API on [server].bind
//! admit ask "Who admits cellulitis?"     # stream an answer from the server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`chunk`] | Heading-aware chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Snapshot loading and hot reload |
//! | [`search`] | Cosine top-k with anchor queries |
//! | [`sections`] | Section reconstruction for display sources |
//! | [`citations`] | `[Source N]` renumbering |
//! | [`stream`] | Streamed answer assembly |
//! | [`cache`] | Short-lived sources cache |
//! | [`chat`] | Chat model client |
//! | [`rag`] | Retrieval-augmented request preparation |
//! | [`querylog`] | Query, ambiguity and feedback logs |
//! | [`ingest`] | Corpus → snapshot pipeline |
//! | [`server`] | HTTP API |
//! | [`client`] | Terminal client for the HTTP API |

pub mod cache;
pub mod chat;
pub mod chunk;
pub mod citations;
pub mod client;
pub mod config;
pub mod embedding;
pub mod error;
pub mod index;
pub mod ingest;
pub mod models;
pub mod querylog;
pub mod rag;
pub mod search;
pub mod sections;
pub mod server;
pub mod stream;
