//! # Knowledge Assistant
//!
//! Retrieval-augmented question answering over a private document
//! collection.
//!
//! Documents are loaded from a directory, split into overlapping chunks,
//! embedded, and stored in a persistent vector index. Questions are answered
//! by retrieving a diversified set of relevant chunks and handing them, with
//! the question, to a generation backend that is instructed to answer only
//! from that context.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌──────────────┐
//! │  Loader  │──▶│ Chunk+Embed │──▶│ Vector index │
//! │ txt/pdf… │   │             │   │  (JSON file) │
//! └──────────┘   └─────────────┘   └──────┬───────┘
//!                                         │
//!                    ┌────────────────────┤
//!                    ▼                    ▼
//!             ┌──────────────┐     ┌────────────┐
//!             │  Lifecycle   │────▶│ Retriever  │──▶ Generation backend
//!             │  (warm-up)   │     │   (MMR)    │
//!             └──────────────┘     └────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`extract`] | Text extraction from PDF and DOCX |
//! | [`loader`] | Documents directory walker |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`mmr`] | Diversity re-ranking |
//! | [`index`] | Persistent vector index |
//! | [`ingest`] | Ingestion pipeline |
//! | [`retriever`] | Query-time retrieval |
//! | [`prompt`] | Prompt text and context formatting |
//! | [`generation`] | Generation backends |
//! | [`pipeline`] | Retrieve → context → generate |
//! | [`lifecycle`] | Shared pipeline instance with background warm-up |
//! | [`assistant`] | Composition root used by the CLI and server |
//! | [`server`] | HTTP server |
//! | [`ask`] | `ka ask` command |
//! | [`search`] | `ka search` command |

pub mod ask;
pub mod assistant;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generation;
pub mod index;
pub mod ingest;
pub mod lifecycle;
pub mod loader;
pub mod mmr;
pub mod models;
pub mod pipeline;
pub mod prompt;
pub mod retriever;
pub mod search;
pub mod server;
