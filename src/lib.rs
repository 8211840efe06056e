//! # Docent
//!
//! Retrieval-augmented question answering over uploaded documents.
//!
//! Docent parses an uploaded file (plain text, PDF, DOCX), splits it into
//! overlapping chunks, embeds them into an in-memory vector index, and answers
//! questions by retrieving the most similar chunks and handing them to a
//! completion provider together with recent conversation history.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌──────────────┐
//! │  Upload  │──▶│  Extract +  │──▶│ Vector index │
//! │ txt/pdf/ │   │ Chunk+Embed │   │  (Arc swap)  │
//! │   docx   │   └─────────────┘   └──────┬───────┘
//! └──────────┘                            │ top-k
//!                                         ▼
//! ┌──────────┐   ┌─────────────┐   ┌──────────────┐
//! │   Chat   │──▶│ Rate limit, │──▶│   Prompt +   │
//! │ request  │   │  validate   │   │  completion  │
//! └──────────┘   └─────────────┘   └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`extract`] | Text, PDF, and DOCX parsing |
//! | [`chunk`] | Overlapping-window text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`completion`] | Prompt assembly and completion providers |
//! | [`index`] | In-memory vector index |
//! | [`history`] | Bounded conversation history |
//! | [`rate_limit`] | Sliding-window admission control |
//! | [`metrics`] | Request outcome aggregation |
//! | [`orchestrator`] | Chat and upload pipelines |
//! | [`server`] | HTTP API |
//! | [`error`] | Pipeline error taxonomy |

pub mod ask;
pub mod chunk;
pub mod chunk_cmd;
pub mod completion;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod history;
pub mod index;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod rate_limit;
pub mod server;
