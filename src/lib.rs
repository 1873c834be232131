//! # Policy Audit
//!
//! Reads medical policy PDFs and produces an HTML report of billing rules,
//! each with a SQL violation query against a `claims` table.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────────┐
//! │  PDFs    │──▶│ Chunker  │──▶│ Vector index │
//! │ data/    │   │ 2000/500 │   │ cosine, k=5  │
//! └──────────┘   └──────────┘   └──────┬───────┘
//!                                      │ PolicyRetrieval
//!                ┌─────────────────────▼──────────────┐
//!                │        Mission executor            │
//!                │  chat model ◀──▶ tools + guards    │
//!                └──────┬──────────────────────┬──────┘
//!                       │ IndustryValidation   │ FinalReportGenerator
//!                       ▼                      ▼
//!                ┌──────────────┐       ┌──────────────┐
//!                │ web search   │       │ HTML report  │
//!                └──────────────┘       └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Chunk and search-hit types |
//! | [`extract`] | PDF text extraction |
//! | [`chunk`] | Recursive character splitting |
//! | [`ingest`] | Directory scan to chunks |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Flat vector index and retriever |
//! | [`validator`] | Industry-standard web search |
//! | [`report`] | Rule records and HTML rendering |
//! | [`agent`] | Tool-calling mission |
//! | [`pipeline`] | End-to-end commands |
//! | [`logging`] | Per-run log file and console output |

pub mod agent;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod extract;
pub mod index;
pub mod ingest;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod report;
pub mod validator;
