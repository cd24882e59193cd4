//! # kbforge
//!
//! A knowledge-base ingestion and vector retrieval backend.
//!
//! kbforge registers a folder of documents as a knowledge base, scans and
//! chunks its content, generates embeddings against an Ollama-style model
//! service, and indexes the vectors in a custom on-disk flat index that
//! answers similarity queries with metadata filtering.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌─────────────┐   ┌─────────────┐
//! │ Validate  │──▶│ Scan+Extract │──▶│   Chunker   │──▶│  Embedding  │
//! │  + deny   │   │  (fs walk)   │   │ (boundary-  │   │  (HTTP,     │
//! │   list    │   │              │   │   aware)    │   │   batched)  │
//! └───────────┘   └──────────────┘   └─────────────┘   └──────┬──────┘
//!                                                             │
//!                       ┌─────────────────────────────────────┤
//!                       ▼                                     ▼
//!                 ┌───────────┐                       ┌──────────────┐
//!                 │  SQLite   │                       │ Vector index │
//!                 │   sink    │                       │ (flat, disk) │
//!                 └───────────┘                       └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kbf init                          # create database and index
//! kbf ingest docs ./my-documents    # scan, chunk, embed, store
//! kbf search "deployment steps"     # similarity search
//! kbf stats                         # what's indexed
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Typed error taxonomy |
//! | [`models`] | Core data types |
//! | [`validate`] | Scan-root path validation |
//! | [`scanner`] | Recursive directory scanning |
//! | [`extract`] | Text decoding and document extraction |
//! | [`chunker`] | Boundary-aware text chunking |
//! | [`embedding`] | Embedding service client |
//! | [`index`] | Vector index trait + flat implementation |
//! | [`sink`] | Chunk-record persistence sink |
//! | [`orchestrator`] | End-to-end ingestion runs |
//! | [`progress`] | Progress reporting |
//! | [`search`] / [`stats`] | CLI query and statistics commands |
//! | [`db`] / [`migrate`] | SQLite connection and schema |

pub mod chunker;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod migrate;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod scanner;
pub mod search;
pub mod sink;
pub mod stats;
pub mod validate;

pub use error::{Error, Result};
