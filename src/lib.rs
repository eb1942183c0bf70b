//! # Schema Atlas
//!
//! A hybrid retrieval and schema-graph resolution engine backing an
//! NL-to-SQL assistant. The engine serves the subset of a curated schema
//! knowledge graph (datasources, tables, columns, relationships, metrics,
//! synonyms, context rules, categorical values, and verified example
//! queries) that is relevant to a free-text question.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌───────────────┐   ┌───────────┐
//! │  Caller    │──▶│ SearchEngine  │──▶│  SQLite   │
//! │ (CLI/HTTP) │   │ RRF fusion    │   │ FTS5+Vec  │
//! └─────┬──────┘   └───────▲───────┘   └─────▲─────┘
//!       │                  │ fan-out         │
//!       ├──────▶ ContextResolver             │
//!       ├──────▶ graph::find_paths ──────────┤
//!       └──────▶ EmbeddingCache (write path) ┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! atlas init                               # create database
//! atlas seed                               # optional demo graph
//! atlas embed pending                      # backfill embeddings
//! atlas search table "sales transactions"  # hybrid search
//! atlas paths orders customers --max-depth 3
//! atlas serve                              # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Knowledge-graph entity types |
//! | [`store`] | Storage trait + SQLite and in-memory backends |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`cache`] | Content-hash-gated embedding cache |
//! | [`search`] | Hybrid (RRF) search executor |
//! | [`graph`] | Table-relationship path finder |
//! | [`resolve`] | Scatter-gather context resolver |
//! | [`server`] | JSON HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod cache;
pub mod config;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod error;
pub mod graph;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod resolve;
pub mod search;
pub mod seed;
pub mod server;
pub mod store;
