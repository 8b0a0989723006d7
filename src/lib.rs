//! # docqa
//!
//! Question answering over uploaded documents with retrieval-augmented
//! generation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌────────────────────┐
//! │  Upload  │──▶│   Storage    │   │     Ingestion      │
//! │ CLI/HTTP │   │ local/object │──▶│ extract→chunk→embed│
//! └──────────┘   │    /dual     │   └─────────┬──────────┘
//!                └──────────────┘             ▼
//!                                    ┌────────────────┐
//! ┌──────────┐   ┌──────────────┐    │  Vector store  │
//! │   Ask    │──▶│ Answer engine│◀──▶│ (per-document  │
//! │ CLI/HTTP │   │ search→chat  │    │  collections)  │
//! └──────────┘   └──────────────┘    └────────────────┘
//! ```
//!
//! Backend-agnostic logic (chunking, ranking, context assembly, traits)
//! lives in `docqa-core`; this crate provides the SQLite, HTTP and
//! filesystem backed implementations and wires them together in [`app`].
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] / [`migrate`] | SQLite connection and schema |
//! | [`documents`] | Document records and Q&A history |
//! | [`registry`] | Named embedding and chat models |
//! | [`embedding`] | Embedding providers and the batching client |
//! | [`chat`] | OpenAI-compatible chat completions |
//! | [`sqlite_store`] | SQLite vector store |
//! | [`storage`] | Local, object and dual document storage |
//! | [`extract`] | PDF, Word and plain text extraction |
//! | [`ingest`] | Ingestion pipeline and task tracking |
//! | [`answer`] | Retrieval-augmented answering |
//! | [`reconcile`] | Replication of degraded dual-mode uploads |
//! | [`server`] | HTTP API |

pub mod access;
pub mod answer;
pub mod app;
pub mod cache;
pub mod chat;
pub mod config;
pub mod db;
pub mod documents;
pub mod embedding;
pub mod extract;
pub mod ingest;
pub mod migrate;
pub mod reconcile;
pub mod registry;
pub mod retry;
pub mod server;
pub mod sqlite_store;
pub mod storage;
