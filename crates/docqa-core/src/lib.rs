//! # docqa core
//!
//! Runtime-agnostic logic for docqa: data models, the overlapping text
//! chunker, the vector store abstraction with an in-memory implementation,
//! retrieval ranking and context assembly, and the capability traits for
//! embedding, chat and document storage backends.
//!
//! This crate contains no tokio, sqlx, HTTP or filesystem I/O. Concrete
//! backends live in the `docqa` application crate.

pub mod chat;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod models;
pub mod retrieval;
pub mod storage;
pub mod store;

pub use error::{RagError, Result};
