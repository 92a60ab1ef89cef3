//! # noteindex
//!
//! A persistent, incrementally-synchronized approximate nearest-neighbor
//! vector index over an event-sourced row store, built around a
//! Hierarchical Navigable Small World (HNSW) graph.
//!
//! Three pieces do the hard work:
//!
//! - [`hnsw`] — the multi-layer proximity graph: insert, search, serialize.
//! - [`orchestrator`] — a state machine that keeps the graph synchronized
//!   with the authoritative row store and manages snapshots.
//! - [`search_engine`] — id mapping, tombstones, adaptive search, rerank,
//!   fusion, and caches.
//!
//! [`builder::NoteIndexBuilder`] is the composition root: it owns the row
//! store, embedding client, search engine, and orchestrator lifecycles.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use noteindex::builder::NoteIndexBuilder;
//! use noteindex::config::NoteIndexConfig;
//! use noteindex::embedding::StaticEmbeddingClient;
//!
//! # async fn run(store: Arc<dyn noteindex::store::Store>) -> Result<(), noteindex::error::NoteIndexError> {
//! let embedding = Arc::new(StaticEmbeddingClient::new(768));
//! let handle = NoteIndexBuilder::new(NoteIndexConfig::new(768))
//!     .with_memory_store()
//!     .build(store, embedding)
//!     .await?;
//!
//! let hits = handle.search("what did I write about onboarding?", 10).await?;
//! assert!(hits.len() <= 10);
//! # Ok(())
//! # }
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Top-level level, `serde`-(de)serializable configuration.
pub mod config;

/// Vector primitives: normalization, dot/cosine, priority-queue helpers.
pub mod vector_ops;

/// The HNSW proximity graph: configuration, node storage, search, insert.
pub mod hnsw;

/// Blob-addressed snapshot storage backend.
pub mod graph_store;

/// Versioned JSON snapshot serialization, checksum, and GC.
pub mod persistence;

/// Thin async contract over the external embedding model.
pub mod embedding;

/// Id mapping, tombstones, adaptive search, rerank, fusion, caches.
pub mod search_engine;

/// The row-store contract and wire types.
pub mod store;

/// The sync orchestrator state machine.
pub mod orchestrator;

/// The composition root: [`builder::NoteIndexBuilder`] and
/// [`builder::NoteIndexHandle`].
pub mod builder;

/// Unified error hierarchy.
pub mod error;

pub use builder::{NoteIndexBuilder, NoteIndexHandle};
pub use config::NoteIndexConfig;
pub use error::NoteIndexError;
pub use search_engine::EngineSearchResult;

/// The crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
