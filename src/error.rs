//! Unified error hierarchy for `noteindex`.
//!
//! - [`NoteIndexError`] — top-level error wrapping every component error.
//! - [`GraphError`](crate::hnsw::GraphError) — HNSW graph invariant violations.
//! - [`PersistenceError`](crate::persistence::PersistenceError) — snapshot
//!   (de)serialization and storage-backend failures.
//! - [`EmbeddingError`] — failures from the external embedding model.
//! - [`StoreError`] — failures from the row store.
//!
//! None of these abort the [`SyncOrchestrator`](crate::orchestrator::SyncOrchestrator):
//! every call site that can fail logs the error and falls back to a
//! documented disposition per error kind, surfacing only through return
//! values on the control surface.

use crate::hnsw::GraphError;
use crate::persistence::PersistenceError;
use crate::search_engine::SearchEngineError;
use thiserror::Error;

/// Errors raised by the external embedding model contract.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EmbeddingError {
    /// The model failed to produce a vector for one or more inputs.
    #[error("embedding request failed: {0}")]
    RequestFailed(String),

    /// The model returned a vector whose length did not match the declared
    /// dimension (`dim * texts.len()` for a batched call).
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected total length of the returned vector buffer.
        expected: usize,
        /// Actual length returned by the model.
        actual: usize,
    },
}

/// Errors raised by the row-store contract (`query`/`commit`/`subscribe`).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store rejected a query or commit.
    #[error("row store error: {0}")]
    Backend(String),

    /// A subscription could not be established or was dropped unexpectedly.
    #[error("subscription error: {0}")]
    Subscription(String),
}

/// Top-level error type for `noteindex`.
#[derive(Debug, Error)]
pub enum NoteIndexError {
    /// Graph algorithm and index errors.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Persistence and storage errors.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// Embedding model errors.
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    /// Row store errors.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Search engine errors (id mapping, rerank, fusion).
    #[error(transparent)]
    Search(#[from] SearchEngineError),

    /// Caller-provided argument was invalid (empty key, non-unit vector, etc).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
