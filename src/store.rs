//! The row-store contract: `query`/`commit`/`subscribe` over an opaque
//! event-sourced database, and the two reactive selectors the orchestrator
//! depends on.
//!
//! The store backend, the document chunker, and the rich-text block model
//! are all out of scope for this crate; this module defines only the seam
//! the orchestrator consumes, plus a concrete [`EmbeddingRow`] record at the
//! ingress boundary rather than propagating a schemaless shape inward.

use async_trait::async_trait;
use tokio::sync::mpsc;

/// A single embedding row as it crosses the store boundary.
///
/// `vec_bytes` is little-endian float32 in row-major order, length
/// `4 * vec_dim`; [`EmbeddingRow::decode_vector`] does the conversion.
#[derive(Clone, Debug, PartialEq)]
pub struct EmbeddingRow {
    /// Opaque external key (`noteId`, or `parentId:chunkIndex` for a chunk).
    pub key: String,
    /// Note title, carried through for display metadata.
    pub title: String,
    /// Short content preview, carried through for display metadata.
    pub content: String,
    /// Little-endian float32 vector bytes, row-major, length `4 * vec_dim`.
    pub vec_bytes: Vec<u8>,
    /// Declared dimensionality of `vec_bytes`.
    pub vec_dim: u32,
    /// Identifier of the model that produced this embedding.
    pub model: String,
    /// ISO-8601 timestamp of the row's last update.
    pub updated_at: String,
}

/// Error returned when an [`EmbeddingRow`]'s `vec_bytes` cannot be decoded
/// against its declared `vec_dim`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("malformed embedding row {key}: vec_bytes length {actual} does not match vec_dim {expected} ({expected4} bytes expected)", expected4 = expected * 4)]
pub struct MalformedRow {
    /// The row's key, for the logged warning at the ingress adapter.
    pub key: String,
    /// Declared dimensionality.
    pub expected: usize,
    /// Actual byte length found.
    pub actual: usize,
}

impl EmbeddingRow {
    /// Decodes `vec_bytes` into a `Vec<f32>`, validating the declared
    /// dimension against the byte length. Malformed rows are rejected here,
    /// at the ingress boundary, rather than propagated inward.
    pub fn decode_vector(&self) -> Result<Vec<f32>, MalformedRow> {
        let expected_bytes = self.vec_dim as usize * 4;
        if self.vec_bytes.len() != expected_bytes {
            return Err(MalformedRow {
                key: self.key.clone(),
                expected: self.vec_dim as usize,
                actual: self.vec_bytes.len(),
            });
        }
        Ok(self
            .vec_bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }
}

/// The two reactive selectors the orchestrator subscribes to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Selector {
    /// Rows whose `updatedAt` is newer than their embedding's, or which
    /// have no embedding yet.
    NotesRequiringEmbedding,
    /// Embedding rows whose owning note no longer exists.
    OrphanedEmbeddings,
}

/// Events committed by the core, reported via [`Store::commit`].
#[derive(Clone, Debug, PartialEq)]
pub enum RowEvent {
    /// A note's embedding was created or updated.
    EmbeddingUpserted {
        /// External key.
        key: String,
        /// Note title.
        title: String,
        /// Note content.
        content: String,
        /// Little-endian float32 vector bytes.
        vec_bytes: Vec<u8>,
        /// Declared vector dimensionality.
        vec_dim: u32,
        /// Embedding model identifier.
        model: String,
        /// ISO-8601 timestamp.
        ts: String,
    },
    /// An embedding was removed.
    EmbeddingRemoved {
        /// External key.
        key: String,
    },
    /// A snapshot was written to durable storage.
    SnapshotCreated {
        /// Blob file name.
        file_name: String,
        /// SHA-256 checksum prefix.
        checksum: String,
        /// Payload size in bytes.
        size: usize,
        /// Node count at snapshot time.
        node_count: usize,
        /// Embedding model identifier, for cross-model rebuild detection.
        model: String,
        /// ISO-8601 timestamp.
        ts: String,
    },
    /// The index was cleared, e.g. by `forceFullRebuild`.
    IndexCleared {
        /// ISO-8601 timestamp.
        ts: String,
        /// Human-readable reason.
        reason: String,
    },
}

/// A live subscription handle. Dropping it, or calling
/// [`Subscription::unsubscribe`] explicitly, ends notifications.
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<()>,
}

impl Subscription {
    /// Wraps a receiving half into a `Subscription`. `Store` implementations
    /// construct their subscriptions this way; the channel's sending half is
    /// whatever the implementation uses internally to signal changes.
    #[must_use]
    pub fn new(receiver: mpsc::UnboundedReceiver<()>) -> Self {
        Self { receiver }
    }

    /// Waits for the next change notification. Returns `None` once the
    /// store has dropped its sender, e.g. on shutdown.
    pub async fn changed(&mut self) -> Option<()> {
        self.receiver.recv().await
    }
}

/// The opaque event-sourced row store the engine treats as an external
/// collaborator with a fixed contract.
#[async_trait]
pub trait Store: Send + Sync {
    /// Runs `selector` against the current row set.
    async fn query(&self, selector: Selector) -> Result<Vec<EmbeddingRow>, crate::error::StoreError>;

    /// Commits an event to the store's event log.
    async fn commit(&self, event: RowEvent) -> Result<(), crate::error::StoreError>;

    /// Subscribes to change notifications for `selector`. The returned
    /// [`Subscription`] fires once per batch of underlying changes; callers
    /// re-run [`Store::query`] to get the current row set rather than
    /// receiving deltas over the channel.
    async fn subscribe(&self, selector: Selector) -> Result<Subscription, crate::error::StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row(key: &str, vec: &[f32]) -> EmbeddingRow {
        let mut vec_bytes = Vec::with_capacity(vec.len() * 4);
        for f in vec {
            vec_bytes.extend_from_slice(&f.to_le_bytes());
        }
        EmbeddingRow {
            key: key.to_string(),
            title: String::new(),
            content: String::new(),
            vec_bytes,
            vec_dim: vec.len() as u32,
            model: "test-model".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn decode_vector_round_trips() {
        let row = sample_row("a", &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(row.decode_vector().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn decode_vector_rejects_length_mismatch() {
        let mut row = sample_row("a", &[1.0, 2.0, 3.0, 4.0]);
        row.vec_dim = 8;
        let err = row.decode_vector().unwrap_err();
        assert_eq!(err.expected, 8);
        assert_eq!(err.actual, 16);
    }
}
