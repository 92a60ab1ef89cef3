//! Thin async contract over the external embedding model.
//!
//! The model itself is out of scope for this crate; this module only
//! defines the seam `SearchEngine` calls through, plus a deterministic test
//! double used throughout the test suite.

use crate::error::EmbeddingError;
use async_trait::async_trait;

/// Producer of fixed-dimension embedding vectors for arbitrary text.
///
/// Implementations are not required to normalize their output;
/// `SearchEngine` L2-normalizes every vector it receives before use.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// The dimensionality of vectors this client produces.
    fn dimensions(&self) -> u32;

    /// True once the underlying model is loaded and ready to serve
    /// `embed` calls. `SearchEngine` does not queue calls while this is
    /// false; callers are expected to wait externally.
    fn ready(&self) -> bool;

    /// Embeds a single piece of text.
    ///
    /// # Errors
    ///
    /// Returns [`EmbeddingError::RequestFailed`] if the model call fails, or
    /// [`EmbeddingError::DimensionMismatch`] if it returns a vector whose
    /// length disagrees with [`EmbeddingClient::dimensions`].
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// A deterministic [`EmbeddingClient`] for tests: hashes the input text into
/// a fixed-dimension vector via a simple rolling function, so distinct
/// strings get distinct (not necessarily meaningful) embeddings and the
/// same string always embeds identically.
pub struct StaticEmbeddingClient {
    dimensions: u32,
    ready: bool,
}

impl StaticEmbeddingClient {
    /// Creates a ready test client producing `dimensions`-wide vectors.
    #[must_use]
    pub fn new(dimensions: u32) -> Self {
        Self {
            dimensions,
            ready: true,
        }
    }

    /// Creates a client that reports `ready() == false`, for boot-sequence
    /// tests.
    #[must_use]
    pub fn not_ready(dimensions: u32) -> Self {
        Self {
            dimensions,
            ready: false,
        }
    }
}

#[async_trait]
impl EmbeddingClient for StaticEmbeddingClient {
    fn dimensions(&self) -> u32 {
        self.dimensions
    }

    fn ready(&self) -> bool {
        self.ready
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let dim = self.dimensions as usize;
        let mut v = vec![0.0f32; dim];
        let mut state: u64 = 1_469_598_103_934_665_603;
        for byte in text.bytes() {
            state ^= u64::from(byte);
            state = state.wrapping_mul(1_099_511_628_211);
            let idx = (state as usize) % dim;
            v[idx] += ((state >> 32) as f32 / u32::MAX as f32) * 2.0 - 1.0;
        }
        if v.iter().all(|x| *x == 0.0) {
            v[0] = 1.0;
        }
        Ok(v)
    }
}
