//! A minimal in-memory [`Store`] test double shared by the end-to-end
//! scenario tests. Notes are "upserted" and "orphaned" directly by test
//! code; `commit` just records what the orchestrator reported back.

use async_trait::async_trait;
use noteindex::embedding::EmbeddingClient;
use noteindex::error::{EmbeddingError, StoreError};
use noteindex::store::{EmbeddingRow, RowEvent, Selector, Store, Subscription};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;

#[derive(Default)]
struct Inner {
    live: HashMap<String, EmbeddingRow>,
    orphaned: HashMap<String, EmbeddingRow>,
    requiring_senders: Vec<mpsc::UnboundedSender<()>>,
    orphaned_senders: Vec<mpsc::UnboundedSender<()>>,
    events: Vec<RowEvent>,
}

/// An in-process row store double. `upsert_row`/`orphan` mutate state and
/// fire whatever subscriptions are live; `query`/`commit`/`subscribe`
/// implement the real [`Store`] contract.
pub struct TestStore(Mutex<Inner>);

impl TestStore {
    #[must_use]
    pub fn new() -> Self {
        Self(Mutex::new(Inner::default()))
    }

    /// Inserts or replaces a live embedding row, notifying any
    /// `NotesRequiringEmbedding` subscribers.
    pub fn upsert_row(&self, row: EmbeddingRow) {
        let mut inner = self.0.lock().unwrap();
        inner.orphaned.remove(&row.key);
        inner.live.insert(row.key.clone(), row);
        inner.requiring_senders.retain(|tx| tx.send(()).is_ok());
    }

    /// Moves a previously-live row to the orphaned set, notifying any
    /// `OrphanedEmbeddings` subscribers. No-op if the key isn't live.
    pub fn orphan(&self, key: &str) {
        let mut inner = self.0.lock().unwrap();
        if let Some(row) = inner.live.remove(key) {
            inner.orphaned.insert(key.to_string(), row);
        }
        inner.orphaned_senders.retain(|tx| tx.send(()).is_ok());
    }

    /// Returns every event committed back by the orchestrator so far.
    pub fn committed_events(&self) -> Vec<RowEvent> {
        self.0.lock().unwrap().events.clone()
    }
}

impl Default for TestStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for TestStore {
    async fn query(&self, selector: Selector) -> Result<Vec<EmbeddingRow>, StoreError> {
        let inner = self.0.lock().unwrap();
        Ok(match selector {
            Selector::NotesRequiringEmbedding => inner.live.values().cloned().collect(),
            Selector::OrphanedEmbeddings => inner.orphaned.values().cloned().collect(),
        })
    }

    async fn commit(&self, event: RowEvent) -> Result<(), StoreError> {
        self.0.lock().unwrap().events.push(event);
        Ok(())
    }

    async fn subscribe(&self, selector: Selector) -> Result<Subscription, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.0.lock().unwrap();
        match selector {
            Selector::NotesRequiringEmbedding => inner.requiring_senders.push(tx),
            Selector::OrphanedEmbeddings => inner.orphaned_senders.push(tx),
        }
        Ok(Subscription::new(rx))
    }
}

/// Builds an [`EmbeddingRow`] from a plain `f32` vector, little-endian
/// encoding it the way a real adapter would.
#[must_use]
pub fn row(key: &str, title: &str, vector: &[f32], updated_at: &str) -> EmbeddingRow {
    let mut vec_bytes = Vec::with_capacity(vector.len() * 4);
    for f in vector {
        vec_bytes.extend_from_slice(&f.to_le_bytes());
    }
    EmbeddingRow {
        key: key.to_string(),
        title: title.to_string(),
        content: format!("content for {title}"),
        vec_bytes,
        vec_dim: vector.len() as u32,
        model: "test-model".to_string(),
        updated_at: updated_at.to_string(),
    }
}

/// An [`EmbeddingClient`] for scenario tests that need to drive a search
/// with an exact, known query vector: the query text is a comma-separated
/// list of floats (e.g. `"1,0,0,0"`), parsed back out verbatim rather than
/// hashed. `SearchEngine` prepends its query prefix before calling
/// `embed`, so parsing takes the substring after the final `:`.
pub struct LiteralVectorEmbeddingClient {
    dimensions: u32,
}

impl LiteralVectorEmbeddingClient {
    #[must_use]
    pub fn new(dimensions: u32) -> Self {
        Self { dimensions }
    }
}

#[async_trait]
impl EmbeddingClient for LiteralVectorEmbeddingClient {
    fn dimensions(&self) -> u32 {
        self.dimensions
    }

    fn ready(&self) -> bool {
        true
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let numeric = text.rsplit(':').next().unwrap_or(text).trim();
        let values: Result<Vec<f32>, _> = numeric
            .split(',')
            .map(|s| s.trim().parse::<f32>())
            .collect();
        let values = values.map_err(|e| EmbeddingError::RequestFailed(e.to_string()))?;
        if values.len() as u32 != self.dimensions {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimensions as usize,
                actual: values.len(),
            });
        }
        Ok(values)
    }
}

/// Formats a query vector the way [`LiteralVectorEmbeddingClient`] expects
/// to parse it back.
#[must_use]
pub fn query_text(vector: &[f32]) -> String {
    vector
        .iter()
        .map(std::string::ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
