//! The composition root: every component's lifecycle is owned by a single
//! [`NoteIndexHandle`] built by [`NoteIndexBuilder`], with the row store and
//! embedding client injected at construction time rather than via a late
//! setter, instead of module-level singletons.

use crate::config::NoteIndexConfig;
use crate::embedding::EmbeddingClient;
use crate::error::NoteIndexError;
use crate::graph_store::{FileGraphStore, GraphStore, MemoryGraphStore};
use crate::orchestrator::{OrchestratorStatus, SyncOrchestrator};
use crate::search_engine::EngineSearchResult;
use crate::store::Store;
use std::path::PathBuf;
use std::sync::Arc;

/// Builds a [`NoteIndexHandle`] from a row store, an embedding client, and
/// configuration.
pub struct NoteIndexBuilder {
    config: NoteIndexConfig,
    graph_store: Option<Arc<dyn GraphStore>>,
}

impl NoteIndexBuilder {
    /// Starts a builder with the given configuration.
    #[must_use]
    pub fn new(config: NoteIndexConfig) -> Self {
        Self {
            config,
            graph_store: None,
        }
    }

    /// Persists snapshots to a directory on the local filesystem.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be created.
    pub fn with_filesystem_store(mut self, root: impl Into<PathBuf>) -> std::io::Result<Self> {
        self.graph_store = Some(Arc::new(FileGraphStore::open(root)?));
        Ok(self)
    }

    /// Persists snapshots in memory only (no durability across process
    /// restarts). Useful for tests and ephemeral indices.
    #[must_use]
    pub fn with_memory_store(mut self) -> Self {
        self.graph_store = Some(Arc::new(MemoryGraphStore::new()));
        self
    }

    /// Uses a caller-supplied [`GraphStore`] implementation.
    #[must_use]
    pub fn with_graph_store(mut self, store: Arc<dyn GraphStore>) -> Self {
        self.graph_store = Some(store);
        self
    }

    /// Constructs the orchestrator and all the components it owns, then
    /// runs the boot protocol and subscribes to the row store. The
    /// returned handle is the only thing the host needs to keep alive.
    ///
    /// # Errors
    ///
    /// Propagates any error from boot (cold-boot row query failures,
    /// snapshot load errors other than absence/corruption).
    pub async fn build(
        self,
        store: Arc<dyn Store>,
        embedding: Arc<dyn EmbeddingClient>,
    ) -> Result<NoteIndexHandle, NoteIndexError> {
        let graph_store = self
            .graph_store
            .unwrap_or_else(|| Arc::new(MemoryGraphStore::new()));

        let orchestrator = Arc::new(SyncOrchestrator::new(
            store,
            graph_store,
            embedding,
            self.config.dimensions,
            self.config.orchestrator_config(),
        )?);
        orchestrator.initialize().await?;

        Ok(NoteIndexHandle { orchestrator })
    }
}

/// The single owned handle a host process holds. Wraps the orchestrator,
/// which in turn owns the search engine; there is no other way to reach
/// either.
pub struct NoteIndexHandle {
    orchestrator: Arc<SyncOrchestrator>,
}

impl NoteIndexHandle {
    /// Embeds `query` and returns the top-`k` ranked hits.
    ///
    /// # Errors
    ///
    /// Propagates embedding, graph, or search-engine errors.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<EngineSearchResult>, NoteIndexError> {
        self.orchestrator.search(query, k).await
    }

    /// Forces an immediate reconciliation pass.
    ///
    /// # Errors
    ///
    /// Propagates row-store or graph errors encountered during the pass.
    pub async fn force_sync(&self) -> Result<(), NoteIndexError> {
        self.orchestrator.force_sync().await
    }

    /// Forces an immediate snapshot.
    ///
    /// # Errors
    ///
    /// Propagates persistence errors (already rolled back internally).
    pub async fn force_snapshot(&self) -> Result<(), NoteIndexError> {
        self.orchestrator.force_snapshot().await
    }

    /// Clears the index and rebuilds it from scratch, then snapshots.
    ///
    /// # Errors
    ///
    /// Propagates row-store or persistence errors.
    pub async fn force_full_rebuild(&self) -> Result<(), NoteIndexError> {
        self.orchestrator.force_full_rebuild().await
    }

    /// Returns the orchestrator's current status.
    pub async fn get_status(&self) -> OrchestratorStatus {
        self.orchestrator.get_status().await
    }

    /// Cooperatively shuts the index down. No final snapshot is taken.
    pub async fn shutdown(&self) {
        self.orchestrator.shutdown().await;
    }
}
