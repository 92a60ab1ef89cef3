//! The sync orchestrator: warm/cold boot, debounced single-flight delta
//! reconciliation, and the latest+backup snapshot protocol.
//!
//! Structured as an explicit state machine (`Idle`, `Debouncing`,
//! `Reconciling`, `Snapshotting`, `Shutdown`), rather than nested callbacks
//! around module-level singletons. Cooperative cancellation follows the same
//! `CancellationToken` + `TaskTracker` shape used elsewhere in the ecosystem
//! for long-running task loops.

use crate::embedding::EmbeddingClient;
use crate::error::NoteIndexError;
use crate::graph_store::GraphStore;
use crate::persistence::{self, GraphSnapshot};
use crate::search_engine::{PointMeta, SearchEngine, SearchEngineConfig};
use crate::store::{EmbeddingRow, RowEvent, Selector, Store};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// The orchestrator's explicit lifecycle phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// No reconciliation or snapshot work in flight.
    Idle,
    /// Coalescing a burst of subscription ticks before reconciling.
    Debouncing,
    /// A delta reconciliation pass is running.
    Reconciling,
    /// A snapshot is being written.
    Snapshotting,
    /// Shutdown has been requested; no further work will be scheduled.
    Shutdown,
}

/// Tunables for [`SyncOrchestrator`].
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Delay before a batch of subscription ticks is reconciled. Default 1s.
    pub debounce: Duration,
    /// `pendingChangeCount` threshold that triggers a snapshot. Default 50.
    pub changes_threshold: u32,
    /// Period of the background snapshot timer. Default 5 minutes.
    pub snapshot_interval: Duration,
    /// Search engine tunables.
    pub search: SearchEngineConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(1),
            changes_threshold: 50,
            snapshot_interval: Duration::from_secs(5 * 60),
            search: SearchEngineConfig::default(),
        }
    }
}

/// Snapshot of the orchestrator's externally-visible status.
#[derive(Clone, Debug)]
pub struct OrchestratorStatus {
    /// Current lifecycle phase.
    pub phase: Phase,
    /// Number of embedding rows currently mirrored into the index.
    pub known_embedding_count: usize,
    /// Changes accumulated since the last successful snapshot.
    pub pending_change_count: u32,
    /// ISO-8601 timestamp of the last completed reconciliation pass, if any.
    pub last_processed_at: Option<String>,
}

struct State {
    phase: Phase,
    known_ext: HashSet<String>,
    known_hash: HashMap<String, String>,
    pending_change_count: u32,
    is_processing: bool,
    pending_deltas: bool,
    last_processed_at: Option<String>,
}

impl State {
    fn new() -> Self {
        Self {
            phase: Phase::Idle,
            known_ext: HashSet::new(),
            known_hash: HashMap::new(),
            pending_change_count: 0,
            is_processing: false,
            pending_deltas: false,
            last_processed_at: None,
        }
    }
}

/// Computes the content fingerprint used to detect whether a row's
/// embeddable content actually changed, as SHA-256 (truncated to 16 hex
/// chars) over the canonical concatenation `title\0content\0updatedAt\0model`.
/// A cryptographic hash avoids the collision risk of a weaker scheme like a
/// truncated base64 digest.
fn content_fingerprint(title: &str, content: &str, updated_at: &str, model: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(b"\0");
    hasher.update(content.as_bytes());
    hasher.update(b"\0");
    hasher.update(updated_at.as_bytes());
    hasher.update(b"\0");
    hasher.update(model.as_bytes());
    let digest = hasher.finalize();
    let mut s = String::with_capacity(16);
    for b in digest.iter() {
        if s.len() >= 16 {
            break;
        }
        s.push_str(&format!("{b:02x}"));
    }
    s.truncate(16);
    s
}

/// The sync orchestrator: owns the [`SearchEngine`] and reconciles it
/// against a [`Store`], persisting snapshots to a [`GraphStore`].
pub struct SyncOrchestrator {
    store: Arc<dyn Store>,
    graph_store: Arc<dyn GraphStore>,
    engine: Arc<Mutex<SearchEngine>>,
    state: Arc<Mutex<State>>,
    config: OrchestratorConfig,
    cancellation: CancellationToken,
    tasks: TaskTracker,
}

impl SyncOrchestrator {
    /// Constructs an orchestrator. No I/O happens until [`SyncOrchestrator::initialize`]
    /// is called; the row store is injected here, at construction, rather
    /// than via a late setter.
    pub fn new(
        store: Arc<dyn Store>,
        graph_store: Arc<dyn GraphStore>,
        embedding: Arc<dyn EmbeddingClient>,
        dimensions: u32,
        config: OrchestratorConfig,
    ) -> Result<Self, NoteIndexError> {
        let engine = SearchEngine::new(dimensions, config.search, embedding)?;
        Ok(Self {
            store,
            graph_store,
            engine: Arc::new(Mutex::new(engine)),
            state: Arc::new(Mutex::new(State::new())),
            config,
            cancellation: CancellationToken::new(),
            tasks: TaskTracker::new(),
        })
    }

    /// Runs the boot protocol, subscribes to the two reactive selectors,
    /// and starts the background debounce-reconcile loop and the periodic
    /// snapshot timer.
    pub async fn initialize(self: &Arc<Self>) -> Result<(), NoteIndexError> {
        self.boot().await?;

        let mut requiring = self.store.subscribe(Selector::NotesRequiringEmbedding).await?;
        let mut orphaned = self.store.subscribe(Selector::OrphanedEmbeddings).await?;

        let this = Arc::clone(self);
        self.tasks.spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = this.cancellation.cancelled() => break,
                    tick = requiring.changed() => {
                        if tick.is_none() { break; }
                        this.notify().await;
                    }
                    tick = orphaned.changed() => {
                        if tick.is_none() { break; }
                        this.notify().await;
                    }
                }
            }
        });

        let this = Arc::clone(self);
        let interval = self.config.snapshot_interval;
        self.tasks.spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = this.cancellation.cancelled() => break,
                    () = tokio::time::sleep(interval) => {
                        if let Err(e) = this.snapshot("timer").await {
                            log::warn!("periodic snapshot failed: {e}");
                        }
                    }
                }
            }
        });

        Ok(())
    }

    async fn boot(&self) -> Result<(), NoteIndexError> {
        match persistence::load_graph(self.graph_store.as_ref(), "latest") {
            Ok(Some(GraphSnapshot { graph, external_keys })) => {
                log::info!("warm boot: loaded {} nodes from latest snapshot", graph.len());
                let mut engine = self.engine.lock().await;
                *engine = SearchEngine::from_graph(
                    graph,
                    external_keys,
                    self.config.search,
                    engine.embedding_client(),
                );
                drop(engine);
                self.rebuild_known_ext_from_rows().await?;
                Ok(())
            }
            Ok(None) => {
                log::info!("no snapshot present, cold boot");
                self.cold_boot().await
            }
            Err(e) => {
                log::warn!("warm boot failed ({e}), falling back to cold boot");
                self.cold_boot().await
            }
        }
    }

    async fn rebuild_known_ext_from_rows(&self) -> Result<(), NoteIndexError> {
        let rows = self.store.query(Selector::NotesRequiringEmbedding).await?;
        let mut state = self.state.lock().await;
        for row in &rows {
            let fingerprint = content_fingerprint(&row.title, &row.content, &row.updated_at, &row.model);
            state.known_ext.insert(row.key.clone());
            state.known_hash.insert(row.key.clone(), fingerprint);
        }
        Ok(())
    }

    async fn cold_boot(&self) -> Result<(), NoteIndexError> {
        {
            let mut engine = self.engine.lock().await;
            engine.clear()?;
        }
        let mut state = self.state.lock().await;
        state.known_ext.clear();
        state.known_hash.clear();
        drop(state);

        let rows = self.store.query(Selector::NotesRequiringEmbedding).await?;
        for row in rows {
            self.upsert_row(&row).await?;
        }
        Ok(())
    }

    async fn upsert_row(&self, row: &EmbeddingRow) -> Result<(), NoteIndexError> {
        let vector = row
            .decode_vector()
            .map_err(|e| NoteIndexError::InvalidArgument(e.to_string()))?;
        {
            let mut engine = self.engine.lock().await;
            engine.add_point(
                &row.key,
                &vector,
                PointMeta {
                    title: row.title.clone(),
                    content_preview: row.content.chars().take(200).collect(),
                },
            )?;
        }
        let fingerprint = content_fingerprint(&row.title, &row.content, &row.updated_at, &row.model);
        let mut state = self.state.lock().await;
        state.known_ext.insert(row.key.clone());
        state.known_hash.insert(row.key.clone(), fingerprint);
        Ok(())
    }

    /// A subscription tick fired. If a reconciliation is already running,
    /// records that another pass is needed and returns (single-flight).
    /// Otherwise debounces, then reconciles.
    async fn notify(&self) {
        {
            let mut state = self.state.lock().await;
            if state.is_processing {
                state.pending_deltas = true;
                return;
            }
            state.is_processing = true;
            state.phase = Phase::Debouncing;
        }

        tokio::time::sleep(self.config.debounce).await;

        loop {
            {
                let mut state = self.state.lock().await;
                state.phase = Phase::Reconciling;
            }
            if let Err(e) = self.reconcile().await {
                log::warn!("reconciliation pass failed: {e}");
            }

            let mut state = self.state.lock().await;
            if state.pending_deltas {
                state.pending_deltas = false;
                state.phase = Phase::Debouncing;
                drop(state);
                tokio::time::sleep(self.config.debounce).await;
                continue;
            }
            state.is_processing = false;
            state.phase = Phase::Idle;
            break;
        }
    }

    /// Runs one reconciliation pass: upserts before removals, so a replaced
    /// vector under the same key is never briefly absent.
    async fn reconcile(&self) -> Result<(), NoteIndexError> {
        let rows = self.store.query(Selector::NotesRequiringEmbedding).await?;
        let orphaned = self.store.query(Selector::OrphanedEmbeddings).await?;

        let mut changed = 0u32;
        for row in &rows {
            let fingerprint = content_fingerprint(&row.title, &row.content, &row.updated_at, &row.model);
            let should_upsert = {
                let state = self.state.lock().await;
                !state.known_ext.contains(&row.key) || state.known_hash.get(&row.key) != Some(&fingerprint)
            };
            if should_upsert {
                self.upsert_row(row).await?;
                changed += 1;
            }
        }

        for row in &orphaned {
            let was_known = {
                let state = self.state.lock().await;
                state.known_ext.contains(&row.key)
            };
            if was_known {
                {
                    let mut engine = self.engine.lock().await;
                    engine.remove_point(&row.key);
                }
                let mut state = self.state.lock().await;
                state.known_ext.remove(&row.key);
                state.known_hash.remove(&row.key);
                changed += 1;
            }
        }

        let mut state = self.state.lock().await;
        state.pending_change_count += changed;
        state.last_processed_at = Some(now_iso8601());
        let threshold_hit = state.pending_change_count >= self.config.changes_threshold;
        drop(state);

        if threshold_hit {
            self.snapshot("threshold").await?;
        }

        Ok(())
    }

    /// Runs the latest+backup snapshot protocol. Skips if the engine has no
    /// live points. On failure, rolls back `latest` from `backup` and does
    /// not reset `pendingChangeCount`.
    async fn snapshot(&self, reason: &str) -> Result<(), NoteIndexError> {
        {
            let mut state = self.state.lock().await;
            state.phase = Phase::Snapshotting;
        }

        // Held across the entire rename -> persist -> rollback-on-failure
        // sequence (O3): this is the same lock `add_point`/`remove_point`
        // take, so a snapshot never interleaves with a mutator step, and two
        // concurrently-triggered snapshots (periodic timer, threshold
        // reconciliation, manual) serialize on it instead of racing each
        // other's latest/backup renames.
        let engine = self.engine.lock().await;
        if engine.live_count() == 0 {
            drop(engine);
            let mut state = self.state.lock().await;
            state.phase = Phase::Idle;
            return Ok(());
        }
        let graph = engine.graph().clone();
        let external_keys = engine.external_keys();
        let node_count = engine.graph().len();

        persistence::rename_file(self.graph_store.as_ref(), "latest", "backup")?;

        let created_at = now_iso8601();
        let (checksum, size) = match persistence::persist_graph(
            self.graph_store.as_ref(),
            &graph,
            &external_keys,
            "latest",
            &created_at,
        ) {
            Ok(result) => result,
            Err(e) => {
                log::warn!("snapshot persist failed ({e}), rolling back from backup");
                let rollback = persistence::rename_file(self.graph_store.as_ref(), "backup", "latest");
                drop(engine);
                let mut state = self.state.lock().await;
                state.phase = Phase::Idle;
                drop(state);
                if let Err(rollback_err) = rollback {
                    log::warn!("snapshot rollback also failed: {rollback_err}");
                }
                return Err(e.into());
            }
        };
        drop(engine);

        let mut state = self.state.lock().await;
        state.pending_change_count = 0;
        state.phase = Phase::Idle;
        drop(state);

        persistence::gc_old_snapshots(self.graph_store.as_ref(), 0)?;
        let _ = self
            .store
            .commit(RowEvent::SnapshotCreated {
                file_name: "latest.json".to_string(),
                checksum,
                size,
                node_count,
                model: String::new(),
                ts: created_at,
            })
            .await;
        log::info!("snapshot written, reason={reason}");
        Ok(())
    }

    /// Embeds `query_text` and returns the top-`k` ranked hits.
    pub async fn search(
        &self,
        query_text: &str,
        k: usize,
    ) -> Result<Vec<crate::search_engine::EngineSearchResult>, NoteIndexError> {
        let mut engine = self.engine.lock().await;
        Ok(engine.search(query_text, k).await?)
    }

    /// Forces an immediate reconciliation pass, bypassing the debounce
    /// delay and the single-flight queue.
    pub async fn force_sync(&self) -> Result<(), NoteIndexError> {
        {
            let mut state = self.state.lock().await;
            state.phase = Phase::Reconciling;
        }
        self.reconcile().await
    }

    /// Forces an immediate snapshot with reason `"manual"`.
    pub async fn force_snapshot(&self) -> Result<(), NoteIndexError> {
        self.snapshot("manual").await
    }

    /// Clears `knownExt` and the change counter, runs a cold boot, and
    /// triggers a snapshot with reason `"manual"`.
    pub async fn force_full_rebuild(&self) -> Result<(), NoteIndexError> {
        {
            let mut state = self.state.lock().await;
            state.known_ext.clear();
            state.known_hash.clear();
            state.pending_change_count = 0;
        }
        self.cold_boot().await?;
        let _ = self
            .store
            .commit(RowEvent::IndexCleared {
                ts: now_iso8601(),
                reason: "manual full rebuild".to_string(),
            })
            .await;
        self.snapshot("manual").await
    }

    /// Returns the orchestrator's current status.
    pub async fn get_status(&self) -> OrchestratorStatus {
        let state = self.state.lock().await;
        OrchestratorStatus {
            phase: state.phase,
            known_embedding_count: state.known_ext.len(),
            pending_change_count: state.pending_change_count,
            last_processed_at: state.last_processed_at.clone(),
        }
    }

    /// Cooperatively shuts the orchestrator down: in-flight reconciliation
    /// completes its current operation before subscriptions are released.
    /// No final snapshot is taken (the periodic one is authoritative).
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.lock().await;
            state.phase = Phase::Shutdown;
        }
        self.cancellation.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }
}

fn now_iso8601() -> String {
    chrono::Utc::now().to_rfc3339()
}
