//! Top-level, `serde`-(de)serializable configuration assembled from
//! per-component defaults plus caller overrides, mirroring how
//! [`crate::hnsw::HnswConfig`] is itself a serializable value type.
//!
//! No environment or file parsing lives in this crate; a host process is
//! free to load a [`NoteIndexConfig`] from TOML, JSON, or environment
//! variables the way it likes and hand the typed value to
//! [`crate::builder::NoteIndexBuilder`].

use crate::orchestrator::OrchestratorConfig;
use crate::search_engine::SearchEngineConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration for a `noteindex` instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NoteIndexConfig {
    /// Vector dimensionality. Fixed for the lifetime of the index.
    pub dimensions: u32,
    /// HNSW base degree. Default 16.
    pub m: u32,
    /// Construction-time candidate list size. Default 200.
    pub ef_construction: u32,
    /// Query-time base candidate list size. Default 50.
    pub ef_search: u32,
    /// Linear fusion weight between vector and sparse scores. Default 1.0.
    pub alpha: f32,
    /// Bound on the query and results LRU caches. Default 128.
    pub cache_size: usize,
    /// Debounce delay before a burst of row-store ticks is reconciled, in
    /// milliseconds. Default 1000.
    pub debounce_ms: u64,
    /// `pendingChangeCount` threshold that triggers a snapshot. Default 50.
    pub changes_threshold: u32,
    /// Period of the background snapshot timer, in seconds. Default 300.
    pub snapshot_interval_secs: u64,
}

impl Default for NoteIndexConfig {
    fn default() -> Self {
        Self {
            dimensions: 768,
            m: 16,
            ef_construction: 200,
            ef_search: 50,
            alpha: 1.0,
            cache_size: 128,
            debounce_ms: 1000,
            changes_threshold: 50,
            snapshot_interval_secs: 300,
        }
    }
}

impl NoteIndexConfig {
    /// Creates a default configuration for the given dimensionality.
    #[must_use]
    pub fn new(dimensions: u32) -> Self {
        Self {
            dimensions,
            ..Self::default()
        }
    }

    pub(crate) fn search_engine_config(&self) -> SearchEngineConfig {
        SearchEngineConfig {
            ef_search: self.ef_search,
            ef_construction: self.ef_construction,
            alpha: self.alpha,
            cache_size: self.cache_size,
        }
    }

    pub(crate) fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            debounce: Duration::from_millis(self.debounce_ms),
            changes_threshold: self.changes_threshold,
            snapshot_interval: Duration::from_secs(self.snapshot_interval_secs),
            search: self.search_engine_config(),
        }
    }
}
