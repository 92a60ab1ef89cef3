//! External-key mapping, tombstones, adaptive search, reranking, fusion,
//! and bounded LRU caches over an [`HnswGraph`].

use crate::embedding::EmbeddingClient;
use crate::hnsw::{HnswConfig, HnswGraph, NodeId, SearchScratch};
use crate::vector_ops::{dot, normalize};
use bitvec::vec::BitVec;
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use thiserror::Error;

/// Literal prefix prepended to query text before embedding, matching the
/// convention the embedding model was tuned against.
pub const QUERY_PREFIX: &str = "search_query: ";

/// Minimum top-1 score below which the adaptive search escalates `ef`.
const RESCORE_THRESHOLD: f32 = 0.65;

/// A growable bitset of tombstoned internal node ids.
///
/// Ids are assigned monotonically from 0, so a bitset is a tighter fit than
/// a hash set: one bit per node instead of a full hashed entry.
#[derive(Default)]
struct TombstoneSet(BitVec);

impl TombstoneSet {
    fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, id: NodeId) {
        let idx = id.0 as usize;
        if idx >= self.0.len() {
            self.0.resize(idx + 1, false);
        }
        self.0.set(idx, true);
    }

    fn contains(&self, id: NodeId) -> bool {
        self.0.get(id.0 as usize).is_some_and(|b| *b)
    }

    fn clear(&mut self) {
        self.0.clear();
    }
}

/// Errors raised by [`SearchEngine`] operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SearchEngineError {
    /// The supplied vector's dimension disagreed with the configured one.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Actual dimension.
        actual: usize,
    },

    /// Underlying graph error.
    #[error(transparent)]
    Graph(#[from] crate::hnsw::GraphError),

    /// The embedding model failed to embed the query text.
    #[error(transparent)]
    Embedding(#[from] crate::error::EmbeddingError),
}

/// Tunables for [`SearchEngine`].
#[derive(Clone, Copy, Debug)]
pub struct SearchEngineConfig {
    /// Base candidate-list size for queries. Default 50.
    pub ef_search: u32,
    /// Construction-time candidate-list size, forwarded to [`HnswConfig`].
    pub ef_construction: u32,
    /// Linear fusion weight between vector score and sparse score.
    /// `1.0` disables fusion (pure vector score). Default 1.0.
    pub alpha: f32,
    /// Bound on both the query cache and results cache. Default 128.
    pub cache_size: usize,
}

impl Default for SearchEngineConfig {
    fn default() -> Self {
        Self {
            ef_search: 50,
            ef_construction: 200,
            alpha: 1.0,
            cache_size: 128,
        }
    }
}

/// In-memory metadata kept alongside each point, for display and for the
/// chunk→parent dedup step.
#[derive(Clone, Debug, Default)]
pub struct PointMeta {
    /// Title, used purely as display metadata; not searched directly.
    pub title: String,
    /// A short preview of the content.
    pub content_preview: String,
}

/// A single ranked hit returned by [`SearchEngine::search`].
#[derive(Clone, Debug, PartialEq)]
pub struct EngineSearchResult {
    /// The external key this hit corresponds to (post chunk→parent dedup).
    pub key: String,
    /// Final fused, reranked similarity score.
    pub score: f32,
}

/// Optional sparse-score provider consulted during score fusion.
pub trait SparseScoreProvider: Send + Sync {
    /// Returns a sparse relevance score for `parent_key`, if any.
    fn score(&self, parent_key: &str) -> Option<f32>;
}

/// Holds the HNSW graph, id maps, tombstones, and caches; the only
/// component allowed to mutate the graph.
pub struct SearchEngine {
    config: SearchEngineConfig,
    graph: HnswGraph,
    ext_to_int: HashMap<String, NodeId>,
    int_to_ext: HashMap<NodeId, String>,
    tombstones: TombstoneSet,
    meta: HashMap<NodeId, PointMeta>,
    query_cache: LruCache<String, Vec<f32>>,
    results_cache: LruCache<String, Vec<EngineSearchResult>>,
    sparse: Option<Box<dyn SparseScoreProvider>>,
    scratch: SearchScratch,
    embedding: Arc<dyn EmbeddingClient>,
}

impl SearchEngine {
    /// Creates an empty engine over a fresh [`HnswGraph`] of the given
    /// dimensionality.
    pub fn new(
        dimensions: u32,
        config: SearchEngineConfig,
        embedding: Arc<dyn EmbeddingClient>,
    ) -> Result<Self, SearchEngineError> {
        let hnsw_config = HnswConfig {
            m: 16,
            m0: 32,
            ef_construction: config.ef_construction,
            dimensions,
        };
        let graph = HnswGraph::new(hnsw_config)?;
        let cap = NonZeroUsize::new(config.cache_size.max(1)).expect("max(1) is nonzero");
        Ok(Self {
            config,
            graph,
            ext_to_int: HashMap::new(),
            int_to_ext: HashMap::new(),
            tombstones: TombstoneSet::new(),
            meta: HashMap::new(),
            query_cache: LruCache::new(cap),
            results_cache: LruCache::new(cap),
            sparse: None,
            scratch: SearchScratch::new(),
            embedding,
        })
    }

    /// Rebuilds an engine around an already-populated graph (warm boot) and
    /// a previously persisted external-key mapping.
    pub fn from_graph(
        graph: HnswGraph,
        external_keys: HashMap<String, u32>,
        config: SearchEngineConfig,
        embedding: Arc<dyn EmbeddingClient>,
    ) -> Self {
        let mut ext_to_int = HashMap::with_capacity(external_keys.len());
        let mut int_to_ext = HashMap::with_capacity(external_keys.len());
        for (key, id) in external_keys {
            let id = NodeId(id);
            ext_to_int.insert(key.clone(), id);
            int_to_ext.insert(id, key);
        }
        let cap = NonZeroUsize::new(config.cache_size.max(1)).expect("max(1) is nonzero");
        Self {
            config,
            graph,
            ext_to_int,
            int_to_ext,
            tombstones: TombstoneSet::new(),
            meta: HashMap::new(),
            query_cache: LruCache::new(cap),
            results_cache: LruCache::new(cap),
            sparse: None,
            scratch: SearchScratch::new(),
            embedding,
        }
    }

    /// Installs a sparse-score provider for fusion. `None` (the default)
    /// disables fusion regardless of `alpha`.
    pub fn set_sparse_provider(&mut self, provider: Option<Box<dyn SparseScoreProvider>>) {
        self.sparse = provider;
        self.invalidate_caches();
    }

    /// Number of non-tombstoned points the engine currently tracks.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.ext_to_int.len()
    }

    /// Read-only access to the underlying graph, e.g. for snapshotting.
    #[must_use]
    pub fn graph(&self) -> &HnswGraph {
        &self.graph
    }

    /// Read-only access to the external-key mapping, e.g. for snapshotting.
    #[must_use]
    pub fn external_keys(&self) -> HashMap<String, u32> {
        self.ext_to_int.iter().map(|(k, v)| (k.clone(), v.0)).collect()
    }

    /// Returns a clone of the embedding client handle, for reconstructing a
    /// new engine instance (warm boot) without re-threading it from the
    /// caller.
    #[must_use]
    pub fn embedding_client(&self) -> Arc<dyn EmbeddingClient> {
        Arc::clone(&self.embedding)
    }

    /// Inserts or replaces the point at `ext_key`.
    ///
    /// If `ext_key` is already mapped, the prior internal id is tombstoned
    /// (a duplicate key is a remove-then-add, never an in-place overwrite)
    /// and a fresh id is allocated. Invalidates both caches wholesale, since
    /// any existing result could now be stale.
    pub fn add_point(
        &mut self,
        ext_key: &str,
        vector: &[f32],
        meta: PointMeta,
    ) -> Result<(), SearchEngineError> {
        self.graph.check_dimensions(vector)?;
        if let Some(&old_id) = self.ext_to_int.get(ext_key) {
            self.tombstones.insert(old_id);
        }
        let id = self.graph.insert(vector)?;
        self.ext_to_int.insert(ext_key.to_string(), id);
        self.int_to_ext.insert(id, ext_key.to_string());
        self.meta.insert(id, meta);
        self.invalidate_caches();
        Ok(())
    }

    /// Tombstones the point at `ext_key`, if present. Map entries are
    /// retained until the next full rebuild; `ext_to_int` only counts live
    /// keys going forward, so the retained mapping is inert. Invalidates
    /// both caches wholesale.
    ///
    /// If the tombstoned id was the graph's entry point, restores it to the
    /// highest-level non-tombstoned node, so later inserts and searches
    /// never greedily descend from a dead node.
    pub fn remove_point(&mut self, ext_key: &str) {
        if let Some(&id) = self.ext_to_int.get(ext_key) {
            self.tombstones.insert(id);
            self.ext_to_int.remove(ext_key);
            self.int_to_ext.remove(&id);
            if self.graph.entry_point() == Some(id) {
                let tombstones = &self.tombstones;
                self.graph.restore_entry_point(|id| tombstones.contains(id));
            }
            self.invalidate_caches();
        }
    }

    fn invalidate_caches(&mut self) {
        self.query_cache.clear();
        self.results_cache.clear();
    }

    /// Clears the graph, maps, tombstones, and caches back to empty.
    pub fn clear(&mut self) -> Result<(), SearchEngineError> {
        let dims = self.graph.config.dimensions;
        let hnsw_config = HnswConfig {
            m: self.graph.config.m,
            m0: self.graph.config.m0,
            ef_construction: self.graph.config.ef_construction,
            dimensions: dims,
        };
        self.graph = HnswGraph::new(hnsw_config)?;
        self.ext_to_int.clear();
        self.int_to_ext.clear();
        self.tombstones.clear();
        self.meta.clear();
        self.invalidate_caches();
        Ok(())
    }

    /// Parses a `parent:chunkIndex` key into its parent key, or returns the
    /// key unchanged if it has no `chunkIndex` suffix.
    fn parent_key(key: &str) -> &str {
        match key.rsplit_once(':') {
            Some((parent, suffix)) if suffix.chars().all(|c| c.is_ascii_digit()) && !suffix.is_empty() => parent,
            _ => key,
        }
    }

    /// Embeds `query_text` (trimmed, empty → empty result) and returns the
    /// top-`k` ranked hits.
    ///
    /// Steps: trim and short-circuit on empty; check the results cache; on
    /// miss, check the query cache for a previously-embedded unit vector,
    /// otherwise call [`EmbeddingClient::embed`] with the [`QUERY_PREFIX`]
    /// prepended and L2-normalize the result; then run adaptive HNSW
    /// search, exact rerank, optional fusion, chunk→parent dedup, sort,
    /// cache, and truncate to `k`.
    pub async fn search(
        &mut self,
        query_text: &str,
        k: usize,
    ) -> Result<Vec<EngineSearchResult>, SearchEngineError> {
        let trimmed = query_text.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        if let Some(cached) = self.results_cache.get(trimmed) {
            let mut out = cached.clone();
            out.truncate(k);
            return Ok(out);
        }

        let unit_query = match self.query_cache.get(trimmed) {
            Some(cached) => cached.clone(),
            None => {
                let raw = self.embedding.embed(&format!("{QUERY_PREFIX}{trimmed}")).await?;
                let mut unit = raw;
                normalize(&mut unit);
                self.query_cache.put(trimmed.to_string(), unit.clone());
                unit
            }
        };

        self.search_with_vector(trimmed, &unit_query, k)
    }

    /// Searches for the `k` nearest points to `unit_query`, an already
    /// L2-normalized vector, caching the final result set under
    /// `cache_key`.
    ///
    /// Runs the adaptive-`ef` HNSW search, filters tombstoned ids, reranks
    /// exactly against `unit_query`, optionally fuses a sparse score,
    /// collapses chunks to their parent (keeping the max score), sorts
    /// descending, and caches the final top-k under `cache_key`.
    pub fn search_with_vector(
        &mut self,
        cache_key: &str,
        unit_query: &[f32],
        k: usize,
    ) -> Result<Vec<EngineSearchResult>, SearchEngineError> {
        if let Some(cached) = self.results_cache.get(cache_key) {
            let mut out = cached.clone();
            out.truncate(k);
            return Ok(out);
        }

        let mut candidate_k = 5 * k.max(1);
        let mut ef = self.config.ef_search as usize;
        let mut survivors = self.raw_candidates(&unit_query, candidate_k, ef)?;

        let top_score = survivors.first().map_or(0.0, |(_, s)| *s);
        if survivors.len() < k || top_score < RESCORE_THRESHOLD {
            candidate_k = 10 * k.max(1);
            ef *= 2;
            survivors = self.raw_candidates(&unit_query, candidate_k, ef)?;
        }

        let mut by_parent: HashMap<String, f32> = HashMap::new();
        for (id, score) in survivors {
            let Some(ext_key) = self.int_to_ext.get(&id) else {
                continue;
            };
            let fused = match &self.sparse {
                Some(provider) => {
                    let parent = Self::parent_key(ext_key);
                    let sparse_score = provider.score(parent).unwrap_or(0.0);
                    self.config.alpha * score + (1.0 - self.config.alpha) * sparse_score
                }
                None => score,
            };
            let parent = Self::parent_key(ext_key).to_string();
            by_parent
                .entry(parent)
                .and_modify(|existing| {
                    if fused > *existing {
                        *existing = fused;
                    }
                })
                .or_insert(fused);
        }

        let mut results: Vec<EngineSearchResult> = by_parent
            .into_iter()
            .map(|(key, score)| EngineSearchResult { key, score })
            .collect();
        results.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.key.cmp(&b.key)));
        results.truncate(candidate_k.max(k));

        self.results_cache.put(cache_key.to_string(), results.clone());
        results.truncate(k);
        Ok(results)
    }

    fn raw_candidates(
        &mut self,
        unit_query: &[f32],
        k: usize,
        ef: usize,
    ) -> Result<Vec<(NodeId, f32)>, SearchEngineError> {
        let hits = self.graph.search_knn(&mut self.scratch, unit_query, k, ef)?;
        Ok(hits
            .into_iter()
            .filter(|h| !self.tombstones.contains(h.id))
            .map(|h| {
                let node = self.graph.node(h.id).expect("hit id is valid");
                let exact = dot(unit_query, &node.vector);
                (h.id, exact)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(dims: u32) -> SearchEngine {
        let embedding = Arc::new(crate::embedding::StaticEmbeddingClient::new(dims));
        SearchEngine::new(dims, SearchEngineConfig::default(), embedding).unwrap()
    }

    #[test]
    fn add_then_search_finds_exact_match() {
        let mut e = engine(4);
        e.add_point("a", &[1.0, 0.0, 0.0, 0.0], PointMeta::default()).unwrap();
        e.add_point("b", &[0.0, 1.0, 0.0, 0.0], PointMeta::default()).unwrap();
        e.add_point("c", &[0.0, 0.0, 1.0, 0.0], PointMeta::default()).unwrap();

        let results = e.search_with_vector("q", &[1.0, 0.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(results[0].key, "a");
        assert!((results[0].score - 1.0).abs() < 1e-3);
    }

    #[test]
    fn remove_point_excludes_from_results() {
        let mut e = engine(4);
        e.add_point("a", &[1.0, 0.0, 0.0, 0.0], PointMeta::default()).unwrap();
        e.add_point("b", &[0.0, 1.0, 0.0, 0.0], PointMeta::default()).unwrap();
        e.remove_point("a");

        let results = e.search_with_vector("q", &[1.0, 0.0, 0.0, 0.0], 3).unwrap();
        assert!(results.iter().all(|r| r.key != "a"));
        assert_eq!(e.live_count(), 1);
    }

    #[test]
    fn removing_entry_point_restores_it_to_a_live_node() {
        let mut e = engine(4);
        e.add_point("a", &[1.0, 0.0, 0.0, 0.0], PointMeta::default()).unwrap();
        e.add_point("b", &[0.0, 1.0, 0.0, 0.0], PointMeta::default()).unwrap();
        e.add_point("c", &[0.0, 0.0, 1.0, 0.0], PointMeta::default()).unwrap();

        let ep = e.graph.entry_point().expect("non-empty graph has an entry point");
        let ep_key = e.int_to_ext.get(&ep).cloned().expect("entry point is mapped");
        e.remove_point(&ep_key);

        let new_ep = e.graph.entry_point().expect("graph still has live nodes");
        assert_ne!(new_ep, ep);
        assert!(e.ext_to_int.values().any(|&id| id == new_ep));
    }

    #[test]
    fn readding_same_key_tombstones_the_old_node() {
        let mut e = engine(4);
        e.add_point("a", &[1.0, 0.0, 0.0, 0.0], PointMeta::default()).unwrap();
        e.add_point("a", &[0.0, 1.0, 0.0, 0.0], PointMeta::default()).unwrap();
        assert_eq!(e.live_count(), 1);

        let results = e.search_with_vector("q", &[0.0, 1.0, 0.0, 0.0], 1).unwrap();
        assert_eq!(results[0].key, "a");
    }

    #[test]
    fn chunk_keys_dedup_to_parent_keeping_max_score() {
        let mut e = engine(4);
        e.add_point("doc:0", &[1.0, 0.0, 0.0, 0.0], PointMeta::default()).unwrap();
        e.add_point("doc:1", &normalize_copy(&[0.9, 0.1, 0.0, 0.0]), PointMeta::default()).unwrap();

        let results = e.search_with_vector("q", &[1.0, 0.0, 0.0, 0.0], 5).unwrap();
        assert_eq!(results.iter().filter(|r| r.key == "doc").count(), 1);
    }

    fn normalize_copy(v: &[f32]) -> Vec<f32> {
        let mut v = v.to_vec();
        normalize(&mut v);
        v
    }

    #[tokio::test]
    async fn empty_query_text_returns_empty() {
        let mut e = engine(4);
        e.add_point("a", &[1.0, 0.0, 0.0, 0.0], PointMeta::default()).unwrap();
        let results = e.search("   ", 5).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn search_embeds_and_caches_query() {
        let mut e = engine(4);
        e.add_point("a", &[1.0, 0.0, 0.0, 0.0], PointMeta::default()).unwrap();
        let first = e.search("hello", 1).await.unwrap();
        let second = e.search("hello", 1).await.unwrap();
        assert_eq!(first, second);
    }
}
