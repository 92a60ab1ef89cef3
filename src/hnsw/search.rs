//! Greedy layer search and the top-level `searchKNN` entry point.

use super::graph::{GraphError, HnswGraph, NodeId};
use crate::vector_ops::{dot, similarity_to_distance, ScoredId};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

/// A single hit from [`HnswGraph::search_knn`]: an internal node id plus its
/// cosine similarity to the query (`[-1, 1]`, higher is closer).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SearchResult {
    /// The internal node id of the match.
    pub id: NodeId,
    /// Cosine similarity to the query vector.
    pub score: f32,
}

/// Reusable scratch space for a single search call, so repeated queries
/// against the same graph don't reallocate the visited set and heaps every
/// time.
#[derive(Default)]
pub struct SearchScratch {
    visited: HashSet<NodeId>,
    candidates: BinaryHeap<Reverse<ScoredId>>,
    results: BinaryHeap<ScoredId>,
}

impl SearchScratch {
    /// Creates an empty scratch buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn clear(&mut self) {
        self.visited.clear();
        self.candidates.clear();
        self.results.clear();
    }

    /// Copies the current result set out as `SearchResult`s, unsorted.
    /// Used by insertion, which needs the raw candidate set from the last
    /// `search_layer` call to feed into heuristic neighbor selection.
    pub(crate) fn results_snapshot(&self) -> Vec<SearchResult> {
        self.results
            .iter()
            .map(|c| SearchResult {
                id: NodeId(c.id),
                score: 1.0 - c.distance,
            })
            .collect()
    }
}

impl HnswGraph {
    fn distance_to(&self, id: NodeId, query: &[f32]) -> f32 {
        let node = &self.nodes[id.0 as usize];
        similarity_to_distance(dot(&node.vector, query))
    }

    /// Best-first search of a single layer starting from `entry_points`,
    /// returning up to `ef` nearest candidates.
    ///
    /// Standard HNSW search-layer: a min-heap of candidates to expand, a
    /// bounded max-heap of the best results seen so far, and a visited set
    /// to avoid re-expanding nodes. Expansion stops once the best remaining
    /// candidate is farther than the worst kept result and the result set is
    /// already at capacity.
    pub fn search_layer(
        &self,
        scratch: &mut SearchScratch,
        entry_points: impl IntoIterator<Item = NodeId>,
        query: &[f32],
        ef: usize,
        layer: u8,
    ) -> Result<(), GraphError> {
        scratch.clear();

        for ep in entry_points {
            if ep.0 as usize >= self.nodes.len() {
                return Err(GraphError::NodeIdOutOfBounds(ep.0));
            }
            let dist = self.distance_to(ep, query);
            scratch.visited.insert(ep);
            scratch.candidates.push(Reverse(ScoredId { distance: dist, id: ep.0 }));
            scratch.results.push(ScoredId { distance: dist, id: ep.0 });
        }

        while let Some(Reverse(current)) = scratch.candidates.pop() {
            if let Some(worst) = scratch.results.peek().map(|r| r.distance) {
                if current.distance > worst && scratch.results.len() >= ef {
                    break;
                }
            }

            let current_id = NodeId(current.id);
            let neighbors = self.neighbors(current_id, layer)?;
            for &nb in neighbors {
                if !scratch.visited.insert(nb) {
                    continue;
                }
                let dist = self.distance_to(nb, query);
                let worst_kept = scratch.results.peek().map(|r| r.distance);
                let should_consider =
                    scratch.results.len() < ef || worst_kept.is_some_and(|w| dist < w);
                if should_consider {
                    scratch
                        .candidates
                        .push(Reverse(ScoredId { distance: dist, id: nb.0 }));
                    scratch.results.push(ScoredId { distance: dist, id: nb.0 });
                    if scratch.results.len() > ef {
                        scratch.results.pop();
                    }
                }
            }
        }

        Ok(())
    }

    /// Greedily descends from `entry` through layers `from_layer..down_to`
    /// (exclusive of `down_to`), at each layer moving to the single closest
    /// neighbor found, and returns the resulting entry point for the next
    /// phase of insertion or search.
    pub(crate) fn greedy_descend(
        &self,
        scratch: &mut SearchScratch,
        mut entry: NodeId,
        query: &[f32],
        from_layer: u8,
        down_to: u8,
    ) -> Result<NodeId, GraphError> {
        let mut layer = from_layer;
        while layer > down_to {
            self.search_layer(scratch, [entry], query, 1, layer)?;
            if let Some(best) = scratch.results.iter().min_by(|a, b| a.distance.total_cmp(&b.distance)) {
                entry = NodeId(best.id);
            }
            layer -= 1;
        }
        Ok(entry)
    }

    /// Approximate k-nearest-neighbor search.
    ///
    /// Descends greedily from the entry point down to layer 1, then runs
    /// [`HnswGraph::search_layer`] at layer 0 with candidate budget `ef`
    /// (`ef` is clamped up to at least `k`), and returns the top `k` by
    /// similarity. Returns an empty vector if the graph has no entry point.
    pub fn search_knn(
        &self,
        scratch: &mut SearchScratch,
        query: &[f32],
        k: usize,
        ef: usize,
    ) -> Result<Vec<SearchResult>, GraphError> {
        self.check_dimensions(query)?;
        let Some(entry) = self.entry_point() else {
            return Ok(Vec::new());
        };
        let ef = ef.max(k).max(1);

        let ep = self.greedy_descend(scratch, entry, query, self.max_layer(), 1)?;
        self.search_layer(scratch, [ep], query, ef, 0)?;

        let mut results: Vec<SearchResult> = scratch
            .results
            .iter()
            .map(|c| SearchResult {
                id: NodeId(c.id),
                score: 1.0 - c.distance,
            })
            .collect();
        results.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id.0.cmp(&b.id.0)));
        results.truncate(k);
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hnsw::HnswConfig;
    use crate::vector_ops::normalized;

    fn insert_axis(graph: &mut HnswGraph, axis: usize, dim: usize) -> NodeId {
        let mut v = vec![0.0; dim];
        v[axis] = 1.0;
        graph.insert(&normalized(&v)).unwrap()
    }

    #[test]
    fn search_on_empty_graph_returns_empty() {
        let graph = HnswGraph::new(HnswConfig::new(4)).unwrap();
        let mut scratch = SearchScratch::new();
        let results = graph.search_knn(&mut scratch, &[1.0, 0.0, 0.0, 0.0], 2, 10).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn search_finds_exact_match_first() {
        let mut graph = HnswGraph::new(HnswConfig::new(4)).unwrap();
        let a = insert_axis(&mut graph, 0, 4);
        insert_axis(&mut graph, 1, 4);
        insert_axis(&mut graph, 2, 4);

        let mut scratch = SearchScratch::new();
        let results = graph
            .search_knn(&mut scratch, &normalized(&[1.0, 0.0, 0.0, 0.0]), 2, 50)
            .unwrap();
        assert_eq!(results[0].id, a);
        assert!((results[0].score - 1.0).abs() < 1e-4);
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let graph = HnswGraph::new(HnswConfig::new(4)).unwrap();
        let mut scratch = SearchScratch::new();
        let err = graph.search_knn(&mut scratch, &[1.0, 0.0], 1, 10).unwrap_err();
        assert!(matches!(err, GraphError::DimensionMismatch { .. }));
    }
}
