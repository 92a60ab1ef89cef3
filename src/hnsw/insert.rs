//! Vector insertion: entry-point descent, per-layer candidate search, and
//! heuristic neighbor selection with re-pruning.

use super::graph::{GraphError, HnswGraph, NodeId};
use super::search::{SearchResult, SearchScratch};
use crate::vector_ops::{dot, normalized};

impl HnswGraph {
    /// Max degree allowed for `layer` (`m0` at layer 0, `m` above it).
    fn max_degree(&self, layer: u8) -> usize {
        if layer == 0 {
            self.config.m0 as usize
        } else {
            self.config.m as usize
        }
    }

    /// Inserts a vector, L2-normalizing it first, and wires it into every
    /// layer from 0 up to a freshly drawn level.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DimensionMismatch`] if `vector.len()` disagrees
    /// with the graph's configured dimension. The graph is left unmodified
    /// on error.
    ///
    /// There is no "duplicate id" failure mode at this layer: every call
    /// allocates a fresh [`NodeId`]. Replacing a logical entity at the same
    /// external key is [`crate::search_engine::SearchEngine::add_point`]'s
    /// job — tombstone the old id, then insert a new one.
    pub fn insert(&mut self, vector: &[f32]) -> Result<NodeId, GraphError> {
        self.check_dimensions(vector)?;
        let vector = normalized(vector);
        let level = self.random_level();

        if self.is_empty() {
            return Ok(self.push_node(vector, level));
        }

        let entry = self.entry_point().expect("non-empty graph has an entry point");
        let top_layer = self.max_layer();
        let mut scratch = SearchScratch::new();

        // Phase 1: greedily descend from the current top layer down to just
        // above min(top_layer, level).
        let ep = if top_layer > level {
            self.greedy_descend(&mut scratch, entry, &vector, top_layer, level)?
        } else {
            entry
        };

        let new_id = self.push_node(vector.clone(), level);
        let mut ep = ep;

        // Phase 2: for each layer from min(top_layer, level) down to 0,
        // search with efConstruction, select M via the heuristic, and wire
        // undirected edges both ways.
        let start_layer = top_layer.min(level);
        let ef = self.config.ef_construction as usize;
        let m = self.config.m as usize;

        let mut layer = start_layer;
        loop {
            self.search_layer(&mut scratch, [ep], &vector, ef, layer)?;
            let mut candidates: Vec<SearchResult> = scratch
                .results_snapshot()
                .into_iter()
                .filter(|r| r.id != new_id)
                .collect();
            candidates.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id.0.cmp(&b.id.0)));

            let selected = self.select_neighbors_heuristic(&vector, &candidates, m);
            if let Some(&closest) = selected.first() {
                ep = closest;
            }

            self.set_neighbors(new_id, layer, selected.clone())?;
            for &nb in &selected {
                self.add_connection(nb, new_id, layer)?;
            }

            if layer == 0 {
                break;
            }
            layer -= 1;
        }

        Ok(new_id)
    }

    /// HNSW "extend candidates" heuristic: repeatedly pick the candidate `c`
    /// closest to `q` whose distance to `q` is strictly less than its
    /// distance to every already-selected candidate, stopping once `m` have
    /// been chosen. Preserves diversity and long-range links. Ties are
    /// broken by lower internal id, since `candidates` arrives pre-sorted
    /// that way.
    fn select_neighbors_heuristic(
        &self,
        query: &[f32],
        candidates: &[SearchResult],
        m: usize,
    ) -> Vec<NodeId> {
        let mut selected: Vec<NodeId> = Vec::with_capacity(m);
        for c in candidates {
            if selected.len() >= m {
                break;
            }
            let c_vec = &self.nodes[c.id.0 as usize].vector;
            let dist_q_c = 1.0 - dot(query, c_vec);

            let closer_to_existing = selected.iter().any(|&r| {
                let r_vec = &self.nodes[r.0 as usize].vector;
                let dist_c_r = 1.0 - dot(c_vec, r_vec);
                dist_c_r < dist_q_c
            });

            if !closer_to_existing {
                selected.push(c.id);
            }
        }
        selected
    }

    /// Adds an undirected edge `source -- target` at `layer`: appends
    /// `target` to `source`'s neighbor list, and if that pushes `source`
    /// over its degree budget, re-prunes `source`'s whole list (including
    /// the new neighbor) with the same heuristic used at insert time.
    fn add_connection(&mut self, source: NodeId, target: NodeId, layer: u8) -> Result<(), GraphError> {
        let mut neighbors = self.neighbors(source, layer)?.to_vec();
        if neighbors.contains(&target) {
            return Ok(());
        }
        neighbors.push(target);

        let max_degree = self.max_degree(layer);
        if neighbors.len() > max_degree {
            let source_vec = self.nodes[source.0 as usize].vector.clone();
            let mut candidates: Vec<SearchResult> = neighbors
                .iter()
                .map(|&id| SearchResult {
                    id,
                    score: dot(&source_vec, &self.nodes[id.0 as usize].vector),
                })
                .collect();
            candidates.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id.0.cmp(&b.id.0)));
            neighbors = self.select_neighbors_heuristic(&source_vec, &candidates, max_degree);
        }

        self.set_neighbors(source, layer, neighbors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hnsw::HnswConfig;
    use crate::vector_ops::normalized;

    #[test]
    fn duplicate_insert_assigns_fresh_id() {
        let mut graph = HnswGraph::new(HnswConfig::new(4)).unwrap();
        let v = normalized(&[1.0, 0.0, 0.0, 0.0]);
        let a = graph.insert(&v).unwrap();
        let b = graph.insert(&v).unwrap();
        assert_ne!(a, b);
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn degree_never_exceeds_m0_at_layer_zero() {
        let mut cfg = HnswConfig::new(4);
        cfg.m = 4;
        cfg.m0 = 8;
        let mut graph = HnswGraph::new(cfg).unwrap();

        let mut rng_state: u32 = 7;
        for _ in 0..200 {
            rng_state = rng_state.wrapping_mul(1_103_515_245).wrapping_add(12345);
            let a = (rng_state % 1000) as f32 / 1000.0;
            rng_state = rng_state.wrapping_mul(1_103_515_245).wrapping_add(12345);
            let b = (rng_state % 1000) as f32 / 1000.0;
            graph.insert(&normalized(&[a, b, 1.0 - a, 1.0 - b])).unwrap();
        }

        for id in 0..graph.len() as u32 {
            let degree = graph.neighbors(NodeId(id), 0).unwrap().len();
            assert!(degree <= 8, "node {id} has degree {degree} > m0=8");
        }
    }

    #[test]
    fn dimension_mismatch_leaves_graph_unchanged() {
        let mut graph = HnswGraph::new(HnswConfig::new(4)).unwrap();
        graph.insert(&normalized(&[1.0, 0.0, 0.0, 0.0])).unwrap();
        let before = graph.len();
        assert!(graph.insert(&[1.0, 0.0]).is_err());
        assert_eq!(graph.len(), before);
    }
}
