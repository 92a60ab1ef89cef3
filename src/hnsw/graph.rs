//! The HNSW proximity graph: a node arena plus per-layer adjacency lists.
//!
//! Neighbor ids are stored as a plain `Vec<Vec<NodeId>>` per node — one inner
//! `Vec` per layer the node participates in — rather than a packed byte pool.
//! The snapshot format is a direct JSON projection of this shape, and
//! `from_snapshot` trusts the serialized adjacency rather than rebuilding it,
//! so keeping the in-memory and on-disk representations identical avoids a
//! lossy round trip through a compressed encoding.

use super::config::HnswConfig;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use thiserror::Error;

/// Internal node identifier within the HNSW graph.
///
/// Monotonically assigned from the graph's node count; never reused within
/// a single graph instance (tombstoned ids are retained, not recycled).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Errors raised by graph operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// A vector's dimensionality disagreed with the index's configured
    /// dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimensions.
        expected: usize,
        /// Actual dimensions.
        actual: usize,
    },

    /// The requested node id does not exist in the graph.
    #[error("node id out of bounds: {0}")]
    NodeIdOutOfBounds(u32),

    /// A node with this id was already present (callers should remove
    /// first; `SearchEngine::add_point` does this automatically).
    #[error("duplicate node id: {0}")]
    DuplicateId(u32),

    /// Configuration parameter was invalid.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// The snapshot being loaded referenced a node or entry point that does
    /// not exist, or violated internal consistency in some other way.
    #[error("corrupt graph data: {0}")]
    Corrupt(String),
}

/// A single node in the graph: its vector, its maximum layer, and its
/// per-layer neighbor lists.
#[derive(Clone, Debug)]
pub struct Node {
    /// Unit-normalized vector. Pinned to this node for its lifetime.
    pub vector: Vec<f32>,
    /// Maximum layer this node was assigned at insert time.
    pub level: u8,
    /// `neighbors[l]` holds this node's neighbors at layer `l`, for
    /// `l` in `0..=level`.
    pub neighbors: Vec<Vec<NodeId>>,
}

/// The multi-layer proximity graph.
///
/// Owns every node's vector (an arena indexed by [`NodeId`]); adjacency
/// lists store ids, never ownership references, which sidesteps any
/// cycle-collection concern in what is otherwise an arbitrarily cyclic,
/// undirected graph.
#[derive(Clone, Debug)]
pub struct HnswGraph {
    /// Algorithm configuration.
    pub config: HnswConfig,
    pub(crate) nodes: Vec<Node>,
    pub(crate) entry_point: Option<NodeId>,
    pub(crate) max_layer: u8,
    level_mult: f32,
    rng: ChaCha8Rng,
}

/// Safety cap on the level an insert can draw, independent of `m`. Prevents
/// a pathological RNG draw from allocating an unbounded number of layers.
const MAX_LEVEL: u8 = 32;

impl HnswGraph {
    /// Creates a new, empty graph.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::InvalidConfig`] if `config.m <= 1` or
    /// `config.m0 < config.m`.
    pub fn new(config: HnswConfig) -> Result<Self, GraphError> {
        config.validate()?;
        let level_mult = config.level_mult();
        Ok(Self {
            config,
            nodes: Vec::new(),
            entry_point: None,
            max_layer: 0,
            level_mult,
            rng: ChaCha8Rng::seed_from_u64(42),
        })
    }

    /// Draws a random level via `floor(-ln(u) * mL)`, `u ~ Uniform(0, 1)`.
    pub(crate) fn random_level(&mut self) -> u8 {
        let u: f32 = self.rng.gen_range(f32::EPSILON..=1.0);
        let level = (-u.ln() * self.level_mult).floor();
        if level > MAX_LEVEL as f32 {
            MAX_LEVEL
        } else {
            level as u8
        }
    }

    /// Number of nodes in the graph, including tombstoned ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the current entry point, if any.
    #[must_use]
    pub fn entry_point(&self) -> Option<NodeId> {
        self.entry_point
    }

    /// Returns the highest layer present in the graph.
    #[must_use]
    pub fn max_layer(&self) -> u8 {
        self.max_layer
    }

    /// Borrows a node by id.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0 as usize)
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0 as usize)
    }

    fn require_node(&self, id: NodeId) -> Result<&Node, GraphError> {
        self.node(id).ok_or(GraphError::NodeIdOutOfBounds(id.0))
    }

    /// Appends a brand-new node with the given vector and level, returning
    /// its freshly assigned [`NodeId`]. Does not wire up any edges; callers
    /// (i.e. [`HnswGraph::insert`]) are responsible for that.
    pub(crate) fn push_node(&mut self, vector: Vec<f32>, level: u8) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            vector,
            level,
            neighbors: vec![Vec::new(); level as usize + 1],
        });
        if self.entry_point.is_none() || level > self.max_layer {
            self.entry_point = Some(id);
            self.max_layer = level;
        }
        id
    }

    /// Sets `id`'s neighbor list at `layer` verbatim (used for both fresh
    /// connections and re-pruning an existing neighbor's list).
    pub(crate) fn set_neighbors(
        &mut self,
        id: NodeId,
        layer: u8,
        neighbors: Vec<NodeId>,
    ) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get_mut(id.0 as usize)
            .ok_or(GraphError::NodeIdOutOfBounds(id.0))?;
        if (layer as usize) >= node.neighbors.len() {
            return Err(GraphError::Corrupt(format!(
                "layer {layer} exceeds node {} level {}",
                id.0, node.level
            )));
        }
        node.neighbors[layer as usize] = neighbors;
        Ok(())
    }

    /// Reads `id`'s neighbor ids at `layer`.
    pub fn neighbors(&self, id: NodeId, layer: u8) -> Result<&[NodeId], GraphError> {
        let node = self.require_node(id)?;
        node.neighbors
            .get(layer as usize)
            .map(Vec::as_slice)
            .ok_or_else(|| GraphError::Corrupt(format!("layer {layer} out of range for node {}", id.0)))
    }

    /// Validates that `v` matches the configured dimensionality.
    pub(crate) fn check_dimensions(&self, v: &[f32]) -> Result<(), GraphError> {
        let expected = self.config.dimensions as usize;
        if v.len() != expected {
            return Err(GraphError::DimensionMismatch {
                expected,
                actual: v.len(),
            });
        }
        Ok(())
    }

    /// Rebuilds the node arena from snapshot data: `(level, vector)` pairs in
    /// ascending id order. Adjacency and entry point are wired separately by
    /// [`HnswGraph::set_neighbors_unchecked`] and
    /// [`HnswGraph::set_entry_point_unchecked`], since the snapshot trusts
    /// serialized adjacency verbatim rather than replaying inserts.
    pub fn restore_from_snapshot(&mut self, nodes: Vec<(u8, Vec<f32>)>) -> Result<(), GraphError> {
        self.nodes = nodes
            .into_iter()
            .map(|(level, vector)| Node {
                vector,
                level,
                neighbors: vec![Vec::new(); level as usize + 1],
            })
            .collect();
        Ok(())
    }

    /// Sets `id`'s neighbor list at `layer` without validating against the
    /// node's recorded level, for reconstructing a graph from a trusted
    /// snapshot. Grows the node's per-layer neighbor vector if needed.
    pub fn set_neighbors_unchecked(
        &mut self,
        id: NodeId,
        layer: u8,
        neighbors: Vec<NodeId>,
    ) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get_mut(id.0 as usize)
            .ok_or(GraphError::NodeIdOutOfBounds(id.0))?;
        if (layer as usize) >= node.neighbors.len() {
            node.neighbors.resize(layer as usize + 1, Vec::new());
        }
        node.neighbors[layer as usize] = neighbors;
        Ok(())
    }

    /// Sets the entry point and max layer directly, for snapshot
    /// reconstruction.
    pub fn set_entry_point_unchecked(&mut self, id: NodeId, max_layer: u8) {
        self.entry_point = Some(id);
        self.max_layer = max_layer;
    }

    /// Recomputes the entry point after the current one has been
    /// tombstoned, preferring the non-tombstoned node with the greatest
    /// `level` (ties broken by lowest id). Returns `None` if every node is
    /// tombstoned or the graph is empty.
    pub fn restore_entry_point(&mut self, is_tombstoned: impl Fn(NodeId) -> bool) -> Option<NodeId> {
        let best = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeId(i as u32), n.level))
            .filter(|(id, _)| !is_tombstoned(*id))
            .max_by_key(|(id, level)| (*level, std::cmp::Reverse(id.0)));
        if let Some((id, level)) = best {
            self.entry_point = Some(id);
            self.max_layer = level;
        } else {
            self.entry_point = None;
            self.max_layer = 0;
        }
        self.entry_point
    }
}
