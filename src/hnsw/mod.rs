//! The HNSW proximity graph: configuration, node storage, greedy search, and
//! heuristic-pruned insertion.

/// Algorithm configuration (`m`, `m0`, `efConstruction`, dimensions).
pub mod config;
/// The graph itself: node arena, adjacency lists, entry-point bookkeeping.
pub mod graph;
/// Insertion: entry-point descent, candidate search, neighbor heuristics.
pub mod insert;
/// Greedy layer descent and best-first layer search.
pub mod search;

pub use config::HnswConfig;
pub use graph::{GraphError, HnswGraph, Node, NodeId};
pub use search::{SearchResult, SearchScratch};
