//! Versioned JSON snapshot format, checksum, and garbage collection.
//!
//! The on-disk shape is a direct projection of [`HnswGraph`]'s in-memory
//! adjacency representation (see [`crate::hnsw::graph`]), plus the
//! `externalKeys` mapping so a warm boot doesn't have to trust row ordering
//! to reconstruct which vector belongs to which note.

use crate::graph_store::GraphStore;
use crate::hnsw::{HnswConfig, HnswGraph, Node, NodeId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use thiserror::Error;

/// Snapshot format version this build writes and expects to read.
pub const SNAPSHOT_VERSION: &str = "1.0.0";

/// Errors raised by the persistence layer.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Underlying storage backend I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The blob was not valid UTF-8 JSON in the expected shape.
    #[error("corrupted snapshot: {0}")]
    Corrupted(String),

    /// The graph's configuration was rejected on reconstruction.
    #[error("invalid graph data: {0}")]
    InvalidGraph(#[from] crate::hnsw::GraphError),
}

#[derive(Serialize, Deserialize)]
struct SnapshotNode {
    id: u32,
    level: u8,
    vector: Vec<f32>,
    #[serde(rename = "neighborsByLayer")]
    neighbors_by_layer: Vec<Vec<u32>>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotMetadata {
    version: String,
    #[serde(rename = "createdAt")]
    created_at: String,
    #[serde(rename = "nodeCount")]
    node_count: usize,
}

#[derive(Serialize, Deserialize)]
struct SnapshotDoc {
    #[serde(rename = "M")]
    m: u32,
    #[serde(rename = "efConstruction")]
    ef_construction: u32,
    #[serde(rename = "levelMax")]
    level_max: u8,
    #[serde(rename = "entryPointId")]
    entry_point_id: Option<u32>,
    nodes: Vec<SnapshotNode>,
    metadata: SnapshotMetadata,
    /// External key ↔ internal id, persisted alongside the graph so a warm
    /// boot never has to infer the mapping from row order.
    #[serde(rename = "externalKeys", default)]
    external_keys: HashMap<String, u32>,
}

/// A graph plus the external-key mapping the `SearchEngine` needs to
/// reconstruct its id tables without rescanning every row.
pub struct GraphSnapshot {
    /// The reconstructed graph.
    pub graph: HnswGraph,
    /// External key → internal node id, as it stood at snapshot time.
    pub external_keys: HashMap<String, u32>,
}

/// Serializes `graph` (plus `external_keys`) to `{name}.json` in `store`,
/// via the backend's atomic write. Returns the SHA-256 checksum (first 16
/// hex chars, informational only — it is not verified on load) and the
/// payload size in bytes.
pub fn persist_graph(
    store: &dyn GraphStore,
    graph: &HnswGraph,
    external_keys: &HashMap<String, u32>,
    name: &str,
    created_at: &str,
) -> Result<(String, usize), PersistenceError> {
    let doc = to_snapshot_doc(graph, external_keys, created_at);
    let bytes = serde_json::to_vec(&doc).map_err(|e| PersistenceError::Corrupted(e.to_string()))?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let checksum = hex_prefix(&hasher.finalize(), 16);
    let size = bytes.len();

    store.atomic_write(&format!("{name}.json"), &bytes)?;
    Ok((checksum, size))
}

/// Loads `{name}.json` from `store` and reconstructs the graph and its
/// external-key mapping. Returns `Ok(None)` if the blob is absent.
///
/// A version mismatch against [`SNAPSHOT_VERSION`] is logged as a warning,
/// not treated as an error — the orchestrator decides whether to rebuild.
pub fn load_graph(store: &dyn GraphStore, name: &str) -> Result<Option<GraphSnapshot>, PersistenceError> {
    let Some(bytes) = store.read(&format!("{name}.json"))? else {
        return Ok(None);
    };
    let doc: SnapshotDoc =
        serde_json::from_slice(&bytes).map_err(|e| PersistenceError::Corrupted(e.to_string()))?;

    if doc.metadata.version != SNAPSHOT_VERSION {
        log::warn!(
            "snapshot {name} has version {}, expected {SNAPSHOT_VERSION}; proceeding anyway",
            doc.metadata.version
        );
    }

    let dimensions = doc
        .nodes
        .first()
        .map_or(0, |n| n.vector.len() as u32);
    let config = HnswConfig {
        m: doc.m,
        m0: doc.m.max(1) * 2,
        ef_construction: doc.ef_construction,
        dimensions: dimensions.max(1),
    };
    let mut graph = HnswGraph::new(config)?;
    graph.restore_from_snapshot(doc.nodes.iter().map(|n| (n.level, n.vector.clone())).collect())?;

    for node in &doc.nodes {
        for (layer, neighbors) in node.neighbors_by_layer.iter().enumerate() {
            let ids: Vec<NodeId> = neighbors.iter().map(|&id| NodeId(id)).collect();
            graph.set_neighbors_unchecked(NodeId(node.id), layer as u8, ids)?;
        }
    }
    if let Some(ep) = doc.entry_point_id {
        graph.set_entry_point_unchecked(NodeId(ep), doc.level_max);
    }

    Ok(Some(GraphSnapshot {
        graph,
        external_keys: doc.external_keys,
    }))
}

fn to_snapshot_doc(graph: &HnswGraph, external_keys: &HashMap<String, u32>, created_at: &str) -> SnapshotDoc {
    let nodes: Vec<SnapshotNode> = (0..graph.len() as u32)
        .map(|id| {
            let node: &Node = graph.node(NodeId(id)).expect("id within bounds");
            SnapshotNode {
                id,
                level: node.level,
                vector: node.vector.clone(),
                neighbors_by_layer: node
                    .neighbors
                    .iter()
                    .map(|layer| layer.iter().map(|n| n.0).collect())
                    .collect(),
            }
        })
        .collect();

    SnapshotDoc {
        m: graph.config.m,
        ef_construction: graph.config.ef_construction,
        level_max: graph.max_layer(),
        entry_point_id: graph.entry_point().map(|id| id.0),
        metadata: SnapshotMetadata {
            version: SNAPSHOT_VERSION.to_string(),
            created_at: created_at.to_string(),
            node_count: nodes.len(),
        },
        nodes,
        external_keys: external_keys.clone(),
    }
}

fn hex_prefix(bytes: &[u8], chars: usize) -> String {
    let mut s = String::with_capacity(chars);
    for b in bytes {
        if s.len() >= chars {
            break;
        }
        s.push_str(&format!("{b:02x}"));
    }
    s.truncate(chars);
    s
}

/// Renames `old` to `new` in `store`. Missing source is treated as success.
pub fn rename_file(store: &dyn GraphStore, old: &str, new: &str) -> Result<(), PersistenceError> {
    Ok(store.rename(&format!("{old}.json"), &format!("{new}.json"))?)
}

/// Removes `name` from `store`. Missing target is treated as success.
pub fn remove_file(store: &dyn GraphStore, name: &str) -> Result<(), PersistenceError> {
    Ok(store.remove(&format!("{name}.json"))?)
}

/// A single entry in [`get_snapshot_info`]'s listing.
#[derive(Debug, Clone)]
pub struct SnapshotEntry {
    /// Blob name, without the `.json` suffix.
    pub name: String,
    /// Size in bytes.
    pub size: usize,
    /// Last-modified time.
    pub modified: std::time::SystemTime,
}

/// Summary returned by [`get_snapshot_info`].
#[derive(Debug, Clone)]
pub struct SnapshotInfo {
    /// Number of `.json` blobs found.
    pub count: usize,
    /// Combined size of all blobs, in bytes.
    pub total_size: usize,
    /// Entries, descending by last-modified time.
    pub entries: Vec<SnapshotEntry>,
}

/// Enumerates `.json` blobs in `store`.
pub fn get_snapshot_info(store: &dyn GraphStore) -> Result<SnapshotInfo, PersistenceError> {
    let names = store.list("")?;
    let mut entries = Vec::new();
    for name in names {
        if let Some(stripped) = name.strip_suffix(".json") {
            if let Some(stat) = store.stat(&name)? {
                entries.push(SnapshotEntry {
                    name: stripped.to_string(),
                    size: stat.size,
                    modified: stat.modified,
                });
            }
        }
    }
    entries.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.name.cmp(&b.name)));
    let total_size = entries.iter().map(|e| e.size).sum();
    Ok(SnapshotInfo {
        count: entries.len(),
        total_size,
        entries,
    })
}

/// Prunes old snapshots. If `keep == 0`, retains only `latest` and `backup`
/// by name; otherwise keeps the first `keep` entries by mtime descending
/// (the ordering [`get_snapshot_info`] returns) and deletes the rest.
pub fn gc_old_snapshots(store: &dyn GraphStore, keep: usize) -> Result<(), PersistenceError> {
    if keep == 0 {
        let info = get_snapshot_info(store)?;
        for entry in info.entries {
            if entry.name != "latest" && entry.name != "backup" {
                remove_file(store, &entry.name)?;
            }
        }
        return Ok(());
    }

    let info = get_snapshot_info(store)?;
    for entry in info.entries.into_iter().skip(keep) {
        remove_file(store, &entry.name)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_store::MemoryGraphStore;
    use crate::hnsw::HnswConfig;

    fn sample_graph() -> (HnswGraph, HashMap<String, u32>) {
        let mut graph = HnswGraph::new(HnswConfig::new(4)).unwrap();
        let a = graph.insert(&[1.0, 0.0, 0.0, 0.0]).unwrap();
        let b = graph.insert(&[0.0, 1.0, 0.0, 0.0]).unwrap();
        let mut keys = HashMap::new();
        keys.insert("a".to_string(), a.0);
        keys.insert("b".to_string(), b.0);
        (graph, keys)
    }

    #[test]
    fn round_trip_preserves_topology_and_keys() {
        let store = MemoryGraphStore::new();
        let (graph, keys) = sample_graph();
        let (checksum, size) =
            persist_graph(&store, &graph, &keys, "latest", "2026-01-01T00:00:00Z").unwrap();
        assert_eq!(checksum.len(), 16);
        let stat = store.stat("latest.json").unwrap().unwrap();
        assert_eq!(size, stat.size);

        let snapshot = load_graph(&store, "latest").unwrap().unwrap();
        assert_eq!(snapshot.graph.len(), graph.len());
        assert_eq!(snapshot.external_keys, keys);
    }

    #[test]
    fn load_missing_returns_none() {
        let store = MemoryGraphStore::new();
        assert!(load_graph(&store, "latest").unwrap().is_none());
    }

    #[test]
    fn gc_zero_keeps_only_latest_and_backup() {
        let store = MemoryGraphStore::new();
        let (graph, keys) = sample_graph();
        persist_graph(&store, &graph, &keys, "latest", "t").unwrap();
        persist_graph(&store, &graph, &keys, "backup", "t").unwrap();
        persist_graph(&store, &graph, &keys, "2026-01-01T00-00-00Z", "t").unwrap();

        gc_old_snapshots(&store, 0).unwrap();
        let info = get_snapshot_info(&store).unwrap();
        let names: Vec<_> = info.entries.iter().map(|e| e.name.clone()).collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"latest".to_string()));
        assert!(names.contains(&"backup".to_string()));
    }

    #[test]
    fn rename_missing_source_is_success() {
        let store = MemoryGraphStore::new();
        assert!(rename_file(&store, "latest", "backup").is_ok());
    }

    #[test]
    fn gc_keeps_most_recently_written_entries() {
        let store = MemoryGraphStore::new();
        let (graph, keys) = sample_graph();
        persist_graph(&store, &graph, &keys, "oldest", "t").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        persist_graph(&store, &graph, &keys, "middle", "t").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        persist_graph(&store, &graph, &keys, "newest", "t").unwrap();

        gc_old_snapshots(&store, 2).unwrap();
        let info = get_snapshot_info(&store).unwrap();
        let names: Vec<_> = info.entries.iter().map(|e| e.name.clone()).collect();
        assert_eq!(names, vec!["newest".to_string(), "middle".to_string()]);
    }
}
