//! P4 (recall floor): on a random unit-vector dataset, average recall@10
//! against brute force must be >= 0.9. Grounded on
//! `edgevec/tests/integration_recall.rs`'s seeded-RNG, brute-force-ground-truth
//! style, adapted to recall@10 over cosine similarity instead of recall@1 over
//! L2Squared.

use noteindex::hnsw::{HnswConfig, HnswGraph, SearchScratch};
use noteindex::vector_ops::{dot, normalized};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

#[test]
fn recall_at_10_meets_floor_on_random_unit_vectors() {
    const DIM: usize = 64;
    const NUM_VECTORS: usize = 5_000;
    const NUM_QUERIES: usize = 50;
    const K: usize = 10;
    const EF_SEARCH: usize = 100;
    const SEED: u64 = 42;
    const RECALL_FLOOR: f32 = 0.9;

    let mut rng = ChaCha8Rng::seed_from_u64(SEED);
    let random_vector = |rng: &mut ChaCha8Rng| -> Vec<f32> {
        normalized(&(0..DIM).map(|_| rng.gen_range(-1.0f32..1.0)).collect::<Vec<_>>())
    };

    let mut config = HnswConfig::new(DIM as u32);
    config.ef_construction = 200;
    let mut graph = HnswGraph::new(config).unwrap();

    let vectors: Vec<Vec<f32>> = (0..NUM_VECTORS).map(|_| random_vector(&mut rng)).collect();
    for v in &vectors {
        graph.insert(v).unwrap();
    }

    let queries: Vec<Vec<f32>> = (0..NUM_QUERIES).map(|_| random_vector(&mut rng)).collect();
    let mut scratch = SearchScratch::new();
    let mut total_recall = 0.0f32;

    for query in &queries {
        let mut brute_force: Vec<(usize, f32)> = vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, dot(query, v)))
            .collect();
        brute_force.sort_by(|a, b| b.1.total_cmp(&a.1));
        let ground_truth: std::collections::HashSet<usize> =
            brute_force.iter().take(K).map(|(i, _)| *i).collect();

        let hits = graph.search_knn(&mut scratch, query, K, EF_SEARCH).unwrap();
        let found = hits.iter().filter(|h| ground_truth.contains(&(h.id.0 as usize))).count();
        total_recall += found as f32 / K as f32;
    }

    let recall = total_recall / NUM_QUERIES as f32;
    assert!(
        recall >= RECALL_FLOOR,
        "recall@{K} was {recall:.3}, below floor {RECALL_FLOOR}"
    );
}
