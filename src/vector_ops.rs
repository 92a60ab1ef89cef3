//! Vector primitives shared by the HNSW graph and the search engine.
//!
//! All distances in this crate are cosine similarity over L2-normalized
//! vectors, which reduces to a plain dot product. Normalization happens once,
//! at insertion and at query time, so the hot path never has to worry about
//! un-normalized input.

/// Normalizes `v` to unit L2 length in place.
///
/// Vectors whose norm is (numerically) zero are left unchanged rather than
/// producing `NaN`s — a zero vector has no well-defined direction.
pub fn normalize(v: &mut [f32]) {
    let norm = l2_norm(v);
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Returns a normalized copy of `v`, leaving the input untouched.
#[must_use]
pub fn normalized(v: &[f32]) -> Vec<f32> {
    let mut out = v.to_vec();
    normalize(&mut out);
    out
}

/// Computes the L2 (Euclidean) norm of `v`.
#[must_use]
pub fn l2_norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

/// Returns true if `v`'s L2 norm is within `tolerance` of 1.0.
#[must_use]
pub fn is_unit_norm(v: &[f32], tolerance: f32) -> bool {
    (l2_norm(v) - 1.0).abs() < tolerance
}

/// Dot product of two equal-length vectors.
///
/// # Panics
///
/// Panics if `a.len() != b.len()`. Callers at the HNSW/search boundary
/// should validate dimensions up front and return a `DimensionMismatch`
/// error instead of reaching this assertion.
#[inline]
#[must_use]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "dimension mismatch: {} != {}", a.len(), b.len());
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Cosine similarity between two unit-normalized vectors.
///
/// For vectors that are already unit length this is exactly their dot
/// product; this function does not re-normalize its inputs, so passing
/// non-unit vectors silently yields the un-normalized cosine numerator
/// rather than a true cosine score.
#[inline]
#[must_use]
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    dot(a, b)
}

/// A `(distance, id)` pair ordered by distance, for use in the binary heaps
/// that drive the HNSW greedy search. Distance here is "smaller is closer"
/// (i.e. `1.0 - similarity`), so the natural `Ord` gives a min-heap when
/// wrapped in `Reverse` and a max-heap unwrapped.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScoredId {
    /// Traversal distance (lower is closer).
    pub distance: f32,
    /// Internal node id this score belongs to.
    pub id: u32,
}

impl Eq for ScoredId {}

impl PartialOrd for ScoredId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoredId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance.total_cmp(&other.distance).then(self.id.cmp(&other.id))
    }
}

/// Converts a cosine similarity in `[-1, 1]` into a "distance" in `[0, 2]`
/// where 0 means identical. HNSW's search-layer bookkeeping is phrased in
/// terms of distance (smaller is better); callers converting back to a score
/// for the public API should use `1.0 - distance`.
#[inline]
#[must_use]
pub fn similarity_to_distance(similarity: f32) -> f32 {
    1.0 - similarity
}
