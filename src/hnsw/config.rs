use serde::{Deserialize, Serialize};

/// HNSW algorithm parameters.
///
/// # Parameter guidelines
/// - `m`: 12-48 for high recall, 4-8 for speed.
/// - `ef_construction`: higher = better build quality, slower insert.
/// - `ef_search`: higher = better recall, slower query; the search engine
///   adapts this at query time (see [`crate::search_engine::SearchEngineConfig`]).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HnswConfig {
    /// Max connections per node on layers above 0. Default 16.
    pub m: u32,
    /// Max connections per node on layer 0 (typically `2 * m`). Default 32.
    pub m0: u32,
    /// Construction-time candidate list size. Default 200.
    pub ef_construction: u32,
    /// Vector dimensionality. Fixed for the lifetime of the index.
    pub dimensions: u32,
}

impl HnswConfig {
    /// Creates a default configuration for the given dimensionality.
    #[must_use]
    pub fn new(dimensions: u32) -> Self {
        Self {
            m: 16,
            m0: 32,
            ef_construction: 200,
            dimensions,
        }
    }

    /// Returns the level-assignment scale `mL = 1 / ln(m)`.
    #[must_use]
    pub fn level_mult(&self) -> f32 {
        let m = self.m as f32;
        if m > 1.0 {
            1.0 / m.ln()
        } else {
            0.0
        }
    }

    /// Validates the configuration, returning a descriptive error if any
    /// parameter is out of range.
    pub fn validate(&self) -> Result<(), super::GraphError> {
        if self.m <= 1 {
            return Err(super::GraphError::InvalidConfig(format!(
                "m must be > 1, got {}",
                self.m
            )));
        }
        if self.m0 < self.m {
            return Err(super::GraphError::InvalidConfig(format!(
                "m0 must be >= m, got {} < {}",
                self.m0, self.m
            )));
        }
        if self.dimensions == 0 {
            return Err(super::GraphError::InvalidConfig(
                "dimensions must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}
