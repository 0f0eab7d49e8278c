/// HNSW vector index for similarity search
use crate::backend::{BackendError, CandidatePayload, RetrievalCandidate, SourceType, VectorBackend};
use ahash::AHashMap;
use hnsw_rs::prelude::*;
use std::sync::RwLock;

/// Domain-scoped HNSW vector index with its id-to-text table
///
/// Uses cosine distance; reported scores are similarities (higher is closer).
/// The index is in-memory and rebuilt from the ingest path on startup.
pub struct VectorIndex {
    domain: String,
    index: RwLock<Hnsw<'static, f32, DistCosine>>,
    texts: RwLock<AHashMap<usize, String>>,
    dimension: usize,
    ef_search: usize,
    next_id: RwLock<usize>,
}

impl VectorIndex {
    /// Create a new vector index for one domain
    ///
    /// # Arguments
    /// * `dimension` - must match the embedding provider's dimension
    /// * `ef_construction` - HNSW construction parameter (higher = better recall, slower build)
    /// * `m` - HNSW M parameter (connections per layer)
    /// * `ef_search` - HNSW search parameter
    pub fn new(
        domain: impl Into<String>,
        dimension: usize,
        ef_construction: usize,
        m: usize,
        ef_search: usize,
    ) -> Self {
        let index = Hnsw::<f32, DistCosine>::new(
            m,
            dimension,
            ef_construction,
            200, // max_nb_connection
            DistCosine,
        );

        Self {
            domain: domain.into(),
            index: RwLock::new(index),
            texts: RwLock::new(AHashMap::new()),
            dimension,
            ef_search,
            next_id: RwLock::new(0),
        }
    }

    /// Insert a text with its embedding, returning the assigned id
    pub fn insert(&self, text: &str, embedding: &[f32]) -> Result<usize, BackendError> {
        if embedding.len() != self.dimension {
            return Err(BackendError::InvalidDimension {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }

        let id = {
            let mut next_id = self.next_id.write().unwrap();
            let id = *next_id;
            *next_id += 1;
            id
        };

        let data = embedding.to_vec();
        let index = self.index.write().unwrap();
        index.insert((&data, id));

        self.texts.write().unwrap().insert(id, text.to_string());

        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.texts.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

impl VectorBackend for VectorIndex {
    fn search(
        &self,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<RetrievalCandidate>, BackendError> {
        if embedding.len() != self.dimension {
            return Err(BackendError::InvalidDimension {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }

        if self.is_empty() {
            return Ok(Vec::new());
        }

        let neighbours = {
            let index = self.index.read().unwrap();
            index.search(embedding, limit, self.ef_search)
        };

        let texts = self.texts.read().unwrap();
        let candidates = neighbours
            .into_iter()
            .filter_map(|neighbour| {
                texts.get(&neighbour.d_id).map(|text| RetrievalCandidate {
                    id: format!("vector_{}", neighbour.d_id),
                    source: SourceType::Vector,
                    domain: self.domain.clone(),
                    // Cosine distance to similarity; clamped so scores stay
                    // non-negative
                    score: (1.0 - neighbour.distance).max(0.0),
                    payload: CandidatePayload::Text { text: text.clone() },
                })
            })
            .collect();

        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(dimension: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; dimension];
        v[hot] = 1.0;
        v
    }

    #[test]
    fn test_insert_and_search() {
        let index = VectorIndex::new("eco", 8, 200, 16, 50);

        index.insert("first", &unit(8, 0)).unwrap();
        index.insert("second", &unit(8, 1)).unwrap();

        let mut close = unit(8, 0);
        close[1] = 0.1;
        index.insert("third", &close).unwrap();

        assert_eq!(index.len(), 3);

        let results = index.search(&unit(8, 0), 2).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].id == "vector_0" || results[0].id == "vector_2");
        assert!(results[0].score > 0.8);
        assert_eq!(results[0].source, SourceType::Vector);
        assert_eq!(results[0].domain, "eco");
    }

    #[test]
    fn test_empty_index_returns_nothing() {
        let index = VectorIndex::new("eco", 8, 200, 16, 50);
        let results = index.search(&unit(8, 0), 5).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_dimension_validation() {
        let index = VectorIndex::new("eco", 8, 200, 16, 50);

        assert!(index.insert("bad", &unit(4, 0)).is_err());
        assert!(index.search(&unit(4, 0), 5).is_err());
    }

    #[test]
    fn test_scores_clamped_non_negative() {
        let index = VectorIndex::new("eco", 4, 200, 16, 50);

        index.insert("a", &[1.0, 0.0, 0.0, 0.0]).unwrap();
        // Opposite direction: cosine distance near 2
        let results = index.search(&[-1.0, 0.0, 0.0, 0.0], 1).unwrap();
        assert!(!results.is_empty());
        assert!(results[0].score >= 0.0);
    }
}
