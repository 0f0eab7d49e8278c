//! Embedding generation for vector retrieval
//!
//! [`EmbeddingProvider`] abstracts over embedding backends. Two are shipped:
//! a fastembed-backed local model and a deterministic hashing projection that
//! needs no model download (used offline and in tests). Embedding failures
//! never fail a query - they surface as an empty vector-search result.

mod provider;

pub use provider::{EmbeddingError, EmbeddingProvider, FastEmbedProvider, HashingProvider};

use crate::config::EmbeddingConfig;
use std::sync::Arc;

/// Build the provider selected in configuration
///
/// `hashing` mode takes its dimension from `vector_dim`; `fastembed` uses the
/// model's own dimension.
pub fn provider_from_config(
    config: &EmbeddingConfig,
    vector_dim: usize,
) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    match config.mode.as_str() {
        "hashing" => Ok(Arc::new(HashingProvider::new(vector_dim))),
        "fastembed" => Ok(Arc::new(FastEmbedProvider::new(&config.model)?)),
        other => Err(EmbeddingError::InitializationError(format!(
            "Unknown embedding mode: {}",
            other
        ))),
    }
}
