//! Hybrid search: three retrieval strategies per domain, run concurrently
//!
//! Each strategy is fault-isolated: a backend that errors, panics, or times
//! out contributes an empty candidate list and is recorded as failed, while
//! the surviving strategies still return results. Backend calls run on the
//! blocking pool with individual timeouts, so one slow backend cannot hold a
//! domain past its budget.

use crate::backend::{BackendError, DomainBackends, RetrievalCandidate, SourceType};
use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingProvider;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Unknown domain: {0}")]
    UnknownDomain(String),

    #[error("Domain retrieval timed out after {ms} ms")]
    Timeout { ms: u64 },

    #[error("Retrieval failed: {0}")]
    Internal(String),
}

/// The outcome of one domain's hybrid search
#[derive(Debug)]
pub struct DomainRetrieval {
    pub domain: String,
    /// Raw candidates from all surviving strategies; not deduplicated across
    /// sources (fusion's job)
    pub candidates: Vec<RetrievalCandidate>,
    /// Strategies that produced an error or timed out (an empty result from
    /// a healthy backend is not a failure)
    pub failed: Vec<SourceType>,
}

impl DomainRetrieval {
    /// True when every strategy failed outright
    pub fn exhausted(&self) -> bool {
        self.failed.len() == SourceType::ALL.len()
    }
}

/// Hybrid retrieval engine over all configured domains
pub struct HybridEngine {
    embedder: Arc<dyn EmbeddingProvider>,
    backends: HashMap<String, DomainBackends>,
    config: RetrievalConfig,
}

impl HybridEngine {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        backends: HashMap<String, DomainBackends>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            backends,
            config,
        }
    }

    pub fn top_k(&self) -> usize {
        self.config.top_k
    }

    /// Search one domain across all three strategies concurrently
    ///
    /// Each strategy over-fetches `top_k * search_multiplier` raw candidates
    /// so fusion has enough corroboration signal to re-rank on.
    pub async fn hybrid_search(
        &self,
        query: &str,
        domain: &str,
        top_k: usize,
    ) -> Result<DomainRetrieval, RetrievalError> {
        let backends = self
            .backends
            .get(domain)
            .ok_or_else(|| RetrievalError::UnknownDomain(domain.to_string()))?;

        let fetch = top_k * self.config.search_multiplier;

        let (vector, graph, document) = tokio::join!(
            self.vector_search(backends, query, fetch),
            self.graph_search(backends, query, fetch),
            self.document_search(backends, query, fetch),
        );

        let mut candidates = Vec::new();
        let mut failed = Vec::new();

        for (source, outcome) in [
            (SourceType::Vector, vector),
            (SourceType::Graph, graph),
            (SourceType::Document, document),
        ] {
            match outcome {
                Ok(mut list) => {
                    list.truncate(fetch);
                    candidates.append(&mut list);
                }
                Err(e) => {
                    tracing::warn!(
                        "{} search failed for domain {}: {}",
                        source.as_str(),
                        domain,
                        e
                    );
                    failed.push(source);
                }
            }
        }

        tracing::debug!(
            "Hybrid search in {}: {} candidates, {} failed strategies",
            domain,
            candidates.len(),
            failed.len()
        );

        Ok(DomainRetrieval {
            domain: domain.to_string(),
            candidates,
            failed,
        })
    }

    /// Embed the query, then search the vector index
    ///
    /// An embedding failure counts as a vector-strategy failure; the other
    /// strategies are unaffected.
    async fn vector_search(
        &self,
        backends: &DomainBackends,
        query: &str,
        fetch: usize,
    ) -> Result<Vec<RetrievalCandidate>, BackendError> {
        let embedder = self.embedder.clone();
        let text = query.to_string();
        let embedding = self
            .run_blocking(move || embedder.embed(&text).map_err(|e| {
                BackendError::Unavailable(format!("Embedding failed: {}", e))
            }))
            .await?;

        let backend = backends.vector.clone();
        self.run_blocking(move || backend.search(&embedding, fetch))
            .await
    }

    async fn graph_search(
        &self,
        backends: &DomainBackends,
        query: &str,
        fetch: usize,
    ) -> Result<Vec<RetrievalCandidate>, BackendError> {
        let backend = backends.graph.clone();
        let text = query.to_string();
        self.run_blocking(move || backend.search(&text, fetch)).await
    }

    async fn document_search(
        &self,
        backends: &DomainBackends,
        query: &str,
        fetch: usize,
    ) -> Result<Vec<RetrievalCandidate>, BackendError> {
        let backend = backends.document.clone();
        let text = query.to_string();
        self.run_blocking(move || backend.search(&text, fetch)).await
    }

    /// Run one backend call on the blocking pool under the backend timeout
    async fn run_blocking<T, F>(&self, f: F) -> Result<T, BackendError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, BackendError> + Send + 'static,
    {
        let timeout = Duration::from_millis(self.config.backend_timeout_ms);

        match tokio::time::timeout(timeout, tokio::task::spawn_blocking(f)).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(BackendError::Unavailable(format!(
                "Backend task failed: {}",
                join_error
            ))),
            Err(_) => Err(BackendError::Unavailable(format!(
                "Backend call exceeded {} ms",
                timeout.as_millis()
            ))),
        }
    }
}
