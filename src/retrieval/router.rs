//! Domain router: concurrent fan-out across target domains
//!
//! One hybrid search per target domain, all in flight at once on a
//! [`JoinSet`], each bounded by the domain timeout. A failed or timed-out
//! domain is recorded as an error entry rather than dropped, so fusion can
//! report partial coverage. Total wall clock is bounded by the per-domain
//! timeout, not the sum of domain latencies.

use crate::classify::ClassifiedQuery;
use crate::retrieval::hybrid::{DomainRetrieval, HybridEngine, RetrievalError};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// Per-domain retrieval outcomes, keyed by domain id
pub type DomainOutcomes = BTreeMap<String, Result<DomainRetrieval, RetrievalError>>;

/// Fans a classified query out to its target domains
pub struct DomainRouter {
    engine: Arc<HybridEngine>,
    domain_timeout: Duration,
}

impl DomainRouter {
    pub fn new(engine: Arc<HybridEngine>, domain_timeout: Duration) -> Self {
        Self {
            engine,
            domain_timeout,
        }
    }

    /// Route the query to every target domain concurrently
    ///
    /// Cancellation is cooperative: dropping the returned future aborts the
    /// in-flight domain tasks with the `JoinSet`.
    pub async fn route(&self, classified: &ClassifiedQuery) -> DomainOutcomes {
        let mut tasks = JoinSet::new();

        for domain in &classified.domains {
            let engine = self.engine.clone();
            let query = classified.query.clone();
            let domain = domain.clone();
            let timeout = self.domain_timeout;

            tasks.spawn(async move {
                let top_k = engine.top_k();
                let outcome =
                    match tokio::time::timeout(timeout, engine.hybrid_search(&query, &domain, top_k))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(RetrievalError::Timeout {
                            ms: timeout.as_millis() as u64,
                        }),
                    };
                (domain, outcome)
            });
        }

        let mut outcomes = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((domain, outcome)) => {
                    outcomes.insert(domain, outcome);
                }
                Err(e) => {
                    tracing::error!("Domain retrieval task aborted: {}", e);
                }
            }
        }

        // A panicked task must still leave an error entry for its domain
        for domain in &classified.domains {
            outcomes.entry(domain.clone()).or_insert_with(|| {
                Err(RetrievalError::Internal(
                    "Retrieval task aborted".to_string(),
                ))
            });
        }

        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        BackendError, CandidatePayload, DocumentBackend, DomainBackends, GraphBackend,
        RetrievalCandidate, SourceType, VectorBackend,
    };
    use crate::classify::QueryType;
    use crate::config::RetrievalConfig;
    use crate::embedding::HashingProvider;
    use std::collections::HashMap;
    use std::time::Instant;

    /// Backend that blocks long enough to trip any timeout in these tests
    struct HangingBackend;

    impl HangingBackend {
        fn hang() -> Result<Vec<RetrievalCandidate>, BackendError> {
            std::thread::sleep(Duration::from_secs(5));
            Ok(Vec::new())
        }
    }

    impl VectorBackend for HangingBackend {
        fn search(&self, _e: &[f32], _l: usize) -> Result<Vec<RetrievalCandidate>, BackendError> {
            Self::hang()
        }
    }

    impl GraphBackend for HangingBackend {
        fn search(&self, _q: &str, _l: usize) -> Result<Vec<RetrievalCandidate>, BackendError> {
            Self::hang()
        }
    }

    impl DocumentBackend for HangingBackend {
        fn search(&self, _q: &str, _l: usize) -> Result<Vec<RetrievalCandidate>, BackendError> {
            Self::hang()
        }
    }

    struct InstantBackend(SourceType);

    impl InstantBackend {
        fn one(&self, domain: &str) -> Vec<RetrievalCandidate> {
            vec![RetrievalCandidate {
                id: format!("{}_0", self.0.as_str()),
                source: self.0,
                domain: domain.to_string(),
                score: 0.9,
                payload: CandidatePayload::Text {
                    text: "instant result".to_string(),
                },
            }]
        }
    }

    impl VectorBackend for InstantBackend {
        fn search(&self, _e: &[f32], _l: usize) -> Result<Vec<RetrievalCandidate>, BackendError> {
            Ok(self.one("fast"))
        }
    }

    impl GraphBackend for InstantBackend {
        fn search(&self, _q: &str, _l: usize) -> Result<Vec<RetrievalCandidate>, BackendError> {
            Ok(self.one("fast"))
        }
    }

    impl DocumentBackend for InstantBackend {
        fn search(&self, _q: &str, _l: usize) -> Result<Vec<RetrievalCandidate>, BackendError> {
            Ok(self.one("fast"))
        }
    }

    fn classified(domains: &[&str]) -> ClassifiedQuery {
        ClassifiedQuery {
            query: "anything".to_string(),
            query_type: QueryType::Informational,
            domains: domains.iter().map(|d| d.to_string()).collect(),
            degraded: false,
        }
    }

    fn router_with(domains: Vec<(&str, DomainBackends)>, timeout_ms: u64) -> DomainRouter {
        let mut map = HashMap::new();
        for (id, backends) in domains {
            map.insert(id.to_string(), backends);
        }
        let config = RetrievalConfig {
            top_k: 3,
            search_multiplier: 2,
            domain_timeout_ms: timeout_ms,
            backend_timeout_ms: timeout_ms,
            hnsw_ef_search: 50,
        };
        let engine = Arc::new(HybridEngine::new(
            Arc::new(HashingProvider::new(16)),
            map,
            config,
        ));
        DomainRouter::new(engine, Duration::from_millis(timeout_ms))
    }

    fn hanging() -> DomainBackends {
        DomainBackends {
            vector: Arc::new(HangingBackend),
            graph: Arc::new(HangingBackend),
            document: Arc::new(HangingBackend),
        }
    }

    fn instant() -> DomainBackends {
        DomainBackends {
            vector: Arc::new(InstantBackend(SourceType::Vector)),
            graph: Arc::new(InstantBackend(SourceType::Graph)),
            document: Arc::new(InstantBackend(SourceType::Document)),
        }
    }

    #[tokio::test]
    async fn test_all_domains_routed() {
        let router = router_with(vec![("a", instant()), ("b", instant())], 1000);

        let outcomes = router.route(&classified(&["a", "b"])).await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes["a"].is_ok());
        assert!(outcomes["b"].is_ok());
    }

    #[tokio::test]
    async fn test_unknown_domain_recorded_as_error() {
        let router = router_with(vec![("a", instant())], 1000);

        let outcomes = router.route(&classified(&["a", "ghost"])).await;
        assert!(outcomes["a"].is_ok());
        assert!(matches!(
            outcomes["ghost"],
            Err(RetrievalError::UnknownDomain(_))
        ));
    }

    #[tokio::test]
    async fn test_slow_domain_does_not_abort_siblings() {
        let router = router_with(vec![("slow", hanging()), ("fast", instant())], 200);

        let outcomes = router.route(&classified(&["slow", "fast"])).await;

        let fast = outcomes["fast"].as_ref().unwrap();
        assert_eq!(fast.candidates.len(), 3);

        // The hanging domain times out at the backend level and comes back
        // with every strategy failed, never as a missing entry
        match &outcomes["slow"] {
            Ok(retrieval) => assert!(retrieval.exhausted()),
            Err(RetrievalError::Timeout { .. }) => {}
            other => panic!("Unexpected outcome for slow domain: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_route_wall_clock_is_bounded() {
        // Four hanging domains with a 200ms timeout must complete in roughly
        // one timeout, not four
        let router = router_with(
            vec![
                ("d1", hanging()),
                ("d2", hanging()),
                ("d3", hanging()),
                ("d4", hanging()),
            ],
            200,
        );

        let start = Instant::now();
        let outcomes = router.route(&classified(&["d1", "d2", "d3", "d4"])).await;
        let elapsed = start.elapsed();

        assert_eq!(outcomes.len(), 4);
        assert!(
            elapsed < Duration::from_millis(800),
            "route took {:?}, expected parallel fan-out",
            elapsed
        );
    }
}
