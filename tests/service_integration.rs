//! Integration test: the full query pipeline behind the service boundary
//!
//! Builds a complete service over real in-process backends (hashing embedder,
//! HNSW, knowledge graph, Tantivy) plus deliberately broken stubs for the
//! degradation and exhaustion paths.

use braid::backend::{
    BackendError, DocumentBackend, DocumentIndex, DomainBackends, GraphBackend, GraphEntity,
    KnowledgeGraph, RetrievalCandidate, SourceType, VectorBackend, VectorIndex,
};
use braid::cache::TtlCache;
use braid::classify::QueryClassifier;
use braid::config::{ClassifyConfig, ContextConfig, FusionConfig, RetrievalConfig};
use braid::context::ContextBuilder;
use braid::domains::{BackendEndpoints, DomainConfig, DomainRegistry};
use braid::embedding::{EmbeddingProvider, HashingProvider};
use braid::error::BraidError;
use braid::retrieval::{DomainRouter, FusionEngine, HybridEngine};
use braid::service::{ExtractiveGenerator, QueryRequest, QueryService};
use braid::storage::{HistoryStore, InteractionRecord};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const DIM: usize = 64;

struct DownBackend;

impl VectorBackend for DownBackend {
    fn search(&self, _e: &[f32], _l: usize) -> Result<Vec<RetrievalCandidate>, BackendError> {
        Err(BackendError::Unavailable("connection refused".to_string()))
    }
}

impl GraphBackend for DownBackend {
    fn search(&self, _q: &str, _l: usize) -> Result<Vec<RetrievalCandidate>, BackendError> {
        Err(BackendError::Unavailable("connection refused".to_string()))
    }
}

impl DocumentBackend for DownBackend {
    fn search(&self, _q: &str, _l: usize) -> Result<Vec<RetrievalCandidate>, BackendError> {
        Err(BackendError::Unavailable("connection refused".to_string()))
    }
}

fn endpoints() -> BackendEndpoints {
    BackendEndpoints {
        vector: "hnsw://local".to_string(),
        graph: "memory://local".to_string(),
        document: "tantivy://local".to_string(),
    }
}

fn registry() -> Arc<DomainRegistry> {
    Arc::new(
        DomainRegistry::from_configs(
            vec![
                DomainConfig {
                    id: "eco".to_string(),
                    description: "Token economy".to_string(),
                    patterns: vec![
                        r"\bsmart\s+contracts?\b".to_string(),
                        r"\bstaking\b".to_string(),
                    ],
                    backends: endpoints(),
                },
                DomainConfig {
                    id: "pipe".to_string(),
                    description: "Data pipelines".to_string(),
                    patterns: vec![r"\bpipelines?\b".to_string()],
                    backends: endpoints(),
                },
                DomainConfig {
                    id: "general".to_string(),
                    description: "Catch-all".to_string(),
                    patterns: vec![],
                    backends: endpoints(),
                },
            ],
            "general",
        )
        .unwrap(),
    )
}

fn seeded_eco(temp: &TempDir, embedder: &HashingProvider) -> DomainBackends {
    let documents = [
        "Staking rewards are distributed weekly to active validators",
        "Smart contract audits must pass before mainnet deployment",
        "Governance proposals require a quorum of staked tokens",
    ];

    let vector = Arc::new(VectorIndex::new("eco", DIM, 200, 16, 50));
    let document = Arc::new(DocumentIndex::new("eco", temp.path().join("docs/eco")).unwrap());
    for (i, text) in documents.iter().enumerate() {
        vector.insert(text, &embedder.embed(text).unwrap()).unwrap();
        document.insert(i as u64, text).unwrap();
    }
    document.commit().unwrap();

    let graph = Arc::new(KnowledgeGraph::new("eco"));
    graph
        .add_entity(GraphEntity {
            id: "validator".to_string(),
            name: "Validator".to_string(),
            description: "Node operator that stakes tokens".to_string(),
            relevance: Some(0.9),
            relations: vec![],
        })
        .unwrap();

    DomainBackends {
        vector,
        graph,
        document,
    }
}

fn empty_domain(temp: &TempDir, id: &str) -> DomainBackends {
    DomainBackends {
        vector: Arc::new(VectorIndex::new(id, DIM, 200, 16, 50)),
        graph: Arc::new(KnowledgeGraph::new(id)),
        document: Arc::new(
            DocumentIndex::new(id, temp.path().join(format!("docs/{}", id))).unwrap(),
        ),
    }
}

fn down_domain() -> DomainBackends {
    DomainBackends {
        vector: Arc::new(DownBackend),
        graph: Arc::new(DownBackend),
        document: Arc::new(DownBackend),
    }
}

fn build_service(
    temp: &TempDir,
    backends: HashMap<String, DomainBackends>,
) -> (Arc<QueryService>, Arc<HistoryStore>) {
    let registry = registry();
    let history = Arc::new(HistoryStore::new(&temp.path().join("history.db")).unwrap());

    let retrieval_config = RetrievalConfig {
        top_k: 5,
        search_multiplier: 2,
        domain_timeout_ms: 5000,
        backend_timeout_ms: 2000,
        hnsw_ef_search: 50,
    };
    let fusion_config = FusionConfig {
        vector_weight: 0.4,
        graph_weight: 0.35,
        document_weight: 0.25,
        backend_weight: 0.6,
        relevance_weight: 0.4,
        primary_k: 5,
        supporting_k: 5,
    };

    let engine = Arc::new(HybridEngine::new(
        Arc::new(HashingProvider::new(DIM)),
        backends,
        retrieval_config,
    ));
    let router = Arc::new(DomainRouter::new(engine, Duration::from_secs(5)));

    let context_builder = Arc::new(ContextBuilder::new(
        history.clone(),
        Arc::new(TtlCache::disabled()),
        ContextConfig {
            history_limit: 10,
            max_query_len: 2048,
            preference_limit: 5,
        },
    ));
    let classifier = Arc::new(QueryClassifier::new(
        registry.clone(),
        ClassifyConfig {
            default_domain: "general".to_string(),
            preference_fallback: 2,
        },
    ));

    let service = Arc::new(QueryService::new(
        context_builder,
        classifier,
        router,
        Arc::new(FusionEngine::new(fusion_config)),
        Arc::new(ExtractiveGenerator),
        Arc::new(TtlCache::disabled()),
        history.clone(),
        registry,
    ));

    (service, history)
}

fn standard_backends(temp: &TempDir) -> HashMap<String, DomainBackends> {
    let embedder = HashingProvider::new(DIM);
    let mut backends = HashMap::new();
    backends.insert("eco".to_string(), seeded_eco(temp, &embedder));
    backends.insert("pipe".to_string(), empty_domain(temp, "pipe"));
    backends.insert("general".to_string(), empty_domain(temp, "general"));
    backends
}

fn request(query: &str) -> QueryRequest {
    QueryRequest {
        query: query.to_string(),
        user_id: "alice".to_string(),
        session_id: "s1".to_string(),
        domains: None,
    }
}

#[tokio::test]
async fn test_end_to_end_query() {
    let temp = TempDir::new().unwrap();
    let (service, _history) = build_service(&temp, standard_backends(&temp));

    let envelope = service
        .handle(request("How does staking work for validators?"))
        .await
        .unwrap();

    // "staking" pattern routes to eco
    assert_eq!(envelope.metadata.domains, vec!["eco"]);
    assert_eq!(envelope.metadata.query_type, "informational");
    assert!(envelope.metadata.personalised);
    assert!(!envelope.metadata.classification_degraded);

    assert!(!envelope.response.is_empty());
    assert!(envelope.confidence > 0.0);
    assert!(!envelope.sources.is_empty());
    assert!(envelope.sources.iter().all(|s| s.domain == "eco"));
}

#[tokio::test]
async fn test_domain_override_wins_over_patterns() {
    let temp = TempDir::new().unwrap();
    let (service, _history) = build_service(&temp, standard_backends(&temp));

    let mut req = request("How does staking work?");
    req.domains = Some(vec!["pipe".to_string()]);

    let envelope = service.handle(req).await.unwrap();
    assert_eq!(envelope.metadata.domains, vec!["pipe"]);
}

#[tokio::test]
async fn test_unknown_override_degrades_to_default() {
    let temp = TempDir::new().unwrap();
    let (service, _history) = build_service(&temp, standard_backends(&temp));

    let mut req = request("anything");
    req.domains = Some(vec!["bogus".to_string()]);

    let envelope = service.handle(req).await.unwrap();
    assert_eq!(envelope.metadata.domains, vec!["general"]);

    // The default domain is empty: explicit no-knowledge signal, confidence 0
    assert!(envelope.response.contains("No supporting knowledge"));
    assert_eq!(envelope.confidence, 0.0);
}

#[tokio::test]
async fn test_preference_fallback_from_history() {
    let temp = TempDir::new().unwrap();
    let (service, history) = build_service(&temp, standard_backends(&temp));

    // Alice's history is all eco-domain queries
    for i in 0..3 {
        history
            .append(&InteractionRecord {
                user_id: "alice".to_string(),
                session_id: "s0".to_string(),
                query: format!("earlier query {}", i),
                query_type: "informational".to_string(),
                domains: vec!["eco".to_string()],
                created_at: 100 + i,
            })
            .unwrap();
    }

    // No domain pattern matches; preferences decide
    let envelope = service
        .handle(request("How do I optimise resource usage?"))
        .await
        .unwrap();

    assert_eq!(envelope.metadata.domains, vec!["eco"]);
    assert_eq!(envelope.metadata.query_type, "informational");
}

#[tokio::test]
async fn test_invalid_requests_fail_fast() {
    let temp = TempDir::new().unwrap();
    let (service, _history) = build_service(&temp, standard_backends(&temp));

    let empty_query = QueryRequest {
        query: "  ".to_string(),
        user_id: "alice".to_string(),
        session_id: "s1".to_string(),
        domains: None,
    };
    assert!(matches!(
        service.handle(empty_query).await,
        Err(BraidError::InvalidRequest(_))
    ));

    let missing_user = QueryRequest {
        query: "hello".to_string(),
        user_id: String::new(),
        session_id: "s1".to_string(),
        domains: None,
    };
    assert!(matches!(
        service.handle(missing_user).await,
        Err(BraidError::InvalidRequest(_))
    ));
}

#[tokio::test]
async fn test_single_backend_outage_degrades_silently() {
    let temp = TempDir::new().unwrap();
    let embedder = HashingProvider::new(DIM);

    let healthy = seeded_eco(&temp, &embedder);
    let mut backends = HashMap::new();
    backends.insert(
        "eco".to_string(),
        DomainBackends {
            vector: Arc::new(DownBackend),
            graph: healthy.graph.clone(),
            document: healthy.document.clone(),
        },
    );
    backends.insert("pipe".to_string(), empty_domain(&temp, "pipe"));
    backends.insert("general".to_string(), empty_domain(&temp, "general"));

    let (service, _history) = build_service(&temp, backends);

    let envelope = service
        .handle(request("How does staking work for validators?"))
        .await
        .unwrap();

    // Still a valid answer, with no vector attribution
    assert!(!envelope.sources.is_empty());
    assert!(envelope
        .sources
        .iter()
        .all(|s| s.backend != SourceType::Vector));
}

#[tokio::test]
async fn test_total_exhaustion_is_an_error() {
    let temp = TempDir::new().unwrap();

    let mut backends = HashMap::new();
    backends.insert("eco".to_string(), down_domain());
    backends.insert("pipe".to_string(), down_domain());
    backends.insert("general".to_string(), down_domain());

    let (service, _history) = build_service(&temp, backends);

    let result = service.handle(request("How does staking work?")).await;
    assert!(matches!(result, Err(BraidError::RetrievalExhausted)));
}

#[tokio::test]
async fn test_interaction_recorded_after_response() {
    let temp = TempDir::new().unwrap();
    let (service, history) = build_service(&temp, standard_backends(&temp));

    service
        .handle(request("How does staking work?"))
        .await
        .unwrap();

    // The append is fire-and-forget; give it a moment
    for _ in 0..50 {
        if !history.recent("alice", 10).unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let recent = history.recent("alice", 10).unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].domains, vec!["eco"]);
    assert_eq!(recent[0].query_type, "informational");
}

#[tokio::test]
async fn test_health_and_domain_listing() {
    let temp = TempDir::new().unwrap();
    let (service, _history) = build_service(&temp, standard_backends(&temp));

    let health = service.health();
    assert_eq!(health.status, "ok");
    assert_eq!(health.domains, 3);

    let domains = service.domains();
    let ids: Vec<&str> = domains.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["eco", "pipe", "general"]);
}
