//! Query service: the pipeline boundary
//!
//! Orchestrates context building, classification, routing, fusion, and
//! generation into a single response envelope. Partial backend failures
//! degrade quality silently (lower confidence, fewer sources); only invalid
//! input or total retrieval exhaustion produce an error.

use crate::cache::TtlCache;
use crate::classify::QueryClassifier;
use crate::context::{truncate_query, ContextBuilder, UserContext};
use crate::domains::{DomainDescriptor, DomainRegistry};
use crate::error::{BraidError, Result};
use crate::retrieval::{DomainRouter, FusionEngine, KnowledgeBundle, SourceAttribution};
use crate::storage::{HistoryStore, InteractionRecord};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Incoming query envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    pub user_id: String,
    pub session_id: String,
    /// Overrides automatic domain classification when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domains: Option<Vec<String>>,
}

/// Response metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub query_type: String,
    pub domains: Vec<String>,
    pub processing_time_ms: u64,
    /// The classifier fell back to rule-based detection
    pub classification_degraded: bool,
    /// False when the context store was unreachable
    pub personalised: bool,
}

/// Outgoing response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub response: String,
    pub metadata: ResponseMetadata,
    pub sources: Vec<SourceAttribution>,
    pub confidence: f32,
}

#[derive(Error, Debug)]
pub enum GenerateError {
    #[error("Generation failed: {0}")]
    Failed(String),
}

/// Generated response text with the generator's own confidence
#[derive(Debug, Clone)]
pub struct Generated {
    pub text: String,
    pub confidence: f32,
}

/// Response generation collaborator
///
/// Treated as a pure function at this boundary; its internals (an LLM, a
/// template, anything else) are out of scope for the retrieval core.
pub trait Generator: Send + Sync {
    fn generate(
        &self,
        query: &str,
        bundle: &KnowledgeBundle,
        context: &UserContext,
    ) -> std::result::Result<Generated, GenerateError>;
}

/// Deterministic generator answering directly from primary knowledge
///
/// Keeps the pipeline runnable end-to-end without any model; an empty bundle
/// produces an explicit no-knowledge signal rather than an error.
pub struct ExtractiveGenerator;

impl Generator for ExtractiveGenerator {
    fn generate(
        &self,
        _query: &str,
        bundle: &KnowledgeBundle,
        _context: &UserContext,
    ) -> std::result::Result<Generated, GenerateError> {
        if bundle.is_empty() {
            return Ok(Generated {
                text: "No supporting knowledge was found for this query.".to_string(),
                confidence: 0.0,
            });
        }

        let mut text = format!(
            "Based on {} retrieved knowledge item(s):\n",
            bundle.primary.len()
        );
        for (i, item) in bundle.primary.iter().enumerate() {
            text.push_str(&format!("{}. {}\n", i + 1, snippet(&item.text, 240)));
        }

        Ok(Generated {
            text,
            confidence: bundle.confidence,
        })
    }
}

fn snippet(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Engine health report; never exercises backends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub domains: usize,
}

/// The query service: orchestrates the full pipeline
pub struct QueryService {
    context_builder: Arc<ContextBuilder>,
    classifier: Arc<QueryClassifier>,
    router: Arc<DomainRouter>,
    fusion: Arc<FusionEngine>,
    generator: Arc<dyn Generator>,
    bundle_cache: Arc<TtlCache<KnowledgeBundle>>,
    history: Arc<HistoryStore>,
    registry: Arc<DomainRegistry>,
    started_at: Instant,
}

impl QueryService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        context_builder: Arc<ContextBuilder>,
        classifier: Arc<QueryClassifier>,
        router: Arc<DomainRouter>,
        fusion: Arc<FusionEngine>,
        generator: Arc<dyn Generator>,
        bundle_cache: Arc<TtlCache<KnowledgeBundle>>,
        history: Arc<HistoryStore>,
        registry: Arc<DomainRegistry>,
    ) -> Self {
        Self {
            context_builder,
            classifier,
            router,
            fusion,
            generator,
            bundle_cache,
            history,
            registry,
            started_at: Instant::now(),
        }
    }

    /// Process one query end to end
    pub async fn handle(&self, request: QueryRequest) -> Result<ResponseEnvelope> {
        validate(&request)?;

        let started = Instant::now();
        let query =
            truncate_query(&request.query, self.context_builder.max_query_len()).to_string();

        let context = self
            .context_builder
            .build(&request.user_id, &request.session_id, &query);

        let mut classified = self.classifier.classify(&query, &context);
        if let Some(requested) = &request.domains {
            classified.domains = self.classifier.sanitize_override(requested);
        }

        tracing::debug!(
            "Query classified as {} over domains {:?}",
            classified.query_type.as_str(),
            classified.domains
        );

        let cache_key = bundle_cache_key(&query, &classified.domains);
        let bundle = match self.bundle_cache.get(&cache_key) {
            Some(cached) => {
                tracing::debug!("Bundle cache hit for query fingerprint");
                cached
            }
            None => {
                let outcomes = self.router.route(&classified).await;

                let exhausted = outcomes.values().all(|outcome| match outcome {
                    Err(_) => true,
                    Ok(retrieval) => retrieval.exhausted(),
                });
                if exhausted {
                    return Err(BraidError::RetrievalExhausted);
                }

                let candidates = outcomes
                    .into_values()
                    .filter_map(|outcome| outcome.ok())
                    .flat_map(|retrieval| retrieval.candidates)
                    .collect();

                let bundle = self.fusion.fuse(candidates, &query);
                self.bundle_cache.put(cache_key, bundle.clone());
                bundle
            }
        };

        let generated = self
            .generator
            .generate(&query, &bundle, &context)
            .map_err(|e| BraidError::Server(e.to_string()))?;

        let confidence = ((bundle.confidence + generated.confidence) / 2.0).clamp(0.0, 1.0);

        let envelope = ResponseEnvelope {
            response: generated.text,
            metadata: ResponseMetadata {
                query_type: classified.query_type.as_str().to_string(),
                domains: classified.domains.clone(),
                processing_time_ms: started.elapsed().as_millis() as u64,
                classification_degraded: classified.degraded,
                personalised: context.personalised,
            },
            sources: bundle.sources,
            confidence,
        };

        self.record_interaction(
            &request,
            &query,
            classified.query_type.as_str(),
            &classified.domains,
        );

        Ok(envelope)
    }

    /// Append the interaction off the request path, best-effort
    fn record_interaction(
        &self,
        request: &QueryRequest,
        query: &str,
        query_type: &str,
        domains: &[String],
    ) {
        let record = InteractionRecord {
            user_id: request.user_id.clone(),
            session_id: request.session_id.clone(),
            query: query.to_string(),
            query_type: query_type.to_string(),
            domains: domains.to_vec(),
            created_at: chrono::Utc::now().timestamp(),
        };
        let history = self.history.clone();

        tokio::task::spawn_blocking(move || {
            if let Err(e) = history.append(&record) {
                tracing::warn!("Failed to append interaction history: {}", e);
            }
        });
    }

    /// Liveness report; reads configuration only, never touches backends
    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            domains: self.registry.len(),
        }
    }

    /// Configured domains and their backend descriptors
    pub fn domains(&self) -> Vec<DomainDescriptor> {
        self.registry.descriptors()
    }
}

/// Fail fast on malformed requests, before any backend is touched
fn validate(request: &QueryRequest) -> Result<()> {
    if request.query.trim().is_empty() {
        return Err(BraidError::InvalidRequest(
            "query must not be empty".to_string(),
        ));
    }
    if request.user_id.is_empty() {
        return Err(BraidError::InvalidRequest(
            "user_id must not be empty".to_string(),
        ));
    }
    if request.session_id.is_empty() {
        return Err(BraidError::InvalidRequest(
            "session_id must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn bundle_cache_key(query: &str, domains: &[String]) -> String {
    let material = format!("{}\n{}", query, domains.join(","));
    blake3::hash(material.as_bytes()).to_hex().to_string()
}
