//! Retrieval backends: vector, graph, and document search
//!
//! Each backend trait covers one retrieval strategy for one domain. Raw
//! candidate scores are backend-local and not comparable across source types;
//! the fusion stage normalises them. Backend payloads are a tagged union so
//! branching on the source type is exhaustiveness-checked at compile time.

mod document;
mod graph;
mod vector;

pub use document::DocumentIndex;
pub use graph::{GraphEntity, GraphStats, KnowledgeGraph};
pub use vector::VectorIndex;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },
}

/// Which retrieval strategy produced a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Vector,
    Graph,
    Document,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vector => "vector",
            Self::Graph => "graph",
            Self::Document => "document",
        }
    }

    pub const ALL: [SourceType; 3] = [Self::Vector, Self::Graph, Self::Document];
}

/// A relation from a graph entity to another entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub kind: String,
    pub target: String,
}

/// Source-dependent candidate content
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CandidatePayload {
    /// A text span (vector and document hits)
    Text { text: String },
    /// An entity with its immediate relations (graph hits)
    Entity {
        entity_id: String,
        name: String,
        description: String,
        relations: Vec<Relation>,
    },
}

/// A single raw result from one backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalCandidate {
    /// Backend-qualified id, unique within one retrieval call
    /// (e.g. "vector_42", "graph_acme-gateway", "document_7")
    pub id: String,
    pub source: SourceType,
    pub domain: String,
    /// Backend-local score; not comparable across source types
    pub score: f32,
    pub payload: CandidatePayload,
}

impl RetrievalCandidate {
    /// Text representation used for relevance scoring and display
    pub fn extracted_text(&self) -> String {
        match &self.payload {
            CandidatePayload::Text { text } => text.clone(),
            CandidatePayload::Entity {
                name, description, ..
            } => {
                if description.is_empty() {
                    name.clone()
                } else {
                    format!("{}: {}", name, description)
                }
            }
        }
    }
}

/// Nearest-neighbour search over a domain-scoped vector index
pub trait VectorBackend: Send + Sync {
    /// Search with a pre-computed query embedding
    fn search(&self, embedding: &[f32], limit: usize)
        -> Result<Vec<RetrievalCandidate>, BackendError>;
}

/// Entity lookup over a domain-scoped knowledge graph
pub trait GraphBackend: Send + Sync {
    fn search(&self, query: &str, limit: usize) -> Result<Vec<RetrievalCandidate>, BackendError>;
}

/// Full-text search over a domain-scoped document store
pub trait DocumentBackend: Send + Sync {
    fn search(&self, query: &str, limit: usize) -> Result<Vec<RetrievalCandidate>, BackendError>;
}

/// The three backends serving one domain
#[derive(Clone)]
pub struct DomainBackends {
    pub vector: Arc<dyn VectorBackend>,
    pub graph: Arc<dyn GraphBackend>,
    pub document: Arc<dyn DocumentBackend>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracted_text_for_entity() {
        let candidate = RetrievalCandidate {
            id: "graph_gw".to_string(),
            source: SourceType::Graph,
            domain: "eco".to_string(),
            score: 0.5,
            payload: CandidatePayload::Entity {
                entity_id: "gw".to_string(),
                name: "Gateway".to_string(),
                description: "Ingress service".to_string(),
                relations: vec![],
            },
        };

        assert_eq!(candidate.extracted_text(), "Gateway: Ingress service");
    }

    #[test]
    fn test_payload_serialization_is_tagged() {
        let payload = CandidatePayload::Text {
            text: "hello".to_string(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "text");

        let parsed: CandidatePayload = serde_json::from_value(json).unwrap();
        assert!(matches!(parsed, CandidatePayload::Text { .. }));
    }
}
