/// In-memory knowledge graph backend
use crate::backend::{
    BackendError, CandidatePayload, GraphBackend, Relation, RetrievalCandidate, SourceType,
};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::RwLock;

/// An entity node in the knowledge graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEntity {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Precomputed relevance/importance; 0.5 assumed when absent
    #[serde(default)]
    pub relevance: Option<f32>,
    #[serde(default)]
    pub relations: Vec<Relation>,
}

const DEFAULT_RELEVANCE: f32 = 0.5;

struct GraphInner {
    entities: Vec<GraphEntity>,
    by_id: AHashMap<String, usize>,
}

/// Domain-scoped knowledge graph
///
/// Lookup matches query tokens against entity names and descriptions and
/// returns each matched entity with its immediate relations.
pub struct KnowledgeGraph {
    domain: String,
    inner: RwLock<GraphInner>,
}

impl KnowledgeGraph {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            inner: RwLock::new(GraphInner {
                entities: Vec::new(),
                by_id: AHashMap::new(),
            }),
        }
    }

    /// Add or replace an entity
    pub fn add_entity(&self, entity: GraphEntity) -> Result<(), BackendError> {
        if entity.id.is_empty() {
            return Err(BackendError::InvalidInput(
                "Entity id cannot be empty".to_string(),
            ));
        }

        let mut inner = self.inner.write().unwrap();
        match inner.by_id.get(&entity.id) {
            Some(&idx) => inner.entities[idx] = entity,
            None => {
                let idx = inner.entities.len();
                inner.by_id.insert(entity.id.clone(), idx);
                inner.entities.push(entity);
            }
        }

        Ok(())
    }

    /// Add a relation from an existing entity
    pub fn add_relation(
        &self,
        from_id: &str,
        kind: impl Into<String>,
        target: impl Into<String>,
    ) -> Result<(), BackendError> {
        let mut inner = self.inner.write().unwrap();
        let idx = *inner
            .by_id
            .get(from_id)
            .ok_or_else(|| BackendError::InvalidInput(format!("Unknown entity: {}", from_id)))?;

        inner.entities[idx].relations.push(Relation {
            kind: kind.into(),
            target: target.into(),
        });

        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<GraphEntity> {
        let inner = self.inner.read().unwrap();
        inner.by_id.get(id).map(|&idx| inner.entities[idx].clone())
    }

    pub fn stats(&self) -> GraphStats {
        let inner = self.inner.read().unwrap();
        GraphStats {
            entity_count: inner.entities.len(),
            relation_count: inner.entities.iter().map(|e| e.relations.len()).sum(),
        }
    }

    fn tokens(text: &str) -> HashSet<String> {
        text.chars()
            .map(|c| {
                if c.is_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    ' '
                }
            })
            .collect::<String>()
            .split_whitespace()
            .filter(|t| t.len() >= 2)
            .map(|t| t.to_string())
            .collect()
    }
}

impl GraphBackend for KnowledgeGraph {
    fn search(&self, query: &str, limit: usize) -> Result<Vec<RetrievalCandidate>, BackendError> {
        let query_tokens = Self::tokens(query);
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }

        let inner = self.inner.read().unwrap();

        let mut matched: Vec<(&GraphEntity, usize)> = inner
            .entities
            .iter()
            .filter_map(|entity| {
                let entity_tokens =
                    Self::tokens(&format!("{} {}", entity.name, entity.description));
                let overlap = query_tokens.intersection(&entity_tokens).count();
                (overlap > 0).then_some((entity, overlap))
            })
            .collect();

        // More overlapping tokens first, then stored relevance, then id for a
        // stable order
        matched.sort_by(|a, b| {
            b.1.cmp(&a.1)
                .then_with(|| {
                    let ra = a.0.relevance.unwrap_or(DEFAULT_RELEVANCE);
                    let rb = b.0.relevance.unwrap_or(DEFAULT_RELEVANCE);
                    rb.partial_cmp(&ra).unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.0.id.cmp(&b.0.id))
        });

        let candidates = matched
            .into_iter()
            .take(limit)
            .map(|(entity, _)| RetrievalCandidate {
                id: format!("graph_{}", entity.id),
                source: SourceType::Graph,
                domain: self.domain.clone(),
                score: entity.relevance.unwrap_or(DEFAULT_RELEVANCE),
                payload: CandidatePayload::Entity {
                    entity_id: entity.id.clone(),
                    name: entity.name.clone(),
                    description: entity.description.clone(),
                    relations: entity.relations.clone(),
                },
            })
            .collect();

        Ok(candidates)
    }
}

/// Knowledge graph statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphStats {
    pub entity_count: usize,
    pub relation_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(id: &str, name: &str, description: &str, relevance: Option<f32>) -> GraphEntity {
        GraphEntity {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            relevance,
            relations: vec![],
        }
    }

    #[test]
    fn test_name_and_description_match() {
        let graph = KnowledgeGraph::new("eco");
        graph
            .add_entity(entity("val", "Validator", "Stakes tokens to secure the network", Some(0.8)))
            .unwrap();
        graph
            .add_entity(entity("gw", "Gateway", "Routes inbound requests", Some(0.6)))
            .unwrap();

        let results = graph.search("how does staking work", 10).unwrap();
        // "stakes" does not token-match "staking"; match on name instead
        let results2 = graph.search("validator rewards", 10).unwrap();
        assert!(results.len() <= 1);
        assert_eq!(results2.len(), 1);
        assert_eq!(results2[0].id, "graph_val");
        assert_eq!(results2[0].score, 0.8);
    }

    #[test]
    fn test_default_relevance() {
        let graph = KnowledgeGraph::new("eco");
        graph
            .add_entity(entity("gw", "Gateway", "Routes requests", None))
            .unwrap();

        let results = graph.search("gateway", 10).unwrap();
        assert_eq!(results[0].score, 0.5);
    }

    #[test]
    fn test_relations_included() {
        let graph = KnowledgeGraph::new("eco");
        graph
            .add_entity(entity("gw", "Gateway", "Routes requests", None))
            .unwrap();
        graph.add_relation("gw", "depends_on", "auth-service").unwrap();

        let results = graph.search("gateway", 10).unwrap();
        match &results[0].payload {
            CandidatePayload::Entity { relations, .. } => {
                assert_eq!(relations.len(), 1);
                assert_eq!(relations[0].kind, "depends_on");
                assert_eq!(relations[0].target, "auth-service");
            }
            other => panic!("Expected entity payload, got {:?}", other),
        }
    }

    #[test]
    fn test_more_overlap_ranks_higher() {
        let graph = KnowledgeGraph::new("eco");
        graph
            .add_entity(entity("a", "Token bridge", "Transfers tokens across chains", Some(0.4)))
            .unwrap();
        graph
            .add_entity(entity("b", "Token", "A unit of value", Some(0.9)))
            .unwrap();

        let results = graph.search("token bridge", 10).unwrap();
        assert_eq!(results[0].id, "graph_a");
    }

    #[test]
    fn test_no_match_is_empty() {
        let graph = KnowledgeGraph::new("eco");
        graph
            .add_entity(entity("gw", "Gateway", "Routes requests", None))
            .unwrap();

        let results = graph.search("unrelated terms", 10).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_replace_entity() {
        let graph = KnowledgeGraph::new("eco");
        graph
            .add_entity(entity("gw", "Gateway", "Old description", None))
            .unwrap();
        graph
            .add_entity(entity("gw", "Gateway", "New description", Some(0.7)))
            .unwrap();

        assert_eq!(graph.stats().entity_count, 1);
        assert_eq!(graph.get("gw").unwrap().description, "New description");
    }

    #[test]
    fn test_unknown_relation_source_rejected() {
        let graph = KnowledgeGraph::new("eco");
        assert!(graph.add_relation("missing", "uses", "thing").is_err());
    }
}
