//! Fused result and knowledge bundle structures

use crate::backend::SourceType;
use serde::{Deserialize, Serialize};

/// One backend's contribution to a fused result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceContribution {
    pub source: SourceType,
    pub domain: String,
    /// The backend's own score, on its local scale
    pub raw_score: f32,
    /// Normalised score after combining with lexical relevance
    pub combined_score: f32,
}

/// A deduplicated candidate with its cross-source score and attribution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusedResult {
    /// Dedup key: entity id for graph-anchored results, content hash otherwise
    pub key: String,
    pub text: String,
    /// Domains that contributed, in first-seen order
    pub domains: Vec<String>,
    /// Weighted cross-source score; never decreases as corroborating sources
    /// merge in
    pub final_score: f32,
    /// Agreement across sources: share of total source weight contributed
    pub confidence: f32,
    pub sources: Vec<SourceContribution>,
}

/// Attribution entry for the response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceAttribution {
    pub domain: String,
    pub backend: SourceType,
    pub confidence: f32,
}

/// The per-request fusion output, consumed once by the generator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBundle {
    /// Top-K results
    pub primary: Vec<FusedResult>,
    /// Next-K results
    pub supporting: Vec<FusedResult>,
    /// Flattened attribution across primary and supporting results
    pub sources: Vec<SourceAttribution>,
    /// Mean confidence of the primary results; 0 when empty
    pub confidence: f32,
}

impl KnowledgeBundle {
    /// The bundle returned when no backend produced anything
    pub fn empty() -> Self {
        Self {
            primary: Vec::new(),
            supporting: Vec::new(),
            sources: Vec::new(),
            confidence: 0.0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_empty() && self.supporting.is_empty()
    }
}
