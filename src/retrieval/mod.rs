//! Hybrid retrieval and knowledge fusion
//!
//! This module implements the retrieval core: per-domain hybrid search across
//! vector, graph, and document backends, domain-level concurrent routing, and
//! score-weighted fusion of the combined candidate set into a ranked
//! knowledge bundle.

mod bundle;
mod fusion;
mod hybrid;
mod router;

pub use bundle::{FusedResult, KnowledgeBundle, SourceAttribution, SourceContribution};
pub use fusion::FusionEngine;
pub use hybrid::{DomainRetrieval, HybridEngine, RetrievalError};
pub use router::{DomainOutcomes, DomainRouter};
