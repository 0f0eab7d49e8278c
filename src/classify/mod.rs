//! Query classification: intent type and target domains
//!
//! Type classification goes through a pluggable [`TypeClassifier`] capability
//! trait so a statistical model can be injected at construction time; the
//! deterministic keyword classifier is always available as the fallback.
//! Domain detection is strictly ordered: configured patterns, then the user's
//! historical preferences, then the configured default domain.

use crate::config::ClassifyConfig;
use crate::context::UserContext;
use crate::domains::DomainRegistry;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifyError {
    #[error("Classifier unavailable: {0}")]
    Unavailable(String),
}

/// Query intent type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Analytical,
    Transactional,
    Informational,
    Navigational,
    Generative,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analytical => "analytical",
            Self::Transactional => "transactional",
            Self::Informational => "informational",
            Self::Navigational => "navigational",
            Self::Generative => "generative",
        }
    }

    /// Tie-break priority: lower wins when confidence scores are equal
    fn priority(&self) -> u8 {
        match self {
            Self::Informational => 0,
            Self::Analytical => 1,
            Self::Transactional => 2,
            Self::Navigational => 3,
            Self::Generative => 4,
        }
    }
}

/// A type classification with its confidence
#[derive(Debug, Clone, Copy)]
pub struct TypeScore {
    pub query_type: QueryType,
    pub confidence: f32,
}

/// Capability interface for type classification
///
/// Implementations may be probabilistic, but must always return exactly one
/// type. Selected at construction time, not via runtime reflection.
pub trait TypeClassifier: Send + Sync {
    fn classify(&self, query: &str) -> Result<TypeScore, ClassifyError>;
    fn name(&self) -> &str;
}

/// Deterministic rule-based type classifier
///
/// Scores each type by keyword hits and picks the highest, resolving ties by
/// the fixed priority order informational > analytical > transactional >
/// navigational > generative.
pub struct KeywordTypeClassifier;

const TYPE_KEYWORDS: &[(QueryType, &[&str])] = &[
    (
        QueryType::Analytical,
        &[
            "analyze", "analyse", "compare", "why", "trend", "cause", "impact",
            "performance", "statistics", "metric", "breakdown",
        ],
    ),
    (
        QueryType::Transactional,
        &[
            "create", "update", "delete", "deploy", "execute", "submit", "transfer",
            "buy", "sell", "register", "cancel",
        ],
    ),
    (
        QueryType::Informational,
        &[
            "what", "how", "explain", "describe", "definition", "meaning", "guide",
            "documentation", "overview", "help",
        ],
    ),
    (
        QueryType::Navigational,
        &["where", "find", "locate", "show", "open", "list", "browse"],
    ),
    (
        QueryType::Generative,
        &[
            "write", "generate", "draft", "compose", "summarize", "summarise",
            "suggest", "propose",
        ],
    ),
];

impl KeywordTypeClassifier {
    fn tokens(query: &str) -> HashSet<String> {
        query
            .chars()
            .map(|c| {
                if c.is_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    ' '
                }
            })
            .collect::<String>()
            .split_whitespace()
            .map(|t| t.to_string())
            .collect()
    }
}

impl TypeClassifier for KeywordTypeClassifier {
    fn classify(&self, query: &str) -> Result<TypeScore, ClassifyError> {
        let tokens = Self::tokens(query);

        let mut best: Option<(QueryType, usize)> = None;
        for (query_type, keywords) in TYPE_KEYWORDS {
            let hits = keywords.iter().filter(|k| tokens.contains(**k)).count();
            let better = match best {
                None => true,
                Some((current, current_hits)) => {
                    hits > current_hits
                        || (hits == current_hits && query_type.priority() < current.priority())
                }
            };
            if better {
                best = Some((*query_type, hits));
            }
        }

        // No keyword hit at all degrades to the highest-priority type
        let (query_type, hits) = best.unwrap_or((QueryType::Informational, 0));
        let confidence = if hits == 0 {
            0.2
        } else {
            (0.5 + 0.15 * hits as f32).min(0.95)
        };

        Ok(TypeScore {
            query_type,
            confidence,
        })
    }

    fn name(&self) -> &str {
        "keyword"
    }
}

/// Fully classified query
#[derive(Debug, Clone)]
pub struct ClassifiedQuery {
    pub query: String,
    pub query_type: QueryType,
    /// Target domains, deduplicated, ordered by detection precedence
    pub domains: Vec<String>,
    /// True when the primary classifier failed and the keyword fallback ran
    pub degraded: bool,
}

/// Classifier facade combining type classification and domain detection
pub struct QueryClassifier {
    primary: Option<Arc<dyn TypeClassifier>>,
    fallback: KeywordTypeClassifier,
    registry: Arc<DomainRegistry>,
    config: ClassifyConfig,
}

impl QueryClassifier {
    /// Rule-based classification only
    pub fn new(registry: Arc<DomainRegistry>, config: ClassifyConfig) -> Self {
        Self {
            primary: None,
            fallback: KeywordTypeClassifier,
            registry,
            config,
        }
    }

    /// Inject a primary (possibly statistical) type classifier
    ///
    /// The keyword classifier remains as the fallback when the primary one is
    /// unavailable.
    pub fn with_primary(
        registry: Arc<DomainRegistry>,
        config: ClassifyConfig,
        primary: Arc<dyn TypeClassifier>,
    ) -> Self {
        Self {
            primary: Some(primary),
            fallback: KeywordTypeClassifier,
            registry,
            config,
        }
    }

    /// Classify a query against its context
    ///
    /// Never fails: classifier outages degrade to the keyword fallback and an
    /// unclassifiable query still lands on the default domain.
    pub fn classify(&self, query: &str, context: &UserContext) -> ClassifiedQuery {
        let (score, degraded) = self.classify_type(query);
        let domains = self.detect_domains(query, context);

        ClassifiedQuery {
            query: query.to_string(),
            query_type: score.query_type,
            domains,
            degraded,
        }
    }

    fn classify_type(&self, query: &str) -> (TypeScore, bool) {
        if let Some(primary) = &self.primary {
            match primary.classify(query) {
                Ok(score) => return (score, false),
                Err(e) => {
                    tracing::warn!(
                        "Primary classifier '{}' unavailable, falling back to rules: {}",
                        primary.name(),
                        e
                    );
                }
            }
        }

        let degraded = self.primary.is_some();
        match self.fallback.classify(query) {
            Ok(score) => (score, degraded),
            // The keyword classifier never fails; the trait allows it
            Err(_) => (
                TypeScore {
                    query_type: QueryType::Informational,
                    confidence: 0.0,
                },
                degraded,
            ),
        }
    }

    /// Domain detection precedence: patterns, then preferences, then default
    fn detect_domains(&self, query: &str, context: &UserContext) -> Vec<String> {
        let mut domains = self.registry.detect(query);

        if domains.is_empty() {
            domains = context
                .domain_preferences
                .iter()
                .filter(|d| self.registry.contains(d))
                .take(self.config.preference_fallback)
                .cloned()
                .collect();
        }

        if domains.is_empty() {
            domains.push(self.config.default_domain.clone());
        }

        dedup_preserving_order(domains)
    }

    /// Restrict an explicit domain override to configured domains
    ///
    /// An override naming only unknown domains degrades to the default domain
    /// rather than erroring.
    pub fn sanitize_override(&self, requested: &[String]) -> Vec<String> {
        let mut domains: Vec<String> = requested
            .iter()
            .filter(|d| self.registry.contains(d))
            .cloned()
            .collect();

        if domains.is_empty() {
            domains.push(self.config.default_domain.clone());
        }

        dedup_preserving_order(domains)
    }
}

fn dedup_preserving_order(domains: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    domains
        .into_iter()
        .filter(|d| seen.insert(d.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::{BackendEndpoints, DomainConfig};
    use std::collections::BTreeMap;

    fn registry() -> Arc<DomainRegistry> {
        let endpoints = BackendEndpoints {
            vector: "hnsw://local".to_string(),
            graph: "memory://local".to_string(),
            document: "tantivy://local".to_string(),
        };
        Arc::new(
            DomainRegistry::from_configs(
                vec![
                    DomainConfig {
                        id: "eco".to_string(),
                        description: String::new(),
                        patterns: vec![r"\bsmart\s+contracts?\b".to_string()],
                        backends: endpoints.clone(),
                    },
                    DomainConfig {
                        id: "pipe".to_string(),
                        description: String::new(),
                        patterns: vec![r"\bpipelines?\b".to_string()],
                        backends: endpoints.clone(),
                    },
                    DomainConfig {
                        id: "general".to_string(),
                        description: String::new(),
                        patterns: vec![],
                        backends: endpoints,
                    },
                ],
                "general",
            )
            .unwrap(),
        )
    }

    fn classifier() -> QueryClassifier {
        QueryClassifier::new(
            registry(),
            ClassifyConfig {
                default_domain: "general".to_string(),
                preference_fallback: 2,
            },
        )
    }

    fn context_with_preferences(preferences: &[&str]) -> UserContext {
        UserContext {
            user_id: "alice".to_string(),
            session_id: "s1".to_string(),
            history: Vec::new(),
            domain_preferences: preferences.iter().map(|d| d.to_string()).collect(),
            metadata: BTreeMap::new(),
            personalised: true,
        }
    }

    struct FailingClassifier;

    impl TypeClassifier for FailingClassifier {
        fn classify(&self, _query: &str) -> Result<TypeScore, ClassifyError> {
            Err(ClassifyError::Unavailable("model offline".to_string()))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    #[test]
    fn test_pattern_match_beats_preferences() {
        let classifier = classifier();
        let context = context_with_preferences(&["pipe"]);

        let classified = classifier.classify("smart contract deployment", &context);
        assert_eq!(classified.domains, vec!["eco"]);
    }

    #[test]
    fn test_preference_fallback() {
        let classifier = classifier();
        let context = context_with_preferences(&["eco"]);

        // No pattern matches "optimise"
        let classified = classifier.classify("How do I optimise resource usage?", &context);
        assert_eq!(classified.domains, vec!["eco"]);
        assert_eq!(classified.query_type, QueryType::Informational);
    }

    #[test]
    fn test_default_fallback() {
        let classifier = classifier();
        let context = context_with_preferences(&[]);

        let classified = classifier.classify("completely unmatched text", &context);
        assert_eq!(classified.domains, vec!["general"]);
    }

    #[test]
    fn test_preference_fallback_is_capped() {
        let classifier = classifier();
        let context = context_with_preferences(&["eco", "pipe", "general"]);

        let classified = classifier.classify("no pattern here", &context);
        assert_eq!(classified.domains, vec!["eco", "pipe"]);
    }

    #[test]
    fn test_unknown_preferences_skipped() {
        let classifier = classifier();
        let context = context_with_preferences(&["retired", "eco"]);

        let classified = classifier.classify("no pattern here", &context);
        assert_eq!(classified.domains, vec!["eco"]);
    }

    #[test]
    fn test_classification_is_idempotent() {
        let classifier = classifier();
        let context = context_with_preferences(&["eco"]);

        let first = classifier.classify("compare smart contract pipelines", &context);
        for _ in 0..10 {
            let again = classifier.classify("compare smart contract pipelines", &context);
            assert_eq!(again.domains, first.domains);
            assert_eq!(again.query_type, first.query_type);
        }
    }

    #[test]
    fn test_type_keywords() {
        let classifier = KeywordTypeClassifier;

        let cases = [
            ("compare throughput trends", QueryType::Analytical),
            ("deploy the new release", QueryType::Transactional),
            ("what is staking", QueryType::Informational),
            ("where is the admin panel", QueryType::Navigational),
            ("draft a summary of findings", QueryType::Generative),
        ];

        for (query, expected) in cases {
            let score = classifier.classify(query).unwrap();
            assert_eq!(score.query_type, expected, "query: {}", query);
        }
    }

    #[test]
    fn test_tie_resolved_by_priority() {
        let classifier = KeywordTypeClassifier;

        // "what" (informational) and "compare" (analytical) both hit once;
        // informational wins the tie
        let score = classifier.classify("what would compare").unwrap();
        assert_eq!(score.query_type, QueryType::Informational);
    }

    #[test]
    fn test_no_keywords_defaults_to_informational() {
        let classifier = KeywordTypeClassifier;
        let score = classifier.classify("zzz qqq").unwrap();
        assert_eq!(score.query_type, QueryType::Informational);
        assert!(score.confidence < 0.5);
    }

    #[test]
    fn test_primary_failure_degrades_to_rules() {
        let classifier = QueryClassifier::with_primary(
            registry(),
            ClassifyConfig {
                default_domain: "general".to_string(),
                preference_fallback: 2,
            },
            Arc::new(FailingClassifier),
        );
        let context = context_with_preferences(&[]);

        let classified = classifier.classify("what is staking", &context);
        assert!(classified.degraded);
        assert_eq!(classified.query_type, QueryType::Informational);
    }

    #[test]
    fn test_sanitize_override() {
        let classifier = classifier();

        let kept = classifier.sanitize_override(&["pipe".to_string(), "bogus".to_string()]);
        assert_eq!(kept, vec!["pipe"]);

        let degraded = classifier.sanitize_override(&["bogus".to_string()]);
        assert_eq!(degraded, vec!["general"]);

        let deduped =
            classifier.sanitize_override(&["eco".to_string(), "eco".to_string()]);
        assert_eq!(deduped, vec!["eco"]);
    }
}
