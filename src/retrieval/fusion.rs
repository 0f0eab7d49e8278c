//! Knowledge fusion: dedup, re-rank, and merge candidates across backends
//!
//! Raw candidates arrive scored on backend-local scales. Fusion collapses
//! near-duplicates onto one key, scores each key's lexical relevance to the
//! query independently of the backends, normalises backend scores per source
//! type, and combines everything into a single cross-source ranking with
//! full attribution.

use crate::backend::{CandidatePayload, RetrievalCandidate, SourceType};
use crate::config::FusionConfig;
use crate::retrieval::bundle::{
    FusedResult, KnowledgeBundle, SourceAttribution, SourceContribution,
};
use ahash::AHashMap;

/// Knowledge fusion engine
pub struct FusionEngine {
    config: FusionConfig,
}

struct Group {
    key: String,
    text: String,
    domains: Vec<String>,
    contributions: AHashMap<SourceType, (String, f32)>,
}

impl Group {
    fn new(key: String) -> Self {
        Self {
            key,
            text: String::new(),
            domains: Vec::new(),
            contributions: AHashMap::new(),
        }
    }

    fn absorb(&mut self, candidate: &RetrievalCandidate) {
        let text = candidate.extracted_text();
        if text.len() > self.text.len() {
            self.text = text;
        }

        if !self.domains.contains(&candidate.domain) {
            self.domains.push(candidate.domain.clone());
        }

        // Keep the best raw score per source type
        let entry = self
            .contributions
            .entry(candidate.source)
            .or_insert_with(|| (candidate.domain.clone(), candidate.score));
        if candidate.score > entry.1 {
            *entry = (candidate.domain.clone(), candidate.score);
        }
    }
}

impl FusionEngine {
    pub fn new(config: FusionConfig) -> Self {
        Self { config }
    }

    fn source_weight(&self, source: SourceType) -> f32 {
        match source {
            SourceType::Vector => self.config.vector_weight,
            SourceType::Graph => self.config.graph_weight,
            SourceType::Document => self.config.document_weight,
        }
    }

    /// Fuse raw candidates into a ranked knowledge bundle
    ///
    /// Zero candidates is not an error: the result is an empty bundle with
    /// confidence 0, and the generator decides how to degrade.
    pub fn fuse(&self, candidates: Vec<RetrievalCandidate>, query: &str) -> KnowledgeBundle {
        if candidates.is_empty() {
            return KnowledgeBundle::empty();
        }

        let source_max = per_source_max(&candidates);
        let groups = group_candidates(&candidates);

        // Lexical relevance is computed against the deduplicated pool so
        // corpus statistics are not skewed by cross-backend duplicates
        let doc_tokens: Vec<Vec<String>> = groups.iter().map(|g| tokenize(&g.text)).collect();
        let idf = inverse_document_frequencies(&doc_tokens);
        let query_tokens = tokenize(query);

        let total_weight: f32 = SourceType::ALL
            .iter()
            .map(|s| self.source_weight(*s))
            .sum();
        let combine_weight = self.config.backend_weight + self.config.relevance_weight;

        let mut fused: Vec<FusedResult> = groups
            .iter()
            .zip(doc_tokens.iter())
            .map(|(group, tokens)| {
                let relevance = lexical_relevance(&query_tokens, tokens, &idf);

                let mut sources: Vec<SourceContribution> = Vec::new();
                let mut final_score = 0.0;
                let mut contributing_weight = 0.0;

                for source in SourceType::ALL {
                    let Some((domain, raw)) = group.contributions.get(&source) else {
                        continue;
                    };

                    let max = source_max.get(&source).copied().unwrap_or(1.0);
                    let norm = if max > 0.0 { raw / max } else { 0.0 };
                    let combined = (self.config.backend_weight * norm
                        + self.config.relevance_weight * relevance)
                        / combine_weight;

                    let weight = self.source_weight(source);
                    final_score += weight * combined;
                    contributing_weight += weight;

                    sources.push(SourceContribution {
                        source,
                        domain: domain.clone(),
                        raw_score: *raw,
                        combined_score: combined,
                    });
                }

                FusedResult {
                    key: group.key.clone(),
                    text: group.text.clone(),
                    domains: group.domains.clone(),
                    final_score: final_score / total_weight,
                    confidence: contributing_weight / total_weight,
                    sources,
                }
            })
            .collect();

        fused.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.key.cmp(&b.key))
        });

        let supporting = fused
            .split_off(fused.len().min(self.config.primary_k))
            .into_iter()
            .take(self.config.supporting_k)
            .collect::<Vec<_>>();
        let primary = fused;

        let confidence = if primary.is_empty() {
            0.0
        } else {
            primary.iter().map(|r| r.confidence).sum::<f32>() / primary.len() as f32
        };

        let sources = attribution(&primary, &supporting);

        KnowledgeBundle {
            primary,
            supporting,
            sources,
            confidence,
        }
    }
}

/// Best raw score seen per source type, for normalisation
fn per_source_max(candidates: &[RetrievalCandidate]) -> AHashMap<SourceType, f32> {
    let mut max: AHashMap<SourceType, f32> = AHashMap::new();
    for candidate in candidates {
        let entry = max.entry(candidate.source).or_insert(candidate.score);
        if candidate.score > *entry {
            *entry = candidate.score;
        }
    }
    max
}

/// Collapse candidates onto dedup keys
///
/// Graph candidates key on their entity id; text candidates key on the
/// content hash of their normalised text. A text candidate whose content
/// matches an entity's textual representation collapses into the entity
/// group, so cross-backend corroboration of the same entity merges. Graph
/// candidates are grouped first to make the aliasing order-independent.
fn group_candidates(candidates: &[RetrievalCandidate]) -> Vec<Group> {
    let mut groups: Vec<Group> = Vec::new();
    let mut by_key: AHashMap<String, usize> = AHashMap::new();
    let mut alias: AHashMap<String, usize> = AHashMap::new();

    for candidate in candidates
        .iter()
        .filter(|c| c.source == SourceType::Graph)
    {
        let key = match &candidate.payload {
            CandidatePayload::Entity { entity_id, .. } => format!("entity_{}", entity_id),
            CandidatePayload::Text { text } => content_key(text),
        };

        let idx = *by_key.entry(key.clone()).or_insert_with(|| {
            groups.push(Group::new(key));
            groups.len() - 1
        });
        alias
            .entry(content_key(&candidate.extracted_text()))
            .or_insert(idx);
        groups[idx].absorb(candidate);
    }

    for candidate in candidates
        .iter()
        .filter(|c| c.source != SourceType::Graph)
    {
        let key = content_key(&candidate.extracted_text());

        let idx = match alias.get(&key).or_else(|| by_key.get(&key)) {
            Some(&idx) => idx,
            None => {
                groups.push(Group::new(key.clone()));
                by_key.insert(key, groups.len() - 1);
                groups.len() - 1
            }
        };
        groups[idx].absorb(candidate);
    }

    groups
}

/// Content hash of normalised text
fn content_key(text: &str) -> String {
    let normalized = text
        .split_whitespace()
        .map(|t| t.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");
    format!("text_{}", blake3::hash(normalized.as_bytes()).to_hex())
}

fn tokenize(text: &str) -> Vec<String> {
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

/// Smoothed IDF over the deduplicated candidate pool
fn inverse_document_frequencies(docs: &[Vec<String>]) -> AHashMap<String, f32> {
    let mut df: AHashMap<&str, usize> = AHashMap::new();
    for tokens in docs {
        let mut seen: Vec<&str> = Vec::new();
        for token in tokens {
            if !seen.contains(&token.as_str()) {
                seen.push(token);
                *df.entry(token).or_insert(0) += 1;
            }
        }
    }

    let n = docs.len() as f32;
    df.into_iter()
        .map(|(token, count)| {
            let idf = ((1.0 + n) / (1.0 + count as f32)).ln() + 1.0;
            (token.to_string(), idf)
        })
        .collect()
}

/// TF-IDF cosine between query and candidate text
fn lexical_relevance(
    query_tokens: &[String],
    doc_tokens: &[String],
    idf: &AHashMap<String, f32>,
) -> f32 {
    if query_tokens.is_empty() || doc_tokens.is_empty() {
        return 0.0;
    }

    // Terms unseen in the pool get the maximum idf a singleton would have
    let default_idf = ((1.0 + doc_tokens.len() as f32).ln() + 1.0).max(1.0);
    let weight = |token: &str| idf.get(token).copied().unwrap_or(default_idf);

    let mut query_tf: AHashMap<&str, f32> = AHashMap::new();
    for token in query_tokens {
        *query_tf.entry(token).or_insert(0.0) += 1.0;
    }

    let mut doc_tf: AHashMap<&str, f32> = AHashMap::new();
    for token in doc_tokens {
        *doc_tf.entry(token).or_insert(0.0) += 1.0;
    }

    let mut dot = 0.0;
    let mut query_norm = 0.0;
    for (token, tf) in &query_tf {
        let w = tf * weight(token);
        query_norm += w * w;
        if let Some(doc_count) = doc_tf.get(token) {
            dot += w * doc_count * weight(token);
        }
    }

    let mut doc_norm = 0.0;
    for (token, tf) in &doc_tf {
        let w = tf * weight(token);
        doc_norm += w * w;
    }

    if query_norm == 0.0 || doc_norm == 0.0 {
        return 0.0;
    }

    (dot / (query_norm.sqrt() * doc_norm.sqrt())).clamp(0.0, 1.0)
}

/// Attribution entries for the response envelope, deduplicated by
/// (domain, backend) keeping the strongest contribution
fn attribution(primary: &[FusedResult], supporting: &[FusedResult]) -> Vec<SourceAttribution> {
    let mut best: Vec<SourceAttribution> = Vec::new();

    for result in primary.iter().chain(supporting.iter()) {
        for contribution in &result.sources {
            match best
                .iter_mut()
                .find(|a| a.domain == contribution.domain && a.backend == contribution.source)
            {
                Some(existing) => {
                    if contribution.combined_score > existing.confidence {
                        existing.confidence = contribution.combined_score.clamp(0.0, 1.0);
                    }
                }
                None => best.push(SourceAttribution {
                    domain: contribution.domain.clone(),
                    backend: contribution.source,
                    confidence: contribution.combined_score.clamp(0.0, 1.0),
                }),
            }
        }
    }

    best
}
