//! Domain registry: configuration-driven knowledge partitions
//!
//! Each domain is a logically separate knowledge partition with its own
//! retrieval backends. Domains are declared in a TOML file with pre-compiled
//! regex patterns for query matching, so detection is deterministic: the same
//! query always hits the same domains, in configuration order.

use crate::error::{BraidError, Result};
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// One domain declaration as it appears in the domains file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainConfig {
    pub id: String,
    #[serde(default)]
    pub description: String,
    /// Regex patterns matched (case-insensitively) against query text
    #[serde(default)]
    pub patterns: Vec<String>,
    pub backends: BackendEndpoints,
}

/// Descriptors for the retrieval backends serving a domain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendEndpoints {
    pub vector: String,
    pub graph: String,
    pub document: String,
}

/// Domains configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainsFile {
    pub domain: Vec<DomainConfig>,
}

/// A domain with its patterns pre-compiled
pub struct CompiledDomain {
    pub id: String,
    pub description: String,
    pub patterns: Vec<regex::Regex>,
    pub backends: BackendEndpoints,
}

/// Registry of all configured domains
pub struct DomainRegistry {
    domains: Vec<CompiledDomain>,
    by_id: HashMap<String, usize>,
    default_domain: String,
}

impl DomainRegistry {
    /// Build the registry from parsed domain declarations
    ///
    /// The default domain must be one of the declared domains.
    pub fn from_configs(configs: Vec<DomainConfig>, default_domain: &str) -> Result<Self> {
        if configs.is_empty() {
            return Err(BraidError::Domains(
                "At least one domain must be configured".to_string(),
            ));
        }

        let mut domains = Vec::with_capacity(configs.len());
        let mut by_id = HashMap::new();

        for config in configs {
            if config.id.is_empty() {
                return Err(BraidError::Domains("Domain id cannot be empty".to_string()));
            }
            if by_id.contains_key(&config.id) {
                return Err(BraidError::Domains(format!(
                    "Duplicate domain id: {}",
                    config.id
                )));
            }

            let mut patterns = Vec::with_capacity(config.patterns.len());
            for pattern in &config.patterns {
                let regex = RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| {
                        BraidError::Domains(format!(
                            "Invalid pattern '{}' for domain {}: {}",
                            pattern, config.id, e
                        ))
                    })?;
                patterns.push(regex);
            }

            by_id.insert(config.id.clone(), domains.len());
            domains.push(CompiledDomain {
                id: config.id,
                description: config.description,
                patterns,
                backends: config.backends,
            });
        }

        if !by_id.contains_key(default_domain) {
            return Err(BraidError::Domains(format!(
                "Default domain '{}' is not declared in the domains file",
                default_domain
            )));
        }

        Ok(Self {
            domains,
            by_id,
            default_domain: default_domain.to_string(),
        })
    }

    /// Load the registry from a TOML file
    pub fn load(path: &Path, default_domain: &str) -> Result<Self> {
        if !path.exists() {
            return Err(BraidError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| BraidError::Io {
            source: e,
            context: format!("Failed to read domains file: {:?}", path),
        })?;
        let file: DomainsFile = toml::from_str(&content)?;

        Self::from_configs(file.domain, default_domain)
    }

    /// Match query text against all domain patterns
    ///
    /// Returns matched domain ids in configuration order. Deterministic: same
    /// query, same result, independent of call order or concurrency.
    pub fn detect(&self, query: &str) -> Vec<String> {
        self.domains
            .iter()
            .filter(|domain| domain.patterns.iter().any(|p| p.is_match(query)))
            .map(|domain| domain.id.clone())
            .collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&CompiledDomain> {
        self.by_id.get(id).map(|&idx| &self.domains[idx])
    }

    /// All domain ids in configuration order
    pub fn ids(&self) -> Vec<String> {
        self.domains.iter().map(|d| d.id.clone()).collect()
    }

    pub fn default_domain(&self) -> &str {
        &self.default_domain
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// Domain descriptors for the listing endpoint
    pub fn descriptors(&self) -> Vec<DomainDescriptor> {
        self.domains
            .iter()
            .map(|d| DomainDescriptor {
                id: d.id.clone(),
                description: d.description.clone(),
                backends: d.backends.clone(),
            })
            .collect()
    }
}

/// Serializable view of a domain for the listing endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainDescriptor {
    pub id: String,
    pub description: String,
    pub backends: BackendEndpoints,
}
