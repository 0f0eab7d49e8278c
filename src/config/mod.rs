//! Configuration management for braid
//!
//! All tunables live here: retrieval timeouts, fusion weights, cache TTLs,
//! backend parameters. Loading follows the configuration-driven design of the
//! rest of the crate: a TOML file, environment overrides, then validation.

use crate::error::{BraidError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
    pub context: ContextConfig,
    pub classify: ClassifyConfig,
    pub domains: DomainsConfig,
    pub embedding: EmbeddingConfig,
    pub indexing: IndexingConfig,
    pub retrieval: RetrievalConfig,
    pub fusion: FusionConfig,
    pub cache: CacheConfig,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Storage configuration: data directory and interaction history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub history_db: PathBuf,
}

/// Server configuration for the Unix-socket query endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub socket_path: PathBuf,
    pub max_connections: usize,
}

/// Context builder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Most recent interactions fetched per user
    pub history_limit: usize,
    /// Queries longer than this are truncated (char-boundary safe)
    pub max_query_len: usize,
    /// Domain preferences derived from history, most frequent first
    pub preference_limit: usize,
}

/// Query classification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyConfig {
    /// Domain used when neither patterns nor preferences produce one
    pub default_domain: String,
    /// How many historical preferences to fall back on
    pub preference_fallback: usize,
}

/// Domain registry configuration - path to domain definition file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainsConfig {
    pub file: PathBuf,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model: String,
    /// "fastembed" (local model, downloaded on demand) or "hashing"
    /// (deterministic, model-free)
    pub mode: String,
    pub batch_size: usize,
}

/// Index construction parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    pub vector_dim: usize,
    pub hnsw_ef_construction: usize,
    pub hnsw_m: usize,
}

/// Retrieval configuration: fan-out sizes and timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Results returned per query after fusion
    pub top_k: usize,
    /// Each backend over-fetches top_k * search_multiplier raw candidates
    pub search_multiplier: usize,
    /// Wall-clock bound for one domain's hybrid search
    pub domain_timeout_ms: u64,
    /// Wall-clock bound for a single backend call within a domain
    pub backend_timeout_ms: u64,
    pub hnsw_ef_search: usize,
}

/// Fusion configuration
///
/// The weights are tunable defaults, not fixed constants: the validator only
/// requires them to be positive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    pub vector_weight: f32,
    pub graph_weight: f32,
    pub document_weight: f32,
    /// Share of the combined score taken from the backend's own score
    pub backend_weight: f32,
    /// Share taken from query/candidate lexical relevance
    pub relevance_weight: f32,
    pub primary_k: usize,
    pub supporting_k: usize,
}

/// Cache configuration for context lookups and query bundles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    /// Zero disables caching entirely
    pub capacity: usize,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(BraidError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| BraidError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        // Apply environment variable overrides
        config.apply_env_overrides();

        // Validate configuration
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| BraidError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: BRAID_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("BRAID_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "EMBEDDING__MODE" => {
                self.embedding.mode = value.to_string();
            }
            "EMBEDDING__MODEL" => {
                self.embedding.model = value.to_string();
            }
            "CLASSIFY__DEFAULT_DOMAIN" => {
                self.classify.default_domain = value.to_string();
            }
            "RETRIEVAL__TOP_K" => {
                self.retrieval.top_k =
                    value.parse().map_err(|_| BraidError::InvalidConfigValue {
                        path: path.to_string(),
                        message: format!("Cannot parse '{}' as integer", value),
                    })?;
            }
            "RETRIEVAL__DOMAIN_TIMEOUT_MS" => {
                self.retrieval.domain_timeout_ms =
                    value.parse().map_err(|_| BraidError::InvalidConfigValue {
                        path: path.to_string(),
                        message: format!("Cannot parse '{}' as integer", value),
                    })?;
            }
            "CACHE__TTL_SECS" => {
                self.cache.ttl_secs =
                    value.parse().map_err(|_| BraidError::InvalidConfigValue {
                        path: path.to_string(),
                        message: format!("Cannot parse '{}' as integer", value),
                    })?;
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| BraidError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("braid").join("config.toml"))
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        let home_dir = dirs::home_dir()
            .ok_or_else(|| BraidError::Config("Cannot determine home directory".to_string()))?;

        Ok(home_dir.join(".braid"))
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = PathBuf::from("~/.braid");
        let config_dir = PathBuf::from("~/.config/braid");

        Self {
            meta: MetaConfig {
                schema_version: "1.0.0".to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig {
                data_dir: data_dir.clone(),
                history_db: data_dir.join("history.db"),
            },
            server: ServerConfig {
                socket_path: data_dir.join("braid.sock"),
                max_connections: 32,
            },
            context: ContextConfig {
                history_limit: 10,
                max_query_len: 2048,
                preference_limit: 5,
            },
            classify: ClassifyConfig {
                default_domain: "general".to_string(),
                preference_fallback: 2,
            },
            domains: DomainsConfig {
                file: config_dir.join("domains.toml"),
            },
            embedding: EmbeddingConfig {
                model: "all-MiniLM-L6-v2".to_string(),
                mode: "fastembed".to_string(),
                batch_size: 32,
            },
            indexing: IndexingConfig {
                vector_dim: 384,
                hnsw_ef_construction: 200,
                hnsw_m: 16,
            },
            retrieval: RetrievalConfig {
                top_k: 5,
                search_multiplier: 2,
                domain_timeout_ms: 10_000,
                backend_timeout_ms: 5_000,
                hnsw_ef_search: 50,
            },
            fusion: FusionConfig {
                vector_weight: 0.4,
                graph_weight: 0.35,
                document_weight: 0.25,
                backend_weight: 0.6,
                relevance_weight: 0.4,
                primary_k: 5,
                supporting_k: 5,
            },
            cache: CacheConfig {
                ttl_secs: 3600,
                capacity: 1024,
            },
        }
    }
}
