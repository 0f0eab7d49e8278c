use crate::config::Config;
use crate::error::{BraidError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_paths(config, &mut errors);
        Self::validate_context(config, &mut errors);
        Self::validate_classify(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_indexing(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_fusion(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(BraidError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != "1.0.0" {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_paths(config: &Config, errors: &mut Vec<ValidationError>) {
        // Existence is not checked: paths may contain ~ and are created by
        // `braid config init` / first run. Only emptiness is an error.
        if config.domains.file.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "domains.file",
                "Domain definition file path cannot be empty",
            ));
        }

        if config.storage.history_db.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.history_db",
                "History database path cannot be empty",
            ));
        }

        if config.server.socket_path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "server.socket_path",
                "Socket path cannot be empty",
            ));
        }
    }

    fn validate_context(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.context.history_limit == 0 {
            errors.push(ValidationError::new(
                "context.history_limit",
                "History limit must be greater than 0",
            ));
        }

        if config.context.max_query_len == 0 {
            errors.push(ValidationError::new(
                "context.max_query_len",
                "Max query length must be greater than 0",
            ));
        }

        if config.context.preference_limit == 0 {
            errors.push(ValidationError::new(
                "context.preference_limit",
                "Preference limit must be greater than 0",
            ));
        }
    }

    fn validate_classify(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.classify.default_domain.is_empty() {
            errors.push(ValidationError::new(
                "classify.default_domain",
                "Default domain cannot be empty",
            ));
        }

        if config.classify.preference_fallback == 0 {
            errors.push(ValidationError::new(
                "classify.preference_fallback",
                "Preference fallback count must be greater than 0",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        let mode = &config.embedding.mode;
        if mode != "fastembed" && mode != "hashing" {
            errors.push(ValidationError::new(
                "embedding.mode",
                format!("Mode must be 'fastembed' or 'hashing', got '{}'", mode),
            ));
        }

        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }
    }

    fn validate_indexing(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.indexing.vector_dim == 0 {
            errors.push(ValidationError::new(
                "indexing.vector_dim",
                "Vector dimension must be greater than 0",
            ));
        }

        if config.indexing.hnsw_ef_construction == 0 {
            errors.push(ValidationError::new(
                "indexing.hnsw_ef_construction",
                "HNSW ef_construction must be greater than 0",
            ));
        }

        if config.indexing.hnsw_m == 0 {
            errors.push(ValidationError::new(
                "indexing.hnsw_m",
                "HNSW M must be greater than 0",
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.retrieval.top_k == 0 {
            errors.push(ValidationError::new(
                "retrieval.top_k",
                "top_k must be greater than 0",
            ));
        }

        if config.retrieval.search_multiplier == 0 {
            errors.push(ValidationError::new(
                "retrieval.search_multiplier",
                "Search multiplier must be greater than 0",
            ));
        }

        if config.retrieval.domain_timeout_ms == 0 {
            errors.push(ValidationError::new(
                "retrieval.domain_timeout_ms",
                "Domain timeout must be greater than 0",
            ));
        }

        if config.retrieval.backend_timeout_ms == 0 {
            errors.push(ValidationError::new(
                "retrieval.backend_timeout_ms",
                "Backend timeout must be greater than 0",
            ));
        }

        if config.retrieval.backend_timeout_ms > config.retrieval.domain_timeout_ms {
            errors.push(ValidationError::new(
                "retrieval.backend_timeout_ms",
                "Backend timeout cannot exceed the domain timeout",
            ));
        }
    }

    fn validate_fusion(config: &Config, errors: &mut Vec<ValidationError>) {
        let fusion = &config.fusion;

        for (path, weight) in [
            ("fusion.vector_weight", fusion.vector_weight),
            ("fusion.graph_weight", fusion.graph_weight),
            ("fusion.document_weight", fusion.document_weight),
            ("fusion.backend_weight", fusion.backend_weight),
            ("fusion.relevance_weight", fusion.relevance_weight),
        ] {
            if weight <= 0.0 || !weight.is_finite() {
                errors.push(ValidationError::new(
                    path,
                    format!("Weight must be positive and finite, got {}", weight),
                ));
            }
        }

        if fusion.primary_k == 0 {
            errors.push(ValidationError::new(
                "fusion.primary_k",
                "primary_k must be greater than 0",
            ));
        }
    }
}
