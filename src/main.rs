use braid::backend::{DocumentIndex, DomainBackends, GraphEntity, KnowledgeGraph, VectorIndex};
use braid::cache::TtlCache;
use braid::classify::QueryClassifier;
use braid::cli::{Cli, Commands, ConfigAction};
use braid::config::Config;
use braid::context::ContextBuilder;
use braid::domains::DomainRegistry;
use braid::embedding::{provider_from_config, EmbeddingProvider};
use braid::error::{BraidError, Result};
use braid::retrieval::{DomainRouter, FusionEngine, HybridEngine};
use braid::server::{self, IpcClient, ServerMessage};
use braid::service::{ExtractiveGenerator, QueryService};
use braid::storage::HistoryStore;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Serve { seed } => {
            cmd_serve(cli.config, seed)?;
        }
        Commands::Query {
            query,
            user,
            session,
            domain,
            json,
        } => {
            cmd_query(cli.config, &query, &user, session, domain, json)?;
        }
        Commands::Health => {
            cmd_health(cli.config)?;
        }
        Commands::Domains => {
            cmd_domains(cli.config)?;
        }
        Commands::Stop => {
            cmd_stop(cli.config)?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "braid=debug" } else { "braid=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt().with_env_filter(filter).with_target(false).init();
}

/// Seed data indexed at startup: documents and graph entities per domain
#[derive(Debug, Deserialize)]
struct SeedFile {
    #[serde(default)]
    domain: Vec<SeedDomain>,
}

#[derive(Debug, Deserialize)]
struct SeedDomain {
    id: String,
    #[serde(default)]
    documents: Vec<String>,
    #[serde(default)]
    entities: Vec<GraphEntity>,
}

fn cmd_serve(config_path: Option<PathBuf>, seed: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;

    let domains_file = expand_path(&config.domains.file)?;
    let registry = Arc::new(DomainRegistry::load(
        &domains_file,
        &config.classify.default_domain,
    )?);

    let history_db = expand_path(&config.storage.history_db)?;
    let history = Arc::new(HistoryStore::new(&history_db)?);

    let embedder = provider_from_config(&config.embedding, config.indexing.vector_dim)
        .map_err(|e| BraidError::Config(format!("Embedding provider: {}", e)))?;

    let seed_data = match seed {
        Some(path) => Some(load_seed(&path)?),
        None => None,
    };

    let data_dir = expand_path(&config.storage.data_dir)?;
    let backends = build_backends(&config, &registry, &embedder, seed_data.as_ref(), &data_dir)?;

    let engine = Arc::new(HybridEngine::new(
        embedder,
        backends,
        config.retrieval.clone(),
    ));
    let router = Arc::new(DomainRouter::new(
        engine,
        Duration::from_millis(config.retrieval.domain_timeout_ms),
    ));
    let fusion = Arc::new(FusionEngine::new(config.fusion.clone()));

    let cache_ttl = Duration::from_secs(config.cache.ttl_secs);
    let context_cache = Arc::new(TtlCache::new(cache_ttl, config.cache.capacity));
    let bundle_cache = Arc::new(TtlCache::new(cache_ttl, config.cache.capacity));

    let context_builder = Arc::new(ContextBuilder::new(
        history.clone(),
        context_cache,
        config.context.clone(),
    ));
    let classifier = Arc::new(QueryClassifier::new(
        registry.clone(),
        config.classify.clone(),
    ));

    let service = Arc::new(QueryService::new(
        context_builder,
        classifier,
        router,
        fusion,
        Arc::new(ExtractiveGenerator),
        bundle_cache,
        history,
        registry,
    ));

    let socket_path = expand_path(&config.server.socket_path)?;

    println!("✓ Starting braid query service");
    println!("  Socket: {}", socket_path.display());
    println!("  Domains: {}", service.domains().len());

    let runtime = runtime()?;
    runtime.block_on(server::serve(
        service,
        &socket_path,
        config.server.max_connections,
    ))
}

/// Construct per-domain backends and index any seed data
fn build_backends(
    config: &Config,
    registry: &DomainRegistry,
    embedder: &Arc<dyn EmbeddingProvider>,
    seed: Option<&SeedFile>,
    data_dir: &Path,
) -> Result<HashMap<String, DomainBackends>> {
    let mut backends = HashMap::new();

    for domain_id in registry.ids() {
        let vector = Arc::new(VectorIndex::new(
            domain_id.clone(),
            embedder.dimension(),
            config.indexing.hnsw_ef_construction,
            config.indexing.hnsw_m,
            config.retrieval.hnsw_ef_search,
        ));
        let graph = Arc::new(KnowledgeGraph::new(domain_id.clone()));
        let document = Arc::new(
            DocumentIndex::new(domain_id.clone(), data_dir.join("index").join(&domain_id))
                .map_err(|e| BraidError::Config(format!("Document index {}: {}", domain_id, e)))?,
        );

        if let Some(seed_domain) = seed.and_then(|s| s.domain.iter().find(|d| d.id == domain_id)) {
            seed_domain_data(config, embedder, seed_domain, &vector, &graph, &document)?;
        }

        backends.insert(
            domain_id,
            DomainBackends {
                vector,
                graph,
                document,
            },
        );
    }

    if let Some(seed) = seed {
        for seed_domain in &seed.domain {
            if !registry.contains(&seed_domain.id) {
                tracing::warn!("Seed data for unconfigured domain '{}' skipped", seed_domain.id);
            }
        }
    }

    Ok(backends)
}

fn seed_domain_data(
    config: &Config,
    embedder: &Arc<dyn EmbeddingProvider>,
    seed: &SeedDomain,
    vector: &VectorIndex,
    graph: &KnowledgeGraph,
    document: &DocumentIndex,
) -> Result<()> {
    for (i, text) in seed.documents.iter().enumerate() {
        document
            .insert(i as u64, text)
            .map_err(|e| BraidError::Config(format!("Seeding documents for {}: {}", seed.id, e)))?;
    }
    if !seed.documents.is_empty() {
        document
            .commit()
            .map_err(|e| BraidError::Config(format!("Committing documents for {}: {}", seed.id, e)))?;
    }

    for chunk in seed.documents.chunks(config.embedding.batch_size) {
        match embedder.embed_batch(chunk) {
            Ok(embeddings) => {
                for (text, embedding) in chunk.iter().zip(embeddings.iter()) {
                    vector.insert(text, embedding).map_err(|e| {
                        BraidError::Config(format!("Seeding vectors for {}: {}", seed.id, e))
                    })?;
                }
            }
            Err(e) => {
                tracing::warn!(
                    "Embedding failed while seeding {}; vector index left partial: {}",
                    seed.id,
                    e
                );
                break;
            }
        }
    }

    for entity in &seed.entities {
        graph
            .add_entity(entity.clone())
            .map_err(|e| BraidError::Config(format!("Seeding entities for {}: {}", seed.id, e)))?;
    }

    tracing::info!(
        "Seeded domain {}: {} documents, {} entities",
        seed.id,
        seed.documents.len(),
        seed.entities.len()
    );

    Ok(())
}

fn load_seed(path: &Path) -> Result<SeedFile> {
    let content = std::fs::read_to_string(path).map_err(|e| BraidError::Io {
        source: e,
        context: format!("Failed to read seed file: {:?}", path),
    })?;
    toml::from_str(&content).map_err(BraidError::from)
}

fn cmd_query(
    config_path: Option<PathBuf>,
    query: &str,
    user: &str,
    session: Option<String>,
    domains: Vec<String>,
    json: bool,
) -> Result<()> {
    let config = load_config(config_path)?;
    let socket_path = expand_path(&config.server.socket_path)?;

    let message = ServerMessage::Query {
        query: query.to_string(),
        user_id: user.to_string(),
        session_id: session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        domains: if domains.is_empty() {
            None
        } else {
            Some(domains)
        },
    };

    let client = IpcClient::new(socket_path);
    let runtime = runtime()?;
    let response = runtime.block_on(client.send(&message))?;

    if !response.success {
        return Err(BraidError::Server(
            response
                .message
                .unwrap_or_else(|| "Query failed".to_string()),
        ));
    }

    let Some(data) = response.data else {
        return Err(BraidError::Server("Empty response".to_string()));
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&data).map_err(|e| BraidError::Json {
                source: e,
                context: "Failed to render response".to_string(),
            })?
        );
        return Ok(());
    }

    if let Some(text) = data.get("response").and_then(|v| v.as_str()) {
        println!("{}", text);
    }
    if let Some(confidence) = data.get("confidence").and_then(|v| v.as_f64()) {
        println!("Confidence: {:.2}", confidence);
    }
    if let Some(metadata) = data.get("metadata") {
        println!(
            "Type: {}  Domains: {}  Took: {}ms",
            metadata
                .get("query_type")
                .and_then(|v| v.as_str())
                .unwrap_or("?"),
            metadata
                .get("domains")
                .map(|v| v.to_string())
                .unwrap_or_else(|| "[]".to_string()),
            metadata
                .get("processing_time_ms")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
        );
    }
    if let Some(sources) = data.get("sources").and_then(|v| v.as_array()) {
        if !sources.is_empty() {
            println!("Sources:");
            for source in sources {
                println!(
                    "  [{}] {} ({:.2})",
                    source.get("backend").and_then(|v| v.as_str()).unwrap_or("?"),
                    source.get("domain").and_then(|v| v.as_str()).unwrap_or("?"),
                    source
                        .get("confidence")
                        .and_then(|v| v.as_f64())
                        .unwrap_or(0.0),
                );
            }
        }
    }

    Ok(())
}

fn cmd_health(config_path: Option<PathBuf>) -> Result<()> {
    let response = send_simple(config_path, &ServerMessage::Health)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&response).map_err(|e| BraidError::Json {
            source: e,
            context: "Failed to render health report".to_string(),
        })?
    );
    Ok(())
}

fn cmd_domains(config_path: Option<PathBuf>) -> Result<()> {
    let response = send_simple(config_path, &ServerMessage::Domains)?;

    let Some(domains) = response.as_array() else {
        return Err(BraidError::Server("Malformed domain listing".to_string()));
    };

    println!("Configured domains: {}", domains.len());
    for domain in domains {
        println!(
            "  {} - {}",
            domain.get("id").and_then(|v| v.as_str()).unwrap_or("?"),
            domain
                .get("description")
                .and_then(|v| v.as_str())
                .unwrap_or(""),
        );
        if let Some(backends) = domain.get("backends") {
            println!(
                "    vector={} graph={} document={}",
                backends.get("vector").and_then(|v| v.as_str()).unwrap_or("?"),
                backends.get("graph").and_then(|v| v.as_str()).unwrap_or("?"),
                backends
                    .get("document")
                    .and_then(|v| v.as_str())
                    .unwrap_or("?"),
            );
        }
    }

    Ok(())
}

fn cmd_stop(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    let socket_path = expand_path(&config.server.socket_path)?;

    let client = IpcClient::new(socket_path);
    let runtime = runtime()?;
    let response = runtime.block_on(client.send(&ServerMessage::Stop))?;

    if response.success {
        println!("✓ Service stopping");
        Ok(())
    } else {
        Err(BraidError::Server(
            response
                .message
                .unwrap_or_else(|| "Stop failed".to_string()),
        ))
    }
}

fn send_simple(
    config_path: Option<PathBuf>,
    message: &ServerMessage,
) -> Result<serde_json::Value> {
    let config = load_config(config_path)?;
    let socket_path = expand_path(&config.server.socket_path)?;

    let client = IpcClient::new(socket_path);
    let runtime = runtime()?;
    let response = runtime.block_on(client.send(message))?;

    if !response.success {
        return Err(BraidError::Server(
            response
                .message
                .unwrap_or_else(|| "Request failed".to_string()),
        ));
    }

    response
        .data
        .ok_or_else(|| BraidError::Server("Empty response".to_string()))
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path)?;
            let json = serde_json::to_string_pretty(&config).map_err(|e| BraidError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;
            println!("{}", json);
        }
        ConfigAction::Validate { file } => {
            let path = match file {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = Config::default_path()?;

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| BraidError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            let config = Config::default();
            config.save(&path)?;

            println!("✓ Configuration initialized at: {}", path.display());

            let config_dir = path.parent().expect("config path has a parent");
            let domains_path = config_dir.join("domains.toml");
            if force || !domains_path.exists() {
                let template = include_str!("../config-templates/domains.toml");
                std::fs::write(&domains_path, template).map_err(|e| BraidError::Io {
                    source: e,
                    context: format!("Failed to write domains.toml: {:?}", domains_path),
                })?;
            }

            println!("✓ Domain template installed");
            println!("  - domains.toml: domain partitions, patterns, and backends");
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'braid config init' to create one."
        );
        return Ok(Config::default());
    }

    Config::load(&path)
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| BraidError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })
}

fn expand_path(path: &Path) -> Result<PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| BraidError::Config("Invalid path encoding".to_string()))?;

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| BraidError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}
