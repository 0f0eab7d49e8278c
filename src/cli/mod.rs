//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "braid",
    version,
    about = "Hybrid retrieval and knowledge fusion query service",
    long_about = "Braid routes natural-language queries through context building, intent and \
                  domain classification, concurrent multi-backend retrieval (vector, graph, \
                  full-text), and score-weighted fusion into a ranked, attributable knowledge \
                  bundle."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/braid/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the query service in the foreground
    Serve {
        /// Seed file with documents and entities to index at startup
        #[arg(short, long, value_name = "FILE")]
        seed: Option<PathBuf>,
    },

    /// Run a query against a running service
    Query {
        /// Query text
        query: String,

        /// User identifier for context personalisation
        #[arg(short, long, default_value = "local")]
        user: String,

        /// Session identifier (a fresh one is generated when omitted)
        #[arg(short, long)]
        session: Option<String>,

        /// Override automatic domain classification (repeatable)
        #[arg(short, long)]
        domain: Vec<String>,

        /// Show the raw response envelope as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check service health
    Health,

    /// List configured domains and their backends
    Domains,

    /// Stop a running service
    Stop,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,

    /// Validate a configuration file
    Validate {
        /// File to validate (defaults to the standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Write the default configuration and domain templates
    Init {
        /// Overwrite existing files
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
