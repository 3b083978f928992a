use clap::Parser;

use std::path::PathBuf;

use super::config::ConnectMode;
use super::constants::{
    ENV_CONFIG, ENV_DEBUG, ENV_FLUSH_INTERVAL_MS, ENV_HOST, ENV_PORT, ENV_STORAGE_CONNECT_MODE,
    ENV_STORAGE_DOCUMENT_SIZE, ENV_STORAGE_MAX, ENV_STORAGE_MAX_CONCURRENT_INSERTS,
    ENV_STORAGE_NAME, ENV_STORAGE_PREFIX, ENV_STORAGE_URL,
};

#[derive(Parser)]
#[command(name = "capflush")]
#[command(version, about = "StatsD flush sink for capped metric collections", long_about = None)]
pub struct Cli {
    /// Server host address
    #[arg(long, short = 'H', env = ENV_HOST)]
    pub host: Option<String>,

    /// Server port
    #[arg(long, short = 'p', env = ENV_PORT)]
    pub port: Option<u16>,

    /// Enable debug mode (logs every successful insert)
    #[arg(long, env = ENV_DEBUG)]
    pub debug: bool,

    /// Path to config file
    #[arg(long, short = 'c', env = ENV_CONFIG)]
    pub config: Option<PathBuf>,

    /// Upstream flush interval in milliseconds (collection names use interval / 1000)
    #[arg(long, env = ENV_FLUSH_INTERVAL_MS)]
    pub flush_interval_ms: Option<u64>,

    // Storage options
    /// Storage URL (memory://name or sqlite://path). `{namespace}` is replaced per namespace.
    #[arg(long, env = ENV_STORAGE_URL)]
    pub storage_url: Option<String>,

    /// Maximum documents per capped collection
    #[arg(long, env = ENV_STORAGE_MAX)]
    pub storage_max: Option<u64>,

    /// Assumed size of one document in bytes
    #[arg(long, env = ENV_STORAGE_DOCUMENT_SIZE)]
    pub storage_document_size: Option<u64>,

    /// Route metrics into namespaces by their first name segment
    #[arg(long, env = ENV_STORAGE_PREFIX)]
    pub storage_prefix: Option<bool>,

    /// Namespace used for all metrics when prefix routing is disabled
    #[arg(long, env = ENV_STORAGE_NAME)]
    pub storage_name: Option<String>,

    /// Insert pipelines run concurrently per flush
    #[arg(long, env = ENV_STORAGE_MAX_CONCURRENT_INSERTS)]
    pub storage_max_concurrent_inserts: Option<usize>,

    /// Connect serialization mode (global or per-namespace)
    #[arg(long, env = ENV_STORAGE_CONNECT_MODE, value_parser = parse_connect_mode)]
    pub storage_connect_mode: Option<ConnectMode>,
}

/// Parse connect mode from CLI/env string
fn parse_connect_mode(s: &str) -> Result<ConnectMode, String> {
    match s.to_lowercase().as_str() {
        "global" => Ok(ConnectMode::Global),
        "per_namespace" | "per-namespace" => Ok(ConnectMode::PerNamespace),
        _ => Err(format!(
            "Invalid connect mode '{}'. Valid options: global, per-namespace",
            s
        )),
    }
}

/// Configuration derived from CLI arguments
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub debug: bool,
    pub config: Option<PathBuf>,
    pub flush_interval_ms: Option<u64>,
    pub storage_url: Option<String>,
    pub storage_max: Option<u64>,
    pub storage_document_size: Option<u64>,
    pub storage_prefix: Option<bool>,
    pub storage_name: Option<String>,
    pub storage_max_concurrent_inserts: Option<usize>,
    pub storage_connect_mode: Option<ConnectMode>,
}

impl From<Cli> for CliConfig {
    fn from(cli: Cli) -> Self {
        Self {
            host: cli.host,
            port: cli.port,
            debug: cli.debug,
            config: cli.config,
            flush_interval_ms: cli.flush_interval_ms,
            storage_url: cli.storage_url,
            storage_max: cli.storage_max,
            storage_document_size: cli.storage_document_size,
            storage_prefix: cli.storage_prefix,
            storage_name: cli.storage_name,
            storage_max_concurrent_inserts: cli.storage_max_concurrent_inserts,
            storage_connect_mode: cli.storage_connect_mode,
        }
    }
}

/// Parse CLI arguments
pub fn parse() -> CliConfig {
    Cli::parse().into()
}
