use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::utils::file::expand_path;
use crate::utils::url::sanitize_url;

use super::cli::CliConfig;
use super::constants::{
    APP_DOT_FOLDER, CONFIG_FILE_NAME, DEFAULT_FLUSH_INTERVAL_MS, DEFAULT_HOST,
    DEFAULT_MAX_CONCURRENT_INSERTS, DEFAULT_PORT, DEFAULT_STORAGE_DOCUMENT_SIZE,
    DEFAULT_STORAGE_MAX, DEFAULT_STORAGE_NAME, DEFAULT_STORAGE_URL,
};

// =============================================================================
// Storage Backend Enum
// =============================================================================

/// Storage backend, selected by the scheme of the storage URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// In-process store, `memory://<name>`
    Memory,
    /// SQLite database files, `sqlite://<path>`
    Sqlite,
}

impl StorageBackend {
    /// Detect the backend from a storage URL scheme
    pub fn from_url(url: &str) -> Option<Self> {
        let scheme = url.split_once(':').map(|(scheme, _)| scheme)?;
        match scheme.to_lowercase().as_str() {
            "memory" => Some(Self::Memory),
            "sqlite" => Some(Self::Sqlite),
            _ => None,
        }
    }
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageBackend::Memory => write!(f, "memory"),
            StorageBackend::Sqlite => write!(f, "sqlite"),
        }
    }
}

// =============================================================================
// Connect Mode Enum
// =============================================================================

/// How brand-new storage connections are serialized
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectMode {
    /// One connection attempt at a time across all namespaces (FIFO)
    #[default]
    Global,
    /// Attempts for different namespaces run in parallel; same-namespace attempts are deduplicated
    PerNamespace,
}

impl fmt::Display for ConnectMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectMode::Global => write!(f, "global"),
            ConnectMode::PerNamespace => write!(f, "per_namespace"),
        }
    }
}

// =============================================================================
// File Config Structs (JSON deserialization)
// =============================================================================

/// Server configuration section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ServerFileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Flush configuration section (mirrors the upstream aggregator's settings)
#[derive(Debug, Default, Clone, Deserialize)]
pub struct FlushFileConfig {
    pub interval_ms: Option<u64>,
}

/// Storage configuration section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct StorageFileConfig {
    /// Storage URL, may contain `{namespace}`
    pub url: Option<String>,
    /// Maximum documents per capped collection
    pub max: Option<u64>,
    /// Assumed size of one document in bytes
    pub document_size: Option<u64>,
    /// Route metrics into namespaces by their first name segment
    pub prefix: Option<bool>,
    /// Fallback namespace when prefix routing is disabled
    pub name: Option<String>,
    /// Extra collection options, override the computed capped options
    pub collection_options: Option<JsonMap<String, JsonValue>>,
    /// Insert pipelines run concurrently per flush
    pub max_concurrent_inserts: Option<usize>,
    /// Connect serialization mode
    pub connect_mode: Option<ConnectMode>,
}

/// File-based configuration (JSON)
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub server: Option<ServerFileConfig>,
    pub flush: Option<FlushFileConfig>,
    pub storage: Option<StorageFileConfig>,
    pub debug: Option<bool>,
    #[serde(flatten)]
    pub extra: JsonValue,
}

impl FileConfig {
    /// Load configuration from a JSON file
    fn load_from_file(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "Loading config file");
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        tracing::trace!(config = ?config, "Parsed config file");
        Ok(config)
    }

    /// Warn about unknown fields in the config
    fn warn_unknown_fields(&self) {
        if let JsonValue::Object(map) = &self.extra
            && !map.is_empty()
        {
            let keys_str: String = map
                .keys()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            tracing::warn!(
                fields = %keys_str,
                "Unknown fields in config file (possible typos)"
            );
        }
    }

    /// Merge another FileConfig into this one (other takes precedence)
    fn merge(&mut self, other: FileConfig) {
        // Server
        if let Some(server) = other.server {
            let current = self.server.get_or_insert_with(ServerFileConfig::default);
            if server.host.is_some() {
                tracing::trace!(host = ?server.host, "Merging server.host");
                current.host = server.host;
            }
            if server.port.is_some() {
                tracing::trace!(port = ?server.port, "Merging server.port");
                current.port = server.port;
            }
        }

        // Flush
        if let Some(flush) = other.flush {
            let current = self.flush.get_or_insert_with(FlushFileConfig::default);
            if flush.interval_ms.is_some() {
                tracing::trace!(interval_ms = ?flush.interval_ms, "Merging flush.interval_ms");
                current.interval_ms = flush.interval_ms;
            }
        }

        // Storage
        if let Some(storage) = other.storage {
            let current = self.storage.get_or_insert_with(StorageFileConfig::default);
            if storage.url.is_some() {
                tracing::trace!(url = "***", "Merging storage.url");
                current.url = storage.url;
            }
            if storage.max.is_some() {
                tracing::trace!(max = ?storage.max, "Merging storage.max");
                current.max = storage.max;
            }
            if storage.document_size.is_some() {
                tracing::trace!(document_size = ?storage.document_size, "Merging storage.document_size");
                current.document_size = storage.document_size;
            }
            if storage.prefix.is_some() {
                tracing::trace!(prefix = ?storage.prefix, "Merging storage.prefix");
                current.prefix = storage.prefix;
            }
            if storage.name.is_some() {
                tracing::trace!(name = ?storage.name, "Merging storage.name");
                current.name = storage.name;
            }
            if storage.collection_options.is_some() {
                tracing::trace!("Merging storage.collection_options");
                current.collection_options = storage.collection_options;
            }
            if storage.max_concurrent_inserts.is_some() {
                tracing::trace!(max_concurrent_inserts = ?storage.max_concurrent_inserts, "Merging storage.max_concurrent_inserts");
                current.max_concurrent_inserts = storage.max_concurrent_inserts;
            }
            if storage.connect_mode.is_some() {
                tracing::trace!(connect_mode = ?storage.connect_mode, "Merging storage.connect_mode");
                current.connect_mode = storage.connect_mode;
            }
        }

        // Debug
        if other.debug.is_some() {
            tracing::trace!(debug = ?other.debug, "Merging debug");
            self.debug = other.debug;
        }
    }
}

// =============================================================================
// Runtime Config Structs (final merged configuration)
// =============================================================================

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Flush sink configuration, immutable once built
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Log every successful insert
    pub debug: bool,
    /// Upstream flush interval in whole seconds, part of every collection name
    pub flush_rate_secs: u64,
    /// Maximum documents per capped collection
    pub max_documents: u64,
    /// Assumed size of one document, multiplied by `max_documents` for the byte cap
    pub document_size_bytes: u64,
    /// Route by the first dot-delimited segment of the metric name
    pub prefix_routing: bool,
    /// Namespace used for every metric when prefix routing is disabled
    pub fallback_namespace: String,
    /// Storage URL, may contain `{namespace}`
    pub storage_url: String,
    /// Extra collection options, override computed ones on key collision
    pub collection_options: JsonMap<String, JsonValue>,
    /// Insert pipelines run concurrently per flush
    pub max_concurrent_inserts: usize,
    /// Connect serialization mode
    pub connect_mode: ConnectMode,
}

impl SinkConfig {
    /// Configuration with defaults, for the given storage URL
    pub fn new(storage_url: impl Into<String>) -> Self {
        Self {
            debug: false,
            flush_rate_secs: DEFAULT_FLUSH_INTERVAL_MS / 1000,
            max_documents: DEFAULT_STORAGE_MAX,
            document_size_bytes: DEFAULT_STORAGE_DOCUMENT_SIZE,
            prefix_routing: true,
            fallback_namespace: DEFAULT_STORAGE_NAME.to_string(),
            storage_url: storage_url.into(),
            collection_options: JsonMap::new(),
            max_concurrent_inserts: DEFAULT_MAX_CONCURRENT_INSERTS,
            connect_mode: ConnectMode::default(),
        }
    }

    /// Storage backend implied by the URL scheme
    pub fn backend(&self) -> Option<StorageBackend> {
        StorageBackend::from_url(&self.storage_url)
    }
}

/// Final merged application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub sink: SinkConfig,
    pub debug: bool,
}

impl AppConfig {
    /// Load configuration from all sources
    ///
    /// Priority (lowest to highest):
    /// 1. Defaults
    /// 2. Profile directory config (~/.capflush/capflush.json)
    /// 3. Local directory config OR CLI-specified config path
    /// 4. CLI arguments (which include env var fallbacks via clap)
    pub fn load(cli: &CliConfig) -> Result<Self> {
        tracing::debug!("Loading application configuration");
        tracing::trace!(cli = ?cli, "CLI config");

        let mut file_config = FileConfig::default();
        let mut found_configs: Vec<String> = Vec::new();

        // 1. Load from profile dir (~/.capflush/capflush.json) - skip if not exists
        if let Some(profile_path) = get_profile_config_path()
            && profile_path.exists()
        {
            let profile_config = FileConfig::load_from_file(&profile_path)?;
            profile_config.warn_unknown_fields();
            file_config.merge(profile_config);
            found_configs.push(profile_path.display().to_string());
        }

        // 2. Load from CLI-specified path OR local directory
        let overlay_path = if let Some(ref path) = cli.config {
            let expanded = expand_path(&path.to_string_lossy());
            if !expanded.exists() {
                anyhow::bail!("Config file not found: {}", expanded.display());
            }
            Some(expanded)
        } else {
            let local = PathBuf::from(CONFIG_FILE_NAME);
            if local.exists() { Some(local) } else { None }
        };

        if let Some(path) = overlay_path {
            let overlay_config = FileConfig::load_from_file(&path)?;
            overlay_config.warn_unknown_fields();
            file_config.merge(overlay_config);
            found_configs.push(path.display().to_string());
        }

        tracing::debug!(configs = ?found_configs, "Config files loaded");

        Self::resolve(file_config, cli)
    }

    /// Layer defaults, merged file config and CLI/env overrides, then validate
    pub fn resolve(file_config: FileConfig, cli: &CliConfig) -> Result<Self> {
        let file_server = file_config.server.unwrap_or_default();
        let file_flush = file_config.flush.unwrap_or_default();
        let file_storage = file_config.storage.unwrap_or_default();

        let host = cli
            .host
            .clone()
            .or(file_server.host)
            .unwrap_or_else(|| DEFAULT_HOST.to_string());

        let port = cli.port.or(file_server.port).unwrap_or(DEFAULT_PORT);

        // debug: CLI/env flag takes precedence, then file config, default false
        let debug = cli.debug || file_config.debug.unwrap_or(false);

        let flush_interval_ms = cli
            .flush_interval_ms
            .or(file_flush.interval_ms)
            .unwrap_or(DEFAULT_FLUSH_INTERVAL_MS);

        let storage_url = cli
            .storage_url
            .clone()
            .or(file_storage.url)
            .unwrap_or_else(|| DEFAULT_STORAGE_URL.to_string());

        let max_documents = cli
            .storage_max
            .or(file_storage.max)
            .unwrap_or(DEFAULT_STORAGE_MAX);

        let document_size_bytes = cli
            .storage_document_size
            .or(file_storage.document_size)
            .unwrap_or(DEFAULT_STORAGE_DOCUMENT_SIZE);

        let prefix_explicit = cli.storage_prefix.or(file_storage.prefix);
        let prefix_routing = prefix_explicit.unwrap_or(true);

        // The fallback name only defaults when prefix routing was not explicitly
        // turned off; validation rejects an explicit `false` without a name.
        let fallback_namespace = cli
            .storage_name
            .clone()
            .or(file_storage.name)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| {
                if prefix_explicit == Some(false) {
                    String::new()
                } else {
                    DEFAULT_STORAGE_NAME.to_string()
                }
            });

        let max_concurrent_inserts = cli
            .storage_max_concurrent_inserts
            .or(file_storage.max_concurrent_inserts)
            .unwrap_or(DEFAULT_MAX_CONCURRENT_INSERTS);

        let connect_mode = cli
            .storage_connect_mode
            .or(file_storage.connect_mode)
            .unwrap_or_default();

        let sink = SinkConfig {
            debug,
            flush_rate_secs: flush_interval_ms / 1000,
            max_documents,
            document_size_bytes,
            prefix_routing,
            fallback_namespace,
            storage_url,
            collection_options: file_storage.collection_options.unwrap_or_default(),
            max_concurrent_inserts,
            connect_mode,
        };

        let config = Self {
            server: ServerConfig { host, port },
            sink,
            debug,
        };

        config.validate()?;

        tracing::debug!(
            host = %config.server.host,
            port = config.server.port,
            debug = config.debug,
            flush_rate_secs = config.sink.flush_rate_secs,
            storage_url = %sanitize_url(&config.sink.storage_url),
            max_documents = config.sink.max_documents,
            document_size_bytes = config.sink.document_size_bytes,
            prefix_routing = config.sink.prefix_routing,
            fallback_namespace = %config.sink.fallback_namespace,
            max_concurrent_inserts = config.sink.max_concurrent_inserts,
            connect_mode = %config.sink.connect_mode,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Validate the configuration for consistency and correctness
    fn validate(&self) -> Result<()> {
        // Host must not be empty
        if self.server.host.is_empty() {
            anyhow::bail!("Configuration error: server.host must not be empty");
        }

        // Port must be non-zero (port 0 would cause bind failure)
        if self.server.port == 0 {
            anyhow::bail!("Configuration error: server.port must be greater than 0");
        }

        let sink = &self.sink;

        if !sink.prefix_routing && sink.fallback_namespace.is_empty() {
            anyhow::bail!(
                "Configuration error: storage.prefix is false, storage.name must be set"
            );
        }

        if sink.max_documents == 0 {
            anyhow::bail!("Configuration error: storage.max must be greater than 0");
        }

        if sink.document_size_bytes == 0 {
            anyhow::bail!("Configuration error: storage.document_size must be greater than 0");
        }

        if sink.max_concurrent_inserts == 0 {
            anyhow::bail!(
                "Configuration error: storage.max_concurrent_inserts must be greater than 0"
            );
        }

        if sink.backend().is_none() {
            anyhow::bail!(
                "Configuration error: unsupported storage.url '{}'. Valid schemes: memory://, sqlite://",
                sanitize_url(&sink.storage_url)
            );
        }

        // A zero rate collapses every collection name onto the `_0` suffix
        if sink.flush_rate_secs == 0 {
            tracing::warn!(
                "flush.interval_ms is below one second, collection names will use rate 0"
            );
        }

        Ok(())
    }
}

/// Get the profile config path (~/.capflush/capflush.json)
fn get_profile_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(APP_DOT_FOLDER).join(CONFIG_FILE_NAME))
}
