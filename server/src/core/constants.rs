// =============================================================================
// Application Identity
// =============================================================================

/// Application name in lowercase (for paths and identifiers)
pub const APP_NAME_LOWER: &str = "capflush";

/// Unix-style dotfile folder name
pub const APP_DOT_FOLDER: &str = ".capflush";

// =============================================================================
// Configuration Files
// =============================================================================

/// Config file name
pub const CONFIG_FILE_NAME: &str = "capflush.json";

/// Environment variable for config file path
pub const ENV_CONFIG: &str = "CAPFLUSH_CONFIG";

// =============================================================================
// Environment Variables - Logging / Debug
// =============================================================================

/// Environment variable for debug mode (logs every successful insert)
pub const ENV_DEBUG: &str = "CAPFLUSH_DEBUG";

/// Environment variable for log level/filter
pub const ENV_LOG: &str = "CAPFLUSH_LOG";

/// Environment variable for log output format (`compact` or `json`)
pub const ENV_LOG_FORMAT: &str = "CAPFLUSH_LOG_FORMAT";

// =============================================================================
// Environment Variables - Server
// =============================================================================

/// Environment variable for server host
pub const ENV_HOST: &str = "CAPFLUSH_HOST";

/// Environment variable for server port
pub const ENV_PORT: &str = "CAPFLUSH_PORT";

// =============================================================================
// Environment Variables - Flush / Storage
// =============================================================================

/// Environment variable for the upstream flush interval in milliseconds
pub const ENV_FLUSH_INTERVAL_MS: &str = "CAPFLUSH_FLUSH_INTERVAL_MS";

/// Environment variable for the storage URL
pub const ENV_STORAGE_URL: &str = "CAPFLUSH_STORAGE_URL";

/// Environment variable for the maximum documents per collection
pub const ENV_STORAGE_MAX: &str = "CAPFLUSH_STORAGE_MAX";

/// Environment variable for the assumed document size in bytes
pub const ENV_STORAGE_DOCUMENT_SIZE: &str = "CAPFLUSH_STORAGE_DOCUMENT_SIZE";

/// Environment variable toggling prefix routing
pub const ENV_STORAGE_PREFIX: &str = "CAPFLUSH_STORAGE_PREFIX";

/// Environment variable for the fallback namespace name
pub const ENV_STORAGE_NAME: &str = "CAPFLUSH_STORAGE_NAME";

/// Environment variable for the per-flush insert concurrency limit
pub const ENV_STORAGE_MAX_CONCURRENT_INSERTS: &str = "CAPFLUSH_STORAGE_MAX_CONCURRENT_INSERTS";

/// Environment variable for the connect serialization mode
pub const ENV_STORAGE_CONNECT_MODE: &str = "CAPFLUSH_STORAGE_CONNECT_MODE";

// =============================================================================
// Server Defaults
// =============================================================================

/// Default server host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default server port
pub const DEFAULT_PORT: u16 = 8126;

/// Request body limit for flush events (16 MB)
pub const FLUSH_BODY_LIMIT: usize = 16 * 1024 * 1024;

/// Seconds a client should wait before retrying when the flush queue is full
pub const BACKPRESSURE_RETRY_AFTER_SECS: u64 = 1;

/// Bounded capacity of the flush event queue
pub const FLUSH_QUEUE_CAPACITY: usize = 256;

// =============================================================================
// Flush / Storage Defaults
// =============================================================================

/// Default upstream flush interval (StatsD default)
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 10_000;

/// Placeholder substituted with the namespace in storage URLs
pub const NAMESPACE_PLACEHOLDER: &str = "{namespace}";

/// Default storage URL (one SQLite file per namespace in the working directory)
pub const DEFAULT_STORAGE_URL: &str = "sqlite://capflush-{namespace}.db?mode=rwc";

/// Default maximum documents per capped collection
pub const DEFAULT_STORAGE_MAX: u64 = 2160;

/// Default assumed size of one metric document in bytes
pub const DEFAULT_STORAGE_DOCUMENT_SIZE: u64 = 100;

/// Default fallback namespace when prefix routing is disabled
pub const DEFAULT_STORAGE_NAME: &str = "statsd";

/// Default number of insert pipelines run concurrently per flush
pub const DEFAULT_MAX_CONCURRENT_INSERTS: usize = 64;

// =============================================================================
// SQLite Backend
// =============================================================================

/// Maximum pooled connections per SQLite database
pub const SQLITE_MAX_CONNECTIONS: u32 = 4;

/// Busy timeout for SQLite writers
pub const SQLITE_BUSY_TIMEOUT_SECS: u64 = 5;

/// Table that records the options each collection was created with
pub const SQLITE_COLLECTIONS_TABLE: &str = "_capflush_collections";

// =============================================================================
// Shutdown
// =============================================================================

/// Maximum time to wait for in-flight inserts and background tasks on shutdown
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 10;
