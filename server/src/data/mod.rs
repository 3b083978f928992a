//! Data storage layer
//!
//! Provides the storage backends the flush pipeline writes to:
//! - `memory` - In-process databases (tests, dry runs)
//! - `sqlite` - One SQLite database per namespace, capped by triggers
//! - `types` - Documents and collection options shared by all backends
//! - `traits` - Driver, connection and collection traits
//! - `error` - Unified error type for all backends
//!
//! ## Backend Selection
//!
//! The backend is chosen by the scheme of the storage URL (`memory://`, `sqlite://`).

pub mod error;
pub mod memory;
pub mod sqlite;
pub mod traits;
pub mod types;

// Re-export unified error type
pub use error::DataError;

// Re-export storage traits
pub use traits::{CollectionHandle, StorageConnection, StorageDriver};

// Re-export shared types for convenient access
pub use types::{CappedLimits, CollectionOptions, Document};

pub use memory::MemoryDriver;
pub use sqlite::SqliteDriver;

use std::sync::Arc;

use crate::core::config::StorageBackend;
use crate::utils::url::sanitize_url;

/// Create the driver for the backend named by `url`'s scheme
pub fn driver_for_url(url: &str) -> Result<Arc<dyn StorageDriver>, DataError> {
    let driver: Arc<dyn StorageDriver> = match StorageBackend::from_url(url) {
        Some(StorageBackend::Memory) => Arc::new(MemoryDriver::new()),
        Some(StorageBackend::Sqlite) => Arc::new(SqliteDriver::new()),
        None => {
            return Err(DataError::Config(format!(
                "unsupported storage URL '{}'",
                sanitize_url(url)
            )));
        }
    };
    tracing::debug!(backend = driver.backend_name(), "Storage driver selected");
    Ok(driver)
}
