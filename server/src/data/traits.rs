//! Storage traits
//!
//! The flush pipeline talks to storage only through these traits. Each backend
//! (in-memory, SQLite) implements them with its own connection and collection
//! handles; the driver is selected by the storage URL scheme.

use std::sync::Arc;

use async_trait::async_trait;

use crate::data::error::DataError;
use crate::data::types::{CollectionOptions, Document};

/// Opens connections to one kind of storage
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Establish a new connection
    ///
    /// Resources opened before a failure are released before the error is returned.
    async fn connect(&self, url: &str) -> Result<Arc<dyn StorageConnection>, DataError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

/// A live connection to one namespace's database
#[async_trait]
pub trait StorageConnection: Send + Sync {
    /// Create a collection, or return the existing one unchanged
    async fn create_collection(
        &self,
        name: &str,
        options: &CollectionOptions,
    ) -> Result<Arc<dyn CollectionHandle>, DataError>;

    /// Release the connection
    async fn close(&self);
}

/// Write handle for one collection
#[async_trait]
pub trait CollectionHandle: Send + Sync {
    /// Insert one document
    async fn insert_document(&self, document: &Document) -> Result<(), DataError>;

    fn name(&self) -> &str;
}
