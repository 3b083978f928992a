//! Lazy capped-collection provisioning

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;

use crate::core::config::SinkConfig;
use crate::data::{CollectionHandle, CollectionOptions, DataError, StorageConnection};

/// Creates destination collections on first use
///
/// The storage create is idempotent, so concurrent first uses of the same
/// collection both succeed. Handles are remembered per (namespace, collection)
/// so later inserts skip the round trip. After `close` nothing is remembered.
pub struct CollectionProvisioner {
    options: CollectionOptions,
    provisioned: DashMap<(String, String), Arc<dyn CollectionHandle>>,
    closed: AtomicBool,
}

impl CollectionProvisioner {
    pub fn new(options: CollectionOptions) -> Self {
        Self {
            options,
            provisioned: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &SinkConfig) -> Self {
        Self::new(CollectionOptions::capped(
            config.document_size_bytes,
            config.max_documents,
            &config.collection_options,
        ))
    }

    /// Capacity policy every collection is created with
    pub fn options(&self) -> &CollectionOptions {
        &self.options
    }

    /// Handle for `collection` in `namespace`, creating it if absent
    pub async fn ensure(
        &self,
        namespace: &str,
        connection: &Arc<dyn StorageConnection>,
        collection: &str,
    ) -> Result<Arc<dyn CollectionHandle>, DataError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DataError::provision(collection, "provisioner is closed"));
        }
        let key = (namespace.to_string(), collection.to_string());
        if let Some(handle) = self.provisioned.get(&key) {
            return Ok(Arc::clone(handle.value()));
        }

        let handle = connection
            .create_collection(collection, &self.options)
            .await?;
        self.provisioned.insert(key.clone(), Arc::clone(&handle));

        if self.closed.load(Ordering::SeqCst) {
            self.provisioned.remove(&key);
            return Err(DataError::provision(collection, "provisioner is closed"));
        }
        Ok(handle)
    }

    /// Forget every remembered handle and refuse new ones
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.provisioned.clear();
    }

    pub fn len(&self) -> usize {
        self.provisioned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.provisioned.is_empty()
    }
}
