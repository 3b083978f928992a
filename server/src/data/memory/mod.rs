//! In-process storage backend
//!
//! Databases live for the lifetime of the driver and are keyed by URL, so two
//! connections to `memory://web` see the same collections. Capped collections
//! evict their oldest documents once either the document count or the total
//! serialized size exceeds the limits they were created with.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::data::error::DataError;
use crate::data::traits::{CollectionHandle, StorageConnection, StorageDriver};
use crate::data::types::{CappedLimits, CollectionOptions, Document};

const BACKEND: &str = "memory";
const SCHEME: &str = "memory://";

/// Driver for `memory://<name>` URLs
#[derive(Default)]
pub struct MemoryDriver {
    databases: DashMap<String, Arc<MemoryDatabase>>,
    connects: AtomicU64,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Database previously opened under `url`
    pub fn database(&self, url: &str) -> Option<Arc<MemoryDatabase>> {
        self.databases.get(url).map(|db| Arc::clone(db.value()))
    }

    /// Number of successful connects
    pub fn connect_count(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl StorageDriver for MemoryDriver {
    async fn connect(&self, url: &str) -> Result<Arc<dyn StorageConnection>, DataError> {
        let name = url
            .strip_prefix(SCHEME)
            .ok_or_else(|| DataError::connect(BACKEND, url, "expected a memory:// URL"))?;
        if name.is_empty() {
            return Err(DataError::connect(BACKEND, url, "database name is empty"));
        }

        let database = Arc::clone(
            self.databases
                .entry(url.to_string())
                .or_insert_with(|| Arc::new(MemoryDatabase::default()))
                .value(),
        );
        self.connects.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(url = %url, "Memory database connected");

        Ok(Arc::new(MemoryConnection {
            database,
            closed: AtomicBool::new(false),
        }))
    }

    fn backend_name(&self) -> &'static str {
        BACKEND
    }
}

/// Collections of one in-process database
#[derive(Default)]
pub struct MemoryDatabase {
    collections: DashMap<String, Arc<MemoryCollection>>,
}

impl MemoryDatabase {
    pub fn collection(&self, name: &str) -> Option<Arc<MemoryCollection>> {
        self.collections.get(name).map(|c| Arc::clone(c.value()))
    }

    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.iter().map(|c| c.key().clone()).collect();
        names.sort();
        names
    }
}

struct MemoryConnection {
    database: Arc<MemoryDatabase>,
    closed: AtomicBool,
}

#[async_trait]
impl StorageConnection for MemoryConnection {
    async fn create_collection(
        &self,
        name: &str,
        options: &CollectionOptions,
    ) -> Result<Arc<dyn CollectionHandle>, DataError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DataError::provision(name, "connection is closed"));
        }
        let limits = options
            .limits()
            .map_err(|reason| DataError::provision(name, reason))?;

        let collection: Arc<dyn CollectionHandle> = self
            .database
            .collections
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryCollection::new(name, limits)))
            .value()
            .clone();
        Ok(collection)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[derive(Default)]
struct CollectionState {
    documents: VecDeque<(u64, Document)>,
    bytes: u64,
}

/// Capped, append-only document list
pub struct MemoryCollection {
    name: String,
    limits: CappedLimits,
    state: Mutex<CollectionState>,
}

impl MemoryCollection {
    fn new(name: &str, limits: CappedLimits) -> Self {
        Self {
            name: name.to_string(),
            limits,
            state: Mutex::new(CollectionState::default()),
        }
    }

    /// Limits fixed at creation
    pub fn limits(&self) -> CappedLimits {
        self.limits
    }

    /// Stored documents, oldest first
    pub fn documents(&self) -> Vec<Document> {
        self.state
            .lock()
            .documents
            .iter()
            .map(|(_, doc)| doc.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CollectionHandle for MemoryCollection {
    async fn insert_document(&self, document: &Document) -> Result<(), DataError> {
        let encoded = serde_json::to_vec(document)
            .map_err(|e| DataError::insert(&self.name, e))?;
        let doc_bytes = encoded.len() as u64;

        if let Some(size) = self.limits.size
            && doc_bytes > size
        {
            return Err(DataError::insert(
                &self.name,
                format!("document of {doc_bytes} bytes exceeds collection size {size}"),
            ));
        }

        let mut state = self.state.lock();
        state.documents.push_back((doc_bytes, document.clone()));
        state.bytes += doc_bytes;

        loop {
            let over_count = self
                .limits
                .max
                .is_some_and(|max| state.documents.len() as u64 > max);
            let over_size = self.limits.size.is_some_and(|size| state.bytes > size);
            if !(over_count || over_size) {
                break;
            }
            match state.documents.pop_front() {
                Some((evicted, _)) => state.bytes -= evicted,
                None => break,
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map as JsonMap, json};

    fn doc(time: i64, count: i64) -> Document {
        json!({ "time": time, "count": count })
            .as_object()
            .cloned()
            .unwrap()
    }

    fn options(document_size: u64, max: u64) -> CollectionOptions {
        CollectionOptions::capped(document_size, max, &JsonMap::new())
    }

    #[tokio::test]
    async fn test_connect_same_url_shares_database() {
        let driver = MemoryDriver::new();
        let first = driver.connect("memory://web").await.unwrap();
        let second = driver.connect("memory://web").await.unwrap();

        let a = first
            .create_collection("counters.hits_10", &options(100, 10))
            .await
            .unwrap();
        a.insert_document(&doc(1, 1)).await.unwrap();
        let b = second
            .create_collection("counters.hits_10", &options(100, 10))
            .await
            .unwrap();
        b.insert_document(&doc(2, 1)).await.unwrap();

        let stored = driver
            .database("memory://web")
            .unwrap()
            .collection("counters.hits_10")
            .unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(driver.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_connect_rejects_other_scheme() {
        let driver = MemoryDriver::new();
        let err = driver.connect("sqlite://x.db").await.err().unwrap();
        assert_eq!(err.kind(), "connect");
        let err = driver.connect("memory://").await.err().unwrap();
        assert_eq!(err.kind(), "connect");
    }

    #[tokio::test]
    async fn test_create_collection_is_idempotent_and_keeps_limits() {
        let driver = MemoryDriver::new();
        let conn = driver.connect("memory://web").await.unwrap();
        conn.create_collection("gauges.cpu_10", &options(100, 5))
            .await
            .unwrap();
        conn.create_collection("gauges.cpu_10", &options(100, 50))
            .await
            .unwrap();

        let collection = driver
            .database("memory://web")
            .unwrap()
            .collection("gauges.cpu_10")
            .unwrap();
        assert_eq!(collection.limits().max, Some(5));
    }

    #[tokio::test]
    async fn test_create_collection_rejects_malformed_options() {
        let driver = MemoryDriver::new();
        let conn = driver.connect("memory://web").await.unwrap();
        let bad = CollectionOptions::from(json!({ "capped": true }).as_object().cloned().unwrap());
        let err = conn.create_collection("gauges.cpu_10", &bad).await.err().unwrap();
        assert_eq!(err.kind(), "provision");
        assert!(driver.database("memory://web").unwrap().collection_names().is_empty());
    }

    #[tokio::test]
    async fn test_create_collection_after_close_fails() {
        let driver = MemoryDriver::new();
        let conn = driver.connect("memory://web").await.unwrap();
        conn.close().await;
        let err = conn
            .create_collection("gauges.cpu_10", &options(100, 5))
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), "provision");
    }

    #[tokio::test]
    async fn test_capped_by_count_evicts_oldest() {
        let driver = MemoryDriver::new();
        let conn = driver.connect("memory://web").await.unwrap();
        let handle = conn
            .create_collection("counters.hits_10", &options(1000, 3))
            .await
            .unwrap();
        for t in 1..=5 {
            handle.insert_document(&doc(t, t)).await.unwrap();
        }

        let collection = driver
            .database("memory://web")
            .unwrap()
            .collection("counters.hits_10")
            .unwrap();
        let times: Vec<i64> = collection
            .documents()
            .iter()
            .map(|d| d["time"].as_i64().unwrap())
            .collect();
        assert_eq!(times, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn test_capped_by_size_evicts_oldest() {
        let driver = MemoryDriver::new();
        let conn = driver.connect("memory://web").await.unwrap();
        let one = serde_json::to_vec(&doc(1, 1)).unwrap().len() as u64;
        let capped = CollectionOptions::from(
            json!({ "capped": true, "size": one * 2 }).as_object().cloned().unwrap(),
        );
        let handle = conn.create_collection("sets.users_10", &capped).await.unwrap();
        for t in 1..=4 {
            handle.insert_document(&doc(t, 1)).await.unwrap();
        }

        let collection = driver
            .database("memory://web")
            .unwrap()
            .collection("sets.users_10")
            .unwrap();
        assert_eq!(collection.len(), 2);
        assert_eq!(collection.documents()[0]["time"], 3);
    }

    #[tokio::test]
    async fn test_oversized_document_rejected() {
        let driver = MemoryDriver::new();
        let conn = driver.connect("memory://web").await.unwrap();
        let handle = conn
            .create_collection("timers.latency_10", &options(1, 5))
            .await
            .unwrap();
        let err = handle.insert_document(&doc(1, 1)).await.err().unwrap();
        assert_eq!(err.kind(), "insert");
    }
}
