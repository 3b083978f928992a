//! Lazy, serialized storage connections
//!
//! Connections are opened on first use of a namespace and cached for the life
//! of the sink. Opening a brand-new connection always goes through a connect
//! gate; reads of an already cached connection never wait on it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;

use crate::core::config::ConnectMode;
use crate::data::{DataError, StorageConnection, StorageDriver};
use crate::utils::url::{resolve_namespace_url, sanitize_url};

/// Serializes connection attempts
enum ConnectGate {
    /// One attempt at a time across every namespace. The tokio mutex is fair,
    /// so waiters are served in arrival order.
    Global(Arc<AsyncMutex<()>>),
    /// One attempt at a time per namespace
    PerNamespace(parking_lot::Mutex<HashMap<String, Arc<AsyncMutex<()>>>>),
}

impl ConnectGate {
    fn new(mode: ConnectMode) -> Self {
        match mode {
            ConnectMode::Global => Self::Global(Arc::new(AsyncMutex::new(()))),
            ConnectMode::PerNamespace => Self::PerNamespace(parking_lot::Mutex::new(HashMap::new())),
        }
    }

    fn lock_for(&self, namespace: &str) -> Arc<AsyncMutex<()>> {
        match self {
            Self::Global(lock) => Arc::clone(lock),
            Self::PerNamespace(locks) => Arc::clone(
                locks
                    .lock()
                    .entry(namespace.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            ),
        }
    }
}

/// Namespace to connection cache
///
/// An entry is written once, after its connect succeeded, and never replaced.
/// Failed attempts leave nothing behind, so the next acquire tries again.
/// Once closed, every acquire fails and late connects are closed on arrival.
pub struct ConnectionCache {
    driver: Arc<dyn StorageDriver>,
    url_template: String,
    connections: DashMap<String, Arc<dyn StorageConnection>>,
    gate: ConnectGate,
    closed: AtomicBool,
}

impl ConnectionCache {
    pub fn new(driver: Arc<dyn StorageDriver>, url_template: impl Into<String>, mode: ConnectMode) -> Self {
        Self {
            driver,
            url_template: url_template.into(),
            connections: DashMap::new(),
            gate: ConnectGate::new(mode),
            closed: AtomicBool::new(false),
        }
    }

    /// Connection for `namespace`, connecting on first use
    pub async fn acquire(&self, namespace: &str) -> Result<Arc<dyn StorageConnection>, DataError> {
        if self.is_closed() {
            return Err(self.closed_error(namespace));
        }
        if let Some(conn) = self.cached(namespace) {
            return Ok(conn);
        }

        let lock = self.gate.lock_for(namespace);
        let _guard = lock.lock().await;

        // Another waiter may have connected this namespace while we queued
        if let Some(conn) = self.cached(namespace) {
            return Ok(conn);
        }
        if self.is_closed() {
            return Err(self.closed_error(namespace));
        }

        let url = resolve_namespace_url(&self.url_template, namespace);
        tracing::debug!(
            namespace = %namespace,
            backend = self.driver.backend_name(),
            url = %sanitize_url(&url),
            "Connecting to storage"
        );

        let conn = self.driver.connect(&url).await?;
        self.connections
            .insert(namespace.to_string(), Arc::clone(&conn));

        // close_all either saw the entry above or set the flag before we read it
        if self.is_closed() {
            if let Some((_, late)) = self.connections.remove(namespace) {
                late.close().await;
                tracing::debug!(namespace = %namespace, "Closed connection opened during shutdown");
            }
            return Err(self.closed_error(namespace));
        }
        Ok(conn)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn closed_error(&self, namespace: &str) -> DataError {
        DataError::connect(
            self.driver.backend_name(),
            &resolve_namespace_url(&self.url_template, namespace),
            "connection cache is closed",
        )
    }

    fn cached(&self, namespace: &str) -> Option<Arc<dyn StorageConnection>> {
        self.connections
            .get(namespace)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, namespace: &str) -> bool {
        self.connections.contains_key(namespace)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Close and forget every cached connection, refusing new ones from now on
    pub async fn close_all(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let namespaces: Vec<String> = self
            .connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        let closing = namespaces
            .iter()
            .filter_map(|namespace| self.connections.remove(namespace))
            .map(|(namespace, conn)| async move {
                conn.close().await;
                tracing::debug!(namespace = %namespace, "Storage connection closed");
            });
        futures::future::join_all(closing).await;
    }
}
