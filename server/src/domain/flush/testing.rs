//! Instrumented storage driver for pipeline tests

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::data::{
    CollectionHandle, CollectionOptions, DataError, Document, StorageConnection, StorageDriver,
};

const SCHEME: &str = "test://";

/// Failure injected for a namespace (connect) or a collection (provision, insert)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Connect,
    Provision,
    Insert,
    Panic,
}

#[derive(Default)]
struct State {
    connect_delay: Duration,
    attempts: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    creates: AtomicUsize,
    closed: AtomicUsize,
    faults: Mutex<HashMap<String, Fault>>,
    urls: Mutex<Vec<String>>,
    inserted: Mutex<Vec<(String, String, Document)>>,
}

impl State {
    fn fault(&self, key: &str) -> Option<Fault> {
        self.faults.lock().get(key).copied()
    }
}

/// Counts connects, tracks overlapping connects and injects failures
#[derive(Default)]
pub struct TestDriver {
    state: Arc<State>,
}

impl TestDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_delay(millis: u64) -> Self {
        Self {
            state: Arc::new(State {
                connect_delay: Duration::from_millis(millis),
                ..Default::default()
            }),
        }
    }

    pub fn inject(&self, key: &str, fault: Fault) {
        self.state.faults.lock().insert(key.to_string(), fault);
    }

    pub fn clear_faults(&self) {
        self.state.faults.lock().clear();
    }

    pub fn connect_attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_connects(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.state.creates.load(Ordering::SeqCst)
    }

    pub fn closed_connections(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    pub fn connected_urls(&self) -> Vec<String> {
        self.state.urls.lock().clone()
    }

    /// Successful inserts as (namespace, collection, document)
    pub fn inserted(&self) -> Vec<(String, String, Document)> {
        self.state.inserted.lock().clone()
    }
}

#[async_trait]
impl StorageDriver for TestDriver {
    async fn connect(&self, url: &str) -> Result<Arc<dyn StorageConnection>, DataError> {
        let state = &self.state;
        state.attempts.fetch_add(1, Ordering::SeqCst);
        let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        state.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !state.connect_delay.is_zero() {
            tokio::time::sleep(state.connect_delay).await;
        }
        state.in_flight.fetch_sub(1, Ordering::SeqCst);

        let namespace = url.strip_prefix(SCHEME).unwrap_or(url).to_string();
        if state.fault(&namespace) == Some(Fault::Connect) {
            return Err(DataError::connect("test", url, "injected connect failure"));
        }
        state.urls.lock().push(url.to_string());

        Ok(Arc::new(TestConnection {
            namespace,
            state: Arc::clone(state),
        }))
    }

    fn backend_name(&self) -> &'static str {
        "test"
    }
}

struct TestConnection {
    namespace: String,
    state: Arc<State>,
}

#[async_trait]
impl StorageConnection for TestConnection {
    async fn create_collection(
        &self,
        name: &str,
        options: &CollectionOptions,
    ) -> Result<Arc<dyn CollectionHandle>, DataError> {
        self.state.creates.fetch_add(1, Ordering::SeqCst);
        if self.state.fault(name) == Some(Fault::Provision) {
            return Err(DataError::provision(name, "injected provision failure"));
        }
        options
            .limits()
            .map_err(|reason| DataError::provision(name, reason))?;
        Ok(Arc::new(TestCollection {
            namespace: self.namespace.clone(),
            name: name.to_string(),
            state: Arc::clone(&self.state),
        }))
    }

    async fn close(&self) {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
    }
}

struct TestCollection {
    namespace: String,
    name: String,
    state: Arc<State>,
}

#[async_trait]
impl CollectionHandle for TestCollection {
    async fn insert_document(&self, document: &Document) -> Result<(), DataError> {
        match self.state.fault(&self.name) {
            Some(Fault::Insert) => Err(DataError::insert(&self.name, "injected insert failure")),
            Some(Fault::Panic) => panic!("injected panic in {}", self.name),
            _ => {
                self.state.inserted.lock().push((
                    self.namespace.clone(),
                    self.name.clone(),
                    document.clone(),
                ));
                Ok(())
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
