//! Flush sink facade

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;

use super::connections::ConnectionCache;
use super::dispatcher::{FlushDispatcher, FlushSummary};
use super::executor::InsertExecutor;
use super::naming::NamingPolicy;
use super::provision::CollectionProvisioner;
use super::types::FlushEvent;
use crate::core::config::SinkConfig;
use crate::data::StorageDriver;
use crate::utils::url::sanitize_url;

/// Persists flush events into capped collections
///
/// Owns the connection cache for its whole run; `shutdown` waits for
/// in-flight inserts and then closes every connection.
pub struct FlushSink {
    connections: Arc<ConnectionCache>,
    provisioner: Arc<CollectionProvisioner>,
    dispatcher: FlushDispatcher,
    accepting: AtomicBool,
}

impl FlushSink {
    pub fn new(config: &SinkConfig, driver: Arc<dyn StorageDriver>) -> Self {
        let connections = Arc::new(ConnectionCache::new(
            driver,
            config.storage_url.clone(),
            config.connect_mode,
        ));
        let provisioner = Arc::new(CollectionProvisioner::from_config(config));
        let executor = Arc::new(InsertExecutor::new(
            Arc::clone(&connections),
            Arc::clone(&provisioner),
            config.debug,
        ));
        let dispatcher = FlushDispatcher::new(
            NamingPolicy::from_config(config),
            executor,
            config.max_concurrent_inserts,
            config.debug,
        );

        tracing::debug!(
            storage_url = %sanitize_url(&config.storage_url),
            flush_rate_secs = config.flush_rate_secs,
            prefix_routing = config.prefix_routing,
            connect_mode = %config.connect_mode,
            "Flush sink initialized"
        );

        Self {
            connections,
            provisioner,
            dispatcher,
            accepting: AtomicBool::new(true),
        }
    }

    /// Persist one flush event in the background
    ///
    /// Returns `None` once the sink is shutting down.
    pub fn on_flush(&self, event: FlushEvent) -> Option<JoinHandle<FlushSummary>> {
        if !self.accepting.load(Ordering::Acquire) {
            tracing::warn!(
                timestamp = event.timestamp,
                metrics = event.metrics.len(),
                "Flush sink is shut down, dropping flush"
            );
            return None;
        }
        Some(self.dispatcher.dispatch(event))
    }

    pub fn connections(&self) -> &ConnectionCache {
        &self.connections
    }

    /// Stop accepting flushes, wait for in-flight inserts, then close connections
    pub async fn shutdown(&self, timeout: Duration) {
        self.accepting.store(false, Ordering::Release);

        let tracker = self.dispatcher.tracker();
        tracker.close();
        tracing::debug!(pending = tracker.len(), "Waiting for in-flight flushes...");
        if tokio::time::timeout(timeout, tracker.wait()).await.is_err() {
            tracing::warn!(
                timeout_secs = timeout.as_secs(),
                pending = tracker.len(),
                "Timeout waiting for in-flight flushes"
            );
        }

        self.connections.close_all().await;
        self.provisioner.close();
        tracing::debug!("Flush sink shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ConnectMode;
    use crate::data::{MemoryDriver, SqliteDriver};
    use crate::domain::flush::testing::TestDriver;
    use crate::domain::flush::types::MetricBatch;
    use serde_json::json;

    fn event(value: serde_json::Value) -> FlushEvent {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_end_to_end_memory() {
        let driver = Arc::new(MemoryDriver::new());
        let sink = FlushSink::new(&SinkConfig::new("memory://{namespace}"), driver.clone());

        let summary = sink
            .on_flush(event(json!({
                "timestamp": 1000,
                "metrics": { "counters": { "web.hits": 5 }, "gauges": { "web.load": 0.5 } }
            })))
            .unwrap()
            .await
            .unwrap();
        assert_eq!(summary.succeeded, 2);

        let web = driver.database("memory://web").unwrap();
        assert_eq!(web.collection_names(), vec!["counters.hits_10", "gauges.load_10"]);
        let hits = web.collection("counters.hits_10").unwrap();
        assert_eq!(
            serde_json::Value::Object(hits.documents()[0].clone()),
            json!({ "time": 1000, "count": 5 })
        );
        assert_eq!(hits.limits().size, Some(216_000));
        assert_eq!(hits.limits().max, Some(2160));
    }

    #[tokio::test]
    async fn test_fallback_namespace_shares_one_database() {
        let driver = Arc::new(MemoryDriver::new());
        let mut config = SinkConfig::new("memory://{namespace}");
        config.prefix_routing = false;
        config.fallback_namespace = "graphs".to_string();
        let sink = FlushSink::new(&config, driver.clone());

        sink.on_flush(event(json!({
            "timestamp": 5,
            "metrics": { "counters": { "web.hits": 1, "api.calls": 2 } }
        })))
        .unwrap()
        .await
        .unwrap();

        let graphs = driver.database("memory://graphs").unwrap();
        assert_eq!(
            graphs.collection_names(),
            vec!["counters.api.calls_10", "counters.web.hits_10"]
        );
        assert_eq!(driver.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_end_to_end_sqlite_per_namespace_files() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}/{{namespace}}.db?mode=rwc", dir.path().display());
        let mut config = SinkConfig::new(url);
        config.connect_mode = ConnectMode::PerNamespace;
        let sink = FlushSink::new(&config, Arc::new(SqliteDriver::new()));

        let summary = sink
            .on_flush(event(json!({
                "timestamp": 1000,
                "metrics": {
                    "counters": { "web.hits": 5 },
                    "timers": { "api.latency": [1, 2, 3] }
                }
            })))
            .unwrap()
            .await
            .unwrap();
        assert_eq!(summary.succeeded, 2);
        assert!(dir.path().join("web.db").exists());
        assert!(dir.path().join("api.db").exists());

        sink.shutdown(Duration::from_secs(5)).await;
        assert!(sink.connections().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_closes_connections_and_rejects_flushes() {
        let driver = Arc::new(TestDriver::new());
        let sink = FlushSink::new(&SinkConfig::new("test://{namespace}"), driver.clone());

        let mut metrics = MetricBatch::default();
        metrics.sets.insert("web.users".to_string(), json!(3));
        sink.on_flush(FlushEvent {
            timestamp: 1,
            metrics: metrics.clone(),
        })
        .unwrap()
        .await
        .unwrap();
        assert!(sink.connections().contains("web"));

        sink.shutdown(Duration::from_secs(1)).await;
        assert_eq!(driver.closed_connections(), 1);
        assert!(sink.connections().is_empty());
        assert!(
            sink.on_flush(FlushEvent {
                timestamp: 2,
                metrics
            })
            .is_none()
        );
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_flush() {
        let driver = Arc::new(TestDriver::with_connect_delay(50));
        let sink = FlushSink::new(&SinkConfig::new("test://{namespace}"), driver.clone());

        let mut metrics = MetricBatch::default();
        metrics.counters.insert("web.hits".to_string(), json!(1));
        let handle = sink
            .on_flush(FlushEvent {
                timestamp: 1,
                metrics,
            })
            .unwrap();

        sink.shutdown(Duration::from_secs(5)).await;
        assert_eq!(driver.inserted().len(), 1);
        assert_eq!(handle.await.unwrap().succeeded, 1);
    }

    #[tokio::test]
    async fn test_shutdown_timeout_closes_late_connections() {
        let driver = Arc::new(TestDriver::with_connect_delay(200));
        let sink = FlushSink::new(&SinkConfig::new("test://{namespace}"), driver.clone());

        let mut metrics = MetricBatch::default();
        metrics.counters.insert("web.hits".to_string(), json!(1));
        let handle = sink
            .on_flush(FlushEvent {
                timestamp: 1,
                metrics,
            })
            .unwrap();

        sink.shutdown(Duration::from_millis(50)).await;
        let summary = handle.await.unwrap();

        assert_eq!(summary.failed, 1);
        assert!(sink.connections().is_empty());
        assert_eq!(driver.closed_connections(), 1);
        assert!(driver.inserted().is_empty());
    }
}
