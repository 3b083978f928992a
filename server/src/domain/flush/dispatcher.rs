//! Fan-out of one flush event into independent insert pipelines

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::{FutureExt, StreamExt};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

use super::executor::InsertExecutor;
use super::naming::NamingPolicy;
use super::types::{FlushEvent, RoutedBatch, RoutedMetric};

/// Outcome counts of one flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
    pub timestamp: i64,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Routes a flush event and runs one insert pipeline per (kind, name) pair
///
/// Pipelines of one flush run concurrently up to `max_concurrent`, with no
/// ordering between them. A pipeline that errors or panics is logged and
/// never affects its siblings or later flushes.
pub struct FlushDispatcher {
    naming: NamingPolicy,
    executor: Arc<InsertExecutor>,
    max_concurrent: usize,
    tracker: TaskTracker,
    debug: bool,
}

impl FlushDispatcher {
    pub fn new(
        naming: NamingPolicy,
        executor: Arc<InsertExecutor>,
        max_concurrent: usize,
        debug: bool,
    ) -> Self {
        Self {
            naming,
            executor,
            max_concurrent: max_concurrent.max(1),
            tracker: TaskTracker::new(),
            debug,
        }
    }

    /// Start persisting `event` in the background
    ///
    /// Returns immediately; the handle resolves to the flush summary once
    /// every pipeline of this event has finished.
    pub fn dispatch(&self, event: FlushEvent) -> JoinHandle<FlushSummary> {
        let timestamp = event.timestamp;
        let routed = event.metrics.into_routed(timestamp, &self.naming);
        let executor = Arc::clone(&self.executor);
        let max_concurrent = self.max_concurrent;
        let debug = self.debug;

        self.tracker.spawn(async move {
            let summary = run_pipelines(executor, timestamp, routed, max_concurrent).await;
            if debug {
                tracing::info!(
                    timestamp = summary.timestamp,
                    attempted = summary.attempted,
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    "Flush done"
                );
            } else {
                tracing::debug!(
                    timestamp = summary.timestamp,
                    attempted = summary.attempted,
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    "Flush done"
                );
            }
            summary
        })
    }

    /// Tracker of in-flight flushes
    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }
}

async fn run_pipelines(
    executor: Arc<InsertExecutor>,
    timestamp: i64,
    routed: RoutedBatch,
    max_concurrent: usize,
) -> FlushSummary {
    let attempted = routed.metrics.len() + routed.rejected;

    let succeeded = futures::stream::iter(routed.metrics.into_iter().map(|metric| {
        let executor = Arc::clone(&executor);
        async move { run_pipeline(&executor, &metric).await }
    }))
    .buffer_unordered(max_concurrent)
    .filter(|ok| futures::future::ready(*ok))
    .count()
    .await;

    FlushSummary {
        timestamp,
        attempted,
        succeeded,
        failed: attempted - succeeded,
    }
}

/// Run one pipeline, logging its failure as soon as it happens
async fn run_pipeline(executor: &InsertExecutor, metric: &RoutedMetric) -> bool {
    match AssertUnwindSafe(executor.execute(metric)).catch_unwind().await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::warn!(
                error = %e,
                stage = e.kind(),
                kind = %metric.kind,
                namespace = %metric.namespace,
                collection = %metric.collection,
                "Failed to persist metric"
            );
            false
        }
        Err(panic) => {
            tracing::error!(
                panic = %panic_message(panic.as_ref()),
                kind = %metric.kind,
                namespace = %metric.namespace,
                collection = %metric.collection,
                "Insert pipeline panicked"
            );
            false
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ConnectMode;
    use crate::data::CollectionOptions;
    use crate::domain::flush::connections::ConnectionCache;
    use crate::domain::flush::provision::CollectionProvisioner;
    use crate::domain::flush::testing::{Fault, TestDriver};
    use crate::domain::flush::types::MetricBatch;
    use serde_json::{Map as JsonMap, json};

    fn executor(driver: &Arc<TestDriver>) -> InsertExecutor {
        InsertExecutor::new(
            Arc::new(ConnectionCache::new(
                driver.clone(),
                "test://{namespace}",
                ConnectMode::Global,
            )),
            Arc::new(CollectionProvisioner::new(CollectionOptions::capped(
                100,
                2160,
                &JsonMap::new(),
            ))),
            false,
        )
    }

    fn dispatcher(driver: &Arc<TestDriver>, max_concurrent: usize) -> FlushDispatcher {
        FlushDispatcher::new(
            NamingPolicy::new(true, "statsd", 10),
            Arc::new(executor(driver)),
            max_concurrent,
            false,
        )
    }

    fn event(timestamp: i64, counters: &[(&str, i64)]) -> FlushEvent {
        let mut metrics = MetricBatch::default();
        for (name, value) in counters {
            metrics.counters.insert(name.to_string(), json!(value));
        }
        FlushEvent { timestamp, metrics }
    }

    #[tokio::test]
    async fn test_end_to_end_counter() {
        let driver = Arc::new(TestDriver::new());
        let summary = dispatcher(&driver, 8)
            .dispatch(event(1000, &[("web.hits", 5)]))
            .await
            .unwrap();

        assert_eq!(
            summary,
            FlushSummary {
                timestamp: 1000,
                attempted: 1,
                succeeded: 1,
                failed: 0
            }
        );
        let inserted = driver.inserted();
        assert_eq!(inserted.len(), 1);
        assert_eq!(inserted[0].0, "web");
        assert_eq!(inserted[0].1, "counters.hits_10");
        assert_eq!(
            serde_json::Value::Object(inserted[0].2.clone()),
            json!({ "time": 1000, "count": 5 })
        );
    }

    #[tokio::test]
    async fn test_insert_failure_is_isolated() {
        let driver = Arc::new(TestDriver::new());
        driver.inject("counters.a_10", Fault::Insert);

        let summary = dispatcher(&driver, 8)
            .dispatch(event(1, &[("web.a", 1), ("web.b", 2), ("web.c", 3)]))
            .await
            .unwrap();

        assert_eq!(summary.attempted, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        let mut collections: Vec<String> = driver.inserted().into_iter().map(|i| i.1).collect();
        collections.sort();
        assert_eq!(collections, vec!["counters.b_10", "counters.c_10"]);
    }

    #[tokio::test]
    async fn test_panic_is_isolated() {
        let driver = Arc::new(TestDriver::new());
        driver.inject("counters.a_10", Fault::Panic);

        let summary = dispatcher(&driver, 1)
            .dispatch(event(1, &[("web.a", 1), ("web.b", 2)]))
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(driver.inserted()[0].1, "counters.b_10");
    }

    #[tokio::test]
    async fn test_connect_failure_only_affects_its_namespace() {
        let driver = Arc::new(TestDriver::new());
        driver.inject("api", Fault::Connect);

        let summary = dispatcher(&driver, 4)
            .dispatch(event(1, &[("api.calls", 1), ("api.errors", 2), ("web.hits", 3)]))
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 2);
        assert_eq!(driver.inserted()[0].0, "web");
    }

    #[tokio::test]
    async fn test_many_metrics_bounded_concurrency() {
        let driver = Arc::new(TestDriver::new());
        let names: Vec<String> = (0..100).map(|i| format!("ns{}.m{i}", i % 5)).collect();
        let counters: Vec<(&str, i64)> = names.iter().map(|n| (n.as_str(), 1)).collect();

        let summary = dispatcher(&driver, 3)
            .dispatch(event(7, &counters))
            .await
            .unwrap();

        assert_eq!(summary.attempted, 100);
        assert_eq!(summary.succeeded, 100);
        assert_eq!(driver.connect_attempts(), 5);
        assert_eq!(driver.create_calls(), 100);
    }

    #[tokio::test]
    async fn test_malformed_value_counts_as_failed() {
        let driver = Arc::new(TestDriver::new());
        let mut metrics = MetricBatch::default();
        metrics.counters.insert("web.hits".to_string(), json!(5));
        metrics
            .timers
            .insert("api.latency".to_string(), json!([1, null]));

        let summary = dispatcher(&driver, 4)
            .dispatch(FlushEvent {
                timestamp: 3,
                metrics,
            })
            .await
            .unwrap();

        assert_eq!(summary.attempted, 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(driver.inserted()[0].1, "counters.hits_10");
    }

    #[tokio::test]
    async fn test_run_pipeline_reports_each_outcome() {
        let driver = Arc::new(TestDriver::new());
        driver.inject("counters.bad_10", Fault::Insert);
        driver.inject("counters.boom_10", Fault::Panic);
        let executor = executor(&driver);
        let naming = NamingPolicy::new(true, "statsd", 10);

        let routed = event(1, &[("web.ok", 1), ("web.bad", 1), ("web.boom", 1)])
            .metrics
            .into_routed(1, &naming);
        let mut outcomes = Vec::new();
        for metric in &routed.metrics {
            outcomes.push((
                metric.collection.clone(),
                run_pipeline(&executor, metric).await,
            ));
        }
        outcomes.sort();

        assert_eq!(
            outcomes,
            vec![
                ("counters.bad_10".to_string(), false),
                ("counters.boom_10".to_string(), false),
                ("counters.ok_10".to_string(), true),
            ]
        );
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(5u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
