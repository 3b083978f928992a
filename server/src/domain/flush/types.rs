//! Flush event and routed metric types

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::naming::NamingPolicy;
use crate::data::Document;

/// The five metric families a flush carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Gauge,
    TimerData,
    Timer,
    Counter,
    Set,
}

impl MetricKind {
    /// Collection name tag. Timer summaries share the `timers` tag with raw timers.
    pub fn tag(self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauges",
            MetricKind::TimerData | MetricKind::Timer => "timers",
            MetricKind::Counter => "counters",
            MetricKind::Set => "sets",
        }
    }

    /// Field name in the flush payload
    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauges",
            MetricKind::TimerData => "timer_data",
            MetricKind::Timer => "timers",
            MetricKind::Counter => "counters",
            MetricKind::Set => "sets",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregated metrics of one flush, keyed by metric name
///
/// Kinds missing from the payload are empty; other payload keys
/// (`counter_rates`, `timer_counters`, ...) are ignored. Values are kept as
/// raw JSON so one malformed value only rejects its own (kind, name) pair.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct MetricBatch {
    #[serde(default)]
    pub gauges: BTreeMap<String, JsonValue>,
    #[serde(default)]
    pub timer_data: BTreeMap<String, JsonValue>,
    #[serde(default)]
    pub timers: BTreeMap<String, JsonValue>,
    #[serde(default)]
    pub counters: BTreeMap<String, JsonValue>,
    #[serde(default)]
    pub sets: BTreeMap<String, JsonValue>,
}

/// Routed metrics of one flush
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoutedBatch {
    pub metrics: Vec<RoutedMetric>,
    /// Pairs dropped because their value has the wrong shape
    pub rejected: usize,
}

impl MetricBatch {
    /// Number of (kind, name) pairs
    pub fn len(&self) -> usize {
        self.gauges.len()
            + self.timer_data.len()
            + self.timers.len()
            + self.counters.len()
            + self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve every (kind, name) pair to its destination and document
    pub fn into_routed(self, timestamp: i64, naming: &NamingPolicy) -> RoutedBatch {
        let mut batch = RoutedBatch {
            metrics: Vec::with_capacity(self.len()),
            rejected: 0,
        };

        for (name, value) in self.gauges {
            batch.metrics.push(RoutedMetric::new(
                MetricKind::Gauge,
                &name,
                naming,
                scalar_document(timestamp, "gauge", value),
            ));
        }
        for (name, value) in self.timer_data {
            match value {
                JsonValue::Object(mut summary) => {
                    summary.insert("time".to_string(), JsonValue::from(timestamp));
                    batch
                        .metrics
                        .push(RoutedMetric::new(MetricKind::TimerData, &name, naming, summary));
                }
                other => batch.reject(MetricKind::TimerData, &name, &other, "expected an object"),
            }
        }
        for (name, value) in self.timers {
            if is_duration_list(&value) {
                batch.metrics.push(RoutedMetric::new(
                    MetricKind::Timer,
                    &name,
                    naming,
                    scalar_document(timestamp, "durations", value),
                ));
            } else {
                batch.reject(MetricKind::Timer, &name, &value, "expected an array of numbers");
            }
        }
        for (name, value) in self.counters {
            batch.metrics.push(RoutedMetric::new(
                MetricKind::Counter,
                &name,
                naming,
                scalar_document(timestamp, "count", value),
            ));
        }
        for (name, value) in self.sets {
            batch.metrics.push(RoutedMetric::new(
                MetricKind::Set,
                &name,
                naming,
                scalar_document(timestamp, "set", value),
            ));
        }

        batch
    }
}

impl RoutedBatch {
    fn reject(&mut self, kind: MetricKind, name: &str, value: &JsonValue, reason: &str) {
        self.rejected += 1;
        tracing::warn!(
            kind = %kind,
            metric = %name,
            value = %value,
            reason,
            "Skipping malformed metric value"
        );
    }
}

fn is_duration_list(value: &JsonValue) -> bool {
    value
        .as_array()
        .is_some_and(|durations| durations.iter().all(JsonValue::is_number))
}

fn scalar_document(timestamp: i64, field: &str, value: JsonValue) -> Document {
    let mut document = Document::new();
    document.insert("time".to_string(), JsonValue::from(timestamp));
    document.insert(field.to_string(), value);
    document
}

/// One flush event from the upstream aggregator
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct FlushEvent {
    /// Flush time in whole seconds
    pub timestamp: i64,
    #[serde(default)]
    pub metrics: MetricBatch,
}

/// One metric resolved to its destination
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedMetric {
    pub kind: MetricKind,
    pub namespace: String,
    pub collection: String,
    pub document: Document,
}

impl RoutedMetric {
    fn new(kind: MetricKind, name: &str, naming: &NamingPolicy, document: Document) -> Self {
        Self {
            kind,
            namespace: naming.namespace_for(name).to_string(),
            collection: naming.collection_for(kind, name),
            document,
        }
    }
}
