//! Metric name routing
//!
//! Pure functions from a metric name to its destination namespace and
//! collection. No I/O.

use super::types::MetricKind;
use crate::core::config::SinkConfig;

/// Maps metric names to namespaces and collection names
#[derive(Debug, Clone)]
pub struct NamingPolicy {
    prefix_routing: bool,
    fallback_namespace: String,
    flush_rate_secs: u64,
}

impl NamingPolicy {
    pub fn new(
        prefix_routing: bool,
        fallback_namespace: impl Into<String>,
        flush_rate_secs: u64,
    ) -> Self {
        Self {
            prefix_routing,
            fallback_namespace: fallback_namespace.into(),
            flush_rate_secs,
        }
    }

    pub fn from_config(config: &SinkConfig) -> Self {
        Self::new(
            config.prefix_routing,
            config.fallback_namespace.clone(),
            config.flush_rate_secs,
        )
    }

    /// First dot-delimited segment under prefix routing, else the fallback namespace
    pub fn namespace_for<'a>(&'a self, metric: &'a str) -> &'a str {
        if self.prefix_routing {
            metric.split_once('.').map_or(metric, |(first, _)| first)
        } else {
            &self.fallback_namespace
        }
    }

    /// `<kind tag>[.<segments>]_<rate>`
    ///
    /// Under prefix routing the namespace segment is dropped, so a name without
    /// dots collapses to `<kind tag>_<rate>`.
    pub fn collection_for(&self, kind: MetricKind, metric: &str) -> String {
        let mut segments = metric.split('.');
        if self.prefix_routing {
            segments.next();
        }

        let mut name = String::from(kind.tag());
        for segment in segments {
            name.push('.');
            name.push_str(segment);
        }
        name.push('_');
        name.push_str(&self.flush_rate_secs.to_string());
        name
    }
}
