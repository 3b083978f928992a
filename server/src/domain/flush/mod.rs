//! Flush-to-storage pipeline
//!
//! Routes each metric of a flush event to a namespace and collection,
//! connects lazily through a serialized connection cache, provisions capped
//! collections on first use and inserts one document per metric.

mod connections;
mod dispatcher;
mod executor;
mod naming;
mod pipeline;
mod provision;
mod sink;
#[cfg(test)]
pub(crate) mod testing;
mod types;

pub use connections::ConnectionCache;
pub use dispatcher::{FlushDispatcher, FlushSummary};
pub use executor::InsertExecutor;
pub use naming::NamingPolicy;
pub use pipeline::FlushPipeline;
pub use provision::CollectionProvisioner;
pub use sink::FlushSink;
pub use types::{FlushEvent, MetricBatch, MetricKind, RoutedBatch, RoutedMetric};
