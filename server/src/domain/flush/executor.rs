//! Single-metric insert pipeline

use std::sync::Arc;

use super::connections::ConnectionCache;
use super::provision::CollectionProvisioner;
use super::types::RoutedMetric;
use crate::data::DataError;

/// Runs connect, ensure-collection and insert for one routed metric
///
/// Each stage's failure ends the pipeline for that metric only.
pub struct InsertExecutor {
    connections: Arc<ConnectionCache>,
    provisioner: Arc<CollectionProvisioner>,
    debug: bool,
}

impl InsertExecutor {
    pub fn new(
        connections: Arc<ConnectionCache>,
        provisioner: Arc<CollectionProvisioner>,
        debug: bool,
    ) -> Self {
        Self {
            connections,
            provisioner,
            debug,
        }
    }

    pub async fn execute(&self, metric: &RoutedMetric) -> Result<(), DataError> {
        let connection = self.connections.acquire(&metric.namespace).await?;
        let collection = self
            .provisioner
            .ensure(&metric.namespace, &connection, &metric.collection)
            .await?;
        collection.insert_document(&metric.document).await?;

        if self.debug {
            tracing::info!(
                kind = %metric.kind,
                namespace = %metric.namespace,
                collection = %metric.collection,
                "Metric inserted"
            );
        }
        Ok(())
    }
}
