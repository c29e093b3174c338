use clustermap::ResponseHandler;
use common::traits::{NotificationSystem, ReplicaDirectory};
use common::{PartitionId, ReplicaId, RouterConfig, RouterError};
use std::sync::Arc;

use crate::metrics::RouterMetrics;
use crate::operation::CorrelationIdGenerator;

/// Collaborators shared by every operation manager of one router.
pub struct RouterContext {
    pub config: Arc<RouterConfig>,
    pub directory: Arc<dyn ReplicaDirectory>,
    pub response_handler: ResponseHandler,
    pub notifications: Arc<dyn NotificationSystem>,
    pub metrics: Arc<RouterMetrics>,
    pub correlation_ids: CorrelationIdGenerator,
}

impl RouterContext {
    pub fn new(
        config: RouterConfig,
        directory: Arc<dyn ReplicaDirectory>,
        notifications: Arc<dyn NotificationSystem>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            response_handler: ResponseHandler::new(directory.clone()),
            directory,
            notifications,
            metrics: Arc::new(RouterMetrics::new()),
            correlation_ids: CorrelationIdGenerator::new(),
        }
    }

    pub fn replicas_for(&self, partition: PartitionId) -> Result<Vec<ReplicaId>, RouterError> {
        self.directory.replicas_for(partition).ok_or_else(|| {
            RouterError::unexpected(
                "replica lookup",
                format!("partition {partition} vanished from the cluster map"),
            )
        })
    }
}
