use anyhow::Result;
use futures::future::BoxFuture;

use crate::protocol::{RequestInfo, ResponseInfo};
use crate::{BlobId, PartitionId, ReplicaEventType, ReplicaHealth, ReplicaId};

/// Resolves partitions to replicas and tracks per-replica health.
pub trait ReplicaDirectory: Send + Sync {
    /// Replicas hosting the partition, or `None` when the partition is unknown.
    fn replicas_for(&self, partition: PartitionId) -> Option<Vec<ReplicaId>>;

    fn partition_ids(&self) -> Vec<PartitionId>;

    /// Partitions currently accepting new blobs.
    fn writable_partitions(&self) -> Vec<PartitionId>;

    fn replica_health(&self, replica: &ReplicaId) -> ReplicaHealth;

    fn on_replica_event(&self, replica: &ReplicaId, event: ReplicaEventType);

    fn has_partition(&self, partition: PartitionId) -> bool {
        self.replicas_for(partition).is_some()
    }

    /// Whether `replica` lives outside the router's datacenter.
    fn is_remote(&self, replica: &ReplicaId, local_datacenter: &str) -> bool {
        replica.datacenter != local_datacenter
    }
}

/// Asynchronous request/response carrier between the router and storage nodes.
///
/// Transport faults are reported inside the returned [`ResponseInfo`]s, never
/// as an `Err` for an individual request. An `Err` from `send_and_poll` means
/// the whole batch could not be handed off.
pub trait Transport: Send + Sync {
    /// Queue `requests` for sending and return whatever responses have arrived
    /// since the previous call, in arrival order.
    fn send_and_poll(&self, requests: Vec<RequestInfo>) -> BoxFuture<'_, Result<Vec<ResponseInfo>>>;

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// Receives blob lifecycle notifications once operations succeed.
pub trait NotificationSystem: Send + Sync {
    fn on_blob_created(&self, blob_id: &BlobId, size: u64);

    fn on_blob_deleted(&self, blob_id: &BlobId);
}
