//! Behaviour shared by every operation kind driven by an [`OperationManager`].
//!
//! [`OperationManager`]: crate::manager::OperationManager

use common::traits::NotificationSystem;
use common::{
    BlobId, CorrelationId, NetworkError, ReplicaId, RequestInfo, RequestKind, ResponseInfo,
    RouterError, ServerErrorCode,
};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;

/// Hands out correlation ids. Ids are never reused for the life of the generator.
#[derive(Debug)]
pub struct CorrelationIdGenerator {
    next: AtomicU64,
}

impl CorrelationIdGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> CorrelationId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for CorrelationIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Manager-side hooks available to an operation while it is polled.
pub trait RequestRegistrar {
    /// Fresh correlation id for a request about to be built.
    fn next_correlation_id(&mut self) -> CorrelationId;

    /// Queue `request` for sending and map its correlation id to the operation.
    fn register_request_to_send(&mut self, request: RequestInfo);

    /// A pending request gave up waiting. Its correlation id is forgotten and
    /// the replica is reported as timed out.
    fn on_request_expired(&mut self, correlation_id: CorrelationId, replica: &ReplicaId);
}

/// A single client call coordinated across the replicas of one partition.
///
/// Operations are only ever touched by one thread at a time; the manager
/// serialises `poll` and `handle_response` per operation.
pub trait Operation: Send + 'static {
    type Output: Clone + Send + Unpin + 'static;

    const KIND: RequestKind;

    /// Issue requests to replicas that still need one. Must never block.
    fn poll(&mut self, registrar: &mut dyn RequestRegistrar) -> Result<(), RouterError>;

    /// Consume the response to one of this operation's requests.
    fn handle_response(&mut self, response: &ResponseInfo) -> Result<(), RouterError>;

    fn is_complete(&self) -> bool;

    fn result(&self) -> Option<&Self::Output>;

    fn error(&self) -> Option<&RouterError>;

    /// Force a terminal failure. The operation is complete afterwards.
    fn set_operation_error(&mut self, error: RouterError);

    fn blob_id(&self) -> &BlobId;

    fn submitted_at(&self) -> Instant;

    /// Correlation ids of requests still awaiting a response.
    fn pending_correlation_ids(&self) -> Vec<CorrelationId>;

    /// Called once after a successful completion.
    fn notify_success(&self, _notifications: &dyn NotificationSystem) {}

    fn outcome(&self) -> Result<Self::Output, RouterError> {
        if let Some(error) = self.error() {
            return Err(error.clone());
        }
        match self.result() {
            Some(result) => Ok(result.clone()),
            None => Err(RouterError::unexpected(
                format!("{} operation", Self::KIND),
                "completed without a result",
            )),
        }
    }
}

/// Replica-level error for a server code that is not success for this kind.
pub(crate) fn replica_error(replica: &ReplicaId, code: ServerErrorCode) -> RouterError {
    RouterError::ReplicaReported {
        replica: replica.to_string(),
        code,
    }
}

pub(crate) fn transport_error(replica: &ReplicaId, error: &NetworkError) -> RouterError {
    match error {
        NetworkError::RequestTimeout => RouterError::OperationTimedOut {
            replica: replica.to_string(),
        },
        other => RouterError::TransportFailure {
            replica: replica.to_string(),
            error: other.clone(),
        },
    }
}

/// Shared ranking for per-replica failures: storage faults, then other
/// replica errors, then timeouts and transport faults.
pub(crate) fn failure_rank(error: &RouterError) -> u8 {
    match error {
        RouterError::ReplicaReported { code, .. } if code.is_storage_error() => 4,
        RouterError::ReplicaReported { .. } => 3,
        RouterError::OperationTimedOut { .. } | RouterError::TransportFailure { .. } => 2,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{DataNodeId, DiskId, PartitionId};
    use std::collections::HashSet;
    use std::sync::Arc;

    fn replica() -> ReplicaId {
        ReplicaId::new(
            PartitionId(0),
            DiskId::new(DataNodeId::new("node", 6667), "/mnt/0"),
            "dc1",
        )
    }

    #[test]
    fn correlation_ids_are_unique_across_threads() {
        let generator = Arc::new(CorrelationIdGenerator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let generator = generator.clone();
                std::thread::spawn(move || (0..1_000).map(|_| generator.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate correlation id {id}");
            }
        }
        assert_eq!(seen.len(), 4_000);
    }

    #[test]
    fn request_timeouts_become_operation_timeouts() {
        assert!(matches!(
            transport_error(&replica(), &NetworkError::RequestTimeout),
            RouterError::OperationTimedOut { .. }
        ));
        assert!(matches!(
            transport_error(&replica(), &NetworkError::ConnectionPoolTimeout),
            RouterError::TransportFailure { .. }
        ));
    }

    #[test]
    fn storage_errors_rank_highest() {
        let io = replica_error(&replica(), ServerErrorCode::IoError);
        let read_only = replica_error(&replica(), ServerErrorCode::PartitionReadOnly);
        assert!(failure_rank(&io) > failure_rank(&read_only));
        assert!(
            failure_rank(&read_only)
                > failure_rank(&transport_error(&replica(), &NetworkError::RequestTimeout))
        );
        assert!(failure_rank(&RouterError::unexpected("test", "boom")) < 2);
    }
}
