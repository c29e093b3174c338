//! Put: writes a fresh blob to every replica of a writable partition and
//! succeeds once the configured number of replicas acknowledge.

use bytes::Bytes;
use common::traits::NotificationSystem;
use common::{
    BlobId, CorrelationId, Request, RequestInfo, RequestKind, RequestPayload, ResponseInfo,
    RouterConfig, RouterError, ServerErrorCode,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, instrument, trace};

use crate::completion::{Callback, Completion, FutureResult};
use crate::manager::OperationManager;
use crate::operation::{failure_rank, replica_error, transport_error, Operation, RequestRegistrar};
use crate::tracker::ReplicaTracker;

pub struct PutOperation {
    config: Arc<RouterConfig>,
    blob_id: BlobId,
    data: Bytes,
    tracker: ReplicaTracker,
    success_target: usize,
    submitted_at: Instant,
    result: Option<BlobId>,
    error: Option<RouterError>,
}

impl PutOperation {
    pub fn new(
        config: Arc<RouterConfig>,
        blob_id: BlobId,
        data: Bytes,
        tracker: ReplicaTracker,
    ) -> Self {
        let success_target = config.put_success_target.min(tracker.total()).max(1);
        Self {
            config,
            blob_id,
            data,
            tracker,
            success_target,
            submitted_at: Instant::now(),
            result: None,
            error: None,
        }
    }

    pub fn success_target(&self) -> usize {
        self.success_target
    }

    fn update_state(&mut self) {
        if self.is_complete() {
            return;
        }
        let succeeded = self.tracker.succeeded();
        if succeeded >= self.success_target {
            self.result = Some(self.blob_id);
        } else if succeeded + self.tracker.remaining() < self.success_target {
            let cause = self
                .tracker
                .most_specific_failure(failure_rank)
                .unwrap_or_else(|| RouterError::unexpected("put operation", "no replicas"));
            self.error = Some(RouterError::InsufficientReplicas {
                required: self.success_target,
                achieved: succeeded,
                cause: Box::new(cause),
            });
        }
    }
}

impl Operation for PutOperation {
    type Output = BlobId;

    const KIND: RequestKind = RequestKind::Put;

    fn poll(&mut self, registrar: &mut dyn RequestRegistrar) -> Result<(), RouterError> {
        if self.is_complete() {
            return Ok(());
        }
        for (correlation_id, replica) in self
            .tracker
            .expire(Instant::now(), self.config.request_timeout())
        {
            registrar.on_request_expired(correlation_id, &replica);
        }
        self.update_state();
        if self.is_complete() {
            return Ok(());
        }

        for index in self.tracker.next_replicas(self.tracker.total()) {
            let correlation_id = registrar.next_correlation_id();
            let request = RequestInfo::new(
                self.tracker.replica(index).clone(),
                Request {
                    correlation_id,
                    client_id: self.config.client_id.clone(),
                    payload: RequestPayload::Put {
                        blob_id: self.blob_id,
                        data: self.data.clone(),
                    },
                },
            );
            trace!(blob_id = %self.blob_id, replica = %request.replica(), correlation_id, "issuing put");
            self.tracker
                .mark_pending(index, correlation_id, request.issued_at());
            registrar.register_request_to_send(request);
        }
        Ok(())
    }

    fn handle_response(&mut self, response: &ResponseInfo) -> Result<(), RouterError> {
        if self.is_complete() {
            return Ok(());
        }
        let Some(index) = self.tracker.on_response(response.correlation_id()) else {
            debug!(correlation_id = response.correlation_id(), "put response for no pending request");
            return Ok(());
        };

        let replica = self.tracker.replica(index).clone();
        match response.outcome() {
            Ok(reply) if reply.error == ServerErrorCode::NoError => {
                self.tracker.record_success(index)
            }
            Ok(reply) => self
                .tracker
                .record_failure(index, replica_error(&replica, reply.error)),
            Err(error) => self
                .tracker
                .record_failure(index, transport_error(&replica, error)),
        }
        self.update_state();
        Ok(())
    }

    fn is_complete(&self) -> bool {
        self.result.is_some() || self.error.is_some()
    }

    fn result(&self) -> Option<&BlobId> {
        self.result.as_ref()
    }

    fn error(&self) -> Option<&RouterError> {
        self.error.as_ref()
    }

    fn set_operation_error(&mut self, error: RouterError) {
        self.result = None;
        self.error = Some(error);
    }

    fn blob_id(&self) -> &BlobId {
        &self.blob_id
    }

    fn submitted_at(&self) -> Instant {
        self.submitted_at
    }

    fn pending_correlation_ids(&self) -> Vec<CorrelationId> {
        self.tracker.pending_correlation_ids()
    }

    fn notify_success(&self, notifications: &dyn NotificationSystem) {
        notifications.on_blob_created(&self.blob_id, self.data.len() as u64);
    }
}

/// Round-robin cursor over the writable partitions.
#[derive(Debug, Default)]
pub struct PartitionSelector {
    next: AtomicUsize,
}

impl PartitionSelector {
    pub fn pick<T: Copy>(&self, candidates: &[T]) -> Option<T> {
        if candidates.is_empty() {
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % candidates.len();
        Some(candidates[index])
    }
}

impl OperationManager<PutOperation> {
    /// Store `data` under a new blob id on a writable partition.
    #[instrument(skip(self, data, selector, callback), fields(bytes = data.len()))]
    pub fn submit_put_blob(
        &self,
        data: Bytes,
        selector: &PartitionSelector,
        callback: Option<Callback<BlobId>>,
    ) -> FutureResult<BlobId> {
        let (completion, future) = Completion::new(callback);
        let context = self.context();
        let writable = context.directory.writable_partitions();
        let operation = selector
            .pick(&writable)
            .ok_or(RouterError::NoWritablePartition)
            .and_then(|partition| {
                let replicas = context.replicas_for(partition)?;
                let tracker = ReplicaTracker::new(
                    replicas,
                    context.directory.as_ref(),
                    &context.config.datacenter_name,
                    1,
                );
                Ok(PutOperation::new(
                    context.config.clone(),
                    BlobId::new(partition),
                    data,
                    tracker,
                ))
            });
        self.submit_operation(operation, completion);
        future
    }
}
