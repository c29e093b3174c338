//! Delete: succeeds on the first replica that acknowledges, fails only after
//! every replica has failed.

use common::traits::NotificationSystem;
use common::{
    BlobId, CorrelationId, Request, RequestInfo, RequestKind, RequestPayload, ResponseInfo,
    RouterConfig, RouterError, ServerErrorCode,
};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, instrument, trace};

use crate::completion::{Callback, Completion, FutureResult};
use crate::manager::OperationManager;
use crate::operation::{failure_rank, replica_error, transport_error, Operation, RequestRegistrar};
use crate::tracker::ReplicaTracker;
use crate::utils::blob_id_from_str;

pub struct DeleteOperation {
    config: Arc<RouterConfig>,
    blob_id: BlobId,
    tracker: ReplicaTracker,
    submitted_at: Instant,
    result: Option<()>,
    error: Option<RouterError>,
}

impl DeleteOperation {
    pub fn new(config: Arc<RouterConfig>, blob_id: BlobId, tracker: ReplicaTracker) -> Self {
        Self {
            config,
            blob_id,
            tracker,
            submitted_at: Instant::now(),
            result: None,
            error: None,
        }
    }

    fn update_state(&mut self) {
        if self.is_complete() {
            return;
        }
        if self.tracker.succeeded() > 0 {
            self.result = Some(());
        } else if self.tracker.remaining() == 0 {
            self.error = Some(
                self.tracker
                    .most_specific_failure(failure_rank)
                    .unwrap_or_else(|| RouterError::unexpected("delete operation", "no replicas")),
            );
        }
    }
}

impl Operation for DeleteOperation {
    type Output = ();

    const KIND: RequestKind = RequestKind::Delete;

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
                    payload: RequestPayload::Delete {
                        blob_id: self.blob_id,
                    },
                },
            );
            trace!(blob_id = %self.blob_id, replica = %request.replica(), correlation_id, "issuing delete");
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
            debug!(correlation_id = response.correlation_id(), "delete response for no pending request");
            return Ok(());
        };

        let replica = self.tracker.replica(index).clone();
        match response.outcome() {
            Ok(reply) => match reply.error {
                ServerErrorCode::NoError
                | ServerErrorCode::BlobNotFound
                | ServerErrorCode::BlobDeleted => self.tracker.record_success(index),
                code => self.tracker.record_failure(index, replica_error(&replica, code)),
            },
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

    fn result(&self) -> Option<&()> {
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
        notifications.on_blob_deleted(&self.blob_id);
    }
}

impl OperationManager<DeleteOperation> {
    /// Parse `blob_id` and start deleting it. Invalid ids complete immediately.
    #[instrument(skip(self, callback))]
    pub fn submit_delete_blob(&self, blob_id: &str, callback: Option<Callback<()>>) -> FutureResult<()> {
        let (completion, future) = Completion::new(callback);
        let context = self.context();
        let operation = blob_id_from_str(blob_id, context.directory.as_ref()).and_then(|id| {
            let replicas = context.replicas_for(id.partition())?;
            let tracker = ReplicaTracker::new(
                replicas,
                context.directory.as_ref(),
                &context.config.datacenter_name,
                1,
            );
            Ok(DeleteOperation::new(context.config.clone(), id, tracker))
        });
        self.submit_operation(operation, completion);
        future
    }
}
