//! Get: asks a bounded number of replicas at a time and completes with the
//! first copy of the blob returned.

use bytes::Bytes;
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

// Deleted outranks every replica fault; not-found ranks lowest so any
// real fault is reported in its place.
fn get_failure_rank(error: &RouterError) -> u8 {
    match error {
        RouterError::BlobDeleted => 5,
        RouterError::BlobDoesNotExist => 0,
        other => failure_rank(other),
    }
}

pub struct GetOperation {
    config: Arc<RouterConfig>,
    blob_id: BlobId,
    tracker: ReplicaTracker,
    submitted_at: Instant,
    result: Option<Bytes>,
    error: Option<RouterError>,
}

impl GetOperation {
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
        if self.is_complete() || self.tracker.remaining() > 0 {
            return;
        }
        self.error = Some(
            self.tracker
                .most_specific_failure(get_failure_rank)
                .unwrap_or(RouterError::BlobDoesNotExist),
        );
    }
}

impl Operation for GetOperation {
    type Output = Bytes;

    const KIND: RequestKind = RequestKind::Get;

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

        for index in self
            .tracker
            .next_replicas(self.config.get_request_parallelism)
        {
            let correlation_id = registrar.next_correlation_id();
            let request = RequestInfo::new(
                self.tracker.replica(index).clone(),
                Request {
                    correlation_id,
                    client_id: self.config.client_id.clone(),
                    payload: RequestPayload::Get {
                        blob_id: self.blob_id,
                    },
                },
            );
            trace!(blob_id = %self.blob_id, replica = %request.replica(), correlation_id, "issuing get");
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
            debug!(correlation_id = response.correlation_id(), "get response for no pending request");
            return Ok(());
        };

        let replica = self.tracker.replica(index).clone();
        match response.outcome() {
            Ok(reply) => match (reply.error, &reply.data) {
                (ServerErrorCode::NoError, Some(data)) => {
                    self.tracker.record_success(index);
                    self.result = Some(data.clone());
                }
                (ServerErrorCode::NoError, None) => self.tracker.record_failure(
                    index,
                    RouterError::unexpected("get operation", format!("{replica} returned no data")),
                ),
                (ServerErrorCode::BlobNotFound, _) => {
                    self.tracker
                        .record_failure(index, RouterError::BlobDoesNotExist)
                }
                (ServerErrorCode::BlobDeleted, _) => {
                    // A delete is authoritative; other replicas may simply lag.
                    self.tracker.record_failure(index, RouterError::BlobDeleted);
                    self.error = Some(RouterError::BlobDeleted);
                }
                (code, _) => self.tracker.record_failure(index, replica_error(&replica, code)),
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

    fn result(&self) -> Option<&Bytes> {
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
}

impl OperationManager<GetOperation> {
    /// Parse `blob_id` and start fetching it. Invalid ids complete immediately.
    #[instrument(skip(self, callback))]
    pub fn submit_get_blob(&self, blob_id: &str, callback: Option<Callback<Bytes>>) -> FutureResult<Bytes> {
        let (completion, future) = Completion::new(callback);
        let context = self.context();
        let operation = blob_id_from_str(blob_id, context.directory.as_ref()).and_then(|id| {
            let replicas = context.replicas_for(id.partition())?;
            let tracker = ReplicaTracker::new(
                replicas,
                context.directory.as_ref(),
                &context.config.datacenter_name,
                context.config.get_max_attempts_per_replica,
            );
            Ok(GetOperation::new(context.config.clone(), id, tracker))
        });
        self.submit_operation(operation, completion);
        future
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Harness, RecordingRegistrar};
    use common::{NetworkError, Response};
    use std::time::Duration;

    fn operation(harness: &Harness) -> GetOperation {
        let blob_id = harness.blob_id();
        let tracker = harness.tracker(&blob_id, harness.config.get_max_attempts_per_replica);
        GetOperation::new(harness.config.clone(), blob_id, tracker)
    }

    #[tokio::test(start_paused = true)]
    async fn limits_requests_in_flight() {
        let harness = Harness::new(1, 4);
        let mut op = operation(&harness);
        let mut registrar = RecordingRegistrar::default();

        op.poll(&mut registrar).unwrap();
        assert_eq!(registrar.sent.len(), harness.config.get_request_parallelism);

        op.handle_response(&harness.reply(&registrar.sent[0], ServerErrorCode::IoError))
            .unwrap();
        op.poll(&mut registrar).unwrap();
        assert_eq!(registrar.sent.len(), harness.config.get_request_parallelism + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn first_copy_completes_the_get() {
        let harness = Harness::new(1, 3);
        let mut op = operation(&harness);
        let mut registrar = RecordingRegistrar::default();
        op.poll(&mut registrar).unwrap();

        let request = &registrar.sent[1];
        op.handle_response(&ResponseInfo::from_response(
            request,
            Response::with_data(request.correlation_id(), Bytes::from_static(b"payload")),
        ))
        .unwrap();
        assert_eq!(op.outcome(), Ok(Bytes::from_static(b"payload")));
    }

    #[tokio::test(start_paused = true)]
    async fn deleted_blob_completes_immediately() {
        let harness = Harness::new(1, 3);
        let mut op = operation(&harness);
        let mut registrar = RecordingRegistrar::default();
        op.poll(&mut registrar).unwrap();

        op.handle_response(&harness.reply(&registrar.sent[0], ServerErrorCode::BlobDeleted))
            .unwrap();
        assert_eq!(op.outcome(), Err(RouterError::BlobDeleted));
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_everywhere_means_missing() {
        let harness = Harness::new(1, 2);
        let mut op = operation(&harness);
        let mut registrar = RecordingRegistrar::default();
        op.poll(&mut registrar).unwrap();

        for request in registrar.sent.clone() {
            op.handle_response(&harness.reply(&request, ServerErrorCode::BlobNotFound))
                .unwrap();
        }
        assert_eq!(op.outcome(), Err(RouterError::BlobDoesNotExist));
    }

    #[tokio::test(start_paused = true)]
    async fn transport_fault_outranks_not_found() {
        let harness = Harness::new(1, 2);
        let mut op = operation(&harness);
        let mut registrar = RecordingRegistrar::default();
        op.poll(&mut registrar).unwrap();

        op.handle_response(&harness.reply(&registrar.sent[0], ServerErrorCode::BlobNotFound))
            .unwrap();
        op.handle_response(&ResponseInfo::from_network_error(
            &registrar.sent[1],
            NetworkError::Io {
                message: "reset".into(),
            },
        ))
        .unwrap();
        assert!(matches!(
            op.outcome(),
            Err(RouterError::TransportFailure { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_replica_is_retried_until_attempts_run_out() {
        let harness = Harness::new(1, 1);
        let mut op = operation(&harness);
        let mut registrar = RecordingRegistrar::default();
        let step = harness.config.request_timeout() + Duration::from_millis(1);

        op.poll(&mut registrar).unwrap();
        assert_eq!(registrar.sent.len(), 1);

        tokio::time::advance(step).await;
        op.poll(&mut registrar).unwrap();
        assert_eq!(registrar.sent.len(), 2);
        assert_ne!(
            registrar.sent[0].correlation_id(),
            registrar.sent[1].correlation_id()
        );
        assert!(!op.is_complete());

        tokio::time::advance(step).await;
        op.poll(&mut registrar).unwrap();
        assert_eq!(registrar.sent.len(), 2);
        assert_eq!(registrar.expired.len(), 2);
        assert!(matches!(
            op.outcome(),
            Err(RouterError::OperationTimedOut { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_success_is_an_internal_error_for_that_replica() {
        let harness = Harness::new(1, 1);
        let mut op = operation(&harness);
        let mut registrar = RecordingRegistrar::default();
        op.poll(&mut registrar).unwrap();

        op.handle_response(&harness.reply(&registrar.sent[0], ServerErrorCode::NoError))
            .unwrap();
        assert!(matches!(
            op.outcome(),
            Err(RouterError::UnexpectedInternalError { .. })
        ));
    }
}
