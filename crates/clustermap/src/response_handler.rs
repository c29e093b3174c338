//! Translates per-request outcomes into replica health events.
//!
//! Components call this for every response or transport failure they observe,
//! whether or not the owning operation ends up succeeding, so the replica
//! directory sees every fault.

use common::traits::ReplicaDirectory;
use common::{NetworkError, ReplicaEventType, ReplicaId, ResponseOutcome, ServerErrorCode};
use std::sync::Arc;
use tracing::trace;

#[derive(Clone)]
pub struct ResponseHandler {
    directory: Arc<dyn ReplicaDirectory>,
}

impl ResponseHandler {
    pub fn new(directory: Arc<dyn ReplicaDirectory>) -> Self {
        Self { directory }
    }

    /// Report whatever came back for a request to `replica`.
    pub fn report(&self, replica: &ReplicaId, outcome: &ResponseOutcome) {
        match outcome {
            Ok(response) => self.on_request_response_error(replica, response.error),
            Err(error) => self.on_request_response_exception(replica, error),
        }
    }

    /// The replica answered; classify its error code (`NoError` included).
    pub fn on_request_response_error(&self, replica: &ReplicaId, code: ServerErrorCode) {
        trace!(replica = %replica, %code, "reporting server response");
        match code {
            ServerErrorCode::IoError | ServerErrorCode::DiskUnavailable => {
                self.directory
                    .on_replica_event(replica, ReplicaEventType::DiskError);
            }
            ServerErrorCode::PartitionReadOnly => {
                self.directory
                    .on_replica_event(replica, ReplicaEventType::PartitionReadOnly);
                // A read-only disk still answered.
                self.directory
                    .on_replica_event(replica, ReplicaEventType::DiskOk);
            }
            _ => {
                self.directory
                    .on_replica_event(replica, ReplicaEventType::DiskOk);
            }
        }
        self.directory
            .on_replica_event(replica, ReplicaEventType::NodeResponse);
    }

    /// The request never produced a server response.
    pub fn on_request_response_exception(&self, replica: &ReplicaId, error: &NetworkError) {
        trace!(replica = %replica, %error, "reporting transport failure");
        match error {
            NetworkError::Socket { .. }
            | NetworkError::Io { .. }
            | NetworkError::ConnectionPoolTimeout
            | NetworkError::RequestTimeout => {
                self.directory
                    .on_replica_event(replica, ReplicaEventType::NodeTimeout);
            }
            NetworkError::Malformed { .. } => {}
        }
    }
}
