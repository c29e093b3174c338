use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::protocol::{NetworkError, ServerErrorCode};

/// Flat classification of [`RouterError`] used for metrics and callers that
/// only care about the category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RouterErrorCode {
    InvalidBlobId,
    RouterClosed,
    UnexpectedInternalError,
    StorageError,
    ReplicaError,
    OperationTimedOut,
    TransportFailure,
    BlobDoesNotExist,
    BlobDeleted,
    InsufficientReplicas,
    NoWritablePartition,
}

impl RouterErrorCode {
    pub const ALL: [RouterErrorCode; 11] = [
        RouterErrorCode::InvalidBlobId,
        RouterErrorCode::RouterClosed,
        RouterErrorCode::UnexpectedInternalError,
        RouterErrorCode::StorageError,
        RouterErrorCode::ReplicaError,
        RouterErrorCode::OperationTimedOut,
        RouterErrorCode::TransportFailure,
        RouterErrorCode::BlobDoesNotExist,
        RouterErrorCode::BlobDeleted,
        RouterErrorCode::InsufficientReplicas,
        RouterErrorCode::NoWritablePartition,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for RouterErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Outcome errors delivered to router callers.
///
/// Cloneable so one terminal error can resolve both the completion handle and
/// the caller's callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    /// Malformed or unresolvable blob id. Never retried.
    #[error("blob id is invalid {blob_id}: {reason}")]
    InvalidBlobId { blob_id: String, reason: String },

    /// Operation aborted because the router shut down.
    #[error("aborted operation because router is closed")]
    RouterClosed,

    /// Internal failure contained to a single operation.
    #[error("{context} encountered unexpected error: {message}")]
    UnexpectedInternalError { context: String, message: String },

    /// A replica answered with an error code.
    #[error("replica {replica} reported {code}")]
    ReplicaReported {
        replica: String,
        code: ServerErrorCode,
    },

    /// No answer from a replica within the request timeout.
    #[error("request to {replica} timed out")]
    OperationTimedOut { replica: String },

    /// The transport failed before a response was decoded.
    #[error("transport failure talking to {replica}: {error}")]
    TransportFailure { replica: String, error: NetworkError },

    #[error("blob does not exist")]
    BlobDoesNotExist,

    #[error("blob has been deleted")]
    BlobDeleted,

    /// A put could not reach its success target.
    #[error("only {achieved} of {required} replicas succeeded: {cause}")]
    InsufficientReplicas {
        required: usize,
        achieved: usize,
        cause: Box<RouterError>,
    },

    #[error("no writable partition available")]
    NoWritablePartition,
}

impl RouterError {
    pub fn invalid_blob_id(blob_id: impl Into<String>, reason: impl fmt::Display) -> Self {
        RouterError::InvalidBlobId {
            blob_id: blob_id.into(),
            reason: reason.to_string(),
        }
    }

    pub fn unexpected(context: impl Into<String>, message: impl fmt::Display) -> Self {
        RouterError::UnexpectedInternalError {
            context: context.into(),
            message: message.to_string(),
        }
    }

    pub fn code(&self) -> RouterErrorCode {
        match self {
            RouterError::InvalidBlobId { .. } => RouterErrorCode::InvalidBlobId,
            RouterError::RouterClosed => RouterErrorCode::RouterClosed,
            RouterError::UnexpectedInternalError { .. } => RouterErrorCode::UnexpectedInternalError,
            RouterError::ReplicaReported { code, .. } if code.is_storage_error() => {
                RouterErrorCode::StorageError
            }
            RouterError::ReplicaReported { .. } => RouterErrorCode::ReplicaError,
            RouterError::OperationTimedOut { .. } => RouterErrorCode::OperationTimedOut,
            RouterError::TransportFailure { .. } => RouterErrorCode::TransportFailure,
            RouterError::BlobDoesNotExist => RouterErrorCode::BlobDoesNotExist,
            RouterError::BlobDeleted => RouterErrorCode::BlobDeleted,
            RouterError::InsufficientReplicas { .. } => RouterErrorCode::InsufficientReplicas,
            RouterError::NoWritablePartition => RouterErrorCode::NoWritablePartition,
        }
    }

    /// True when the error (or the cause of a quorum failure) is a replica storage fault.
    pub fn is_storage_error(&self) -> bool {
        match self {
            RouterError::ReplicaReported { code, .. } => code.is_storage_error(),
            RouterError::InsufficientReplicas { cause, .. } => cause.is_storage_error(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replica_codes_split_into_storage_and_other() {
        let io = RouterError::ReplicaReported {
            replica: "p1@h:1/mnt".into(),
            code: ServerErrorCode::IoError,
        };
        assert_eq!(io.code(), RouterErrorCode::StorageError);
        assert!(io.is_storage_error());

        let read_only = RouterError::ReplicaReported {
            replica: "p1@h:1/mnt".into(),
            code: ServerErrorCode::PartitionReadOnly,
        };
        assert_eq!(read_only.code(), RouterErrorCode::ReplicaError);
        assert!(!read_only.is_storage_error());
    }

    #[test]
    fn quorum_failure_exposes_cause() {
        let err = RouterError::InsufficientReplicas {
            required: 2,
            achieved: 1,
            cause: Box::new(RouterError::ReplicaReported {
                replica: "p1@h:1/mnt".into(),
                code: ServerErrorCode::DiskUnavailable,
            }),
        };
        assert_eq!(err.code(), RouterErrorCode::InsufficientReplicas);
        assert!(err.is_storage_error());
        assert!(err.to_string().contains("only 1 of 2 replicas succeeded"));
        assert!(err.to_string().contains("Disk_Unavailable"));
    }

    #[test]
    fn codes_index_densely() {
        for (idx, code) in RouterErrorCode::ALL.iter().enumerate() {
            assert_eq!(code.index(), idx);
        }
    }

    #[test]
    fn messages_name_the_input() {
        let err = RouterError::invalid_blob_id("zz", "not hex");
        assert_eq!(err.to_string(), "blob id is invalid zz: not hex");
        assert_eq!(
            RouterError::RouterClosed.to_string(),
            "aborted operation because router is closed"
        );
    }
}
