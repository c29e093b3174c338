//! Request and response envelopes exchanged between the router and storage nodes.
//!
//! Only the shape of the messages is defined here; byte layout belongs to the
//! transport that carries them.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::time::Instant;

use crate::{BlobId, ReplicaId};

/// Per-request identifier used to match a response to the request that caused it.
pub type CorrelationId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Put,
    Get,
    Delete,
}

impl RequestKind {
    pub const ALL: [RequestKind; 3] = [RequestKind::Put, RequestKind::Get, RequestKind::Delete];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Put => "put",
            RequestKind::Get => "get",
            RequestKind::Delete => "delete",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error codes a storage node reports for a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServerErrorCode {
    NoError,
    IoError,
    DiskUnavailable,
    PartitionReadOnly,
    BlobNotFound,
    BlobDeleted,
    UnknownError,
}

impl ServerErrorCode {
    /// Codes that indicate the replica's storage itself is failing.
    pub fn is_storage_error(&self) -> bool {
        matches!(self, ServerErrorCode::IoError | ServerErrorCode::DiskUnavailable)
    }
}

impl fmt::Display for ServerErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerErrorCode::NoError => "No_Error",
            ServerErrorCode::IoError => "IO_Error",
            ServerErrorCode::DiskUnavailable => "Disk_Unavailable",
            ServerErrorCode::PartitionReadOnly => "Partition_ReadOnly",
            ServerErrorCode::BlobNotFound => "Blob_Not_Found",
            ServerErrorCode::BlobDeleted => "Blob_Deleted",
            ServerErrorCode::UnknownError => "Unknown_Error",
        };
        f.write_str(name)
    }
}

/// Transport-level failure attached to a response envelope instead of a server response.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NetworkError {
    #[error("socket error: {message}")]
    Socket { message: String },

    #[error("io error: {message}")]
    Io { message: String },

    #[error("timed out waiting for a pooled connection")]
    ConnectionPoolTimeout,

    #[error("request timed out")]
    RequestTimeout,

    #[error("malformed response: {message}")]
    Malformed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RequestPayload {
    Put { blob_id: BlobId, data: Bytes },
    Get { blob_id: BlobId },
    Delete { blob_id: BlobId },
}

/// Message sent to a single storage node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub correlation_id: CorrelationId,
    pub client_id: String,
    pub payload: RequestPayload,
}

impl Request {
    pub fn kind(&self) -> RequestKind {
        match self.payload {
            RequestPayload::Put { .. } => RequestKind::Put,
            RequestPayload::Get { .. } => RequestKind::Get,
            RequestPayload::Delete { .. } => RequestKind::Delete,
        }
    }

    pub fn blob_id(&self) -> &BlobId {
        match &self.payload {
            RequestPayload::Put { blob_id, .. }
            | RequestPayload::Get { blob_id }
            | RequestPayload::Delete { blob_id } => blob_id,
        }
    }
}

/// Outbound envelope: destination, request and issue time. Immutable once built.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    replica: ReplicaId,
    request: Request,
    issued_at: Instant,
}

impl RequestInfo {
    pub fn new(replica: ReplicaId, request: Request) -> Self {
        Self {
            replica,
            request,
            issued_at: Instant::now(),
        }
    }

    pub fn replica(&self) -> &ReplicaId {
        &self.replica
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.request.correlation_id
    }

    pub fn kind(&self) -> RequestKind {
        self.request.kind()
    }

    pub fn issued_at(&self) -> Instant {
        self.issued_at
    }
}

/// Message a storage node returns for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub correlation_id: CorrelationId,
    pub error: ServerErrorCode,
    pub data: Option<Bytes>,
}

impl Response {
    pub fn ok(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            error: ServerErrorCode::NoError,
            data: None,
        }
    }

    pub fn with_data(correlation_id: CorrelationId, data: Bytes) -> Self {
        Self {
            correlation_id,
            error: ServerErrorCode::NoError,
            data: Some(data),
        }
    }

    pub fn error(correlation_id: CorrelationId, error: ServerErrorCode) -> Self {
        Self {
            correlation_id,
            error,
            data: None,
        }
    }
}

pub type ResponseOutcome = Result<Response, NetworkError>;

/// Inbound envelope delivered by the transport, tagged with the originating request.
#[derive(Debug, Clone)]
pub struct ResponseInfo {
    correlation_id: CorrelationId,
    kind: RequestKind,
    replica: ReplicaId,
    outcome: ResponseOutcome,
}

impl ResponseInfo {
    pub fn new(
        correlation_id: CorrelationId,
        kind: RequestKind,
        replica: ReplicaId,
        outcome: ResponseOutcome,
    ) -> Self {
        Self {
            correlation_id,
            kind,
            replica,
            outcome,
        }
    }

    pub fn from_response(request: &RequestInfo, response: Response) -> Self {
        Self::new(
            request.correlation_id(),
            request.kind(),
            request.replica().clone(),
            Ok(response),
        )
    }

    pub fn from_network_error(request: &RequestInfo, error: NetworkError) -> Self {
        Self::new(
            request.correlation_id(),
            request.kind(),
            request.replica().clone(),
            Err(error),
        )
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn replica(&self) -> &ReplicaId {
        &self.replica
    }

    pub fn outcome(&self) -> &ResponseOutcome {
        &self.outcome
    }
}
