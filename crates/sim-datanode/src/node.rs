use bytes::Bytes;
use common::{
    BlobId, DataNodeId, NetworkError, Request, RequestPayload, Response, ResponseOutcome,
    ServerErrorCode,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// How a node answers requests.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FaultMode {
    #[default]
    Healthy,
    /// Answer every request with this code and leave the store untouched.
    ErrorCode(ServerErrorCode),
    /// Fail every request in the transport with this error.
    NetworkError(NetworkError),
    /// Swallow requests; nothing ever comes back.
    Unresponsive,
}

#[derive(Debug, Clone)]
enum StoredBlob {
    Live(Bytes),
    Deleted,
}

/// A single simulated storage node.
///
/// Deletes leave a tombstone so later reads and deletes report `Blob_Deleted`.
#[derive(Debug)]
pub struct SimDataNode {
    id: DataNodeId,
    blobs: Mutex<HashMap<BlobId, StoredBlob>>,
    fault: Mutex<FaultMode>,
    requests_seen: AtomicU64,
}

impl SimDataNode {
    pub fn new(id: DataNodeId) -> Self {
        Self {
            id,
            blobs: Mutex::new(HashMap::new()),
            fault: Mutex::new(FaultMode::Healthy),
            requests_seen: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &DataNodeId {
        &self.id
    }

    pub fn set_fault(&self, fault: FaultMode) {
        *self.fault.lock() = fault;
    }

    pub fn fault(&self) -> FaultMode {
        self.fault.lock().clone()
    }

    pub fn requests_seen(&self) -> u64 {
        self.requests_seen.load(Ordering::Relaxed)
    }

    pub fn contains(&self, blob_id: &BlobId) -> bool {
        matches!(self.blobs.lock().get(blob_id), Some(StoredBlob::Live(_)))
    }

    pub fn is_deleted(&self, blob_id: &BlobId) -> bool {
        matches!(self.blobs.lock().get(blob_id), Some(StoredBlob::Deleted))
    }

    /// Store a blob directly, bypassing the request path.
    pub fn seed(&self, blob_id: BlobId, data: Bytes) {
        self.blobs.lock().insert(blob_id, StoredBlob::Live(data));
    }

    /// Serve one request. `None` means the node never answers.
    pub fn handle(&self, request: &Request) -> Option<ResponseOutcome> {
        self.requests_seen.fetch_add(1, Ordering::Relaxed);
        let correlation_id = request.correlation_id;
        trace!(node = %self.id, correlation_id, kind = %request.kind(), "sim node request");

        match self.fault() {
            FaultMode::Healthy => {}
            FaultMode::ErrorCode(code) => return Some(Ok(Response::error(correlation_id, code))),
            FaultMode::NetworkError(error) => return Some(Err(error)),
            FaultMode::Unresponsive => return None,
        }

        let mut blobs = self.blobs.lock();
        let response = match &request.payload {
            RequestPayload::Put { blob_id, data } => {
                blobs.insert(*blob_id, StoredBlob::Live(data.clone()));
                Response::ok(correlation_id)
            }
            RequestPayload::Get { blob_id } => match blobs.get(blob_id) {
                Some(StoredBlob::Live(data)) => Response::with_data(correlation_id, data.clone()),
                Some(StoredBlob::Deleted) => {
                    Response::error(correlation_id, ServerErrorCode::BlobDeleted)
                }
                None => Response::error(correlation_id, ServerErrorCode::BlobNotFound),
            },
            RequestPayload::Delete { blob_id } => match blobs.get(blob_id) {
                Some(StoredBlob::Live(_)) => {
                    blobs.insert(*blob_id, StoredBlob::Deleted);
                    Response::ok(correlation_id)
                }
                Some(StoredBlob::Deleted) => {
                    Response::error(correlation_id, ServerErrorCode::BlobDeleted)
                }
                None => Response::error(correlation_id, ServerErrorCode::BlobNotFound),
            },
        };
        Some(Ok(response))
    }
}
