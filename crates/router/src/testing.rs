//! Fixtures shared by the unit tests.

use clustermap::{ClusterLayout, StaticClusterMap};
use common::traits::{NotificationSystem, ReplicaDirectory};
use common::{
    BlobId, ClusterMapConfig, CorrelationId, PartitionId, ReplicaId, Request, RequestInfo,
    RequestPayload, Response, ResponseInfo, RouterConfig, ServerErrorCode,
};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::context::RouterContext;
use crate::notification::LoggingNotificationSystem;
use crate::operation::RequestRegistrar;
use crate::tracker::ReplicaTracker;

pub(crate) struct Harness {
    pub map: Arc<StaticClusterMap>,
    pub config: Arc<RouterConfig>,
    blob_id: BlobId,
}

impl Harness {
    pub fn new(datacenters: usize, nodes_per_dc: usize) -> Self {
        let layout = ClusterLayout::uniform(datacenters, nodes_per_dc, 2);
        let map = StaticClusterMap::new(&layout, &ClusterMapConfig::default()).unwrap();
        Self {
            map: Arc::new(map),
            config: Arc::new(RouterConfig::default()),
            blob_id: BlobId::new(PartitionId(0)),
        }
    }

    pub fn blob_id(&self) -> BlobId {
        self.blob_id
    }

    pub fn tracker(&self, blob_id: &BlobId, max_attempts: u32) -> ReplicaTracker {
        let replicas = self.map.replicas_for(blob_id.partition()).unwrap();
        ReplicaTracker::new(
            replicas,
            self.map.as_ref(),
            &self.config.datacenter_name,
            max_attempts,
        )
    }

    pub fn context(&self) -> Arc<RouterContext> {
        self.context_with(Arc::new(LoggingNotificationSystem))
    }

    pub fn context_with(&self, notifications: Arc<dyn NotificationSystem>) -> Arc<RouterContext> {
        Arc::new(RouterContext::new(
            (*self.config).clone(),
            self.map.clone(),
            notifications,
        ))
    }

    /// A get request to the `index`th replica of the harness blob's partition.
    pub fn request_to(&self, index: usize, correlation_id: CorrelationId) -> RequestInfo {
        let replica = self.map.replicas_for(self.blob_id.partition()).unwrap()[index].clone();
        RequestInfo::new(
            replica,
            Request {
                correlation_id,
                client_id: self.config.client_id.clone(),
                payload: RequestPayload::Get {
                    blob_id: self.blob_id,
                },
            },
        )
    }

    pub fn reply(&self, request: &RequestInfo, code: ServerErrorCode) -> ResponseInfo {
        ResponseInfo::from_response(request, Response::error(request.correlation_id(), code))
    }
}

#[derive(Default)]
pub(crate) struct RecordingRegistrar {
    next: CorrelationId,
    pub sent: Vec<RequestInfo>,
    pub expired: Vec<(CorrelationId, ReplicaId)>,
}

impl RequestRegistrar for RecordingRegistrar {
    fn next_correlation_id(&mut self) -> CorrelationId {
        self.next += 1;
        self.next
    }

    fn register_request_to_send(&mut self, request: RequestInfo) {
        self.sent.push(request);
    }

    fn on_request_expired(&mut self, correlation_id: CorrelationId, replica: &ReplicaId) {
        self.expired.push((correlation_id, replica.clone()));
    }
}

#[derive(Default)]
pub(crate) struct RecordingNotifications {
    pub created: Mutex<Vec<(BlobId, u64)>>,
    pub deleted: Mutex<Vec<BlobId>>,
}

impl NotificationSystem for RecordingNotifications {
    fn on_blob_created(&self, blob_id: &BlobId, size: u64) {
        self.created.lock().push((*blob_id, size));
    }

    fn on_blob_deleted(&self, blob_id: &BlobId) {
        self.deleted.lock().push(*blob_id);
    }
}
