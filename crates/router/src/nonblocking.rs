//! The router: one operation manager per request kind driven by a single
//! request/response loop.

use anyhow::{Context, Result};
use bytes::Bytes;
use common::traits::{NotificationSystem, ReplicaDirectory, Transport};
use common::{BlobId, ConfigError, RequestKind, ResponseInfo, RouterConfig, RouterError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, trace, warn};

use crate::completion::{Callback, FutureResult};
use crate::context::RouterContext;
use crate::delete::DeleteOperation;
use crate::get::GetOperation;
use crate::manager::OperationManager;
use crate::metrics::RouterMetrics;
use crate::put::{PartitionSelector, PutOperation};

/// What one loop iteration moved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub requests_sent: usize,
    pub responses_received: usize,
}

struct RouterInner {
    context: Arc<RouterContext>,
    transport: Arc<dyn Transport>,
    put_manager: OperationManager<PutOperation>,
    get_manager: OperationManager<GetOperation>,
    delete_manager: OperationManager<DeleteOperation>,
    partitions: PartitionSelector,
    open: AtomicBool,
}

impl RouterInner {
    async fn tick(&self) -> Result<TickSummary> {
        let mut requests = Vec::new();
        self.put_manager.poll(&mut requests);
        self.get_manager.poll(&mut requests);
        self.delete_manager.poll(&mut requests);

        let requests_sent = requests.len();
        let responses = self
            .transport
            .send_and_poll(requests)
            .await
            .context("transport failed to exchange requests")?;
        let responses_received = responses.len();
        for response in responses {
            self.dispatch(response);
        }

        if requests_sent > 0 || responses_received > 0 {
            trace!(requests_sent, responses_received, "router tick");
        }
        Ok(TickSummary {
            requests_sent,
            responses_received,
        })
    }

    fn dispatch(&self, response: ResponseInfo) {
        match response.kind() {
            RequestKind::Put => self.put_manager.handle_response(response),
            RequestKind::Get => self.get_manager.handle_response(response),
            RequestKind::Delete => self.delete_manager.handle_response(response),
        }
    }

    fn close_managers(&self) {
        self.put_manager.close();
        self.get_manager.close();
        self.delete_manager.close();
    }
}

/// Non-blocking blob router.
///
/// Submissions return a [`FutureResult`] immediately. Work happens on the
/// loop started by [`Router::start`], or on explicit [`Router::tick`] calls.
pub struct Router {
    inner: Arc<RouterInner>,
    background: Mutex<Option<JoinHandle<()>>>,
    shutdown: Arc<Notify>,
}

impl Router {
    pub fn new(
        config: RouterConfig,
        directory: Arc<dyn ReplicaDirectory>,
        transport: Arc<dyn Transport>,
        notifications: Arc<dyn NotificationSystem>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let context = Arc::new(RouterContext::new(config, directory, notifications));
        info!(
            datacenter = %context.config.datacenter_name,
            client_id = %context.config.client_id,
            "router created"
        );

        Ok(Self {
            inner: Arc::new(RouterInner {
                put_manager: OperationManager::new(context.clone()),
                get_manager: OperationManager::new(context.clone()),
                delete_manager: OperationManager::new(context.clone()),
                context,
                transport,
                partitions: PartitionSelector::default(),
                open: AtomicBool::new(true),
            }),
            background: Mutex::new(None),
            shutdown: Arc::new(Notify::new()),
        })
    }

    /// Spawn the request/response loop. Must be called inside a tokio runtime.
    pub fn start(&self) {
        if !self.is_open() {
            warn!("start called on a closed router");
            return;
        }
        let mut background = self.background.lock();
        if background.is_some() {
            return;
        }

        let inner = self.inner.clone();
        let shutdown = self.shutdown.clone();
        *background = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.context.config.poll_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.notified() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = inner.tick().await {
                            warn!(error = %format!("{err:#}"), "router tick failed");
                        }
                    }
                }
            }
            debug!("request/response loop stopped");
        }));
    }

    /// Run one loop iteration by hand.
    pub async fn tick(&self) -> Result<TickSummary> {
        self.inner.tick().await
    }

    pub fn put_blob(&self, data: impl Into<Bytes>) -> FutureResult<BlobId> {
        self.submit_put(data.into(), None)
    }

    pub fn put_blob_with_callback<F>(&self, data: impl Into<Bytes>, callback: F) -> FutureResult<BlobId>
    where
        F: FnOnce(Result<BlobId, RouterError>) + Send + 'static,
    {
        self.submit_put(data.into(), Some(Box::new(callback)))
    }

    pub fn get_blob(&self, blob_id: &str) -> FutureResult<Bytes> {
        self.inner.get_manager.submit_get_blob(blob_id, None)
    }

    pub fn get_blob_with_callback<F>(&self, blob_id: &str, callback: F) -> FutureResult<Bytes>
    where
        F: FnOnce(Result<Bytes, RouterError>) + Send + 'static,
    {
        self.inner
            .get_manager
            .submit_get_blob(blob_id, Some(Box::new(callback)))
    }

    pub fn delete_blob(&self, blob_id: &str) -> FutureResult<()> {
        self.inner.delete_manager.submit_delete_blob(blob_id, None)
    }

    pub fn delete_blob_with_callback<F>(&self, blob_id: &str, callback: F) -> FutureResult<()>
    where
        F: FnOnce(Result<(), RouterError>) + Send + 'static,
    {
        self.inner
            .delete_manager
            .submit_delete_blob(blob_id, Some(Box::new(callback)))
    }

    fn submit_put(
        &self,
        data: Bytes,
        callback: Option<Callback<BlobId>>,
    ) -> FutureResult<BlobId> {
        self.inner
            .put_manager
            .submit_put_blob(data, &self.inner.partitions, callback)
    }

    /// Stop the loop, abort every active operation and close the transport.
    /// Later calls do nothing.
    #[instrument(skip_all)]
    pub async fn close(&self) {
        if !self.inner.open.swap(false, Ordering::SeqCst) {
            return;
        }
        info!(active = self.active_operations(), "closing router");

        self.shutdown.notify_one();
        let background = self.background.lock().take();
        if let Some(handle) = background {
            if let Err(err) = handle.await {
                warn!(error = %err, "request/response loop ended abnormally");
            }
        }

        self.inner.close_managers();
        if let Err(err) = self.inner.transport.close().await {
            warn!(error = %format!("{err:#}"), "failed to close transport");
        }
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    pub fn active_operations(&self) -> usize {
        self.inner.put_manager.active_count()
            + self.inner.get_manager.active_count()
            + self.inner.delete_manager.active_count()
    }

    pub fn metrics(&self) -> &Arc<RouterMetrics> {
        &self.inner.context.metrics
    }

    pub fn config(&self) -> &RouterConfig {
        &self.inner.context.config
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        if let Some(handle) = self.background.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Harness, RecordingNotifications};
    use common::{ReplicaEventType, RequestInfo};
    use futures::future::BoxFuture;

    /// Transport that answers every request with `No_Error` on the next call.
    #[derive(Default)]
    struct EchoTransport {
        queued: Mutex<Vec<RequestInfo>>,
        closed: AtomicBool,
    }

    impl Transport for EchoTransport {
        fn send_and_poll(&self, requests: Vec<RequestInfo>) -> BoxFuture<'_, Result<Vec<ResponseInfo>>> {
            Box::pin(async move {
                let previous = std::mem::replace(&mut *self.queued.lock(), requests);
                Ok(previous
                    .iter()
                    .map(|request| {
                        let response = match request.kind() {
                            RequestKind::Get => common::Response::with_data(
                                request.correlation_id(),
                                Bytes::from_static(b"echo"),
                            ),
                            _ => common::Response::ok(request.correlation_id()),
                        };
                        ResponseInfo::from_response(request, response)
                    })
                    .collect())
            })
        }

        fn close(&self) -> BoxFuture<'_, Result<()>> {
            self.closed.store(true, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }
    }

    fn router(harness: &Harness) -> (Router, Arc<EchoTransport>, Arc<RecordingNotifications>) {
        let transport = Arc::new(EchoTransport::default());
        let notifications = Arc::new(RecordingNotifications::default());
        let router = Router::new(
            (*harness.config).clone(),
            harness.map.clone(),
            transport.clone(),
            notifications.clone(),
        )
        .unwrap();
        (router, transport, notifications)
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_drive_put_to_completion() {
        let harness = Harness::new(1, 3);
        let (router, _, notifications) = router(&harness);

        let mut put = router.put_blob(&b"hello"[..]);
        let first = router.tick().await.unwrap();
        assert_eq!(first.requests_sent, 3);
        assert!(!put.is_done());

        let second = router.tick().await.unwrap();
        assert_eq!(second.responses_received, 3);
        let blob_id = put.await.unwrap();
        assert_eq!(*notifications.created.lock(), vec![(blob_id, 5)]);
        assert_eq!(router.active_operations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn background_loop_completes_get() {
        let harness = Harness::new(1, 2);
        let (router, _, _) = router(&harness);
        router.start();

        let data = router.get_blob(&harness.blob_id().to_string()).await.unwrap();
        assert_eq!(data, Bytes::from_static(b"echo"));

        router.close().await;
        assert!(!router.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn close_aborts_pending_work_and_rejects_new_submissions() {
        let harness = Harness::new(1, 2);
        let (router, transport, _) = router(&harness);

        let pending = router.delete_blob(&harness.blob_id().to_string());
        router.tick().await.unwrap();
        router.close().await;
        router.close().await;

        assert_eq!(pending.await, Err(RouterError::RouterClosed));
        assert!(transport.closed.load(Ordering::SeqCst));
        assert_eq!(
            router.get_blob(&harness.blob_id().to_string()).await,
            Err(RouterError::RouterClosed)
        );
        assert_eq!(
            router.metrics().snapshot().operation(RequestKind::Delete).unwrap().aborted,
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn put_without_writable_partition_fails_immediately() {
        let harness = Harness::new(1, 1);
        for partition in harness.map.partition_ids() {
            let replica = harness.map.replicas_for(partition).unwrap().remove(0);
            harness
                .map
                .on_replica_event(&replica, ReplicaEventType::PartitionReadOnly);
        }
        let (router, _, _) = router(&harness);

        let mut put = router.put_blob(Bytes::from_static(b"x"));
        assert_eq!(put.try_result(), Some(&Err(RouterError::NoWritablePartition)));
        assert_eq!(router.active_operations(), 0);
    }

    #[test]
    fn rejects_invalid_config() {
        let harness = Harness::new(1, 1);
        let config = RouterConfig {
            put_success_target: 0,
            ..RouterConfig::default()
        };
        let result = Router::new(
            config,
            harness.map.clone(),
            Arc::new(EchoTransport::default()),
            Arc::new(RecordingNotifications::default()),
        );
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }
}
