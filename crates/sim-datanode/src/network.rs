use anyhow::{bail, Result};
use common::traits::Transport;
use common::{DataNodeId, NetworkError, RequestInfo, ResponseInfo};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::node::SimDataNode;

/// Delivery quirks applied to each batch of responses.
#[derive(Debug, Clone, Default)]
pub struct SimNetworkConfig {
    /// Deliver each batch in reverse order.
    pub reverse_delivery: bool,
    /// Deliver every response twice.
    pub duplicate_delivery: bool,
}

/// Transport backed by [`SimDataNode`]s.
///
/// Responses produced while handling one `send_and_poll` batch are held back
/// and returned by the following call.
pub struct SimNetwork {
    nodes: HashMap<DataNodeId, Arc<SimDataNode>>,
    in_flight: Mutex<Vec<ResponseInfo>>,
    reverse_delivery: AtomicBool,
    duplicate_delivery: AtomicBool,
    closed: AtomicBool,
    requests_sent: AtomicU64,
    responses_delivered: AtomicU64,
}

impl SimNetwork {
    pub fn new(nodes: impl IntoIterator<Item = Arc<SimDataNode>>, config: SimNetworkConfig) -> Self {
        let nodes: HashMap<_, _> = nodes
            .into_iter()
            .map(|node| (node.id().clone(), node))
            .collect();
        info!(nodes = nodes.len(), ?config, "Starting simulated network");
        Self {
            nodes,
            in_flight: Mutex::new(Vec::new()),
            reverse_delivery: AtomicBool::new(config.reverse_delivery),
            duplicate_delivery: AtomicBool::new(config.duplicate_delivery),
            closed: AtomicBool::new(false),
            requests_sent: AtomicU64::new(0),
            responses_delivered: AtomicU64::new(0),
        }
    }

    pub fn node(&self, id: &DataNodeId) -> Option<&Arc<SimDataNode>> {
        self.nodes.get(id)
    }

    pub fn set_reverse_delivery(&self, enabled: bool) {
        self.reverse_delivery.store(enabled, Ordering::Relaxed);
    }

    pub fn set_duplicate_delivery(&self, enabled: bool) {
        self.duplicate_delivery.store(enabled, Ordering::Relaxed);
    }

    pub fn requests_sent(&self) -> u64 {
        self.requests_sent.load(Ordering::Relaxed)
    }

    pub fn responses_delivered(&self) -> u64 {
        self.responses_delivered.load(Ordering::Relaxed)
    }

    /// Responses produced but not yet delivered.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn exchange(&self, requests: Vec<RequestInfo>) -> Result<Vec<ResponseInfo>> {
        if self.is_closed() {
            bail!("simulated network is closed");
        }
        self.requests_sent
            .fetch_add(requests.len() as u64, Ordering::Relaxed);

        let mut produced = Vec::with_capacity(requests.len());
        for request in &requests {
            let Some(node) = self.nodes.get(request.replica().node()) else {
                produced.push(ResponseInfo::from_network_error(
                    request,
                    NetworkError::Socket {
                        message: format!("no route to {}", request.replica().node()),
                    },
                ));
                continue;
            };
            match node.handle(request.request()) {
                Some(Ok(response)) => produced.push(ResponseInfo::from_response(request, response)),
                Some(Err(error)) => produced.push(ResponseInfo::from_network_error(request, error)),
                None => debug!(node = %node.id(), correlation_id = request.correlation_id(), "request dropped"),
            }
        }

        if self.duplicate_delivery.load(Ordering::Relaxed) {
            produced = produced
                .into_iter()
                .flat_map(|response| [response.clone(), response])
                .collect();
        }
        if self.reverse_delivery.load(Ordering::Relaxed) {
            produced.reverse();
        }

        let delivered = std::mem::replace(&mut *self.in_flight.lock(), produced);
        self.responses_delivered
            .fetch_add(delivered.len() as u64, Ordering::Relaxed);
        Ok(delivered)
    }
}

impl Transport for SimNetwork {
    fn send_and_poll(&self, requests: Vec<RequestInfo>) -> BoxFuture<'_, Result<Vec<ResponseInfo>>> {
        Box::pin(async move { self.exchange(requests) })
    }

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if !self.closed.swap(true, Ordering::SeqCst) {
                let dropped = std::mem::take(&mut *self.in_flight.lock()).len();
                info!(dropped, "Simulated network closed");
            }
            Ok(())
        })
    }
}
