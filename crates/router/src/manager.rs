//! Generic coordinator for in-flight operations of one request kind.
//!
//! The manager owns two concurrent maps: the active set (operation id to
//! operation) and the correlation map (correlation id to operation id).
//! Whichever caller removes an operation from the active set completes it,
//! so `poll`, `handle_response` and `close` may race freely and each
//! operation still completes exactly once.
//!
//! Lock order is always operation state first, then a short map access.
//! No map guard is ever held while an operation's state lock is taken.

use common::{
    CorrelationId, NetworkError, ReplicaId, RequestInfo, RequestKind, ResponseInfo, RouterError,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::completion::{panic_message, Completion, OperationCompleteCallback};
use crate::context::RouterContext;
use crate::operation::{Operation, RequestRegistrar};

pub type OperationId = u64;

struct TrackedOperation<O: Operation> {
    id: OperationId,
    state: Mutex<OperationState<O>>,
}

struct OperationState<O: Operation> {
    operation: O,
    completion: Option<Completion<O::Output>>,
}

/// Everything needed to deliver a retired operation outside its lock.
struct Retired<T> {
    outcome: Result<T, RouterError>,
    submitted_at: Instant,
    completion: Option<Completion<T>>,
}

pub struct OperationManager<O: Operation> {
    context: Arc<RouterContext>,
    completer: OperationCompleteCallback,
    active: DashMap<OperationId, Arc<TrackedOperation<O>>>,
    correlations: DashMap<CorrelationId, OperationId>,
    next_operation_id: AtomicU64,
    closed: AtomicBool,
}

impl<O: Operation> OperationManager<O> {
    pub fn new(context: Arc<RouterContext>) -> Self {
        Self {
            completer: OperationCompleteCallback::new(context.metrics.clone()),
            context,
            active: DashMap::new(),
            correlations: DashMap::new(),
            next_operation_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    pub fn context(&self) -> &Arc<RouterContext> {
        &self.context
    }

    pub fn kind(&self) -> RequestKind {
        O::KIND
    }

    /// Operations not yet completed to their caller.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Requests issued and not yet answered, expired or abandoned.
    pub fn outstanding_requests(&self) -> usize {
        self.correlations.len()
    }

    /// Admit an operation, or complete immediately when it could not be built.
    pub fn submit_operation(
        &self,
        operation: Result<O, RouterError>,
        completion: Completion<O::Output>,
    ) {
        self.context.metrics.record_submitted(O::KIND);

        if self.closed.load(Ordering::SeqCst) {
            self.deliver(Retired {
                outcome: Err(RouterError::RouterClosed),
                submitted_at: Instant::now(),
                completion: Some(completion),
            });
            return;
        }

        let operation = match operation {
            Ok(operation) => operation,
            Err(err) => {
                self.deliver(Retired {
                    outcome: Err(err),
                    submitted_at: Instant::now(),
                    completion: Some(completion),
                });
                return;
            }
        };

        let id = self.next_operation_id.fetch_add(1, Ordering::Relaxed);
        debug!(kind = %O::KIND, operation_id = id, blob_id = %operation.blob_id(), "operation submitted");
        let tracked = Arc::new(TrackedOperation {
            id,
            state: Mutex::new(OperationState {
                operation,
                completion: Some(completion),
            }),
        });
        self.active.insert(id, tracked.clone());

        // close() may have swept the active set before the insert landed.
        if self.closed.load(Ordering::SeqCst) {
            self.abort(&tracked);
        }
    }

    /// Give every active operation a chance to issue requests into `requests`.
    pub fn poll(&self, requests: &mut Vec<RequestInfo>) {
        let started = Instant::now();
        for tracked in self.snapshot() {
            let retired = {
                let mut state = tracked.state.lock();
                if !self.active.contains_key(&tracked.id) {
                    continue;
                }
                let mut registrar = ManagerRegistrar {
                    manager: self,
                    operation_id: tracked.id,
                    requests: &mut *requests,
                };
                let operation = &mut state.operation;
                let result = catch_unwind(AssertUnwindSafe(|| operation.poll(&mut registrar)));
                self.absorb(&mut state.operation, tracked.id, "poll", result);
                self.retire_if_complete(tracked.id, &mut state)
            };
            if let Some(retired) = retired {
                self.deliver(retired);
            }
        }
        self.context
            .metrics
            .record_poll_time(O::KIND, started.elapsed());
    }

    /// Route one response to the operation that issued its request.
    pub fn handle_response(&self, response: ResponseInfo) {
        let started = Instant::now();
        self.handle_response_inner(&response);
        self.context
            .metrics
            .record_handle_response_time(O::KIND, started.elapsed());
    }

    fn handle_response_inner(&self, response: &ResponseInfo) {
        let correlation_id = response.correlation_id();
        let Some((_, operation_id)) = self.correlations.remove(&correlation_id) else {
            self.ignore(correlation_id, "no operation owns correlation id");
            return;
        };
        let Some(tracked) = self
            .active
            .get(&operation_id)
            .map(|entry| Arc::clone(entry.value()))
        else {
            self.ignore(correlation_id, "operation already completed");
            return;
        };

        let retired = {
            let mut state = tracked.state.lock();
            if !self.active.contains_key(&operation_id) {
                drop(state);
                self.ignore(correlation_id, "operation already completed");
                return;
            }
            // Only responses owned by a live operation feed replica health.
            self.context
                .response_handler
                .report(response.replica(), response.outcome());
            let operation = &mut state.operation;
            let result = catch_unwind(AssertUnwindSafe(|| operation.handle_response(response)));
            self.absorb(&mut state.operation, operation_id, "handle_response", result);
            self.retire_if_complete(operation_id, &mut state)
        };
        if let Some(retired) = retired {
            self.deliver(retired);
        }
    }

    /// Complete every active operation with `RouterClosed`. Later submissions
    /// complete the same way.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let remaining = self.snapshot();
        if !remaining.is_empty() {
            debug!(kind = %O::KIND, count = remaining.len(), "aborting operations on close");
        }
        for tracked in remaining {
            self.abort(&tracked);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> Vec<Arc<TrackedOperation<O>>> {
        self.active
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    fn abort(&self, tracked: &TrackedOperation<O>) {
        let retired = {
            let mut state = tracked.state.lock();
            if self.active.remove(&tracked.id).is_none() {
                return;
            }
            state.operation.set_operation_error(RouterError::RouterClosed);
            self.forget_requests(&state.operation);
            Retired {
                outcome: Err(RouterError::RouterClosed),
                submitted_at: state.operation.submitted_at(),
                completion: state.completion.take(),
            }
        };
        self.context.metrics.record_aborted(O::KIND);
        self.deliver(retired);
    }

    /// Turn an error or panic raised by the operation into its terminal failure.
    fn absorb(
        &self,
        operation: &mut O,
        operation_id: OperationId,
        phase: &str,
        result: std::thread::Result<Result<(), RouterError>>,
    ) {
        let message = match result {
            Ok(Ok(())) => return,
            Ok(Err(err)) => err.to_string(),
            Err(panic) => panic_message(panic.as_ref()),
        };
        error!(kind = %O::KIND, operation_id, phase, error = %message, "operation failed unexpectedly");
        operation.set_operation_error(RouterError::unexpected(
            format!("{} {phase}", O::KIND),
            message,
        ));
    }

    /// Must be called with the operation's state lock held.
    fn retire_if_complete(
        &self,
        operation_id: OperationId,
        state: &mut OperationState<O>,
    ) -> Option<Retired<O::Output>> {
        if !state.operation.is_complete() {
            return None;
        }
        self.active.remove(&operation_id)?;
        self.forget_requests(&state.operation);
        let outcome = state.operation.outcome();
        if outcome.is_ok() {
            state
                .operation
                .notify_success(self.context.notifications.as_ref());
        }
        Some(Retired {
            outcome,
            submitted_at: state.operation.submitted_at(),
            completion: state.completion.take(),
        })
    }

    fn forget_requests(&self, operation: &O) {
        for correlation_id in operation.pending_correlation_ids() {
            self.correlations.remove(&correlation_id);
        }
    }

    fn deliver(&self, retired: Retired<O::Output>) {
        let Retired {
            outcome,
            submitted_at,
            completion,
        } = retired;
        match completion {
            Some(completion) => {
                self.completer
                    .complete_operation(O::KIND, submitted_at, completion, outcome)
            }
            None => error!(kind = %O::KIND, "operation retired without a completion handle"),
        }
    }

    fn ignore(&self, correlation_id: CorrelationId, reason: &str) {
        self.context.metrics.record_ignored_response(O::KIND);
        debug!(kind = %O::KIND, correlation_id, reason, "ignoring response");
    }
}

struct ManagerRegistrar<'a, O: Operation> {
    manager: &'a OperationManager<O>,
    operation_id: OperationId,
    requests: &'a mut Vec<RequestInfo>,
}

impl<O: Operation> RequestRegistrar for ManagerRegistrar<'_, O> {
    fn next_correlation_id(&mut self) -> CorrelationId {
        self.manager.context.correlation_ids.next_id()
    }

    fn register_request_to_send(&mut self, request: RequestInfo) {
        let correlation_id = request.correlation_id();
        if let Some(previous) = self
            .manager
            .correlations
            .insert(correlation_id, self.operation_id)
        {
            warn!(correlation_id, previous, "correlation id reissued while outstanding");
        }
        self.requests.push(request);
    }

    fn on_request_expired(&mut self, correlation_id: CorrelationId, replica: &ReplicaId) {
        self.manager.correlations.remove(&correlation_id);
        self.manager
            .context
            .response_handler
            .on_request_response_exception(replica, &NetworkError::RequestTimeout);
    }
}
