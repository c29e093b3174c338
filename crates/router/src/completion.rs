//! Delivery of finished operations to their callers.
//!
//! Every submission produces a [`Completion`] (kept by the manager) and a
//! [`FutureResult`] (returned to the caller). [`OperationCompleteCallback`] is
//! the only place a completion is consumed, and the manager guarantees it is
//! reached at most once per operation.

use common::{RequestKind, RouterError};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::metrics::RouterMetrics;

pub type Callback<T> = Box<dyn FnOnce(Result<T, RouterError>) + Send + 'static>;

/// Manager-side half of a submission.
pub struct Completion<T> {
    sender: oneshot::Sender<Result<T, RouterError>>,
    callback: Option<Callback<T>>,
}

impl<T> Completion<T> {
    pub fn new(callback: Option<Callback<T>>) -> (Self, FutureResult<T>) {
        let (sender, receiver) = oneshot::channel();
        (
            Self { sender, callback },
            FutureResult {
                receiver,
                settled: None,
            },
        )
    }
}

/// Caller-side handle resolved exactly once with the operation outcome.
pub struct FutureResult<T> {
    receiver: oneshot::Receiver<Result<T, RouterError>>,
    settled: Option<Result<T, RouterError>>,
}

impl<T> FutureResult<T> {
    /// The outcome, if the operation has finished. Does not block.
    pub fn try_result(&mut self) -> Option<&Result<T, RouterError>> {
        if self.settled.is_none() {
            self.settled = match self.receiver.try_recv() {
                Ok(outcome) => Some(outcome),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Closed) => Some(Err(abandoned())),
            };
        }
        self.settled.as_ref()
    }

    pub fn is_done(&mut self) -> bool {
        self.try_result().is_some()
    }
}

impl<T: Unpin> Future for FutureResult<T> {
    type Output = Result<T, RouterError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(outcome) = this.settled.take() {
            return Poll::Ready(outcome);
        }
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(abandoned())),
            Poll::Pending => Poll::Pending,
        }
    }
}

fn abandoned() -> RouterError {
    RouterError::unexpected("completion", "operation dropped without completing")
}

/// Resolves completion handles, runs caller callbacks and records outcome metrics.
#[derive(Clone)]
pub struct OperationCompleteCallback {
    metrics: Arc<RouterMetrics>,
}

impl OperationCompleteCallback {
    pub fn new(metrics: Arc<RouterMetrics>) -> Self {
        Self { metrics }
    }

    pub fn complete_operation<T: Clone + Send + 'static>(
        &self,
        kind: RequestKind,
        submitted_at: Instant,
        completion: Completion<T>,
        outcome: Result<T, RouterError>,
    ) {
        self.metrics
            .record_completion(kind, submitted_at.elapsed(), outcome.as_ref().err());
        if let Err(err) = &outcome {
            debug!(%kind, error = %err, "operation failed");
        }

        let Completion { sender, callback } = completion;
        let for_callback = callback.map(|callback| (callback, outcome.clone()));

        if sender.send(outcome).is_err() {
            debug!(%kind, "caller dropped completion handle");
        }

        if let Some((callback, outcome)) = for_callback {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(move || callback(outcome))) {
                self.metrics.record_callback_panic();
                error!(%kind, panic = %panic_message(panic.as_ref()), "operation callback panicked");
            }
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
