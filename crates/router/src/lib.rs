//! Non-blocking operation management for the blob routing tier.
//!
//! A [`Router`] turns each client call into an operation that fans requests
//! out to the replicas of one partition, correlates the asynchronous replies,
//! and completes the caller's [`FutureResult`] exactly once.

pub mod completion;
pub mod context;
pub mod delete;
pub mod get;
pub mod manager;
pub mod metrics;
pub mod nonblocking;
pub mod notification;
pub mod operation;
pub mod put;
pub mod tracker;
pub mod utils;

#[cfg(test)]
mod testing;

pub use completion::{Callback, Completion, FutureResult, OperationCompleteCallback};
pub use context::RouterContext;
pub use delete::DeleteOperation;
pub use get::GetOperation;
pub use manager::OperationManager;
pub use metrics::{MetricsSnapshot, RouterMetrics};
pub use nonblocking::{Router, TickSummary};
pub use notification::LoggingNotificationSystem;
pub use operation::{CorrelationIdGenerator, Operation, RequestRegistrar};
pub use put::PutOperation;
pub use tracker::{ReplicaStatus, ReplicaTracker};
