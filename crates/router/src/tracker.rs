//! Per-replica request status for a single operation.

use common::traits::ReplicaDirectory;
use common::{CorrelationId, ReplicaId, RouterError};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicaStatus {
    NotAttempted,
    Pending {
        correlation_id: CorrelationId,
        issued_at: Instant,
        attempt: u32,
    },
    Succeeded,
    Failed(RouterError),
}

#[derive(Debug)]
struct ReplicaSlot {
    replica: ReplicaId,
    status: ReplicaStatus,
    attempts: u32,
}

/// Ordered status table over the replicas of one partition.
///
/// Send order is local healthy replicas, then remote healthy replicas, then
/// unhealthy replicas. Unhealthy replicas are deprioritised, never skipped.
#[derive(Debug)]
pub struct ReplicaTracker {
    slots: Vec<ReplicaSlot>,
    max_attempts: u32,
}

impl ReplicaTracker {
    pub fn new(
        replicas: Vec<ReplicaId>,
        directory: &dyn ReplicaDirectory,
        local_datacenter: &str,
        max_attempts: u32,
    ) -> Self {
        let mut ranked: Vec<(u8, ReplicaId)> = replicas
            .into_iter()
            .map(|replica| {
                let rank = if !directory.replica_health(&replica).is_healthy() {
                    2
                } else if directory.is_remote(&replica, local_datacenter) {
                    1
                } else {
                    0
                };
                (rank, replica)
            })
            .collect();
        // Stable, so layout order is kept within a rank.
        ranked.sort_by_key(|(rank, _)| *rank);

        Self {
            slots: ranked
                .into_iter()
                .map(|(_, replica)| ReplicaSlot {
                    replica,
                    status: ReplicaStatus::NotAttempted,
                    attempts: 0,
                })
                .collect(),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn replica(&self, index: usize) -> &ReplicaId {
        &self.slots[index].replica
    }

    pub fn status(&self, index: usize) -> &ReplicaStatus {
        &self.slots[index].status
    }

    pub fn replicas(&self) -> impl Iterator<Item = &ReplicaId> {
        self.slots.iter().map(|slot| &slot.replica)
    }

    /// Replicas to contact now so that at most `parallelism` requests are in flight.
    pub fn next_replicas(&self, parallelism: usize) -> Vec<usize> {
        let budget = parallelism.saturating_sub(self.pending());
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.status == ReplicaStatus::NotAttempted)
            .map(|(index, _)| index)
            .take(budget)
            .collect()
    }

    /// Record that a request was issued. Only a `NotAttempted` replica moves to pending.
    pub fn mark_pending(&mut self, index: usize, correlation_id: CorrelationId, issued_at: Instant) {
        let slot = &mut self.slots[index];
        if slot.status != ReplicaStatus::NotAttempted {
            return;
        }
        slot.attempts += 1;
        slot.status = ReplicaStatus::Pending {
            correlation_id,
            issued_at,
            attempt: slot.attempts,
        };
    }

    /// Index of the replica with a pending request under `correlation_id`.
    pub fn on_response(&self, correlation_id: CorrelationId) -> Option<usize> {
        self.slots.iter().position(|slot| {
            matches!(slot.status, ReplicaStatus::Pending { correlation_id: pending, .. } if pending == correlation_id)
        })
    }

    pub fn record_success(&mut self, index: usize) {
        self.slots[index].status = ReplicaStatus::Succeeded;
    }

    pub fn record_failure(&mut self, index: usize, error: RouterError) {
        self.slots[index].status = ReplicaStatus::Failed(error);
    }

    /// Expire pending requests issued more than `timeout` before `now`.
    ///
    /// A replica with attempts left goes back to `NotAttempted`; otherwise it
    /// fails with `OperationTimedOut`. Returns the expired requests.
    pub fn expire(&mut self, now: Instant, timeout: Duration) -> Vec<(CorrelationId, ReplicaId)> {
        let mut expired = Vec::new();
        for slot in &mut self.slots {
            let ReplicaStatus::Pending {
                correlation_id,
                issued_at,
                ..
            } = slot.status
            else {
                continue;
            };
            if now.saturating_duration_since(issued_at) < timeout {
                continue;
            }
            slot.status = if slot.attempts < self.max_attempts {
                ReplicaStatus::NotAttempted
            } else {
                ReplicaStatus::Failed(RouterError::OperationTimedOut {
                    replica: slot.replica.to_string(),
                })
            };
            expired.push((correlation_id, slot.replica.clone()));
        }
        expired
    }

    pub fn pending_correlation_ids(&self) -> Vec<CorrelationId> {
        self.slots
            .iter()
            .filter_map(|slot| match slot.status {
                ReplicaStatus::Pending { correlation_id, .. } => Some(correlation_id),
                _ => None,
            })
            .collect()
    }

    pub fn total(&self) -> usize {
        self.slots.len()
    }

    pub fn succeeded(&self) -> usize {
        self.count(|status| matches!(status, ReplicaStatus::Succeeded))
    }

    pub fn failed(&self) -> usize {
        self.count(|status| matches!(status, ReplicaStatus::Failed(_)))
    }

    pub fn pending(&self) -> usize {
        self.count(|status| matches!(status, ReplicaStatus::Pending { .. }))
    }

    /// Replicas that may still succeed: pending or not yet attempted.
    pub fn remaining(&self) -> usize {
        self.count(|status| {
            matches!(
                status,
                ReplicaStatus::Pending { .. } | ReplicaStatus::NotAttempted
            )
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = &RouterError> {
        self.slots.iter().filter_map(|slot| match &slot.status {
            ReplicaStatus::Failed(error) => Some(error),
            _ => None,
        })
    }

    /// Highest-ranked failure under `rank`. Ties keep the earliest replica.
    pub fn most_specific_failure(&self, rank: fn(&RouterError) -> u8) -> Option<RouterError> {
        let mut best: Option<&RouterError> = None;
        for error in self.failures() {
            if best.map_or(true, |current| rank(error) > rank(current)) {
                best = Some(error);
            }
        }
        best.cloned()
    }

    fn count(&self, predicate: impl Fn(&ReplicaStatus) -> bool) -> usize {
        self.slots
            .iter()
            .filter(|slot| predicate(&slot.status))
            .count()
    }
}
