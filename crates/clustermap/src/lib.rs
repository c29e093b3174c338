//! Replica directory backed by a static cluster layout.
//!
//! Partition placement never changes at runtime; replica health does. Health
//! is derived from fixed-backoff policies on every node and disk, fed by the
//! [`ResponseHandler`] as requests succeed or fail.

use common::traits::ReplicaDirectory;
use common::{
    ClusterMapConfig, DataNodeId, DiskId, PartitionId, ReplicaEventType, ReplicaHealth, ReplicaId,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, info, warn};

pub mod layout;
pub mod policy;
pub mod response_handler;

pub use layout::{ClusterLayout, ClusterMapError};
pub use policy::FixedBackoffResourceStatePolicy;
pub use response_handler::ResponseHandler;

const EVENT_KINDS: usize = 5;

fn event_index(event: ReplicaEventType) -> usize {
    match event {
        ReplicaEventType::DiskError => 0,
        ReplicaEventType::DiskOk => 1,
        ReplicaEventType::PartitionReadOnly => 2,
        ReplicaEventType::NodeResponse => 3,
        ReplicaEventType::NodeTimeout => 4,
    }
}

struct PartitionEntry {
    replicas: Vec<ReplicaId>,
    read_only: AtomicBool,
}

pub struct StaticClusterMap {
    partitions: BTreeMap<PartitionId, PartitionEntry>,
    nodes: HashMap<DataNodeId, FixedBackoffResourceStatePolicy>,
    disks: HashMap<DiskId, FixedBackoffResourceStatePolicy>,
    events: [AtomicU64; EVENT_KINDS],
}

impl StaticClusterMap {
    pub fn new(layout: &ClusterLayout, config: &ClusterMapConfig) -> Result<Self, ClusterMapError> {
        let resolved = layout.resolve()?;

        let nodes = resolved
            .nodes
            .into_iter()
            .map(|node| {
                let policy = FixedBackoffResourceStatePolicy::new(
                    config.datanode_error_threshold,
                    config.datanode_retry_backoff(),
                );
                (node, policy)
            })
            .collect::<HashMap<_, _>>();

        let disks = resolved
            .disks
            .into_iter()
            .map(|disk| {
                let policy = FixedBackoffResourceStatePolicy::new(
                    config.disk_error_threshold,
                    config.disk_retry_backoff(),
                );
                (disk, policy)
            })
            .collect::<HashMap<_, _>>();

        let partitions = resolved
            .partitions
            .into_iter()
            .map(|(id, read_only, replicas)| {
                (
                    id,
                    PartitionEntry {
                        replicas,
                        read_only: AtomicBool::new(read_only),
                    },
                )
            })
            .collect::<BTreeMap<_, _>>();

        info!(
            partitions = partitions.len(),
            nodes = nodes.len(),
            disks = disks.len(),
            "cluster map loaded"
        );

        Ok(Self {
            partitions,
            nodes,
            disks,
            events: Default::default(),
        })
    }

    /// How many times `event` has been reported since the map was built.
    pub fn event_count(&self, event: ReplicaEventType) -> u64 {
        self.events[event_index(event)].load(Ordering::Relaxed)
    }

    pub fn is_node_down(&self, node: &DataNodeId) -> bool {
        self.nodes.get(node).map(|p| p.is_down()).unwrap_or(false)
    }

    pub fn is_disk_down(&self, disk: &DiskId) -> bool {
        self.disks.get(disk).map(|p| p.is_down()).unwrap_or(false)
    }
}

impl ReplicaDirectory for StaticClusterMap {
    fn replicas_for(&self, partition: PartitionId) -> Option<Vec<ReplicaId>> {
        self.partitions
            .get(&partition)
            .map(|entry| entry.replicas.clone())
    }

    fn partition_ids(&self) -> Vec<PartitionId> {
        self.partitions.keys().copied().collect()
    }

    fn writable_partitions(&self) -> Vec<PartitionId> {
        self.partitions
            .iter()
            .filter(|(_, entry)| !entry.read_only.load(Ordering::Acquire))
            .map(|(id, _)| *id)
            .collect()
    }

    fn replica_health(&self, replica: &ReplicaId) -> ReplicaHealth {
        let Some(entry) = self.partitions.get(&replica.partition) else {
            return ReplicaHealth::Unknown;
        };
        if !entry.replicas.contains(replica) {
            return ReplicaHealth::Unknown;
        }
        if self.is_node_down(replica.node()) {
            return ReplicaHealth::NodeDown;
        }
        if self.is_disk_down(&replica.disk) {
            return ReplicaHealth::DiskError;
        }
        if entry.read_only.load(Ordering::Acquire) {
            return ReplicaHealth::ReadOnly;
        }
        ReplicaHealth::Available
    }

    fn on_replica_event(&self, replica: &ReplicaId, event: ReplicaEventType) {
        self.events[event_index(event)].fetch_add(1, Ordering::Relaxed);
        debug!(replica = %replica, ?event, "replica event");

        match event {
            ReplicaEventType::DiskError => match self.disks.get(&replica.disk) {
                Some(policy) => policy.on_error(),
                None => warn!(disk = %replica.disk, "disk error for unknown disk"),
            },
            ReplicaEventType::DiskOk => {
                if let Some(policy) = self.disks.get(&replica.disk) {
                    policy.on_success();
                }
            }
            ReplicaEventType::PartitionReadOnly => {
                if let Some(entry) = self.partitions.get(&replica.partition) {
                    if !entry.read_only.swap(true, Ordering::AcqRel) {
                        info!(partition = %replica.partition, "partition marked read-only");
                    }
                }
            }
            ReplicaEventType::NodeResponse => {
                if let Some(policy) = self.nodes.get(replica.node()) {
                    policy.on_success();
                }
            }
            ReplicaEventType::NodeTimeout => match self.nodes.get(replica.node()) {
                Some(policy) => policy.on_error(),
                None => warn!(node = %replica.node(), "timeout for unknown node"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tracing_test::traced_test;

    fn map(config: ClusterMapConfig) -> StaticClusterMap {
        StaticClusterMap::new(&ClusterLayout::uniform(2, 2, 3), &config).unwrap()
    }

    #[test]
    fn resolves_partitions_and_replicas() {
        let map = map(ClusterMapConfig::default());
        assert_eq!(
            map.partition_ids(),
            vec![PartitionId(0), PartitionId(1), PartitionId(2)]
        );
        let replicas = map.replicas_for(PartitionId(1)).unwrap();
        assert_eq!(replicas.len(), 4);
        assert!(map.is_remote(&replicas[3], "dc1"));
        assert!(!map.is_remote(&replicas[0], "dc1"));
        assert!(map.replicas_for(PartitionId(42)).is_none());
        assert!(!map.has_partition(PartitionId(42)));
    }

    #[tokio::test(start_paused = true)]
    async fn disk_error_marks_replica_until_backoff() {
        let config = ClusterMapConfig {
            disk_error_threshold: 1,
            disk_retry_backoff_ms: 1_000,
            ..ClusterMapConfig::default()
        };
        let map = map(config);
        let replica = map.replicas_for(PartitionId(0)).unwrap()[0].clone();

        map.on_replica_event(&replica, ReplicaEventType::DiskError);
        assert_eq!(map.replica_health(&replica), ReplicaHealth::DiskError);
        assert_eq!(map.event_count(ReplicaEventType::DiskError), 1);

        tokio::time::advance(Duration::from_millis(1_001)).await;
        assert_eq!(map.replica_health(&replica), ReplicaHealth::Available);
    }

    #[test]
    fn node_timeouts_take_node_down_and_response_restores_it() {
        let config = ClusterMapConfig {
            datanode_error_threshold: 2,
            ..ClusterMapConfig::default()
        };
        let map = map(config);
        let replica = map.replicas_for(PartitionId(0)).unwrap()[1].clone();

        map.on_replica_event(&replica, ReplicaEventType::NodeTimeout);
        assert_eq!(map.replica_health(&replica), ReplicaHealth::Available);
        map.on_replica_event(&replica, ReplicaEventType::NodeTimeout);
        assert_eq!(map.replica_health(&replica), ReplicaHealth::NodeDown);

        // Every replica on the node is affected.
        let sibling = map.replicas_for(PartitionId(2)).unwrap()[1].clone();
        assert_eq!(map.replica_health(&sibling), ReplicaHealth::NodeDown);

        map.on_replica_event(&replica, ReplicaEventType::NodeResponse);
        assert_eq!(map.replica_health(&replica), ReplicaHealth::Available);
    }

    #[test]
    #[traced_test]
    fn read_only_partition_leaves_writable_set() {
        let map = map(ClusterMapConfig::default());
        let replica = map.replicas_for(PartitionId(1)).unwrap()[0].clone();

        map.on_replica_event(&replica, ReplicaEventType::PartitionReadOnly);
        assert_eq!(
            map.writable_partitions(),
            vec![PartitionId(0), PartitionId(2)]
        );
        assert_eq!(map.replica_health(&replica), ReplicaHealth::ReadOnly);
        assert!(logs_contain("partition marked read-only"));
    }

    #[test]
    fn unknown_replica_has_unknown_health() {
        let map = map(ClusterMapConfig::default());
        let mut replica = map.replicas_for(PartitionId(0)).unwrap()[0].clone();
        replica.disk.mount_path = "/mnt/elsewhere".into();
        assert_eq!(map.replica_health(&replica), ReplicaHealth::Unknown);
    }
}
