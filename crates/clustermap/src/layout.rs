//! Static cluster layout: datacenters, nodes, disks and partition placement.

use common::{DataNodeId, DiskId, PartitionId, ReplicaId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterMapError {
    #[error("failed to read layout {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse layout: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("node {node} is declared more than once")]
    DuplicateNode { node: DataNodeId },

    #[error("partition {partition} is declared more than once")]
    DuplicatePartition { partition: PartitionId },

    #[error("partition {partition} has no replicas")]
    EmptyPartition { partition: PartitionId },

    #[error("partition {partition} places a replica on unknown disk {disk}")]
    UnknownDisk { partition: PartitionId, disk: DiskId },

    #[error("partition {partition} places two replicas on node {node}")]
    DuplicateReplica {
        partition: PartitionId,
        node: DataNodeId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeLayout {
    pub hostname: String,
    pub port: u16,
    pub disks: Vec<String>,
}

impl NodeLayout {
    pub fn id(&self) -> DataNodeId {
        DataNodeId::new(self.hostname.clone(), self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatacenterLayout {
    pub name: String,
    pub nodes: Vec<NodeLayout>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaLayout {
    pub hostname: String,
    pub port: u16,
    pub mount_path: String,
}

impl ReplicaLayout {
    pub fn disk(&self) -> DiskId {
        DiskId::new(
            DataNodeId::new(self.hostname.clone(), self.port),
            self.mount_path.clone(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionLayout {
    pub id: u64,
    #[serde(default)]
    pub read_only: bool,
    pub replicas: Vec<ReplicaLayout>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterLayout {
    pub datacenters: Vec<DatacenterLayout>,
    pub partitions: Vec<PartitionLayout>,
}

/// Layout after validation, with replica identities resolved.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedLayout {
    pub disks: Vec<DiskId>,
    pub nodes: Vec<DataNodeId>,
    pub partitions: Vec<(PartitionId, bool, Vec<ReplicaId>)>,
}

impl ClusterLayout {
    pub fn from_yaml_str(raw: &str) -> Result<Self, ClusterMapError> {
        let layout: Self = serde_yaml::from_str(raw)?;
        layout.resolve()?;
        Ok(layout)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ClusterMapError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ClusterMapError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    pub fn to_yaml(&self) -> Result<String, ClusterMapError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Check references and resolve every replica to its disk and datacenter.
    pub(crate) fn resolve(&self) -> Result<ResolvedLayout, ClusterMapError> {
        let mut disk_dc: HashMap<DiskId, String> = HashMap::new();
        let mut nodes = Vec::new();
        let mut disks = Vec::new();
        let mut seen_nodes = HashSet::new();

        for dc in &self.datacenters {
            for node in &dc.nodes {
                let node_id = node.id();
                if !seen_nodes.insert(node_id.clone()) {
                    return Err(ClusterMapError::DuplicateNode { node: node_id });
                }
                for mount in &node.disks {
                    let disk = DiskId::new(node_id.clone(), mount.clone());
                    disk_dc.insert(disk.clone(), dc.name.clone());
                    disks.push(disk);
                }
                nodes.push(node_id);
            }
        }

        let mut partitions = Vec::with_capacity(self.partitions.len());
        let mut seen_partitions = HashSet::new();
        for partition in &self.partitions {
            let id = PartitionId(partition.id);
            if !seen_partitions.insert(id) {
                return Err(ClusterMapError::DuplicatePartition { partition: id });
            }
            if partition.replicas.is_empty() {
                return Err(ClusterMapError::EmptyPartition { partition: id });
            }

            let mut replica_nodes = HashSet::new();
            let mut replicas = Vec::with_capacity(partition.replicas.len());
            for replica in &partition.replicas {
                let disk = replica.disk();
                let datacenter = disk_dc.get(&disk).cloned().ok_or_else(|| {
                    ClusterMapError::UnknownDisk {
                        partition: id,
                        disk: disk.clone(),
                    }
                })?;
                if !replica_nodes.insert(disk.node.clone()) {
                    return Err(ClusterMapError::DuplicateReplica {
                        partition: id,
                        node: disk.node.clone(),
                    });
                }
                replicas.push(ReplicaId::new(id, disk, datacenter));
            }
            partitions.push((id, partition.read_only, replicas));
        }

        Ok(ResolvedLayout {
            disks,
            nodes,
            partitions,
        })
    }

    /// Layout with `nodes_per_dc` nodes (one disk each) in every datacenter and
    /// every partition replicated once on every node.
    pub fn uniform(datacenters: usize, nodes_per_dc: usize, partitions: u64) -> Self {
        let mut layout = ClusterLayout::default();
        let mut port = 6667u16;
        for dc in 0..datacenters {
            let mut nodes = Vec::with_capacity(nodes_per_dc);
            for node in 0..nodes_per_dc {
                nodes.push(NodeLayout {
                    hostname: format!("dc{}-node{}", dc + 1, node + 1),
                    port,
                    disks: vec!["/mnt/0".to_string()],
                });
                port = port.wrapping_add(1);
            }
            layout.datacenters.push(DatacenterLayout {
                name: format!("dc{}", dc + 1),
                nodes,
            });
        }

        for id in 0..partitions {
            let replicas = layout
                .datacenters
                .iter()
                .flat_map(|dc| dc.nodes.iter())
                .map(|node| ReplicaLayout {
                    hostname: node.hostname.clone(),
                    port: node.port,
                    mount_path: node.disks[0].clone(),
                })
                .collect();
            layout.partitions.push(PartitionLayout {
                id,
                read_only: false,
                replicas,
            });
        }
        layout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAYOUT: &str = r#"
datacenters:
  - name: dc1
    nodes:
      - hostname: node1
        port: 6667
        disks: [/mnt/0, /mnt/1]
      - hostname: node2
        port: 6667
        disks: [/mnt/0]
  - name: dc2
    nodes:
      - hostname: node3
        port: 6667
        disks: [/mnt/0]
partitions:
  - id: 0
    replicas:
      - { hostname: node1, port: 6667, mount_path: /mnt/1 }
      - { hostname: node2, port: 6667, mount_path: /mnt/0 }
      - { hostname: node3, port: 6667, mount_path: /mnt/0 }
  - id: 1
    read_only: true
    replicas:
      - { hostname: node1, port: 6667, mount_path: /mnt/0 }
"#;

    #[test]
    fn parses_and_resolves_datacenters() {
        let layout = ClusterLayout::from_yaml_str(LAYOUT).unwrap();
        let resolved = layout.resolve().unwrap();

        assert_eq!(resolved.nodes.len(), 3);
        assert_eq!(resolved.disks.len(), 4);

        let (id, read_only, replicas) = &resolved.partitions[0];
        assert_eq!(*id, PartitionId(0));
        assert!(!read_only);
        assert_eq!(replicas[0].disk.mount_path, "/mnt/1");
        assert_eq!(replicas[2].datacenter, "dc2");
        assert!(resolved.partitions[1].1);
    }

    #[test]
    fn rejects_unknown_disk() {
        let raw = LAYOUT.replace("mount_path: /mnt/1", "mount_path: /mnt/9");
        let err = ClusterLayout::from_yaml_str(&raw).unwrap_err();
        assert!(matches!(err, ClusterMapError::UnknownDisk { .. }));
    }

    #[test]
    fn rejects_duplicate_partition_and_empty_replicas() {
        let raw = LAYOUT.replace("  - id: 1", "  - id: 0");
        assert!(matches!(
            ClusterLayout::from_yaml_str(&raw).unwrap_err(),
            ClusterMapError::DuplicatePartition { .. }
        ));

        let mut layout = ClusterLayout::from_yaml_str(LAYOUT).unwrap();
        layout.partitions[1].replicas.clear();
        assert!(matches!(
            layout.resolve().unwrap_err(),
            ClusterMapError::EmptyPartition { .. }
        ));
    }

    #[test]
    fn rejects_two_replicas_on_one_node() {
        let mut layout = ClusterLayout::from_yaml_str(LAYOUT).unwrap();
        layout.partitions[1].replicas.push(ReplicaLayout {
            hostname: "node1".into(),
            port: 6667,
            mount_path: "/mnt/1".into(),
        });
        assert!(matches!(
            layout.resolve().unwrap_err(),
            ClusterMapError::DuplicateReplica { .. }
        ));
    }

    #[test]
    fn uniform_layout_replicates_everywhere() {
        let layout = ClusterLayout::uniform(2, 3, 4);
        let resolved = layout.resolve().unwrap();
        assert_eq!(resolved.nodes.len(), 6);
        assert_eq!(resolved.partitions.len(), 4);
        assert!(resolved.partitions.iter().all(|(_, _, r)| r.len() == 6));

        let yaml = layout.to_yaml().unwrap();
        assert_eq!(ClusterLayout::from_yaml_str(&yaml).unwrap(), layout);
    }
}
