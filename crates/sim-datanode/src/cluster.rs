use clustermap::{ClusterLayout, ClusterMapError, StaticClusterMap};
use common::{ClusterMapConfig, DataNodeId};
use std::sync::Arc;

use crate::network::{SimNetwork, SimNetworkConfig};
use crate::node::SimDataNode;

/// A cluster map together with one simulated node per layout node.
pub struct SimCluster {
    layout: ClusterLayout,
    map: Arc<StaticClusterMap>,
    nodes: Vec<Arc<SimDataNode>>,
    network: Arc<SimNetwork>,
}

impl SimCluster {
    /// Every partition replicated on every node of every datacenter.
    pub fn uniform(
        datacenters: usize,
        nodes_per_dc: usize,
        partitions: u64,
    ) -> Result<Self, ClusterMapError> {
        Self::from_layout(
            ClusterLayout::uniform(datacenters, nodes_per_dc, partitions),
            &ClusterMapConfig::default(),
            SimNetworkConfig::default(),
        )
    }

    pub fn from_layout(
        layout: ClusterLayout,
        map_config: &ClusterMapConfig,
        network_config: SimNetworkConfig,
    ) -> Result<Self, ClusterMapError> {
        let map = Arc::new(StaticClusterMap::new(&layout, map_config)?);
        let nodes: Vec<_> = layout
            .datacenters
            .iter()
            .flat_map(|dc| dc.nodes.iter())
            .map(|node| Arc::new(SimDataNode::new(node.id())))
            .collect();
        let network = Arc::new(SimNetwork::new(nodes.iter().cloned(), network_config));
        Ok(Self {
            layout,
            map,
            nodes,
            network,
        })
    }

    pub fn layout(&self) -> &ClusterLayout {
        &self.layout
    }

    pub fn map(&self) -> &Arc<StaticClusterMap> {
        &self.map
    }

    pub fn network(&self) -> &Arc<SimNetwork> {
        &self.network
    }

    pub fn nodes(&self) -> &[Arc<SimDataNode>] {
        &self.nodes
    }

    pub fn node(&self, id: &DataNodeId) -> Option<&Arc<SimDataNode>> {
        self.nodes.iter().find(|node| node.id() == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::traits::ReplicaDirectory;
    use common::PartitionId;

    #[test]
    fn builds_a_node_per_layout_node() {
        let cluster = SimCluster::uniform(2, 2, 3).unwrap();
        assert_eq!(cluster.nodes().len(), 4);
        assert_eq!(cluster.map().partition_ids().len(), 3);

        let replica = cluster.map().replicas_for(PartitionId(0)).unwrap()[3].clone();
        assert!(cluster.node(replica.node()).is_some());
        assert!(cluster.network().node(replica.node()).is_some());
        assert_eq!(cluster.layout().datacenters.len(), 2);
    }
}
