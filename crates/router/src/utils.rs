use common::traits::ReplicaDirectory;
use common::{BlobId, BlobIdError, RouterError};
use tracing::error;

/// Decode a client-supplied blob id and check its partition against the directory.
pub fn blob_id_from_str(
    blob_id: &str,
    directory: &dyn ReplicaDirectory,
) -> Result<BlobId, RouterError> {
    let parsed = BlobId::decode(blob_id).and_then(|id| {
        if directory.has_partition(id.partition()) {
            Ok(id)
        } else {
            Err(BlobIdError::UnknownPartition(id.partition()))
        }
    });
    parsed.map_err(|err| {
        error!(blob_id, error = %err, "blob id is invalid");
        RouterError::invalid_blob_id(blob_id, err)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clustermap::{ClusterLayout, StaticClusterMap};
    use common::{ClusterMapConfig, PartitionId};
    use tracing_test::traced_test;

    fn map() -> StaticClusterMap {
        StaticClusterMap::new(&ClusterLayout::uniform(1, 1, 2), &ClusterMapConfig::default())
            .unwrap()
    }

    #[test]
    fn accepts_ids_on_known_partitions() {
        let map = map();
        let id = BlobId::new(PartitionId(1));
        assert_eq!(blob_id_from_str(&id.to_string(), &map), Ok(id));
    }

    #[test]
    #[traced_test]
    fn rejects_malformed_and_unknown_partition_ids() {
        let map = map();
        assert!(matches!(
            blob_id_from_str("zz", &map),
            Err(RouterError::InvalidBlobId { .. })
        ));
        assert!(logs_contain("blob id is invalid"));

        let stray = BlobId::new(PartitionId(9)).to_string();
        let Err(RouterError::InvalidBlobId { reason, .. }) = blob_id_from_str(&stray, &map) else {
            panic!("expected invalid blob id");
        };
        assert!(reason.contains("partition 9"));
    }
}
