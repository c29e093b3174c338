use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

pub mod config;
pub mod error;
pub mod protocol;
pub mod traits;

pub use config::{ClusterMapConfig, ConfigError, RouterConfig};
pub use error::{RouterError, RouterErrorCode};
pub use protocol::{
    CorrelationId, NetworkError, Request, RequestInfo, RequestKind, RequestPayload, Response,
    ResponseInfo, ResponseOutcome, ServerErrorCode,
};

/// Only blob id layout currently issued by routers.
pub const BLOB_ID_VERSION: u16 = 1;

// version (2) | partition (8) | uuid (16)
const BLOB_ID_LEN: usize = 2 + 8 + 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionId(pub u64);

impl PartitionId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors produced while decoding the string form of a [`BlobId`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlobIdError {
    #[error("blob id is empty")]
    Empty,

    #[error("blob id is not valid hex: {reason}")]
    NotHex { reason: String },

    #[error("blob id has {actual} bytes, expected {expected}")]
    WrongLength { expected: usize, actual: usize },

    #[error("unsupported blob id version {0}")]
    UnsupportedVersion(u16),

    #[error("partition {0} is not known to the cluster map")]
    UnknownPartition(PartitionId),
}

/// Identifier of an immutable blob. Embeds the partition that hosts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlobId {
    version: u16,
    partition: PartitionId,
    uuid: Uuid,
}

impl BlobId {
    /// Mint a fresh id on the given partition.
    pub fn new(partition: PartitionId) -> Self {
        Self::from_parts(BLOB_ID_VERSION, partition, Uuid::new_v4())
    }

    pub fn from_parts(version: u16, partition: PartitionId, uuid: Uuid) -> Self {
        Self {
            version,
            partition,
            uuid,
        }
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    pub fn uuid(&self) -> &Uuid {
        &self.uuid
    }

    /// Structural decode of the hex string form. Does not check that the
    /// partition exists; see `router::utils::blob_id_from_str` for that.
    pub fn decode(value: &str) -> Result<Self, BlobIdError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(BlobIdError::Empty);
        }

        let raw = hex::decode(value).map_err(|err| BlobIdError::NotHex {
            reason: err.to_string(),
        })?;
        if raw.len() != BLOB_ID_LEN {
            return Err(BlobIdError::WrongLength {
                expected: BLOB_ID_LEN,
                actual: raw.len(),
            });
        }

        let version = u16::from_be_bytes([raw[0], raw[1]]);
        if version != BLOB_ID_VERSION {
            return Err(BlobIdError::UnsupportedVersion(version));
        }

        let mut partition = [0u8; 8];
        partition.copy_from_slice(&raw[2..10]);
        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&raw[10..]);

        Ok(Self {
            version,
            partition: PartitionId(u64::from_be_bytes(partition)),
            uuid: Uuid::from_bytes(uuid),
        })
    }

    fn encode(&self) -> String {
        let mut raw = Vec::with_capacity(BLOB_ID_LEN);
        raw.extend_from_slice(&self.version.to_be_bytes());
        raw.extend_from_slice(&self.partition.0.to_be_bytes());
        raw.extend_from_slice(self.uuid.as_bytes());
        hex::encode(raw)
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for BlobId {
    type Err = BlobIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl TryFrom<String> for BlobId {
    type Error = BlobIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::decode(&value)
    }
}

impl From<BlobId> for String {
    fn from(id: BlobId) -> Self {
        id.encode()
    }
}

/// A storage node, addressed by host and port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DataNodeId {
    pub hostname: String,
    pub port: u16,
}

impl DataNodeId {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
        }
    }
}

impl fmt::Display for DataNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hostname, self.port)
    }
}

impl FromStr for DataNodeId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| anyhow::anyhow!("expected host:port, got {s}"))?;
        if host.is_empty() {
            anyhow::bail!("missing hostname in {s}");
        }
        let port = port
            .parse::<u16>()
            .map_err(|err| anyhow::anyhow!("invalid port in {s}: {err}"))?;
        Ok(Self::new(host, port))
    }
}

/// A disk mounted on a data node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DiskId {
    pub node: DataNodeId,
    pub mount_path: String,
}

impl DiskId {
    pub fn new(node: DataNodeId, mount_path: impl Into<String>) -> Self {
        Self {
            node,
            mount_path: mount_path.into(),
        }
    }
}

impl fmt::Display for DiskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.node, self.mount_path)
    }
}

/// One physical copy of a partition on a specific disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplicaId {
    pub partition: PartitionId,
    pub disk: DiskId,
    pub datacenter: String,
}

impl ReplicaId {
    pub fn new(partition: PartitionId, disk: DiskId, datacenter: impl Into<String>) -> Self {
        Self {
            partition,
            disk,
            datacenter: datacenter.into(),
        }
    }

    pub fn node(&self) -> &DataNodeId {
        &self.disk.node
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}@{}", self.partition, self.disk)
    }
}

/// Live health of a replica as seen by the replica directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaHealth {
    Available,
    DiskError,
    NodeDown,
    ReadOnly,
    Unknown,
}

impl ReplicaHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ReplicaHealth::Available | ReplicaHealth::ReadOnly)
    }
}

/// Signals the failure reporter sends to the replica directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaEventType {
    DiskError,
    DiskOk,
    PartitionReadOnly,
    NodeResponse,
    NodeTimeout,
}
