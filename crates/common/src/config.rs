//! Router and cluster map configuration.
//!
//! Both configs deserialize from YAML with every field optional, accept
//! `BLOBMESH_*` environment overrides, and must pass `validate()` before use.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {source}")]
    Parse {
        #[from]
        source: serde_yaml::Error,
    },

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

fn read_yaml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    Ok(serde_yaml::from_str(&raw)?)
}

fn override_from<T, F>(lookup: &F, key: &str, target: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|err: T::Err| ConfigError::invalid(key, err.to_string()))?;
    }
    Ok(())
}

/// Tunables for the router and its operation managers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Datacenter the router runs in. Local replicas are contacted first.
    pub datacenter_name: String,
    /// Client id stamped on every outbound request.
    pub client_id: String,
    /// A pending request older than this counts as a failed attempt.
    pub request_timeout_ms: u64,
    /// Interval between request/response loop iterations.
    pub poll_interval_ms: u64,
    /// Replicas that must acknowledge a put.
    pub put_success_target: usize,
    /// Concurrent replica requests per get.
    pub get_request_parallelism: usize,
    /// Attempts per replica for a get before the replica counts as failed.
    pub get_max_attempts_per_replica: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            datacenter_name: "dc1".to_string(),
            client_id: "router".to_string(),
            request_timeout_ms: 2_000,
            poll_interval_ms: 10,
            put_success_target: 2,
            get_request_parallelism: 2,
            get_max_attempts_per_replica: 2,
        }
    }
}

impl RouterConfig {
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: Self = read_yaml(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Apply `BLOBMESH_ROUTER_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_from(&lookup, "BLOBMESH_ROUTER_DATACENTER", &mut self.datacenter_name)?;
        override_from(&lookup, "BLOBMESH_ROUTER_CLIENT_ID", &mut self.client_id)?;
        override_from(
            &lookup,
            "BLOBMESH_ROUTER_REQUEST_TIMEOUT_MS",
            &mut self.request_timeout_ms,
        )?;
        override_from(
            &lookup,
            "BLOBMESH_ROUTER_POLL_INTERVAL_MS",
            &mut self.poll_interval_ms,
        )?;
        override_from(
            &lookup,
            "BLOBMESH_ROUTER_PUT_SUCCESS_TARGET",
            &mut self.put_success_target,
        )?;
        override_from(
            &lookup,
            "BLOBMESH_ROUTER_GET_PARALLELISM",
            &mut self.get_request_parallelism,
        )?;
        override_from(
            &lookup,
            "BLOBMESH_ROUTER_GET_MAX_ATTEMPTS",
            &mut self.get_max_attempts_per_replica,
        )?;
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.datacenter_name.trim().is_empty() {
            return Err(ConfigError::invalid("datacenter_name", "must not be empty"));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::invalid("request_timeout_ms", "must be positive"));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::invalid("poll_interval_ms", "must be positive"));
        }
        if self.put_success_target == 0 {
            return Err(ConfigError::invalid("put_success_target", "must be at least 1"));
        }
        if self.get_request_parallelism == 0 {
            return Err(ConfigError::invalid(
                "get_request_parallelism",
                "must be at least 1",
            ));
        }
        if self.get_max_attempts_per_replica == 0 {
            return Err(ConfigError::invalid(
                "get_max_attempts_per_replica",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Thresholds for the fixed-backoff health policy applied to nodes and disks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterMapConfig {
    pub datanode_error_threshold: u32,
    pub datanode_retry_backoff_ms: u64,
    pub disk_error_threshold: u32,
    pub disk_retry_backoff_ms: u64,
}

impl Default for ClusterMapConfig {
    fn default() -> Self {
        Self {
            datanode_error_threshold: 6,
            datanode_retry_backoff_ms: 5 * 60 * 1000,
            disk_error_threshold: 1,
            disk_retry_backoff_ms: 10 * 60 * 1000,
        }
    }
}

impl ClusterMapConfig {
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: Self = read_yaml(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    pub fn datanode_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.datanode_retry_backoff_ms)
    }

    pub fn disk_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.disk_retry_backoff_ms)
    }

    /// Apply `BLOBMESH_CLUSTER_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_from(
            &lookup,
            "BLOBMESH_CLUSTER_DATANODE_ERROR_THRESHOLD",
            &mut self.datanode_error_threshold,
        )?;
        override_from(
            &lookup,
            "BLOBMESH_CLUSTER_DATANODE_RETRY_BACKOFF_MS",
            &mut self.datanode_retry_backoff_ms,
        )?;
        override_from(
            &lookup,
            "BLOBMESH_CLUSTER_DISK_ERROR_THRESHOLD",
            &mut self.disk_error_threshold,
        )?;
        override_from(
            &lookup,
            "BLOBMESH_CLUSTER_DISK_RETRY_BACKOFF_MS",
            &mut self.disk_retry_backoff_ms,
        )?;
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.datanode_error_threshold == 0 {
            return Err(ConfigError::invalid(
                "datanode_error_threshold",
                "must be at least 1",
            ));
        }
        if self.disk_error_threshold == 0 {
            return Err(ConfigError::invalid(
                "disk_error_threshold",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}
