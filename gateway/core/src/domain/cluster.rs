// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Cluster Client Contract - Anti-Corruption Layer for the backing cluster
//!
//! The gateway never talks to a concrete storage or compute cluster. It
//! obtains handles from a [`ClusterConnector`] selected at start-up, runs
//! executors against them and closes them. Handle creation happens inside an
//! impersonation scope (see [`crate::domain::impersonation`]); bindings read
//! the effective user from there.

use crate::domain::config::Configuration;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Per-call configuration key holding the storage cluster locator.
pub const STORAGE_URI: &str = "storage.uri";

/// Per-call configuration key holding the compute cluster locator.
pub const COMPUTE_URI: &str = "compute.uri";

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("path not found: {0}")]
    NotFound(String),

    #[error("path already exists: {0}")]
    AlreadyExists(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid cluster locator [{locator}]: {reason}")]
    InvalidLocator { locator: String, reason: String },

    #[error("handle is closed")]
    Closed,

    #[error("cluster unhealthy: {0}")]
    Unhealthy(String),

    #[error("operation not supported: {0}")]
    Unsupported(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Authority (`host[:port]`, lowercased) of a cluster locator URI.
pub fn authority_of(locator: &str) -> Result<String, ClusterError> {
    let invalid = |reason: String| ClusterError::InvalidLocator {
        locator: locator.to_string(),
        reason,
    };
    let url = url::Url::parse(locator.trim()).map_err(|e| invalid(e.to_string()))?;
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| invalid("no host".to_string()))?;
    let authority = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    Ok(authority.to_ascii_lowercase())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FileType {
    File,
    Directory,
    Symlink,
}

/// Metadata of one path, as reported by the storage cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStatus {
    /// Final path component; empty for the root.
    pub path_suffix: String,
    #[serde(rename = "type")]
    pub file_type: FileType,
    pub length: u64,
    pub owner: String,
    pub group: String,
    /// Octal permission bits, e.g. `0o755`.
    pub permission: u16,
    pub replication: u16,
    pub block_size: u64,
    /// Milliseconds since the epoch.
    pub modification_time: i64,
    /// Milliseconds since the epoch.
    pub access_time: i64,
}

/// Summary reported by a compute cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeStatus {
    pub authority: String,
    pub active_nodes: u32,
    pub running_jobs: u32,
}

/// Open connection to a storage cluster for one effective user.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Authority this handle is connected to.
    fn authority(&self) -> &str;

    /// Effective user this handle acts as.
    fn user(&self) -> &str;

    fn is_closed(&self) -> bool;

    /// Read `len` bytes (or to end of file) starting at `offset`.
    async fn open(&self, path: &str, offset: u64, len: Option<u64>) -> Result<Vec<u8>, ClusterError>;

    async fn create(
        &self,
        path: &str,
        data: &[u8],
        overwrite: bool,
        permission: Option<u16>,
    ) -> Result<(), ClusterError>;

    async fn append(&self, path: &str, data: &[u8]) -> Result<(), ClusterError>;

    async fn rename(&self, from: &str, to: &str) -> Result<bool, ClusterError>;

    async fn delete(&self, path: &str, recursive: bool) -> Result<bool, ClusterError>;

    async fn mkdirs(&self, path: &str, permission: Option<u16>) -> Result<bool, ClusterError>;

    async fn list_status(&self, path: &str) -> Result<Vec<FileStatus>, ClusterError>;

    async fn file_status(&self, path: &str) -> Result<FileStatus, ClusterError>;

    async fn set_permission(&self, path: &str, permission: u16) -> Result<(), ClusterError>;

    async fn set_owner(
        &self,
        path: &str,
        owner: Option<&str>,
        group: Option<&str>,
    ) -> Result<(), ClusterError>;

    async fn set_times(
        &self,
        path: &str,
        modification_time: Option<i64>,
        access_time: Option<i64>,
    ) -> Result<(), ClusterError>;

    async fn set_replication(&self, path: &str, replication: u16) -> Result<bool, ClusterError>;

    /// Release the connection. A closed handle rejects every operation with
    /// [`ClusterError::Closed`].
    async fn close(&self) -> Result<(), ClusterError>;
}

/// Open connection to a compute cluster for one effective user.
#[async_trait]
pub trait ComputeClient: Send + Sync {
    fn authority(&self) -> &str;

    fn user(&self) -> &str;

    fn is_closed(&self) -> bool;

    async fn cluster_status(&self) -> Result<ComputeStatus, ClusterError>;

    async fn close(&self) -> Result<(), ClusterError>;
}

/// Factory for cluster handles. Implementations read the effective user
/// from the enclosing impersonation scope.
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    async fn connect_storage(&self, conf: &Configuration) -> Result<Arc<dyn FileSystem>, ClusterError>;

    async fn connect_compute(&self, conf: &Configuration) -> Result<Arc<dyn ComputeClient>, ClusterError>;

    /// Health check run on every fresh storage handle before it is used.
    async fn check_storage(&self, _fs: &dyn FileSystem) -> Result<(), ClusterError> {
        Ok(())
    }

    /// Health check run on every fresh compute handle before it is used.
    async fn check_compute(&self, _client: &dyn ComputeClient) -> Result<(), ClusterError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authority_of() {
        assert_eq!(authority_of("local://LocalHost").unwrap(), "localhost");
        assert_eq!(authority_of("hdfs://nn1.example.com:8020/user").unwrap(), "nn1.example.com:8020");
        assert_eq!(authority_of("http://Example.COM").unwrap(), "example.com");
    }

    #[test]
    fn test_authority_rejects_hostless_locators() {
        assert!(matches!(
            authority_of("not a uri"),
            Err(ClusterError::InvalidLocator { .. })
        ));
        assert!(matches!(
            authority_of("file:///tmp/x"),
            Err(ClusterError::InvalidLocator { .. })
        ));
    }
}
