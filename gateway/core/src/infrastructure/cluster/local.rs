// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Local Cluster Binding
//!
//! Single-node implementation of the cluster client contract for
//! development and testing. Each storage authority maps to a sub-directory
//! of the connector root; cluster paths are resolved below it.
//!
//! **Limitations:**
//! - Owner, group, permission, replication and time overrides live in an
//!   in-memory metadata table shared by all handles of one connector, not
//!   on disk
//! - No enforcement of permissions against the effective user
//! - The compute client only reports a static single-node status

use crate::domain::cluster::{
    authority_of, ClusterConnector, ClusterError, ComputeClient, ComputeStatus, FileStatus,
    FileSystem, FileType, COMPUTE_URI, STORAGE_URI,
};
use crate::domain::config::Configuration;
use crate::domain::impersonation::current_user;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::io::AsyncWriteExt;
use tracing::debug;

const DEFAULT_GROUP: &str = "supergroup";
const DEFAULT_FILE_PERMISSION: u16 = 0o644;
const DEFAULT_DIR_PERMISSION: u16 = 0o755;
const DEFAULT_REPLICATION: u16 = 3;
const DEFAULT_BLOCK_SIZE: u64 = 128 * 1024 * 1024;

#[derive(Debug, Clone, Default)]
struct PathMeta {
    owner: Option<String>,
    group: Option<String>,
    permission: Option<u16>,
    replication: Option<u16>,
    modification_time: Option<i64>,
    access_time: Option<i64>,
}

type MetadataTable = Arc<RwLock<HashMap<PathBuf, PathMeta>>>;

fn locator(conf: &Configuration, key: &str) -> Result<String, ClusterError> {
    conf.get_trimmed(key).ok_or_else(|| ClusterError::InvalidLocator {
        locator: String::new(),
        reason: format!("[{key}] is not set"),
    })
}

fn effective_user() -> Result<String, ClusterError> {
    current_user()
        .map(|ctx| ctx.effective_user)
        .ok_or_else(|| ClusterError::PermissionDenied("no effective user in scope".to_string()))
}

fn millis(time: std::io::Result<SystemTime>) -> i64 {
    time.map(|t| DateTime::<Utc>::from(t).timestamp_millis())
        .unwrap_or_default()
}

/// Connector rooted at a local directory.
pub struct LocalClusterConnector {
    root: PathBuf,
    metadata: MetadataTable,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl LocalClusterConnector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            metadata: Arc::new(RwLock::new(HashMap::new())),
            opened: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Handles opened so far.
    pub fn opened_handles(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Handles closed so far.
    pub fn closed_handles(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    fn authority_dir(&self, authority: &str) -> PathBuf {
        self.root.join(authority.replace(':', "_"))
    }
}

#[async_trait]
impl ClusterConnector for LocalClusterConnector {
    async fn connect_storage(&self, conf: &Configuration) -> Result<Arc<dyn FileSystem>, ClusterError> {
        let authority = authority_of(&locator(conf, STORAGE_URI)?)?;
        let user = effective_user()?;
        let base = self.authority_dir(&authority);
        tokio::fs::create_dir_all(&base).await?;

        self.opened.fetch_add(1, Ordering::SeqCst);
        debug!(authority = %authority, user = %user, "Opened local storage handle");
        Ok(Arc::new(LocalFileSystem {
            authority,
            user,
            base,
            metadata: Arc::clone(&self.metadata),
            closed: AtomicBool::new(false),
            close_count: Arc::clone(&self.closed),
        }))
    }

    async fn connect_compute(&self, conf: &Configuration) -> Result<Arc<dyn ComputeClient>, ClusterError> {
        let authority = authority_of(&locator(conf, COMPUTE_URI)?)?;
        let user = effective_user()?;

        self.opened.fetch_add(1, Ordering::SeqCst);
        debug!(authority = %authority, user = %user, "Opened local compute handle");
        Ok(Arc::new(LocalComputeClient {
            authority,
            user,
            closed: AtomicBool::new(false),
            close_count: Arc::clone(&self.closed),
        }))
    }

    async fn check_storage(&self, fs: &dyn FileSystem) -> Result<(), ClusterError> {
        let base = self.authority_dir(fs.authority());
        match tokio::fs::metadata(&base).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            _ => Err(ClusterError::Unhealthy(format!(
                "storage directory {} is not available",
                base.display()
            ))),
        }
    }
}

pub struct LocalFileSystem {
    authority: String,
    user: String,
    base: PathBuf,
    metadata: MetadataTable,
    closed: AtomicBool,
    close_count: Arc<AtomicUsize>,
}

impl LocalFileSystem {
    fn ensure_open(&self) -> Result<(), ClusterError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(ClusterError::Closed)
        } else {
            Ok(())
        }
    }

    /// Resolve an absolute cluster path below the authority directory.
    fn resolve(&self, path: &str) -> Result<PathBuf, ClusterError> {
        self.ensure_open()?;
        if !path.starts_with('/') {
            return Err(ClusterError::InvalidPath(format!("{path} is not absolute")));
        }
        let relative = Path::new(path.trim_start_matches('/'));
        if path.split('/').any(|segment| segment == "." || segment == "..")
            || relative.components().any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(ClusterError::InvalidPath(format!("{path} is not a normalized path")));
        }
        Ok(self.base.join(relative))
    }

    async fn metadata_of(&self, path: &str, local: &Path) -> Result<std::fs::Metadata, ClusterError> {
        tokio::fs::metadata(local).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ClusterError::NotFound(path.to_string()),
            _ => ClusterError::Io(e),
        })
    }

    fn status_of(&self, local: &Path, meta: &std::fs::Metadata) -> FileStatus {
        let overrides = self.metadata.read().get(local).cloned().unwrap_or_default();
        let is_dir = meta.is_dir();
        FileStatus {
            path_suffix: local
                .file_name()
                .filter(|_| local != self.base)
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            file_type: if is_dir { FileType::Directory } else { FileType::File },
            length: if is_dir { 0 } else { meta.len() },
            owner: overrides.owner.unwrap_or_else(|| self.user.clone()),
            group: overrides.group.unwrap_or_else(|| DEFAULT_GROUP.to_string()),
            permission: overrides.permission.unwrap_or(if is_dir {
                DEFAULT_DIR_PERMISSION
            } else {
                DEFAULT_FILE_PERMISSION
            }),
            replication: if is_dir {
                0
            } else {
                overrides.replication.unwrap_or(DEFAULT_REPLICATION)
            },
            block_size: if is_dir { 0 } else { DEFAULT_BLOCK_SIZE },
            modification_time: overrides
                .modification_time
                .unwrap_or_else(|| millis(meta.modified())),
            access_time: overrides.access_time.unwrap_or_else(|| millis(meta.accessed())),
        }
    }

    fn update_meta(&self, local: &Path, update: impl FnOnce(&mut PathMeta)) {
        let mut table = self.metadata.write();
        update(table.entry(local.to_path_buf()).or_default());
    }

    fn forget_meta(&self, local: &Path) {
        self.metadata.write().retain(|path, _| !path.starts_with(local));
    }
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    fn authority(&self) -> &str {
        &self.authority
    }

    fn user(&self) -> &str {
        &self.user
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn open(&self, path: &str, offset: u64, len: Option<u64>) -> Result<Vec<u8>, ClusterError> {
        let local = self.resolve(path)?;
        let meta = self.metadata_of(path, &local).await?;
        if meta.is_dir() {
            return Err(ClusterError::InvalidPath(format!("{path} is a directory")));
        }
        let data = tokio::fs::read(&local).await?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
        let end = match len {
            Some(len) => start.saturating_add(usize::try_from(len).unwrap_or(usize::MAX)).min(data.len()),
            None => data.len(),
        };
        Ok(data[start..end].to_vec())
    }

    async fn create(
        &self,
        path: &str,
        data: &[u8],
        overwrite: bool,
        permission: Option<u16>,
    ) -> Result<(), ClusterError> {
        let local = self.resolve(path)?;
        if let Ok(meta) = tokio::fs::metadata(&local).await {
            if meta.is_dir() || !overwrite {
                return Err(ClusterError::AlreadyExists(path.to_string()));
            }
        }
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&local, data).await?;

        let user = self.user.clone();
        self.update_meta(&local, |m| {
            *m = PathMeta {
                owner: Some(user),
                permission,
                ..PathMeta::default()
            };
        });
        Ok(())
    }

    async fn append(&self, path: &str, data: &[u8]) -> Result<(), ClusterError> {
        let local = self.resolve(path)?;
        let meta = self.metadata_of(path, &local).await?;
        if meta.is_dir() {
            return Err(ClusterError::InvalidPath(format!("{path} is a directory")));
        }
        let mut file = tokio::fs::OpenOptions::new().append(true).open(&local).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<bool, ClusterError> {
        let source = self.resolve(from)?;
        let target = self.resolve(to)?;
        if source == self.base
            || tokio::fs::metadata(&source).await.is_err()
            || tokio::fs::metadata(&target).await.is_ok()
        {
            return Ok(false);
        }
        let parent_is_dir = match target.parent() {
            Some(parent) => tokio::fs::metadata(parent)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false),
            None => false,
        };
        if !parent_is_dir {
            return Ok(false);
        }
        tokio::fs::rename(&source, &target).await?;

        let mut table = self.metadata.write();
        let moved: Vec<(PathBuf, PathMeta)> = table
            .iter()
            .filter(|(path, _)| path.starts_with(&source))
            .map(|(path, meta)| (path.clone(), meta.clone()))
            .collect();
        for (old, meta) in moved {
            table.remove(&old);
            if let Ok(rest) = old.strip_prefix(&source) {
                table.insert(target.join(rest), meta);
            }
        }
        Ok(true)
    }

    async fn delete(&self, path: &str, recursive: bool) -> Result<bool, ClusterError> {
        let local = self.resolve(path)?;
        if local == self.base {
            return Err(ClusterError::PermissionDenied("cannot delete the root".to_string()));
        }
        let Ok(meta) = tokio::fs::metadata(&local).await else {
            return Ok(false);
        };
        if meta.is_dir() {
            if recursive {
                tokio::fs::remove_dir_all(&local).await?;
            } else {
                let mut entries = tokio::fs::read_dir(&local).await?;
                if entries.next_entry().await?.is_some() {
                    return Err(ClusterError::InvalidPath(format!("{path} is a non-empty directory")));
                }
                tokio::fs::remove_dir(&local).await?;
            }
        } else {
            tokio::fs::remove_file(&local).await?;
        }
        self.forget_meta(&local);
        Ok(true)
    }

    async fn mkdirs(&self, path: &str, permission: Option<u16>) -> Result<bool, ClusterError> {
        let local = self.resolve(path)?;
        if let Ok(meta) = tokio::fs::metadata(&local).await {
            if !meta.is_dir() {
                return Err(ClusterError::AlreadyExists(path.to_string()));
            }
        }
        tokio::fs::create_dir_all(&local).await?;
        if let Some(permission) = permission {
            self.update_meta(&local, |m| m.permission = Some(permission));
        }
        Ok(true)
    }

    async fn list_status(&self, path: &str) -> Result<Vec<FileStatus>, ClusterError> {
        let local = self.resolve(path)?;
        let meta = self.metadata_of(path, &local).await?;
        if !meta.is_dir() {
            return Ok(vec![self.status_of(&local, &meta)]);
        }

        let mut statuses = Vec::new();
        let mut entries = tokio::fs::read_dir(&local).await?;
        while let Some(entry) = entries.next_entry().await? {
            let entry_meta = entry.metadata().await?;
            statuses.push(self.status_of(&entry.path(), &entry_meta));
        }
        statuses.sort_by(|a, b| a.path_suffix.cmp(&b.path_suffix));
        Ok(statuses)
    }

    async fn file_status(&self, path: &str) -> Result<FileStatus, ClusterError> {
        let local = self.resolve(path)?;
        let meta = self.metadata_of(path, &local).await?;
        Ok(self.status_of(&local, &meta))
    }

    async fn set_permission(&self, path: &str, permission: u16) -> Result<(), ClusterError> {
        let local = self.resolve(path)?;
        self.metadata_of(path, &local).await?;
        self.update_meta(&local, |m| m.permission = Some(permission & 0o7777));
        Ok(())
    }

    async fn set_owner(
        &self,
        path: &str,
        owner: Option<&str>,
        group: Option<&str>,
    ) -> Result<(), ClusterError> {
        let local = self.resolve(path)?;
        self.metadata_of(path, &local).await?;
        self.update_meta(&local, |m| {
            if let Some(owner) = owner {
                m.owner = Some(owner.to_string());
            }
            if let Some(group) = group {
                m.group = Some(group.to_string());
            }
        });
        Ok(())
    }

    async fn set_times(
        &self,
        path: &str,
        modification_time: Option<i64>,
        access_time: Option<i64>,
    ) -> Result<(), ClusterError> {
        let local = self.resolve(path)?;
        self.metadata_of(path, &local).await?;
        self.update_meta(&local, |m| {
            if modification_time.is_some() {
                m.modification_time = modification_time;
            }
            if access_time.is_some() {
                m.access_time = access_time;
            }
        });
        Ok(())
    }

    async fn set_replication(&self, path: &str, replication: u16) -> Result<bool, ClusterError> {
        let local = self.resolve(path)?;
        let meta = self.metadata_of(path, &local).await?;
        if meta.is_dir() {
            return Ok(false);
        }
        self.update_meta(&local, |m| m.replication = Some(replication));
        Ok(true)
    }

    async fn close(&self) -> Result<(), ClusterError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(ClusterError::Closed);
        }
        self.close_count.fetch_add(1, Ordering::SeqCst);
        debug!(authority = %self.authority, user = %self.user, "Closed local storage handle");
        Ok(())
    }
}

pub struct LocalComputeClient {
    authority: String,
    user: String,
    closed: AtomicBool,
    close_count: Arc<AtomicUsize>,
}

#[async_trait]
impl ComputeClient for LocalComputeClient {
    fn authority(&self) -> &str {
        &self.authority
    }

    fn user(&self) -> &str {
        &self.user
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn cluster_status(&self) -> Result<ComputeStatus, ClusterError> {
        if self.is_closed() {
            return Err(ClusterError::Closed);
        }
        Ok(ComputeStatus {
            authority: self.authority.clone(),
            active_nodes: 1,
            running_jobs: 0,
        })
    }

    async fn close(&self) -> Result<(), ClusterError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(ClusterError::Closed);
        }
        self.close_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
