// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Execution Gateway
//!
//! Privileged, impersonated access to the backing cluster. Every call
//! validates the target locator against an allow-list, opens a fresh handle
//! as the effective user, runs an executor against it under a timer, and
//! closes the handle exactly once whatever the executor did.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Secure per-request resource broker
//! - **Integration:** `ClusterConnector` → `ExecutionGateway` → REST commands
//!
//! # Configuration (`<name>.gateway.`)
//!
//! | key | default |
//! |-----|---------|
//! | `authentication.type` | `simple` (or `kerberos`) |
//! | `authentication.kerberos.keytab` | `<home>/<name>.keytab` |
//! | `authentication.kerberos.principal` | `<name>/localhost@LOCALHOST` |
//! | `storage.allowlist` | `*` |
//! | `compute.allowlist` | `*` |
//! | `conf:<key>` | default cluster configuration entries |

use crate::application::container::ServiceContainer;
use crate::application::instrumentation::{InstrumentationService, Variable};
use crate::domain::cluster::{
    authority_of, ClusterConnector, ClusterError, ComputeClient, FileSystem, COMPUTE_URI,
    STORAGE_URI,
};
use crate::domain::config::Configuration;
use crate::domain::error::ErrorKind;
use crate::domain::impersonation::{run_as, UserContext};
use crate::domain::service::{ServiceContract, ServiceError, ServiceId};
use crate::application::proxy_user::AccessControlError;
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Instrumentation group of every gateway timer and variable.
pub const INSTRUMENTATION_GROUP: &str = "gateway";

/// Variable and sampler tracking outstanding unmanaged handles.
pub const UNMANAGED_FS: &str = "unmanaged.fs";

const UNMANAGED_SAMPLER_SIZE: usize = 60;

const AUTH_TYPE: &str = "authentication.type";
const KEYTAB: &str = "authentication.kerberos.keytab";
const PRINCIPAL: &str = "authentication.kerberos.principal";
const STORAGE_ALLOWLIST: &str = "storage.allowlist";
const COMPUTE_ALLOWLIST: &str = "compute.allowlist";
const CLUSTER_CONF_PREFIX: &str = "conf:";
const WILDCARD: &str = "*";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway is not initialized")]
    NotInitialized,

    #[error("effective user must not be empty")]
    EmptyUser,

    #[error("missing cluster locator [{0}]")]
    MissingLocator(&'static str),

    #[error(transparent)]
    InvalidLocator(ClusterError),

    #[error("{resource} authority [{authority}] is not in the allow-list")]
    NotAllowed {
        resource: &'static str,
        authority: String,
    },

    #[error("executor [{executor}] failed: {source}")]
    Execution {
        executor: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("executor [{executor}] panicked")]
    ExecutorPanicked { executor: String },
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::NotInitialized => ErrorKind::State,
            GatewayError::EmptyUser
            | GatewayError::MissingLocator(_)
            | GatewayError::InvalidLocator(_) => ErrorKind::Configuration,
            GatewayError::NotAllowed { .. } => ErrorKind::Authorization,
            GatewayError::Execution { source, .. } => {
                let denied = matches!(
                    source.downcast_ref::<ClusterError>(),
                    Some(ClusterError::PermissionDenied(_))
                ) || source.downcast_ref::<AccessControlError>().is_some();
                if denied {
                    ErrorKind::Authorization
                } else {
                    ErrorKind::Execution
                }
            }
            GatewayError::ExecutorPanicked { .. } => ErrorKind::Execution,
        }
    }

    /// Wrap a failure raised during a gateway call. Errors that already are
    /// gateway errors pass through unchanged.
    fn wrap(executor: &str, err: anyhow::Error) -> Self {
        match err.downcast::<GatewayError>() {
            Ok(own) => own,
            Err(source) => GatewayError::Execution {
                executor: executor.to_string(),
                source,
            },
        }
    }
}

/// Authorities a resource class may target. Empty or `*` means any.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AllowList {
    authorities: Option<HashSet<String>>,
}

impl AllowList {
    pub fn unrestricted() -> Self {
        Self { authorities: None }
    }

    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Self {
        let entries: Vec<&str> = entries
            .iter()
            .map(|e| e.as_ref().trim())
            .filter(|e| !e.is_empty())
            .collect();
        if entries.is_empty() || entries.contains(&WILDCARD) {
            return Self::unrestricted();
        }
        Self {
            authorities: Some(entries.into_iter().map(str::to_ascii_lowercase).collect()),
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        self.authorities.is_none()
    }

    pub fn permits(&self, authority: &str) -> bool {
        match &self.authorities {
            None => true,
            Some(allowed) => allowed.contains(&authority.to_ascii_lowercase()),
        }
    }
}

fn short_type_name(full: &str) -> &str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Work run against a storage handle.
#[async_trait]
pub trait FileSystemExecutor: Send + Sync {
    type Output: Send;

    /// Timer name the execution is recorded under.
    fn name(&self) -> &str {
        short_type_name(std::any::type_name::<Self>())
    }

    async fn execute(&self, fs: &dyn FileSystem) -> anyhow::Result<Self::Output>;
}

/// Work run against a compute handle paired with a storage handle.
#[async_trait]
pub trait ComputeExecutor: Send + Sync {
    type Output: Send;

    fn name(&self) -> &str {
        short_type_name(std::any::type_name::<Self>())
    }

    async fn execute(&self, compute: &dyn ComputeClient, fs: &dyn FileSystem) -> anyhow::Result<Self::Output>;
}

/// Storage handle owned by the caller rather than by a gateway call.
///
/// Not `Clone`; give it back through [`ExecutionGateway::release_resource`]
/// (normally via the request boundary) to close it. Holds the outstanding
/// gauge it was counted in.
pub struct UnmanagedHandle {
    fs: Arc<dyn FileSystem>,
    outstanding: Arc<AtomicUsize>,
}

impl UnmanagedHandle {
    pub fn fs(&self) -> &dyn FileSystem {
        self.fs.as_ref()
    }

    /// Decrement the gauge this handle was counted in, then close it.
    pub(crate) async fn release(self) -> Result<(), GatewayError> {
        let decremented = self
            .outstanding
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if decremented.is_err() {
            warn!("Released a handle while no unmanaged handle was outstanding");
        }
        self.fs
            .close()
            .await
            .map_err(|e| GatewayError::wrap("release_resource", e.into()))
    }
}

impl fmt::Debug for UnmanagedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnmanagedHandle")
            .field("authority", &self.fs.authority())
            .field("user", &self.fs.user())
            .field("closed", &self.fs.is_closed())
            .finish()
    }
}

/// Closes the handles of one gateway call. Dropping an armed guard (the call
/// future was cancelled) closes them on a background task.
struct HandleGuard {
    storage: Option<Arc<dyn FileSystem>>,
    compute: Option<Arc<dyn ComputeClient>>,
}

impl HandleGuard {
    fn new() -> Self {
        Self {
            storage: None,
            compute: None,
        }
    }

    async fn close(mut self) -> Result<(), ClusterError> {
        close_pair(self.compute.take(), self.storage.take()).await
    }
}

async fn close_pair(
    compute: Option<Arc<dyn ComputeClient>>,
    storage: Option<Arc<dyn FileSystem>>,
) -> Result<(), ClusterError> {
    let mut result = Ok(());
    if let Some(compute) = compute {
        result = compute.close().await;
    }
    if let Some(fs) = storage {
        if let Err(e) = fs.close().await {
            match result {
                Ok(()) => result = Err(e),
                Err(_) => warn!(error = %e, "Storage handle failed to close"),
            }
        }
    }
    result
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        let (compute, storage) = (self.compute.take(), self.storage.take());
        if compute.is_none() && storage.is_none() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                debug!("Gateway call cancelled, closing handles in background");
                runtime.spawn(async move {
                    if let Err(e) = close_pair(compute, storage).await {
                        warn!(error = %e, "Handle of a cancelled call failed to close");
                    }
                });
            }
            Err(_) => warn!("Gateway call dropped outside a runtime, handles left open"),
        }
    }
}

struct GatewayState {
    login_user: String,
    defaults: Configuration,
    storage_allowlist: AllowList,
    compute_allowlist: AllowList,
    instrumentation: Arc<InstrumentationService>,
}

impl GatewayState {
    fn merged(&self, conf: &Configuration) -> Configuration {
        let mut merged = self.defaults.clone();
        merged.merge_from(conf);
        merged
    }
}

pub struct ExecutionGateway {
    connector: Arc<dyn ClusterConnector>,
    state: RwLock<Option<Arc<GatewayState>>>,
    unmanaged: Arc<AtomicUsize>,
}

impl ExecutionGateway {
    pub const SERVICE_ID: ServiceId = ServiceId::new("gateway");

    pub fn new(connector: Arc<dyn ClusterConnector>) -> Self {
        Self {
            connector,
            state: RwLock::new(None),
            unmanaged: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn state(&self) -> Result<Arc<GatewayState>, GatewayError> {
        self.state.read().clone().ok_or(GatewayError::NotInitialized)
    }

    /// Identity the gateway itself runs as.
    pub fn login_user(&self) -> Result<String, GatewayError> {
        Ok(self.state()?.login_user.clone())
    }

    /// Copy of the default cluster configuration (`conf:` entries).
    pub fn default_configuration(&self) -> Result<Configuration, GatewayError> {
        Ok(self.state()?.defaults.clone())
    }

    /// Outstanding unmanaged handles.
    pub fn unmanaged_count(&self) -> usize {
        self.unmanaged.load(Ordering::SeqCst)
    }

    fn authorize(
        conf: &Configuration,
        key: &'static str,
        resource: &'static str,
        allowlist: &AllowList,
    ) -> Result<(), GatewayError> {
        let locator = conf
            .get_trimmed(key)
            .ok_or(GatewayError::MissingLocator(key))?;
        if allowlist.is_unrestricted() {
            return Ok(());
        }
        let authority = authority_of(&locator).map_err(GatewayError::InvalidLocator)?;
        if allowlist.permits(&authority) {
            Ok(())
        } else {
            Err(GatewayError::NotAllowed { resource, authority })
        }
    }

    fn check_user(user: &str) -> Result<(), GatewayError> {
        if user.trim().is_empty() {
            Err(GatewayError::EmptyUser)
        } else {
            Ok(())
        }
    }

    /// Run `executor` as `user` against a fresh handle to the storage
    /// cluster named by `conf[storage.uri]`.
    pub async fn execute<E>(&self, user: &str, conf: &Configuration, executor: &E) -> Result<E::Output, GatewayError>
    where
        E: FileSystemExecutor + ?Sized,
    {
        let state = self.state()?;
        Self::authorize(conf, STORAGE_URI, "storage", &state.storage_allowlist)?;
        Self::check_user(user)?;

        let name = executor.name().to_string();
        let merged = state.merged(conf);
        debug!(user, executor = %name, "Executing against storage cluster");

        let ctx = UserContext::new(user, state.login_user.as_str());
        run_as(ctx, async {
            let mut guard = HandleGuard::new();
            let fs = self
                .connector
                .connect_storage(&merged)
                .await
                .map_err(|e| GatewayError::wrap(&name, e.into()))?;
            guard.storage = Some(Arc::clone(&fs));

            let outcome = match self.connector.check_storage(fs.as_ref()).await {
                Ok(()) => {
                    let instrumentation = &state.instrumentation;
                    let mut cron = instrumentation.create_cron();
                    cron.start();
                    let result = AssertUnwindSafe(executor.execute(fs.as_ref()))
                        .catch_unwind()
                        .await;
                    cron.stop();
                    instrumentation.add_cron(INSTRUMENTATION_GROUP, &name, &cron);
                    Self::settle(&name, result)
                }
                Err(e) => Err(GatewayError::wrap(&name, e.into())),
            };

            Self::finish(&name, outcome, guard.close().await)
        })
        .await
    }

    /// Paired variant: `conf[compute.uri]` and `conf[storage.uri]` must both
    /// pass their allow-lists; both handles are opened, checked, timed as one
    /// span and closed together.
    pub async fn execute_with_compute<E>(
        &self,
        user: &str,
        conf: &Configuration,
        executor: &E,
    ) -> Result<E::Output, GatewayError>
    where
        E: ComputeExecutor + ?Sized,
    {
        let state = self.state()?;
        Self::authorize(conf, COMPUTE_URI, "compute", &state.compute_allowlist)?;
        Self::authorize(conf, STORAGE_URI, "storage", &state.storage_allowlist)?;
        Self::check_user(user)?;

        let name = executor.name().to_string();
        let merged = state.merged(conf);
        debug!(user, executor = %name, "Executing against compute and storage clusters");

        let ctx = UserContext::new(user, state.login_user.as_str());
        run_as(ctx, async {
            let mut guard = HandleGuard::new();
            let compute = self
                .connector
                .connect_compute(&merged)
                .await
                .map_err(|e| GatewayError::wrap(&name, e.into()))?;
            guard.compute = Some(Arc::clone(&compute));

            let fs = match self.connector.connect_storage(&merged).await {
                Ok(fs) => fs,
                Err(e) => {
                    let err = GatewayError::wrap(&name, e.into());
                    return Self::finish(&name, Err(err), guard.close().await);
                }
            };
            guard.storage = Some(Arc::clone(&fs));

            let checked = match self.connector.check_compute(compute.as_ref()).await {
                Ok(()) => self.connector.check_storage(fs.as_ref()).await,
                Err(e) => Err(e),
            };

            let outcome = match checked {
                Ok(()) => {
                    let instrumentation = &state.instrumentation;
                    let mut cron = instrumentation.create_cron();
                    cron.start();
                    let result = AssertUnwindSafe(executor.execute(compute.as_ref(), fs.as_ref()))
                        .catch_unwind()
                        .await;
                    cron.stop();
                    instrumentation.add_cron(INSTRUMENTATION_GROUP, &name, &cron);
                    Self::settle(&name, result)
                }
                Err(e) => Err(GatewayError::wrap(&name, e.into())),
            };

            Self::finish(&name, outcome, guard.close().await)
        })
        .await
    }

    fn settle<T>(
        name: &str,
        result: Result<anyhow::Result<T>, Box<dyn Any + Send>>,
    ) -> Result<T, GatewayError> {
        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(GatewayError::wrap(name, e)),
            Err(_) => {
                warn!(executor = name, "Executor panicked");
                Err(GatewayError::ExecutorPanicked {
                    executor: name.to_string(),
                })
            }
        }
    }

    /// A close failure fails an otherwise successful call; after a failed
    /// call it is logged and the original error kept.
    fn finish<T>(
        name: &str,
        outcome: Result<T, GatewayError>,
        closed: Result<(), ClusterError>,
    ) -> Result<T, GatewayError> {
        match (outcome, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(GatewayError::wrap(name, e.into())),
            (Err(err), Err(e)) => {
                warn!(executor = name, error = %e, "Handle failed to close after failed call");
                Err(err)
            }
            (Err(err), Ok(())) => Err(err),
        }
    }

    /// Open a storage handle as `user` and hand it to the caller. Counts
    /// towards the outstanding gauge until released.
    pub async fn create_unmanaged_resource(
        &self,
        user: &str,
        conf: &Configuration,
    ) -> Result<UnmanagedHandle, GatewayError> {
        let state = self.state()?;
        Self::authorize(conf, STORAGE_URI, "storage", &state.storage_allowlist)?;
        Self::check_user(user)?;

        let merged = state.merged(conf);
        let ctx = UserContext::new(user, state.login_user.as_str());
        let fs = run_as(ctx, self.connector.connect_storage(&merged))
            .await
            .map_err(|e| GatewayError::wrap("create_unmanaged_resource", e.into()))?;

        let outstanding = self.unmanaged.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(user, outstanding, "Unmanaged handle created");
        Ok(UnmanagedHandle {
            fs,
            outstanding: Arc::clone(&self.unmanaged),
        })
    }

    /// Close an unmanaged handle and decrement the outstanding gauge.
    pub async fn release_resource(&self, handle: UnmanagedHandle) -> Result<(), GatewayError> {
        handle.release().await
    }

    fn kerberos_login(config: &Configuration, container: &ServiceContainer) -> Result<String, ServiceError> {
        let name = container.name();
        let default_keytab = container
            .dirs()
            .home
            .join(format!("{name}.keytab"))
            .display()
            .to_string();
        let default_principal = format!("{name}/localhost@LOCALHOST");

        let keytab = match config.get(KEYTAB) {
            Some(v) => v.trim().to_string(),
            None => default_keytab,
        };
        if keytab.is_empty() {
            return Err(ServiceError::MissingProperty(container.prefixed_name(&format!("gateway.{KEYTAB}"))));
        }
        let principal = match config.get(PRINCIPAL) {
            Some(v) => v.trim().to_string(),
            None => default_principal,
        };
        if principal.is_empty() {
            return Err(ServiceError::MissingProperty(container.prefixed_name(&format!("gateway.{PRINCIPAL}"))));
        }

        let login_failed = |reason: String| ServiceError::KerberosLogin {
            principal: principal.clone(),
            keytab: keytab.clone(),
            reason,
        };
        let metadata = std::fs::metadata(&keytab).map_err(|e| login_failed(e.to_string()))?;
        if !metadata.is_file() {
            return Err(login_failed("keytab is not a file".to_string()));
        }
        std::fs::File::open(&keytab).map_err(|e| login_failed(e.to_string()))?;

        let short_name = principal
            .split(['/', '@'])
            .next()
            .unwrap_or(principal.as_str())
            .to_string();
        info!(principal = %principal, keytab = %keytab, "Logged in from keytab");
        Ok(short_name)
    }
}

impl ServiceContract for ExecutionGateway {
    fn identity(&self) -> ServiceId {
        Self::SERVICE_ID
    }

    fn dependencies(&self) -> Vec<ServiceId> {
        vec![InstrumentationService::SERVICE_ID]
    }

    fn init(&self, container: &ServiceContainer) -> Result<(), ServiceError> {
        let config = container.service_config(Self::SERVICE_ID);

        let auth_type = config.get_or(AUTH_TYPE, "simple").to_ascii_lowercase();
        let login_user = match auth_type.as_str() {
            "simple" => container.name().to_string(),
            "kerberos" => Self::kerberos_login(&config, container)?,
            other => {
                return Err(ServiceError::invalid(
                    container.prefixed_name(&format!("gateway.{AUTH_TYPE}")),
                    other,
                    "expected simple or kerberos",
                ))
            }
        };

        let defaults = config.scoped(CLUSTER_CONF_PREFIX);
        let storage_allowlist = AllowList::parse(&config.get_list(STORAGE_ALLOWLIST));
        let compute_allowlist = AllowList::parse(&config.get_list(COMPUTE_ALLOWLIST));
        let instrumentation =
            container.require::<InstrumentationService>(InstrumentationService::SERVICE_ID)?;

        info!(
            auth = %auth_type,
            login_user = %login_user,
            storage_unrestricted = storage_allowlist.is_unrestricted(),
            compute_unrestricted = compute_allowlist.is_unrestricted(),
            "Execution gateway initialized"
        );

        *self.state.write() = Some(Arc::new(GatewayState {
            login_user,
            defaults,
            storage_allowlist,
            compute_allowlist,
            instrumentation,
        }));
        Ok(())
    }

    fn post_init(&self, _container: &ServiceContainer) -> Result<(), ServiceError> {
        let state = self.state().map_err(|e| ServiceError::Other(e.into()))?;
        let counter = Arc::clone(&self.unmanaged);
        let variable: Variable = Arc::new(move || counter.load(Ordering::SeqCst) as i64);
        state
            .instrumentation
            .add_variable(INSTRUMENTATION_GROUP, UNMANAGED_FS, Arc::clone(&variable));
        state.instrumentation.add_sampler(
            INSTRUMENTATION_GROUP,
            UNMANAGED_FS,
            UNMANAGED_SAMPLER_SIZE,
            variable,
        );
        Ok(())
    }

    fn destroy(&self) -> Result<(), ServiceError> {
        let outstanding = self.unmanaged_count();
        if outstanding > 0 {
            warn!(outstanding, "Execution gateway destroyed with unmanaged handles outstanding");
        }
        *self.state.write() = None;
        Ok(())
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
