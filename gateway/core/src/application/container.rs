// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Service Container
//!
//! Lifecycle kernel of the gateway. Owns the status state machine, the
//! configuration, and the registry of live services keyed by identity.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Dependency-ordered init, reverse-order destroy, status
//!   broadcast, hot swap
//!
//! # Boot sequence
//!
//! 1. `UNDEF → BOOTING`
//! 2. verify home, temp, log, config directories
//! 3. load configuration (defaults, site file, environment)
//! 4. build the service list from `<name>.services` then `<name>.services.ext`
//!    (a later entry with the same identity replaces the earlier one in place)
//! 5. per service: dependency check, `init`, register
//! 6. `post_init` on every registered service
//! 7. switch to `<name>.startup.status` (default `NORMAL`)
//!
//! Any failure in 2–6 destroys the already registered services in reverse
//! order and leaves the container in `SHUTDOWN`.
//!
//! Lifecycle calls (`init`, `set_status`, `set_service`, `destroy`) must be
//! serialized by the caller. Lookups are safe from any task.

use crate::application::catalog::ServiceCatalog;
use crate::domain::config::Configuration;
use crate::domain::error::ErrorKind;
use crate::domain::service::{ServiceContract, ServiceError, ServiceId};
use crate::domain::status::Status;
use crate::infrastructure::config_loader::{self, ConfigError};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("invalid container name [{0}]")]
    InvalidName(String),

    #[error("{role} directory [{path}] must be an absolute path")]
    RelativeDirectory { role: &'static str, path: PathBuf },

    #[error("{role} directory [{path}] does not exist")]
    DirectoryNotFound { role: &'static str, path: PathBuf },

    #[error("{role} directory [{path}] is not a directory")]
    NotADirectory { role: &'static str, path: PathBuf },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid startup status [{value}]: {reason}")]
    InvalidStartupStatus { value: String, reason: String },

    #[error("unknown service [{0}]")]
    UnknownService(String),

    #[error("could not instantiate service [{name}]: {source}")]
    Instantiation {
        name: String,
        #[source]
        source: ServiceError,
    },

    #[error("service [{name}] is declared as [{declared}] but reports identity [{actual}]")]
    IdentityMismatch {
        name: String,
        declared: ServiceId,
        actual: ServiceId,
    },

    #[error("service [{service}] depends on [{missing}], which is not registered")]
    MissingDependency { service: ServiceId, missing: ServiceId },

    #[error("service [{service}] failed to initialize: {source}")]
    Init {
        service: ServiceId,
        #[source]
        source: ServiceError,
    },

    #[error("service [{service}] failed in post-init: {source}")]
    PostInit {
        service: ServiceId,
        #[source]
        source: ServiceError,
    },

    #[error("status [{0}] cannot be set")]
    StatusNotSettable(Status),

    #[error("service [{service}] failed on status change to [{status}], container destroyed: {source}")]
    StatusTransition {
        service: ServiceId,
        status: Status,
        #[source]
        source: ServiceError,
    },

    #[error("operation [{operation}] not allowed in status [{status}]")]
    InvalidState { operation: &'static str, status: Status },

    #[error("could not replace service [{name}], container destroyed: {source}")]
    ServiceSwap {
        name: String,
        #[source]
        source: Box<ContainerError>,
    },
}

impl ContainerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ContainerError::InvalidName(_)
            | ContainerError::RelativeDirectory { .. }
            | ContainerError::DirectoryNotFound { .. }
            | ContainerError::NotADirectory { .. }
            | ContainerError::Config(_)
            | ContainerError::InvalidStartupStatus { .. } => ErrorKind::Configuration,
            ContainerError::UnknownService(_)
            | ContainerError::Instantiation { .. }
            | ContainerError::IdentityMismatch { .. }
            | ContainerError::Init { .. }
            | ContainerError::PostInit { .. } => ErrorKind::ServiceLoad,
            ContainerError::MissingDependency { .. } => ErrorKind::Dependency,
            ContainerError::StatusTransition { .. } => ErrorKind::StatusTransition,
            ContainerError::StatusNotSettable(_) | ContainerError::InvalidState { .. } => {
                ErrorKind::State
            }
            ContainerError::ServiceSwap { source, .. } => source.kind(),
        }
    }
}

/// Directories the container requires at boot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerDirs {
    pub home: PathBuf,
    pub config: PathBuf,
    pub log: PathBuf,
    pub temp: PathBuf,
}

impl ContainerDirs {
    /// `conf/`, `log/` and `temp/` under `home`.
    pub fn under_home(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            config: home.join("conf"),
            log: home.join("log"),
            temp: home.join("temp"),
            home,
        }
    }

    /// Verification order used at boot.
    fn in_check_order(&self) -> [(&'static str, &Path); 4] {
        [
            ("home", self.home.as_path()),
            ("temp", self.temp.as_path()),
            ("log", self.log.as_path()),
            ("config", self.config.as_path()),
        ]
    }
}

pub struct ContainerBuilder {
    name: String,
    dirs: ContainerDirs,
    catalog: ServiceCatalog,
    defaults: Configuration,
    preset: Option<Configuration>,
    environment: Option<Vec<(String, String)>>,
}

impl ContainerBuilder {
    pub fn new(name: impl Into<String>, dirs: ContainerDirs) -> Self {
        Self {
            name: name.into(),
            dirs,
            catalog: ServiceCatalog::new(),
            defaults: Configuration::new(),
            preset: None,
            environment: None,
        }
    }

    pub fn catalog(mut self, catalog: ServiceCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Lowest-precedence configuration layer.
    pub fn defaults(mut self, defaults: Configuration) -> Self {
        self.defaults = defaults;
        self
    }

    /// Use `config` instead of reading `<config-dir>/<name>-site.yaml`.
    pub fn config(mut self, config: Configuration) -> Self {
        self.preset = Some(config);
        self
    }

    /// Override variables instead of reading the process environment.
    pub fn environment<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.environment = Some(
            vars.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    pub fn build(self) -> Result<ServiceContainer, ContainerError> {
        let name = self.name.trim().to_ascii_lowercase();
        if name.is_empty() {
            return Err(ContainerError::InvalidName(self.name));
        }
        for (role, path) in self.dirs.in_check_order() {
            if !path.is_absolute() {
                return Err(ContainerError::RelativeDirectory {
                    role,
                    path: path.to_path_buf(),
                });
            }
        }

        Ok(ServiceContainer {
            inner: Arc::new(ContainerInner {
                name,
                dirs: self.dirs,
                catalog: self.catalog,
                defaults: self.defaults,
                preset: self.preset,
                environment: self.environment,
                status: RwLock::new(Status::Undef),
                config: RwLock::new(Configuration::new()),
                services: RwLock::new(Vec::new()),
            }),
        })
    }
}

struct Registration {
    id: ServiceId,
    service: Arc<dyn ServiceContract>,
}

struct ContainerInner {
    name: String,
    dirs: ContainerDirs,
    catalog: ServiceCatalog,
    defaults: Configuration,
    preset: Option<Configuration>,
    environment: Option<Vec<(String, String)>>,
    status: RwLock<Status>,
    config: RwLock<Configuration>,
    services: RwLock<Vec<Registration>>,
}

/// Shared handle to the container; cheap to clone.
#[derive(Clone)]
pub struct ServiceContainer {
    inner: Arc<ContainerInner>,
}

impl std::fmt::Debug for ServiceContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContainer")
            .field("name", &self.inner.name)
            .field("status", &self.status())
            .field("services", &self.service_ids())
            .finish()
    }
}

impl ServiceContainer {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// `<name>.<key>`
    pub fn prefixed_name(&self, key: &str) -> String {
        format!("{}.{}", self.inner.name, key)
    }

    pub fn dirs(&self) -> &ContainerDirs {
        &self.inner.dirs
    }

    pub fn status(&self) -> Status {
        *self.inner.status.read()
    }

    /// Snapshot of the loaded configuration.
    pub fn config(&self) -> Configuration {
        self.inner.config.read().clone()
    }

    /// Configuration of one service: keys under `<name>.<service>.`, prefix
    /// stripped, values resolved.
    pub fn service_config(&self, id: ServiceId) -> Configuration {
        let prefix = format!("{}.{}.", self.inner.name, id);
        self.inner.config.read().scoped(&prefix)
    }

    /// Registered identities in initialization order.
    pub fn service_ids(&self) -> Vec<ServiceId> {
        self.inner.services.read().iter().map(|r| r.id).collect()
    }

    /// Boot the container.
    pub fn init(&self) -> Result<(), ContainerError> {
        {
            let mut status = self.inner.status.write();
            if *status != Status::Undef {
                return Err(ContainerError::InvalidState {
                    operation: "init",
                    status: *status,
                });
            }
            *status = Status::Booting;
        }

        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());
        info!(
            name = %self.inner.name,
            version = env!("CARGO_PKG_VERSION"),
            host = %host,
            home = %self.inner.dirs.home.display(),
            config = %self.inner.dirs.config.display(),
            log = %self.inner.dirs.log.display(),
            temp = %self.inner.dirs.temp.display(),
            "Starting service container"
        );

        let startup = match self.boot() {
            Ok(startup) => startup,
            Err(e) => {
                error!(name = %self.inner.name, error = %e, "Container boot failed");
                self.destroy_services();
                *self.inner.status.write() = Status::Shutdown;
                return Err(e);
            }
        };

        self.set_status(startup)?;
        info!(name = %self.inner.name, status = %startup, "Service container started");
        Ok(())
    }

    fn boot(&self) -> Result<Status, ContainerError> {
        self.verify_dirs()?;

        let config = self.load_config()?;
        for (key, value) in config.masked() {
            debug!(key = %key, value = %value, "Configuration");
        }
        let startup = self.startup_status(&config)?;
        *self.inner.config.write() = config.clone();

        let services = self.load_services(&config)?;
        self.start_services(services)?;
        Ok(startup)
    }

    fn verify_dirs(&self) -> Result<(), ContainerError> {
        for (role, path) in self.inner.dirs.in_check_order() {
            if !path.exists() {
                return Err(ContainerError::DirectoryNotFound {
                    role,
                    path: path.to_path_buf(),
                });
            }
            if !path.is_dir() {
                return Err(ContainerError::NotADirectory {
                    role,
                    path: path.to_path_buf(),
                });
            }
        }
        Ok(())
    }

    fn load_config(&self) -> Result<Configuration, ContainerError> {
        let environment = match &self.inner.environment {
            Some(vars) => vars.clone(),
            None => std::env::vars().collect(),
        };
        let mut config = config_loader::load(
            &self.inner.name,
            &self.inner.dirs.config,
            &self.inner.defaults,
            self.inner.preset.as_ref(),
            &environment,
        )?;

        let dirs = &self.inner.dirs;
        config.inject_defaults(&Configuration::from_pairs([
            (self.prefixed_name("home.dir"), dirs.home.display().to_string()),
            (self.prefixed_name("config.dir"), dirs.config.display().to_string()),
            (self.prefixed_name("log.dir"), dirs.log.display().to_string()),
            (self.prefixed_name("temp.dir"), dirs.temp.display().to_string()),
        ]));
        Ok(config)
    }

    fn startup_status(&self, config: &Configuration) -> Result<Status, ContainerError> {
        let value = config.get_or(&self.prefixed_name("startup.status"), Status::Normal.as_str());
        let status: Status = value
            .parse()
            .map_err(|e: crate::domain::status::StatusParseError| {
                ContainerError::InvalidStartupStatus {
                    value: value.clone(),
                    reason: e.to_string(),
                }
            })?;
        if !status.is_settable() {
            return Err(ContainerError::InvalidStartupStatus {
                value,
                reason: "status is not settable".to_string(),
            });
        }
        Ok(status)
    }

    /// Instantiate the declared services. A later declaration of an identity
    /// replaces the earlier one at the earlier one's position.
    fn load_services(
        &self,
        config: &Configuration,
    ) -> Result<Vec<Arc<dyn ServiceContract>>, ContainerError> {
        let mut names = config.get_list(&self.prefixed_name("services"));
        names.extend(config.get_list(&self.prefixed_name("services.ext")));

        let mut ordered: Vec<Arc<dyn ServiceContract>> = Vec::with_capacity(names.len());
        for name in names {
            let service = self.inner.catalog.instantiate(&name)?;
            let id = service.identity();
            match ordered.iter().position(|s| s.identity() == id) {
                Some(index) => {
                    debug!(service = %id, name = %name, "Replacing earlier declaration");
                    ordered[index] = service;
                }
                None => ordered.push(service),
            }
        }
        Ok(ordered)
    }

    fn start_services(&self, services: Vec<Arc<dyn ServiceContract>>) -> Result<(), ContainerError> {
        for service in services {
            let id = service.identity();
            self.check_dependencies(service.as_ref())?;
            debug!(service = %id, "Initializing service");
            service
                .init(self)
                .map_err(|source| ContainerError::Init { service: id, source })?;
            self.inner.services.write().push(Registration { id, service });
        }

        for service in self.registered() {
            service.post_init(self).map_err(|source| ContainerError::PostInit {
                service: service.identity(),
                source,
            })?;
        }
        Ok(())
    }

    fn check_dependencies(&self, service: &dyn ServiceContract) -> Result<(), ContainerError> {
        let registered = self.service_ids();
        match service
            .dependencies()
            .into_iter()
            .find(|dep| !registered.contains(dep))
        {
            Some(missing) => Err(ContainerError::MissingDependency {
                service: service.identity(),
                missing,
            }),
            None => Ok(()),
        }
    }

    fn registered(&self) -> Vec<Arc<dyn ServiceContract>> {
        self.inner
            .services
            .read()
            .iter()
            .map(|r| Arc::clone(&r.service))
            .collect()
    }

    fn ensure_operational(&self) -> Result<Status, ContainerError> {
        let status = self.status();
        if status.is_operational() {
            Ok(status)
        } else {
            Err(ContainerError::InvalidState {
                operation: "lookup",
                status,
            })
        }
    }

    /// Implementation registered under `id`.
    pub fn get(&self, id: ServiceId) -> Result<Option<Arc<dyn ServiceContract>>, ContainerError> {
        self.ensure_operational()?;
        Ok(self
            .inner
            .services
            .read()
            .iter()
            .find(|r| r.id == id)
            .map(|r| Arc::clone(&r.service)))
    }

    /// Typed lookup; `None` if nothing is registered under `id` or the
    /// implementation is not a `T`.
    pub fn get_as<T: ServiceContract>(&self, id: ServiceId) -> Result<Option<Arc<T>>, ContainerError> {
        Ok(self
            .get(id)?
            .and_then(|service| service.as_any().downcast::<T>().ok()))
    }

    /// Typed lookup for use inside service hooks.
    pub fn require<T: ServiceContract>(&self, id: ServiceId) -> Result<Arc<T>, ServiceError> {
        self.get_as::<T>(id)
            .ok()
            .flatten()
            .ok_or(ServiceError::Unavailable(id))
    }

    /// Switch to `new` and notify every service, in registration order.
    ///
    /// A failing hook destroys the container.
    pub fn set_status(&self, new: Status) -> Result<(), ContainerError> {
        if !new.is_settable() {
            return Err(ContainerError::StatusNotSettable(new));
        }

        let old = {
            let mut status = self.inner.status.write();
            if *status == new {
                return Ok(());
            }
            if !status.is_operational() || *status == Status::ShuttingDown {
                return Err(ContainerError::InvalidState {
                    operation: "set_status",
                    status: *status,
                });
            }
            std::mem::replace(&mut *status, new)
        };
        info!(name = %self.inner.name, from = %old, to = %new, "Changing container status");

        for service in self.registered() {
            if let Err(source) = service.on_status_change(old, new) {
                let id = service.identity();
                error!(service = %id, status = %new, error = %source, "Status change rejected, destroying container");
                self.teardown();
                return Err(ContainerError::StatusTransition {
                    service: id,
                    status: new,
                    source,
                });
            }
        }
        Ok(())
    }

    /// Replace the implementation of the identity produced by catalog entry
    /// `name`. The previous implementation is destroyed before the new one
    /// is initialized. Any failure, instantiation included, destroys the
    /// container.
    pub fn set_service(&self, name: &str) -> Result<(), ContainerError> {
        let status = self.status();
        if !status.is_operational() || status == Status::ShuttingDown {
            return Err(ContainerError::InvalidState {
                operation: "set_service",
                status,
            });
        }
        if !self.inner.catalog.contains(name) {
            return Err(ContainerError::UnknownService(name.to_string()));
        }

        if let Err(source) = self.swap_service(name) {
            error!(name = %name, error = %source, "Service replacement failed, destroying container");
            self.teardown();
            return Err(ContainerError::ServiceSwap {
                name: name.to_string(),
                source: Box::new(source),
            });
        }
        Ok(())
    }

    fn swap_service(&self, name: &str) -> Result<(), ContainerError> {
        let service = self.inner.catalog.instantiate(name)?;
        let id = service.identity();

        // Unregistered before destroy: `destroy` runs at most once per instance.
        let (position, old) = {
            let mut services = self.inner.services.write();
            match services.iter().position(|r| r.id == id) {
                Some(index) => (Some(index), Some(services.remove(index))),
                None => (None, None),
            }
        };
        if let Some(old) = old {
            debug!(service = %id, "Destroying replaced service");
            if let Err(e) = old.service.destroy() {
                warn!(service = %id, error = %e, "Replaced service failed to destroy");
            }
        }

        self.check_dependencies(service.as_ref())?;
        service
            .init(self)
            .map_err(|source| ContainerError::Init { service: id, source })?;

        {
            let mut services = self.inner.services.write();
            let registration = Registration {
                id,
                service: Arc::clone(&service),
            };
            match position {
                Some(index) if index <= services.len() => services.insert(index, registration),
                _ => services.push(registration),
            }
        }

        service
            .post_init(self)
            .map_err(|source| ContainerError::PostInit { service: id, source })?;
        info!(service = %id, name = %name, "Service replaced");
        Ok(())
    }

    /// Destroy every service in reverse initialization order and stop.
    pub fn destroy(&self) -> Result<(), ContainerError> {
        {
            let mut status = self.inner.status.write();
            if !status.is_operational() || *status == Status::ShuttingDown {
                return Err(ContainerError::InvalidState {
                    operation: "destroy",
                    status: *status,
                });
            }
            *status = Status::ShuttingDown;
        }
        info!(name = %self.inner.name, "Shutting down service container");
        self.destroy_services();
        *self.inner.status.write() = Status::Shutdown;
        info!(name = %self.inner.name, "Service container stopped");
        Ok(())
    }

    fn teardown(&self) {
        *self.inner.status.write() = Status::ShuttingDown;
        self.destroy_services();
        *self.inner.status.write() = Status::Shutdown;
    }

    fn destroy_services(&self) {
        for service in self.registered().into_iter().rev() {
            let id = service.identity();
            debug!(service = %id, "Destroying service");
            if let Err(e) = service.destroy() {
                warn!(service = %id, error = %e, "Service failed to destroy");
            }
        }
        self.inner.services.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;
    use tempfile::TempDir;

    struct Noop(ServiceId);

    impl ServiceContract for Noop {
        fn identity(&self) -> ServiceId {
            self.0
        }

        fn init(&self, _container: &ServiceContainer) -> Result<(), ServiceError> {
            Ok(())
        }

        fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }
    }

    const NOOP: ServiceId = ServiceId::new("noop");

    fn layout() -> (TempDir, ContainerDirs) {
        let home = TempDir::new().unwrap();
        let dirs = ContainerDirs::under_home(home.path());
        for dir in [&dirs.config, &dirs.log, &dirs.temp] {
            std::fs::create_dir_all(dir).unwrap();
        }
        (home, dirs)
    }

    fn catalog() -> ServiceCatalog {
        let mut catalog = ServiceCatalog::new();
        catalog.register("noop", NOOP, || Ok(Arc::new(Noop(NOOP)) as Arc<dyn ServiceContract>));
        catalog
    }

    #[test]
    fn test_builder_validates_name_and_dirs() {
        let (_home, dirs) = layout();
        assert!(matches!(
            ContainerBuilder::new("  ", dirs.clone()).build(),
            Err(ContainerError::InvalidName(_))
        ));

        let relative = ContainerDirs::under_home("relative/home");
        let err = ContainerBuilder::new("test", relative).build().unwrap_err();
        assert!(matches!(err, ContainerError::RelativeDirectory { role: "home", .. }));
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let container = ContainerBuilder::new(" Test ", dirs).build().unwrap();
        assert_eq!(container.name(), "test");
        assert_eq!(container.prefixed_name("services"), "test.services");
        assert_eq!(container.status(), Status::Undef);
    }

    #[test]
    fn test_missing_directories_are_reported_in_order() {
        let home = TempDir::new().unwrap();
        let dirs = ContainerDirs::under_home(home.path());
        let container = ContainerBuilder::new("test", dirs.clone())
            .config(Configuration::new())
            .environment(Vec::<(String, String)>::new())
            .build()
            .unwrap();

        let err = container.init().unwrap_err();
        assert!(matches!(err, ContainerError::DirectoryNotFound { role: "temp", .. }));
        assert_eq!(container.status(), Status::Shutdown);

        std::fs::create_dir_all(&dirs.temp).unwrap();
        std::fs::write(&dirs.log, b"not a dir").unwrap();
        let container = ContainerBuilder::new("test", dirs)
            .config(Configuration::new())
            .environment(Vec::<(String, String)>::new())
            .build()
            .unwrap();
        let err = container.init().unwrap_err();
        assert!(matches!(err, ContainerError::NotADirectory { role: "log", .. }));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_lookup_requires_operational_status() {
        let (_home, dirs) = layout();
        let container = ContainerBuilder::new("test", dirs)
            .catalog(catalog())
            .config(Configuration::from_pairs([("test.services", "noop")]))
            .environment(Vec::<(String, String)>::new())
            .build()
            .unwrap();

        let Err(err) = container.get(NOOP) else {
            panic!("lookup before init succeeded");
        };
        assert_eq!(err.kind(), ErrorKind::State);

        container.init().unwrap();
        assert_eq!(container.status(), Status::Normal);
        assert!(container.get(NOOP).unwrap().is_some());
        assert!(container.get_as::<Noop>(NOOP).unwrap().is_some());
        assert!(container.get(ServiceId::new("absent")).unwrap().is_none());

        assert!(matches!(
            container.init(),
            Err(ContainerError::InvalidState { operation: "init", .. })
        ));

        container.destroy().unwrap();
        assert_eq!(container.status(), Status::Shutdown);
        assert!(matches!(container.get(NOOP), Err(ref e) if e.kind() == ErrorKind::State));
        assert!(container.destroy().is_err());
    }

    #[test]
    fn test_startup_status_must_be_settable() {
        let (_home, dirs) = layout();
        let container = ContainerBuilder::new("test", dirs)
            .config(Configuration::from_pairs([("test.startup.status", "SHUTDOWN")]))
            .environment(Vec::<(String, String)>::new())
            .build()
            .unwrap();
        let err = container.init().unwrap_err();
        assert!(matches!(err, ContainerError::InvalidStartupStatus { .. }));
        assert_eq!(container.status(), Status::Shutdown);
    }

    #[test]
    fn test_set_status_rejects_unsettable_values() {
        let (_home, dirs) = layout();
        let container = ContainerBuilder::new("test", dirs)
            .config(Configuration::from_pairs([("test.startup.status", "admin")]))
            .environment(Vec::<(String, String)>::new())
            .build()
            .unwrap();
        container.init().unwrap();
        assert_eq!(container.status(), Status::Admin);

        for status in [Status::Undef, Status::Booting, Status::ShuttingDown, Status::Shutdown] {
            assert!(matches!(
                container.set_status(status),
                Err(ContainerError::StatusNotSettable(_))
            ));
        }
        assert_eq!(container.status(), Status::Admin);
    }

    #[test]
    fn test_directory_keys_are_injected() {
        let (_home, dirs) = layout();
        let container = ContainerBuilder::new("test", dirs.clone())
            .config(Configuration::from_pairs([("test.keytab", "${test.home.dir}/test.keytab")]))
            .environment(Vec::<(String, String)>::new())
            .build()
            .unwrap();
        container.init().unwrap();

        let config = container.config();
        assert_eq!(
            config.get("test.keytab").unwrap(),
            format!("{}/test.keytab", dirs.home.display())
        );
        assert_eq!(config.get("test.temp.dir").unwrap(), dirs.temp.display().to_string());
    }
}
