// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Service catalog.
//!
//! Maps the names used in `<name>.services` / `<name>.services.ext` to
//! constructors. Every entry declares the identity its service registers
//! under; a constructed service reporting anything else is rejected.

use crate::application::container::ContainerError;
use crate::application::execution_gateway::ExecutionGateway;
use crate::application::groups::GroupsService;
use crate::application::instrumentation::InstrumentationService;
use crate::application::proxy_user::ProxyUserService;
use crate::domain::cluster::ClusterConnector;
use crate::domain::service::{ServiceContract, ServiceError, ServiceId};
use std::collections::HashMap;
use std::sync::Arc;

pub type ServiceFactory =
    Arc<dyn Fn() -> Result<Arc<dyn ServiceContract>, ServiceError> + Send + Sync>;

struct CatalogEntry {
    identity: ServiceId,
    factory: ServiceFactory,
}

#[derive(Default)]
pub struct ServiceCatalog {
    entries: HashMap<String, CatalogEntry>,
}

impl ServiceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with every built-in service, gateway handles coming from
    /// `connector`.
    pub fn standard(connector: Arc<dyn ClusterConnector>) -> Self {
        let mut catalog = Self::new();
        catalog.register("instrumentation", InstrumentationService::SERVICE_ID, || {
            Ok(Arc::new(InstrumentationService::new()) as Arc<dyn ServiceContract>)
        });
        catalog.register("groups", GroupsService::SERVICE_ID, || {
            Ok(Arc::new(GroupsService::new()) as Arc<dyn ServiceContract>)
        });
        catalog.register("proxyuser", ProxyUserService::SERVICE_ID, || {
            Ok(Arc::new(ProxyUserService::new()) as Arc<dyn ServiceContract>)
        });
        catalog.register("gateway", ExecutionGateway::SERVICE_ID, move || {
            Ok(Arc::new(ExecutionGateway::new(Arc::clone(&connector))) as Arc<dyn ServiceContract>)
        });
        catalog
    }

    /// Add or replace the entry for `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, identity: ServiceId, factory: F) -> &mut Self
    where
        F: Fn() -> Result<Arc<dyn ServiceContract>, ServiceError> + Send + Sync + 'static,
    {
        self.entries.insert(
            name.into(),
            CatalogEntry {
                identity,
                factory: Arc::new(factory),
            },
        );
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn instantiate(&self, name: &str) -> Result<Arc<dyn ServiceContract>, ContainerError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| ContainerError::UnknownService(name.to_string()))?;
        let service = (entry.factory)().map_err(|source| ContainerError::Instantiation {
            name: name.to_string(),
            source,
        })?;
        let actual = service.identity();
        if actual != entry.identity {
            return Err(ContainerError::IdentityMismatch {
                name: name.to_string(),
                declared: entry.identity,
                actual,
            });
        }
        Ok(service)
    }
}
