// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Proxy User Service
//!
//! Impersonation policy: decides whether an authenticated proxy user may
//! act as another user from a given host.
//!
//! Configuration, per proxy user `<p>` (both keys required together):
//!
//! - `<name>.proxyuser.<p>.hosts`: `*` or comma separated host names/IPs
//! - `<name>.proxyuser.<p>.groups`: `*` or comma separated groups the
//!   impersonated user must belong to (one is enough)
//!
//! Host names are resolved to IP addresses once, at init.

use crate::application::container::ServiceContainer;
use crate::application::groups::GroupsService;
use crate::domain::error::ErrorKind;
use crate::domain::service::{ServiceContract, ServiceError, ServiceId};
use parking_lot::RwLock;
use std::any::Any;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::net::{IpAddr, ToSocketAddrs};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

const HOSTS_SUFFIX: &str = ".hosts";
const GROUPS_SUFFIX: &str = ".groups";
const WILDCARD: &str = "*";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccessControlError {
    #[error("[{0}] is not configured as a proxy user")]
    UnknownProxyUser(String),

    #[error("proxy user [{proxy_user}] is not allowed to impersonate from host [{host}]")]
    HostNotAllowed { proxy_user: String, host: String },

    #[error("proxy user [{proxy_user}] is not allowed to impersonate user [{user}]")]
    UserNotAllowed { proxy_user: String, user: String },

    #[error("{0} must not be empty")]
    EmptyArgument(&'static str),
}

impl AccessControlError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Authorization
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Allowed<T: Eq + std::hash::Hash> {
    Any,
    Only(HashSet<T>),
}

#[derive(Debug, Clone)]
struct ProxyRule {
    hosts: Allowed<IpAddr>,
    groups: Allowed<String>,
}

fn resolve(host: &str) -> std::io::Result<Vec<IpAddr>> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![ip]);
    }
    Ok((host, 0u16).to_socket_addrs()?.map(|addr| addr.ip()).collect())
}

/// Impersonation rules loaded at init. [`ProxyUserService::validate`] is
/// called by the REST layer for requests that carry a do-as user; the
/// gateway itself only enforces allow-lists.
#[derive(Default)]
pub struct ProxyUserService {
    rules: RwLock<HashMap<String, ProxyRule>>,
    groups: RwLock<Option<Arc<GroupsService>>>,
}

impl ProxyUserService {
    pub const SERVICE_ID: ServiceId = ServiceId::new("proxyuser");

    pub fn new() -> Self {
        Self::default()
    }

    /// Check that `proxy_user`, connecting from `host`, may act as
    /// `do_as_user`.
    pub fn validate(&self, proxy_user: &str, host: &str, do_as_user: &str) -> Result<(), AccessControlError> {
        if proxy_user.trim().is_empty() {
            return Err(AccessControlError::EmptyArgument("proxy user"));
        }
        if host.trim().is_empty() {
            return Err(AccessControlError::EmptyArgument("host"));
        }
        if do_as_user.trim().is_empty() {
            return Err(AccessControlError::EmptyArgument("do-as user"));
        }
        debug!(proxy_user, host, do_as_user, "Authorizing impersonation");

        let rule = self
            .rules
            .read()
            .get(proxy_user)
            .cloned()
            .ok_or_else(|| AccessControlError::UnknownProxyUser(proxy_user.to_string()))?;

        if let Allowed::Only(allowed) = &rule.hosts {
            let addresses = resolve(host).unwrap_or_default();
            if !addresses.iter().any(|ip| allowed.contains(ip)) {
                return Err(AccessControlError::HostNotAllowed {
                    proxy_user: proxy_user.to_string(),
                    host: host.to_string(),
                });
            }
        }

        if let Allowed::Only(allowed) = &rule.groups {
            let memberships = self
                .groups
                .read()
                .as_ref()
                .map(|groups| groups.get_groups(do_as_user))
                .unwrap_or_default();
            if !memberships.iter().any(|g| allowed.contains(g)) {
                return Err(AccessControlError::UserNotAllowed {
                    proxy_user: proxy_user.to_string(),
                    user: do_as_user.to_string(),
                });
            }
        }
        Ok(())
    }

    fn parse_hosts(key: &str, values: Vec<String>) -> Result<Allowed<IpAddr>, ServiceError> {
        if values.iter().any(|v| v == WILDCARD) {
            return Ok(Allowed::Any);
        }
        let mut addresses = HashSet::new();
        for host in values {
            let resolved = resolve(&host)
                .map_err(|e| ServiceError::invalid(key, host.as_str(), e.to_string()))?;
            if resolved.is_empty() {
                return Err(ServiceError::invalid(key, host, "host does not resolve"));
            }
            addresses.extend(resolved);
        }
        Ok(Allowed::Only(addresses))
    }

    fn parse_groups(values: Vec<String>) -> Allowed<String> {
        if values.iter().any(|v| v == WILDCARD) {
            Allowed::Any
        } else {
            Allowed::Only(values.into_iter().collect())
        }
    }
}

impl ServiceContract for ProxyUserService {
    fn identity(&self) -> ServiceId {
        Self::SERVICE_ID
    }

    fn dependencies(&self) -> Vec<ServiceId> {
        vec![GroupsService::SERVICE_ID]
    }

    fn init(&self, container: &ServiceContainer) -> Result<(), ServiceError> {
        let groups = container.require::<GroupsService>(GroupsService::SERVICE_ID)?;
        let config = container.service_config(Self::SERVICE_ID);
        let prefix = container.prefixed_name(&format!("{}.", Self::SERVICE_ID));

        let proxy_users: BTreeSet<String> = config
            .keys()
            .filter_map(|key| {
                key.strip_suffix(HOSTS_SUFFIX)
                    .or_else(|| key.strip_suffix(GROUPS_SUFFIX))
            })
            .filter(|user| !user.is_empty())
            .map(str::to_string)
            .collect();

        let mut rules = HashMap::with_capacity(proxy_users.len());
        for user in proxy_users {
            let hosts_key = format!("{user}{HOSTS_SUFFIX}");
            let groups_key = format!("{user}{GROUPS_SUFFIX}");
            let (Some(_), Some(_)) = (config.get_raw(&hosts_key), config.get_raw(&groups_key)) else {
                let missing = if config.contains_key(&hosts_key) { groups_key } else { hosts_key };
                return Err(ServiceError::MissingProperty(format!("{prefix}{missing}")));
            };

            let hosts = Self::parse_hosts(&format!("{prefix}{hosts_key}"), config.get_list(&hosts_key))?;
            let groups = Self::parse_groups(config.get_list(&groups_key));
            rules.insert(user, ProxyRule { hosts, groups });
        }

        info!(proxy_users = rules.len(), "Loaded proxy user rules");
        *self.rules.write() = rules;
        *self.groups.write() = Some(groups);
        Ok(())
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::catalog::ServiceCatalog;
    use crate::application::container::{ContainerBuilder, ContainerDirs, ContainerError};
    use crate::domain::config::Configuration;
    use crate::infrastructure::cluster::LocalClusterConnector;
    use tempfile::TempDir;

    fn boot(settings: &[(&str, &str)]) -> (TempDir, Result<ServiceContainer, ContainerError>) {
        let home = TempDir::new().unwrap();
        let dirs = ContainerDirs::under_home(home.path());
        for dir in [&dirs.config, &dirs.log, &dirs.temp] {
            std::fs::create_dir_all(dir).unwrap();
        }
        let mut config = Configuration::from_pairs([("test.services", "groups,proxyuser")]);
        for (key, value) in settings {
            config.set(*key, *value);
        }
        let container = ContainerBuilder::new("test", dirs)
            .catalog(ServiceCatalog::standard(Arc::new(LocalClusterConnector::new(
                home.path().join("cluster"),
            ))))
            .config(config)
            .environment(Vec::<(String, String)>::new())
            .build()
            .unwrap();
        let result = container.init().map(|()| container);
        (home, result)
    }

    fn service(container: &ServiceContainer) -> Arc<ProxyUserService> {
        container
            .get_as::<ProxyUserService>(ProxyUserService::SERVICE_ID)
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_validate_checks_host_and_group() {
        let (_home, container) = boot(&[
            ("test.groups.mapping.alice", "staff,dev"),
            ("test.groups.mapping.bob", "guests"),
            ("test.proxyuser.hue.hosts", "127.0.0.1, 10.1.1.1"),
            ("test.proxyuser.hue.groups", "staff"),
        ]);
        let proxy = service(&container.unwrap());

        assert_eq!(proxy.validate("hue", "127.0.0.1", "alice"), Ok(()));
        assert_eq!(proxy.validate("hue", "10.1.1.1", "alice"), Ok(()));
        assert_eq!(
            proxy.validate("hue", "10.9.9.9", "alice"),
            Err(AccessControlError::HostNotAllowed {
                proxy_user: "hue".to_string(),
                host: "10.9.9.9".to_string(),
            })
        );
        assert_eq!(
            proxy.validate("hue", "127.0.0.1", "bob"),
            Err(AccessControlError::UserNotAllowed {
                proxy_user: "hue".to_string(),
                user: "bob".to_string(),
            })
        );
        assert_eq!(
            proxy.validate("oozie", "127.0.0.1", "alice"),
            Err(AccessControlError::UnknownProxyUser("oozie".to_string()))
        );
    }

    #[test]
    fn test_wildcards_allow_everything() {
        let (_home, container) = boot(&[
            ("test.proxyuser.oozie.hosts", "*"),
            ("test.proxyuser.oozie.groups", "*"),
        ]);
        let proxy = service(&container.unwrap());
        assert!(proxy.validate("oozie", "192.168.7.7", "nobody").is_ok());
        assert_eq!(
            proxy.validate("oozie", " ", "nobody"),
            Err(AccessControlError::EmptyArgument("host"))
        );
        assert_eq!(
            proxy.validate("", "192.168.7.7", "nobody").unwrap_err().kind(),
            ErrorKind::Authorization
        );
    }

    #[test]
    fn test_rule_needs_both_keys() {
        let (_home, result) = boot(&[("test.proxyuser.hue.hosts", "*")]);
        match result {
            Err(ContainerError::Init {
                source: ServiceError::MissingProperty(key),
                ..
            }) => assert_eq!(key, "test.proxyuser.hue.groups"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_groups_lookup() {
        let (_home, container) = boot(&[("test.groups.mapping.alice", "staff, dev")]);
        let container = container.unwrap();
        let groups = container
            .get_as::<GroupsService>(GroupsService::SERVICE_ID)
            .unwrap()
            .unwrap();
        assert_eq!(groups.get_groups("alice"), vec!["staff", "dev"]);
        assert!(groups.get_groups("mallory").is_empty());
    }
}
