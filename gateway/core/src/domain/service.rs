// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Service Contract
//!
//! Capability interface every pluggable component of the container
//! implements. A service registers under exactly one [`ServiceId`] and may
//! declare identities that must already be registered when its own `init`
//! runs.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Lifecycle hooks driven by `ServiceContainer`

use crate::application::container::ServiceContainer;
use crate::domain::status::Status;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Identity a service registers under. At most one live implementation per
/// identity is held by the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceId(&'static str);

impl ServiceId {
    pub const fn new(id: &'static str) -> Self {
        Self(id)
    }

    pub const fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Failure raised by a service hook.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("missing required property [{0}]")]
    MissingProperty(String),

    #[error("invalid value [{value}] for property [{key}]: {reason}")]
    InvalidProperty {
        key: String,
        value: String,
        reason: String,
    },

    #[error("kerberos login failed for principal [{principal}] using keytab [{keytab}]: {reason}")]
    KerberosLogin {
        principal: String,
        keytab: String,
        reason: String,
    },

    #[error("required service [{0}] is not registered")]
    Unavailable(ServiceId),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn invalid(key: impl Into<String>, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidProperty {
            key: key.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Lifecycle contract of a container-managed component.
///
/// Hooks are invoked by the container only; `init` and `post_init` run once
/// per instance, `destroy` runs at most once. Implementations keep their
/// runtime state behind interior mutability since the container shares
/// them as `Arc<dyn ServiceContract>` with request handlers.
pub trait ServiceContract: Send + Sync + 'static {
    /// Identity this service registers under.
    fn identity(&self) -> ServiceId;

    /// Identities that must already be registered when `init` runs.
    fn dependencies(&self) -> Vec<ServiceId> {
        Vec::new()
    }

    /// Called in declaration order during container boot, and for a
    /// replacement service during a hot swap.
    fn init(&self, container: &ServiceContainer) -> Result<(), ServiceError>;

    /// Called for every registered service after all of them initialized.
    fn post_init(&self, _container: &ServiceContainer) -> Result<(), ServiceError> {
        Ok(())
    }

    /// Called in reverse initialization order on shutdown, or when replaced.
    fn destroy(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    /// Notified of every effective status transition, in registration order.
    fn on_status_change(&self, _old: Status, _new: Status) -> Result<(), ServiceError> {
        Ok(())
    }

    /// Downcast support for typed lookups through the container.
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}
