// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Group membership lookup backed by configuration.
//!
//! `<name>.groups.mapping.<user> = group1,group2`

use crate::application::container::ServiceContainer;
use crate::domain::service::{ServiceContract, ServiceError, ServiceId};
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

const MAPPING_PREFIX: &str = "mapping.";

#[derive(Default)]
pub struct GroupsService {
    mapping: RwLock<HashMap<String, Vec<String>>>,
}

impl GroupsService {
    pub const SERVICE_ID: ServiceId = ServiceId::new("groups");

    pub fn new() -> Self {
        Self::default()
    }

    /// Groups `user` belongs to; empty for unknown users.
    pub fn get_groups(&self, user: &str) -> Vec<String> {
        self.mapping.read().get(user).cloned().unwrap_or_default()
    }
}

impl ServiceContract for GroupsService {
    fn identity(&self) -> ServiceId {
        Self::SERVICE_ID
    }

    fn init(&self, container: &ServiceContainer) -> Result<(), ServiceError> {
        let config = container.service_config(Self::SERVICE_ID);
        let mapping: HashMap<String, Vec<String>> = config
            .keys()
            .filter_map(|key| {
                key.strip_prefix(MAPPING_PREFIX)
                    .filter(|user| !user.is_empty())
                    .map(|user| (user.to_string(), config.get_list(key)))
            })
            .collect();
        debug!(users = mapping.len(), "Loaded group mappings");
        *self.mapping.write() = mapping;
        Ok(())
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
