// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Error classification shared by the container, the gateway and the HTTP
//! boundary. Each module keeps its own `thiserror` enum and maps every
//! variant onto one of these kinds.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing directory, malformed or missing required key
    Configuration,
    /// Unknown service, wrong declared identity, failed constructor or init
    ServiceLoad,
    /// Required identity absent at init time
    Dependency,
    /// A status-change hook failed; the container was torn down
    StatusTransition,
    /// Operation not allowed in the current container status
    State,
    /// Failure while running privileged work against the cluster
    Execution,
    /// Allow-list or impersonation denial
    Authorization,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::ServiceLoad => "service_load",
            ErrorKind::Dependency => "dependency",
            ErrorKind::StatusTransition => "status_transition",
            ErrorKind::State => "state",
            ErrorKind::Execution => "execution",
            ErrorKind::Authorization => "authorization",
        };
        f.write_str(name)
    }
}
