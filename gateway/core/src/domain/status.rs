// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Container Status
//!
//! Operational status of the service container. Every value carries two
//! flags: whether callers may transition to it directly (*settable*) and
//! whether the container serves lookups while in it (*operational*).
//!
//! Transitions:
//! `UNDEF → BOOTING → {HALTED, ADMIN, NORMAL} ↔ … → SHUTTING_DOWN → SHUTDOWN`

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Constructed, `init()` not called yet
    Undef,
    /// `init()` in progress
    Booting,
    Halted,
    Admin,
    Normal,
    /// `destroy()` in progress
    ShuttingDown,
    /// Terminal
    Shutdown,
}

impl Status {
    pub const ALL: [Status; 7] = [
        Status::Undef,
        Status::Booting,
        Status::Halted,
        Status::Admin,
        Status::Normal,
        Status::ShuttingDown,
        Status::Shutdown,
    ];

    /// Whether a caller may request a transition to this status.
    pub const fn is_settable(self) -> bool {
        matches!(self, Status::Halted | Status::Admin | Status::Normal)
    }

    /// Whether the container serves lookups while in this status.
    pub const fn is_operational(self) -> bool {
        !matches!(self, Status::Undef | Status::Shutdown)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Status::Undef => "UNDEF",
            Status::Booting => "BOOTING",
            Status::Halted => "HALTED",
            Status::Admin => "ADMIN",
            Status::Normal => "NORMAL",
            Status::ShuttingDown => "SHUTTING_DOWN",
            Status::Shutdown => "SHUTDOWN",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown status [{0}]")]
pub struct StatusParseError(pub String);

impl FromStr for Status {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Status::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| StatusParseError(s.to_string()))
    }
}
