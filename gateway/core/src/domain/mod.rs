// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Value types and contracts shared by every layer: container status, the
//! service contract, configuration, the cluster client contract and the
//! impersonation scope.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Implements the kernel vocabulary

pub mod status;
pub mod error;
pub mod service;
pub mod config;
pub mod cluster;
pub mod impersonation;
