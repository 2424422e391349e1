// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! fsgate core
//!
//! Service container and secure execution gateway that the fsgate HTTP
//! filesystem gateway is built on.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Lifecycle kernel, impersonated cluster access, request-scoped
//!   resource release

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
