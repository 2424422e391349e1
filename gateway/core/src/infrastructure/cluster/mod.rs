// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Cluster Infrastructure Module
//!
//! Concrete implementations of the cluster client contract.

pub mod local;

pub use local::{LocalClusterConnector, LocalComputeClient, LocalFileSystem};
