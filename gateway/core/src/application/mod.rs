// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod container;
pub mod catalog;
pub mod instrumentation;
pub mod execution_gateway;
pub mod request_resources;
pub mod groups;
pub mod proxy_user;
