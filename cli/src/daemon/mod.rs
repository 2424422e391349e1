// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Server mode: container boot, HTTP serving and orderly shutdown.

mod server;

pub use server::{start_server, ServeOptions};
