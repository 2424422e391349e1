// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Request-scoped resource registry.
//!
//! One slot per in-flight request for an unmanaged handle obtained through
//! [`ExecutionGateway::create_unmanaged_resource`]. The request boundary
//! releases whatever is bound when the request ends, on every exit path.
//! Handles used through `execute` close themselves and are never bound here.

use crate::application::execution_gateway::{ExecutionGateway, GatewayError, UnmanagedHandle};
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Returned by [`RequestResources::bind`] when the slot is taken; gives the
/// rejected handle back to the caller.
#[derive(Debug, Error)]
#[error("an unmanaged handle is already bound to this request")]
pub struct AlreadyBound(pub UnmanagedHandle);

#[derive(Debug, Default)]
pub struct RequestResources {
    slot: Mutex<Option<UnmanagedHandle>>,
}

impl RequestResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, handle: UnmanagedHandle) -> Result<(), AlreadyBound> {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return Err(AlreadyBound(handle));
        }
        *slot = Some(handle);
        Ok(())
    }

    pub fn is_bound(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Borrow the bound handle, if any.
    pub fn with_handle<R>(&self, f: impl FnOnce(Option<&UnmanagedHandle>) -> R) -> R {
        f(self.slot.lock().as_ref())
    }

    fn take(&self) -> Option<UnmanagedHandle> {
        self.slot.lock().take()
    }
}

async fn release(gateway: Option<Arc<ExecutionGateway>>, handle: UnmanagedHandle) -> Result<(), GatewayError> {
    match gateway {
        Some(gateway) => gateway.release_resource(handle).await,
        None => {
            warn!("No execution gateway for this request, releasing unmanaged handle directly");
            handle.release().await
        }
    }
}

/// Per-request context created by the request boundary.
pub struct RequestScope {
    resources: Arc<RequestResources>,
    gateway: Option<Arc<ExecutionGateway>>,
}

impl RequestScope {
    pub fn enter(gateway: Option<Arc<ExecutionGateway>>) -> Self {
        Self {
            resources: Arc::new(RequestResources::new()),
            gateway,
        }
    }

    /// Slot handed to the request handlers.
    pub fn resources(&self) -> Arc<RequestResources> {
        Arc::clone(&self.resources)
    }

    /// End of the request: release the bound handle, if any. Returns whether
    /// a handle was released.
    pub async fn finish(self) -> Result<bool, GatewayError> {
        let Some(handle) = self.resources.take() else {
            return Ok(false);
        };
        debug!("Releasing unmanaged handle at request end");
        release(self.gateway.clone(), handle).await.map(|()| true)
    }
}

impl Drop for RequestScope {
    fn drop(&mut self) {
        let Some(handle) = self.resources.take() else {
            return;
        };
        let gateway = self.gateway.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                debug!("Request abandoned, releasing unmanaged handle in background");
                runtime.spawn(async move {
                    if let Err(e) = release(gateway, handle).await {
                        warn!(error = %e, "Failed to release unmanaged handle of abandoned request");
                    }
                });
            }
            Err(_) => warn!("Request abandoned outside a runtime, unmanaged handle left open"),
        }
    }
}
