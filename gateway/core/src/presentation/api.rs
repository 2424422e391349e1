// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP boundary.
//!
//! Admin endpoints over the service container and the request-boundary
//! middleware that every gateway route runs behind. Filesystem verb
//! dispatch is mounted by the embedding application; its handlers find the
//! request's `Arc<RequestResources>` slot in the request extensions.

use crate::application::container::{ContainerError, ServiceContainer};
use crate::application::execution_gateway::{ExecutionGateway, GatewayError};
use crate::application::instrumentation::InstrumentationService;
use crate::application::proxy_user::AccessControlError;
use crate::application::request_resources::RequestScope;
use crate::domain::error::ErrorKind;
use crate::domain::status::Status;
use axum::{
    extract::{Request, State},
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Error response: `{"error": {"kind": ..., "message": ...}}`.
#[derive(Debug)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.kind {
            ErrorKind::Configuration => StatusCode::BAD_REQUEST,
            ErrorKind::Authorization => StatusCode::FORBIDDEN,
            ErrorKind::State => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::ServiceLoad
            | ErrorKind::Dependency
            | ErrorKind::StatusTransition
            | ErrorKind::Execution => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ContainerError> for ApiError {
    fn from(e: ContainerError) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}

impl From<AccessControlError> for ApiError {
    fn from(e: AccessControlError) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "kind": self.kind,
                "message": self.message,
            }
        }));
        (self.status_code(), body).into_response()
    }
}

/// Admin routes over `container`.
pub fn router(container: ServiceContainer) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/admin/status", get(get_status_handler).put(put_status_handler))
        .route("/admin/instrumentation", get(instrumentation_handler))
        .with_state(container)
}

/// Wrap `router` with request tracing and the request boundary.
pub fn with_request_boundary(router: Router, container: ServiceContainer) -> Router {
    router
        .layer(middleware::from_fn_with_state(container, request_boundary))
        .layer(TraceLayer::new_for_http())
}

/// Runs every request inside a span carrying a fresh request id, with a
/// `RequestResources` slot in its extensions. An unmanaged handle bound to
/// the slot is released once the inner service returns; if the request
/// future is dropped instead, the scope releases it on drop.
async fn request_boundary(
    State(container): State<ServiceContainer>,
    mut request: Request,
    next: Next,
) -> Response {
    let request_id = Uuid::new_v4();
    let span = info_span!(
        "request",
        id = %request_id,
        method = %request.method(),
        uri = %request.uri(),
    );

    async move {
        let gateway = container
            .get_as::<ExecutionGateway>(ExecutionGateway::SERVICE_ID)
            .ok()
            .flatten();
        let scope = RequestScope::enter(gateway);
        request.extensions_mut().insert(scope.resources());

        let mut response = next.run(request).await;

        if let Err(e) = scope.finish().await {
            warn!(error = %e, "Failed to release unmanaged handle at request end");
        }
        if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        response
    }
    .instrument(span)
    .await
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusBody {
    pub status: String,
}

async fn health_handler(State(container): State<ServiceContainer>) -> Response {
    let status = container.status();
    let code = if status.is_operational() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = Json(json!({
        "name": container.name(),
        "status": status,
        "operational": status.is_operational(),
    }));
    (code, body).into_response()
}

async fn get_status_handler(State(container): State<ServiceContainer>) -> Json<StatusBody> {
    Json(StatusBody {
        status: container.status().to_string(),
    })
}

async fn put_status_handler(
    State(container): State<ServiceContainer>,
    Json(body): Json<StatusBody>,
) -> Result<Json<StatusBody>, ApiError> {
    let status: Status = body
        .status
        .parse()
        .map_err(|e: crate::domain::status::StatusParseError| {
            ApiError::new(ErrorKind::Configuration, e.to_string())
        })?;
    if !status.is_settable() {
        return Err(ApiError::new(
            ErrorKind::Configuration,
            format!("status [{status}] cannot be set"),
        ));
    }
    container.set_status(status)?;
    Ok(Json(StatusBody {
        status: container.status().to_string(),
    }))
}

async fn instrumentation_handler(State(container): State<ServiceContainer>) -> Result<Response, ApiError> {
    let instrumentation: Option<Arc<InstrumentationService>> =
        container.get_as(InstrumentationService::SERVICE_ID)?;
    let instrumentation = instrumentation.ok_or_else(|| {
        ApiError::new(ErrorKind::State, "instrumentation service is not registered")
    })?;
    Ok(Json(instrumentation.snapshot()).into_response())
}
