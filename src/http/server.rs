//! HTTP server setup for the signing endpoint.
//!
//! # Responsibilities
//! - Create Axum Router with the signing handlers
//! - Wire up middleware (request ID, tracing)
//! - Map signing failures to HTTP status codes
//! - Attach the router to a bound listener

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use http_body_util::LengthLimitError;
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::net::{Listener, ListenerBinding, ListenerError};
use crate::signing::{SignError, SigningApp};

/// Response header carrying the digest of the uploaded artifact.
pub const X_SHA256: &str = "x-sha256";

/// Generates UUID v4 request IDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&uuid::Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// Serve the signing app on `listener`.
pub fn create_server(app: Arc<SigningApp>, listener: Listener) -> Result<ListenerBinding, ListenerError> {
    ListenerBinding::serve("signing", listener, build_router(app))
}

/// Build the Axum router with all middleware layers.
pub fn build_router(app: Arc<SigningApp>) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .route("/sign/{format}", post(sign_handler))
        .with_state(app)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}

#[derive(Debug, Serialize)]
struct StatusBody {
    version: &'static str,
    formats: Vec<String>,
}

async fn status_handler(State(app): State<Arc<SigningApp>>) -> Json<StatusBody> {
    Json(StatusBody {
        version: env!("CARGO_PKG_VERSION"),
        formats: app.available_formats(),
    })
}

fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

/// Chunked uploads only hit the limit while being read.
fn exceeds_limit(err: &axum::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return true;
        }
        source = e.source();
    }
    false
}

async fn sign_handler(
    State(app): State<Arc<SigningApp>>,
    Path(format): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let settings = app.settings();

    if !app.is_available(&format) {
        tracing::warn!(format = %format, "Signing request for unavailable format");
        return (StatusCode::NOT_FOUND, "Unknown format").into_response();
    }

    if declared_length(&headers).is_some_and(|len| len > settings.max_body_size) {
        return (StatusCode::PAYLOAD_TOO_LARGE, "Artifact too large").into_response();
    }

    let bytes = match axum::body::to_bytes(body, settings.max_body_size).await {
        Ok(bytes) => bytes,
        Err(e) if exceeds_limit(&e) => {
            return (StatusCode::PAYLOAD_TOO_LARGE, "Artifact too large").into_response();
        }
        Err(e) => {
            tracing::warn!(format = %format, error = %e, "Failed to read upload");
            return (StatusCode::BAD_REQUEST, "Failed to read artifact").into_response();
        }
    };

    match tokio::time::timeout(settings.request_timeout, app.sign(&format, bytes)).await {
        Ok(Ok(artifact)) => {
            let mut response = Response::new(Body::from(artifact.bytes));
            let headers = response.headers_mut();
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            );
            if let Ok(digest) = HeaderValue::from_str(&artifact.digest) {
                headers.insert(X_SHA256, digest);
            }
            response
        }
        Ok(Err(SignError::UnknownFormat(_))) => {
            (StatusCode::NOT_FOUND, "Unknown format").into_response()
        }
        Ok(Err(SignError::ScriptFailed { exit_code, log })) => {
            tracing::error!(format = %format, exit_code = exit_code, "Signing failed");
            (StatusCode::INTERNAL_SERVER_ERROR, log).into_response()
        }
        Ok(Err(e)) => {
            tracing::error!(format = %format, error = %e, "Signing failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Signing failed").into_response()
        }
        Err(_) => {
            tracing::error!(
                format = %format,
                timeout_secs = settings.request_timeout.as_secs(),
                "Signing request timed out"
            );
            (StatusCode::GATEWAY_TIMEOUT, "Signing timed out").into_response()
        }
    }
}
