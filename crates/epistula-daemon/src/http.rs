// Copyright (c) 2026 Epistula Contributors
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use epistula_core::{CacheError, Clock, LeasedBucketCache};
use epistula_protocol::{verify_signed_request, Body, RequestEnvelope};

use crate::config::DaemonConfig;
use crate::payload::{IngestPayload, OrganicsRequest};
use crate::store::SqliteStore;
use crate::telemetry::Telemetry;

pub const SIGNATURE_HEADER: &str = "epistula-request-signature";
pub const TIMESTAMP_HEADER: &str = "epistula-timestamp";
pub const UUID_HEADER: &str = "epistula-uuid";
pub const SIGNED_BY_HEADER: &str = "epistula-signed-by";
pub const SIGNED_FOR_HEADER: &str = "epistula-signed-for";

#[derive(Clone)]
pub struct HttpState {
    pub cfg: DaemonConfig,
    pub store: Arc<SqliteStore>,
    pub cache: Arc<LeasedBucketCache<SqliteStore>>,
    pub telemetry: Arc<Telemetry>,
    pub clock: Arc<dyn Clock>,
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/ingest", post(ingest))
        .route("/organics", post(organics))
        .route("/ping", get(ping))
        .route("/metrics", get(metrics))
        .layer(RequestBodyLimitLayer::new(state.cfg.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(
    listener: tokio::net::TcpListener,
    state: HttpState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

#[derive(Debug)]
pub struct HttpErr {
    status: StatusCode,
    reason: String,
}

impl HttpErr {
    fn bad_request(reason: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            reason: reason.into(),
        }
    }

    fn unauthorized(reason: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            reason: reason.into(),
        }
    }

    fn internal() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            reason: "Internal Server Error".to_string(),
        }
    }

    fn into_response(self) -> axum::response::Response {
        (self.status, Json(json!({ "error": self.reason }))).into_response()
    }
}

async fn ingest(
    State(state): State<HttpState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> impl IntoResponse {
    match ingest_impl(&state, &headers, &body) {
        Ok(resp) => {
            state.telemetry.record_ingest_accepted();
            (StatusCode::OK, Json(resp)).into_response()
        }
        Err(err) => {
            state.telemetry.record_ingest_rejected();
            err.into_response()
        }
    }
}

async fn organics(
    State(state): State<HttpState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> impl IntoResponse {
    state.telemetry.record_organics_request();
    match organics_impl(&state, &headers, &body) {
        Ok(resp) => (StatusCode::OK, Json(resp)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn ping() -> impl IntoResponse {
    (StatusCode::OK, "pong")
}

async fn metrics(State(state): State<HttpState>) -> impl IntoResponse {
    (StatusCode::OK, state.telemetry.render())
}

fn ingest_impl(state: &HttpState, headers: &HeaderMap, body: &[u8]) -> Result<Value, HttpErr> {
    let signed_by = authenticate(state, headers, body)?;

    let trusted = state.store.is_trusted_peer(&signed_by).map_err(|err| {
        state.telemetry.record_storage_failure();
        tracing::error!(error = %err, "trusted peer lookup failed");
        HttpErr::internal()
    })?;
    if !trusted {
        state.telemetry.record_auth_reject("untrusted peer");
        return Err(HttpErr::unauthorized("Unknown peer"));
    }

    let payload: IngestPayload = serde_json::from_slice(body)
        .map_err(|err| HttpErr::bad_request(format!("Invalid payload: {err}")))?;

    state
        .store
        .record_ingest(&signed_by, &payload)
        .map_err(|err| {
            state.telemetry.record_storage_failure();
            tracing::error!(error = %err, "ingest persist failed");
            HttpErr::internal()
        })?;

    tracing::info!(
        signed_by = %signed_by,
        responses = payload.responses.len(),
        record_id = %payload.request.record_id,
        "ingest accepted"
    );
    Ok(json!({ "status": "ok" }))
}

fn organics_impl(state: &HttpState, headers: &HeaderMap, body: &[u8]) -> Result<Value, HttpErr> {
    let signed_by = authenticate(state, headers, body)?;

    let req: OrganicsRequest = serde_json::from_slice(body)
        .map_err(|err| HttpErr::bad_request(format!("Invalid payload: {err}")))?;

    let view = state.cache.fetch_batch(&req.models).map_err(|err| {
        let CacheError::Storage(source) = &err;
        state.telemetry.record_storage_failure();
        tracing::error!(error = %source, "organics batch materialization failed");
        HttpErr::internal()
    })?;

    tracing::debug!(
        signed_by = %signed_by,
        bucket_id = %view.bucket_id,
        models = req.models.len(),
        "organics batch served"
    );
    Ok(json!({
        "bucket_id": view.bucket_id,
        "records": view.records,
    }))
}

/// Checks the Epistula headers against the request body and returns the
/// verified sender address. All rejections surface as 400 with the
/// protocol's reason string; only the untrusted-peer case upgrades to 401,
/// and that happens after this returns.
fn authenticate(state: &HttpState, headers: &HeaderMap, body: &[u8]) -> Result<String, HttpErr> {
    let signed_by = header_str(headers, SIGNED_BY_HEADER);
    if state.cfg.insecure_skip_verify {
        return Ok(signed_by.unwrap_or("anonymous").to_string());
    }

    let signed_for = header_str(headers, SIGNED_FOR_HEADER);
    if let Some(signed_for) = signed_for {
        if !state.cfg.identity.is_empty() && signed_for != state.cfg.identity {
            state.telemetry.record_auth_reject("wrong recipient");
            return Err(HttpErr::bad_request("Request not signed for this service"));
        }
    }

    let envelope = RequestEnvelope {
        signature: header_str(headers, SIGNATURE_HEADER),
        timestamp: header_str(headers, TIMESTAMP_HEADER),
        nonce: header_str(headers, UUID_HEADER),
        signed_by,
        signed_for,
    };
    let now_ms = state.clock.now_ms();
    verify_signed_request(&envelope, Body::Raw(body), now_ms).map_err(|err| {
        let reason = err.to_string();
        state.telemetry.record_auth_reject(&reason);
        tracing::debug!(reason = %reason, "request signature rejected");
        HttpErr::bad_request(reason)
    })?;

    // Shape checks above guarantee the header is present once verification
    // succeeds.
    Ok(envelope.signed_by.unwrap_or_default().to_string())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
