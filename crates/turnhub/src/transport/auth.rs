// SPDX-License-Identifier: BUSL-1.1

//! Local-origin + bearer/query-token auth (§4.1 "local origins only";
//! ambient token gate mirroring the teacher's auth middleware).

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::connection::hub::is_local_origin;
use crate::error::{CoordinatorError, ErrorCode, RpcError};
use crate::state::CoordinatorState;

fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

pub fn validate_bearer(headers: &HeaderMap, expected: Option<&str>) -> Result<(), CoordinatorError> {
    let Some(expected) = expected else { return Ok(()) };
    let header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| CoordinatorError::Protocol("missing authorization header".to_owned()))?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| CoordinatorError::Protocol("authorization header is not a bearer token".to_owned()))?;
    if constant_time_eq(token, expected) {
        Ok(())
    } else {
        Err(CoordinatorError::Protocol("invalid bearer token".to_owned()))
    }
}

pub fn validate_query_token(query: Option<&str>, expected: Option<&str>) -> Result<(), CoordinatorError> {
    let Some(expected) = expected else { return Ok(()) };
    let query = query.unwrap_or_default();
    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix("token=") {
            if constant_time_eq(value, expected) {
                return Ok(());
            }
        }
    }
    Err(CoordinatorError::Protocol("missing or invalid query token".to_owned()))
}

pub fn validate_origin(headers: &HeaderMap) -> Result<(), CoordinatorError> {
    let origin = headers.get("origin").and_then(|v| v.to_str().ok());
    if is_local_origin(origin) {
        Ok(())
    } else {
        Err(CoordinatorError::Protocol(format!("origin not allowed: {origin:?}")))
    }
}

/// Bearer-token middleware for the plain HTTP surface. WebSocket upgrades
/// authenticate via query token inside their own handler instead.
pub async fn auth_layer(state: State<Arc<CoordinatorState>>, req: Request<axum::body::Body>, next: Next) -> Response {
    let path = req.uri().path();
    if path == "/healthz" || path == "/" || path == "/sse" {
        return next.run(req).await;
    }
    if let Err(e) = validate_bearer(req.headers(), state.config.auth_token.as_deref()) {
        return unauthorized_response(&e);
    }
    next.run(req).await
}

pub fn unauthorized_response(err: &CoordinatorError) -> Response {
    let body = RpcError::new(ErrorCode::InvalidRequest, err.to_string());
    (StatusCode::UNAUTHORIZED, axum::Json(body)).into_response()
}
