// SPDX-License-Identifier: BUSL-1.1

//! Plain HTTP surface: a synchronous `POST /rpc` alternative to the duplex
//! socket (§4.1 "same dispatch path, no outbox"), plus a health probe.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use serde_json::Value;

use crate::connection::hub::ConnId;
use crate::error::{ErrorCode, RpcError};
use crate::rpc::envelope::{self, Envelope, RpcResponse};
use crate::rpc::HandlerContext;
use crate::state::CoordinatorState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub connections: usize,
    pub pending_requests: usize,
}

pub async fn health_handler(State(state): State<Arc<CoordinatorState>>) -> impl IntoResponse {
    let connections = state.hub.connection_count().await;
    let pending_requests = state.correlator.pending_count();
    Json(HealthResponse { status: "ok", connections, pending_requests })
}

/// `POST /rpc`: accepts exactly one JSON-RPC request object and dispatches it
/// through the same [`crate::rpc::Dispatcher`] the WebSocket transport uses.
/// There is no real connection behind the call, so server→client requests
/// issued while handling it (approvals, dynamic-tool relays) fall back to
/// any other live connection (§4.7).
pub async fn rpc_handler(State(state): State<Arc<CoordinatorState>>, body: String) -> impl IntoResponse {
    let env: Envelope<'_> = match serde_json::from_str(&body) {
        Ok(env) => env,
        Err(e) => {
            let err = RpcError::new(ErrorCode::ParseError, format!("invalid json: {e}"));
            return Json(RpcResponse::err(Value::Null, err)).into_response();
        }
    };

    let Some(owned) = envelope::to_owned(&env) else {
        let err = RpcError::new(ErrorCode::InvalidRequest, "request has no method");
        return Json(RpcResponse::err(Value::Null, err)).into_response();
    };

    let conn_id: ConnId = state.hub.any_connection().await.unwrap_or_else(uuid::Uuid::new_v4);
    let ctx = HandlerContext { state: state.clone(), conn_id };

    match state.dispatcher.dispatch(ctx, owned).await {
        Some(response) => Json(response).into_response(),
        None => Json(serde_json::json!({ "jsonrpc": "2.0" })).into_response(),
    }
}
