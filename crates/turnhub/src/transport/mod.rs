// SPDX-License-Identifier: BUSL-1.1

//! HTTP/WebSocket surface: composes the duplex socket, the synchronous RPC
//! endpoint, SSE, and a health probe onto one router (§4.1).

pub mod auth;
pub mod http;
pub mod sse;
pub mod ws;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::CoordinatorState;

pub fn build_router(state: Arc<CoordinatorState>) -> Router {
    Router::new()
        .route("/", get(ws::ws_handler))
        .route("/rpc", post(http::rpc_handler))
        .route("/sse", get(sse::sse_handler))
        .route("/healthz", get(http::health_handler))
        .layer(axum::middleware::from_fn_with_state(state.clone(), auth::auth_layer))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
