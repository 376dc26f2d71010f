// SPDX-License-Identifier: BUSL-1.1

//! Duplex WebSocket transport (C1): the primary client surface. One task
//! drains the hub outbox to the socket, one reads frames off the socket and
//! either resolves a pending correlator wait or dispatches a method call.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::connection::hub::ConnId;
use crate::rpc::correlator::PendingReply;
use crate::rpc::envelope::{self, Envelope, RpcResponse};
use crate::rpc::HandlerContext;
use crate::state::CoordinatorState;
use crate::transport::auth;

#[derive(Debug, Clone, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

pub async fn ws_handler(
    State(state): State<Arc<CoordinatorState>>,
    Query(query): Query<WsQuery>,
    headers: axum::http::HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if auth::validate_origin(&headers).is_err() {
        return auth::unauthorized_response(&crate::error::CoordinatorError::Protocol("origin rejected".to_owned()));
    }
    let raw_query = query.token.as_ref().map(|t| format!("token={t}"));
    if auth::validate_query_token(raw_query.as_deref(), state.config.auth_token.as_deref()).is_err() {
        return auth::unauthorized_response(&crate::error::CoordinatorError::Protocol("missing or invalid token".to_owned()));
    }
    ws.on_upgrade(move |socket| handle_ws(socket, state)).into_response()
}

async fn handle_ws(socket: WebSocket, state: Arc<CoordinatorState>) {
    let (conn_id, mut outbox_rx) = match state.hub.accept().await {
        Ok(pair) => pair,
        Err(e) => {
            warn!(error = %e, "rejected connection");
            return;
        }
    };
    let (mut ws_tx, mut ws_rx) = socket.split();
    let write_deadline = state.config.write_deadline();

    loop {
        tokio::select! {
            frame = outbox_rx.recv() => {
                match frame {
                    Some(bytes) => {
                        let send = ws_tx.send(Message::Binary(bytes.into()));
                        match tokio::time::timeout(write_deadline, send).await {
                            Ok(Ok(())) => {}
                            _ => break,
                        }
                    }
                    None => break,
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        crate::panic_guard::guard("ws_read_loop", handle_frame(&state, conn_id, text.as_bytes())).await;
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        crate::panic_guard::guard("ws_read_loop", handle_frame(&state, conn_id, &bytes)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(conn_id = %conn_id, error = %e, "websocket read error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    state.hub.disconnect(conn_id).await;
}

async fn handle_frame(state: &Arc<CoordinatorState>, conn_id: ConnId, raw: &[u8]) {
    let Ok(text) = std::str::from_utf8(raw) else {
        warn!(conn_id = %conn_id, "dropping non-utf8 frame");
        return;
    };
    let env: Envelope<'_> = match serde_json::from_str(text) {
        Ok(env) => env,
        Err(e) => {
            debug!(conn_id = %conn_id, error = %e, "dropping unparseable frame");
            return;
        }
    };

    if env.is_client_response() {
        let Some(raw_id) = env.id else { return };
        let Some(id) = envelope::parse_int_id(raw_id.get()) else {
            warn!(conn_id = %conn_id, "client response carried a non-integer id, dropping");
            return;
        };
        let reply = match (env.result, env.error) {
            (Some(result), _) => serde_json::from_str(result.get()).ok().map(PendingReply::Result),
            (None, Some(error)) => serde_json::from_str(error.get()).ok().map(PendingReply::Error),
            (None, None) => None,
        };
        if let Some(reply) = reply {
            state.correlator.resolve(id, reply);
        }
        return;
    }

    let Some(owned) = envelope::to_owned(&env) else {
        debug!(conn_id = %conn_id, "dropping frame with no method");
        return;
    };
    let ctx = HandlerContext { state: state.clone(), conn_id };
    if let Some(response) = state.dispatcher.dispatch(ctx, owned).await {
        send_response(state, conn_id, response).await;
    }
}

async fn send_response(state: &Arc<CoordinatorState>, conn_id: ConnId, response: RpcResponse) {
    match serde_json::to_vec(&response) {
        Ok(payload) => {
            if let Err(e) = state.hub.send_response(conn_id, payload).await {
                debug!(conn_id = %conn_id, error = %e, "failed to enqueue response");
            }
        }
        Err(e) => warn!(conn_id = %conn_id, error = %e, "failed to serialize response"),
    }
}
