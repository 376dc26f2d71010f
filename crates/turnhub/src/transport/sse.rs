// SPDX-License-Identifier: BUSL-1.1

//! Server-Sent Events transport: a read-only alternative delivering the same
//! broadcast payloads the duplex socket carries, for clients that only need
//! to observe (§4.1 "GET /sse, one-way").

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use futures_util::stream::{self, Stream};
use tokio::sync::mpsc;

use crate::connection::hub::{ConnId, ConnectionHub};
use crate::state::CoordinatorState;
use crate::transport::auth;

struct SseState {
    rx: mpsc::Receiver<Vec<u8>>,
    guard: DisconnectGuard,
}

struct DisconnectGuard {
    hub: Arc<ConnectionHub>,
    conn_id: ConnId,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        let hub = self.hub.clone();
        let conn_id = self.conn_id;
        tokio::spawn(async move { hub.disconnect(conn_id).await });
    }
}

pub async fn sse_handler(
    State(state): State<Arc<CoordinatorState>>,
    headers: axum::http::HeaderMap,
) -> impl IntoResponse {
    if auth::validate_origin(&headers).is_err() {
        return auth::unauthorized_response(&crate::error::CoordinatorError::Protocol("origin rejected".to_owned())).into_response();
    }
    if auth::validate_bearer(&headers, state.config.auth_token.as_deref()).is_err() {
        return auth::unauthorized_response(&crate::error::CoordinatorError::Protocol("missing or invalid token".to_owned())).into_response();
    }

    let (conn_id, rx) = match state.hub.accept().await {
        Ok(pair) => pair,
        Err(e) => return auth::unauthorized_response(&e).into_response(),
    };

    let initial = SseState { rx, guard: DisconnectGuard { hub: state.hub.clone(), conn_id } };
    let events = build_event_stream(initial);
    Sse::new(events).keep_alive(KeepAlive::default()).into_response()
}

fn build_event_stream(initial: SseState) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(initial, |mut st| async move {
        let bytes = st.rx.recv().await?;
        let text = String::from_utf8_lossy(&bytes).into_owned();
        Some((Ok(Event::default().data(text)), st))
    })
}
