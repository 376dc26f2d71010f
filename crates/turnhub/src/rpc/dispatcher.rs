// SPDX-License-Identifier: BUSL-1.1

//! Method Registry & Dispatcher (C2).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::connection::hub::ConnId;
use crate::error::{CoordinatorError, ErrorCode, RpcError};
use crate::rpc::envelope::{OwnedEnvelope, RpcResponse};
use crate::state::CoordinatorState;

/// Context handed to every handler: the shared coordinator state plus the
/// identity of the connection the request arrived on.
#[derive(Clone)]
pub struct HandlerContext {
    pub state: Arc<CoordinatorState>,
    pub conn_id: ConnId,
}

#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, ctx: HandlerContext, params: Option<Value>) -> Result<Value, CoordinatorError>;
}

/// A handler built from a plain async closure, for methods that don't need a
/// dedicated type.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(HandlerContext, Option<Value>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Value, CoordinatorError>> + Send,
{
    async fn call(&self, ctx: HandlerContext, params: Option<Value>) -> Result<Value, CoordinatorError> {
        (self.0)(ctx, params).await
    }
}

#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, method: impl Into<String>, handler: Arc<dyn Handler>) {
        self.handlers.insert(method.into(), handler);
    }

    pub fn is_registered(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// Dispatch one parsed envelope. Returns `None` when nothing should be
    /// written back to the connection (notification path), `Some(response)`
    /// otherwise. Follows the contract in spec §4.2 exactly.
    pub async fn dispatch(&self, ctx: HandlerContext, env: OwnedEnvelope) -> Option<RpcResponse> {
        if env.method.is_empty() {
            return env.id.map(|id| RpcResponse::err(id, RpcError::new(ErrorCode::InvalidRequest, "empty method")));
        }

        let Some(handler) = self.handlers.get(env.method.as_str()) else {
            return match env.id {
                Some(id) => Some(RpcResponse::err(
                    id,
                    RpcError::new(ErrorCode::MethodNotFound, format!("unknown method: {}", env.method)),
                )),
                None => {
                    debug!(method = %env.method, "dropping notification for unknown method");
                    None
                }
            };
        };

        match handler.call(ctx, env.params).await {
            Ok(result) => env.id.map(|id| RpcResponse::ok(id, result)),
            Err(err) => match env.id {
                Some(id) => Some(RpcResponse::err(id, err.to_rpc_error())),
                None => {
                    warn!(method = %env.method, error = %err, "notification handler failed");
                    None
                }
            },
        }
    }
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
#[allow(clippy::expect_used)]
mod tests;
