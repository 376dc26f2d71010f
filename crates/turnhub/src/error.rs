// SPDX-License-Identifier: BUSL-1.1

//! Wire-level error taxonomy for the coordinator.
//!
//! JSON-RPC error codes are a stable wire contract (spec §4.2, §6); the
//! [`CoordinatorError`] enum below maps the broader failure kinds of §7
//! onto them so every call site produces one of the documented codes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable JSON-RPC 2.0 error codes, plus one custom retryable code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    Overloaded,
}

impl ErrorCode {
    pub fn code(self) -> i64 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::Overloaded => -32000,
        }
    }
}

/// A JSON-RPC error object, ready to embed in a response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code: code.code(), message: message.into(), data: None }
    }

    /// The overloaded error always carries a retry hint (spec §4.2/§6).
    pub fn overloaded(retry_after_ms: u64) -> Self {
        Self {
            code: ErrorCode::Overloaded.code(),
            message: "connection overloaded".to_owned(),
            data: Some(serde_json::json!({ "retry_after_ms": retry_after_ms })),
        }
    }
}

/// Failure kinds named in spec §7. Not every variant maps 1:1 to a single
/// RPC error — `WorkerCrash` and `ResumeCandidateError` are handled by the
/// caller (Session Recovery) before they ever reach the wire.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("connection overloaded")]
    Overload { retry_after_ms: u64 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("worker crashed: {0}")]
    WorkerCrash(String),

    #[error("resume candidate failed: {0}")]
    ResumeCandidate(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoordinatorError {
    /// Map to the wire-level RPC error that a handler failure should produce.
    pub fn to_rpc_error(&self) -> RpcError {
        match self {
            Self::Protocol(m) => RpcError::new(ErrorCode::InvalidRequest, m.clone()),
            Self::InvalidParams(m) => RpcError::new(ErrorCode::InvalidParams, m.clone()),
            Self::Overload { retry_after_ms } => RpcError::overloaded(*retry_after_ms),
            Self::NotFound(m) => RpcError::new(ErrorCode::InternalError, m.clone()),
            Self::Transport(m) => RpcError::new(ErrorCode::InternalError, m.clone()),
            Self::WorkerCrash(m) => RpcError::new(ErrorCode::InternalError, m.clone()),
            Self::ResumeCandidate(m) => RpcError::new(ErrorCode::InternalError, m.clone()),
            Self::Timeout(m) => RpcError::new(ErrorCode::InternalError, m.clone()),
            Self::Internal(m) => RpcError::new(ErrorCode::InternalError, m.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_match_wire_contract() {
        assert_eq!(ErrorCode::ParseError.code(), -32700);
        assert_eq!(ErrorCode::InvalidRequest.code(), -32600);
        assert_eq!(ErrorCode::MethodNotFound.code(), -32601);
        assert_eq!(ErrorCode::InvalidParams.code(), -32602);
        assert_eq!(ErrorCode::InternalError.code(), -32603);
    }

    #[test]
    fn overloaded_carries_retry_hint() {
        let err = RpcError::overloaded(500);
        assert_eq!(err.data.as_ref().and_then(|d| d.get("retry_after_ms")).and_then(|v| v.as_u64()), Some(500));
    }
}
