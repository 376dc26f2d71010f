// SPDX-License-Identifier: BUSL-1.1

//! Parse-once JSON-RPC envelope handling (C1/C3).
//!
//! [`Envelope`] borrows straight out of the raw frame bytes so the
//! connection read-loop pays for exactly one parse. The response fast-path
//! (`is_client_response` + [`parse_int_id`]) never builds a `serde_json::Value`
//! for the id — correlator lookups stay allocation-free.

use serde::Deserialize;
use serde_json::value::RawValue;

/// One JSON-RPC frame, fields left as raw slices until a caller needs them.
#[derive(Debug, Deserialize)]
pub struct Envelope<'a> {
    #[serde(default)]
    pub jsonrpc: Option<&'a str>,
    #[serde(default, borrow)]
    pub id: Option<&'a RawValue>,
    #[serde(default)]
    pub method: Option<&'a str>,
    #[serde(default, borrow)]
    pub params: Option<&'a RawValue>,
    #[serde(default, borrow)]
    pub result: Option<&'a RawValue>,
    #[serde(default, borrow)]
    pub error: Option<&'a RawValue>,
}

impl<'a> Envelope<'a> {
    /// `id` present, `method` absent, and a `result` or `error` present:
    /// this frame is a client reply to a server-originated request (§4.1).
    pub fn is_client_response(&self) -> bool {
        self.id.is_some() && self.method.is_none() && (self.result.is_some() || self.error.is_some())
    }
}

/// Parse an id that is a JSON integer (optionally signed) directly from its
/// raw text, with no intermediate `Value` allocation. Anything else — a
/// float, a string, `null` — is rejected, matching spec §4.3's fast-path
/// contract.
pub fn parse_int_id(raw: &str) -> Option<i64> {
    let bytes = raw.as_bytes();
    let (neg, digits) = match bytes.first() {
        Some(b'-') => (true, &bytes[1..]),
        _ => (false, bytes),
    };
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let mut value: i64 = 0;
    for &b in digits {
        value = value.checked_mul(10)?.checked_add(i64::from(b - b'0'))?;
    }
    Some(if neg { -value } else { value })
}

/// Owned request/notification envelope, used once a frame has left the
/// fast-path and needs to travel across an `.await` into the dispatcher.
#[derive(Debug, Clone)]
pub struct OwnedEnvelope {
    pub id: Option<serde_json::Value>,
    pub method: String,
    pub params: Option<serde_json::Value>,
}

impl OwnedEnvelope {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

pub fn to_owned(env: &Envelope<'_>) -> Option<OwnedEnvelope> {
    let method = env.method?;
    let id = match env.id {
        Some(raw) => Some(serde_json::from_str(raw.get()).ok()?),
        None => None,
    };
    let params = match env.params {
        Some(raw) => Some(serde_json::from_str(raw.get()).ok()?),
        None => None,
    };
    Some(OwnedEnvelope { id, method: method.to_owned(), params })
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    pub id: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<crate::error::RpcError>,
}

impl RpcResponse {
    pub fn ok(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self { jsonrpc: "2.0", id, result: Some(result), error: None }
    }

    pub fn err(id: serde_json::Value, error: crate::error::RpcError) -> Self {
        Self { jsonrpc: "2.0", id, result: None, error: Some(error) }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl RpcNotification {
    pub fn new(method: impl Into<String>, params: serde_json::Value) -> Self {
        Self { jsonrpc: "2.0", method: method.into(), params: Some(params) }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RpcRequestOut {
    pub jsonrpc: &'static str,
    pub id: i64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_integer() {
        assert_eq!(parse_int_id("42"), Some(42));
    }

    #[test]
    fn parses_negative_integer() {
        assert_eq!(parse_int_id("-7"), Some(-7));
    }

    #[test]
    fn rejects_float() {
        assert_eq!(parse_int_id("4.2"), None);
    }

    #[test]
    fn rejects_string() {
        assert_eq!(parse_int_id("\"4\""), None);
    }

    #[test]
    fn rejects_null() {
        assert_eq!(parse_int_id("null"), None);
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(parse_int_id(""), None);
        assert_eq!(parse_int_id("-"), None);
    }

    #[test]
    fn detects_client_response() {
        let raw = r#"{"jsonrpc":"2.0","id":3,"result":{}}"#;
        let env: Envelope<'_> = serde_json::from_str(raw).expect("valid envelope");
        assert!(env.is_client_response());
    }

    #[test]
    fn request_is_not_a_response() {
        let raw = r#"{"jsonrpc":"2.0","id":3,"method":"turn/start","params":{}}"#;
        let env: Envelope<'_> = serde_json::from_str(raw).expect("valid envelope");
        assert!(!env.is_client_response());
    }
}
