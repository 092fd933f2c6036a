//! Channel envelopes.
//!
//! Every message a channel posts is one JSON object in one of four shapes.
//!
//! Request:
//! ```json
//! { "id": 7, "method": "mozid::get", "params": { ... } }
//! ```
//!
//! Result:
//! ```json
//! { "id": 7, "result": { ... } }
//! ```
//!
//! Error:
//! ```json
//! { "id": 7, "error": "canceled", "message": "user canceled selection" }
//! ```
//!
//! Notification (no response expected):
//! ```json
//! { "method": "mozid::ping", "params": null }
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::Result;
use crate::identifiers::TransactionId;

// ============================================================================
// Constants
// ============================================================================

/// Separator between a channel scope and a method name.
pub const SCOPE_SEPARATOR: &str = "::";

/// No handler is bound for the requested method.
pub const UNKNOWN_METHOD: &str = "unknownMethod";

/// A handler failed without naming an error code.
pub const RUNTIME_ERROR: &str = "runtime_error";

/// No response arrived within the call's timeout.
pub const TIMEOUT_ERROR: &str = "timeout_error";

/// The request could not be posted to the remote context.
pub const TRANSPORT_ERROR: &str = "transport_error";

/// The channel was destroyed before the call was made.
pub const CHANNEL_DESTROYED: &str = "channel_destroyed";

/// Too many outbound calls are awaiting a response.
pub const TOO_MANY_PENDING: &str = "too_many_pending";

// ============================================================================
// Request
// ============================================================================

/// An RPC request carrying a transaction ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation ID.
    pub id: TransactionId,
    /// Scoped method, `scope::method`.
    pub method: String,
    /// Method parameters.
    #[serde(default)]
    pub params: Value,
}

impl Request {
    /// Creates a request for `method` in `scope`.
    #[inline]
    #[must_use]
    pub fn new(scope: &str, method: &str, params: Value) -> Self {
        Self {
            id: TransactionId::next(),
            method: scoped_method(scope, method),
            params,
        }
    }
}

// ============================================================================
// Notification
// ============================================================================

/// A one-way message without a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Scoped method, `scope::method`.
    pub method: String,
    /// Method parameters.
    #[serde(default)]
    pub params: Value,
}

impl Notification {
    /// Creates a notification for `method` in `scope`.
    #[inline]
    #[must_use]
    pub fn new(scope: &str, method: &str, params: Value) -> Self {
        Self {
            method: scoped_method(scope, method),
            params,
        }
    }
}

// ============================================================================
// Response
// ============================================================================

/// A transaction's result or error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Matches the request `id`.
    pub id: TransactionId,

    /// Result value (if success).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error code (if error).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Error message (if error).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Response {
    /// Creates a success response.
    #[inline]
    #[must_use]
    pub fn success(id: TransactionId, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
            message: None,
        }
    }

    /// Creates an error response.
    #[inline]
    #[must_use]
    pub fn failure(id: TransactionId, error: RpcError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error.code),
            message: Some(error.message),
        }
    }

    /// Returns `true` if this is an error response.
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Extracts the result value, or the remote error.
    ///
    /// # Errors
    ///
    /// Returns the [`RpcError`] the remote replied with.
    pub fn into_result(self) -> std::result::Result<Value, RpcError> {
        match self.error {
            Some(code) => {
                let message = self.message.unwrap_or_else(|| code.clone());
                Err(RpcError { code, message })
            }
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// Any message a channel can receive.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Envelope {
    /// Incoming call.
    Request(Request),
    /// Reply to one of our calls.
    Response(Response),
    /// One-way message.
    Notification(Notification),
}

impl Envelope {
    /// Parses an envelope from serialized message data.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) if the data matches none
    /// of the envelope shapes.
    pub fn parse(data: &str) -> Result<Self> {
        Ok(serde_json::from_str(data)?)
    }

    /// Returns the scoped method, for requests and notifications.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(request) => Some(&request.method),
            Self::Notification(notification) => Some(&notification.method),
            Self::Response(_) => None,
        }
    }
}

// ============================================================================
// RpcError
// ============================================================================

/// An error carried in a response envelope.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct RpcError {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable description.
    pub message: String,
}

impl RpcError {
    /// Creates an error with an explicit code.
    #[inline]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Creates a `runtime_error` for a handler failure without a code.
    #[inline]
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(RUNTIME_ERROR, message)
    }

    /// Creates the reply sent when no handler is bound for `method`.
    #[inline]
    pub fn unknown_method(method: &str) -> Self {
        Self::new(UNKNOWN_METHOD, format!("No such method: {method}"))
    }

    /// Creates the error fired when a call times out.
    #[inline]
    pub fn timeout(timeout_ms: u64, method: &str) -> Self {
        Self::new(
            TIMEOUT_ERROR,
            format!("timeout ({timeout_ms}ms) exceeded on method '{method}'"),
        )
    }

    /// Creates the error fired when a request could not be posted.
    #[inline]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(TRANSPORT_ERROR, message)
    }

    /// Returns `true` if the remote had no handler for the method.
    #[inline]
    #[must_use]
    pub fn is_unknown_method(&self) -> bool {
        self.code == UNKNOWN_METHOD
    }

    /// Returns `true` if the call timed out locally.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.code == TIMEOUT_ERROR
    }
}

impl From<crate::Error> for RpcError {
    fn from(err: crate::Error) -> Self {
        match err {
            crate::Error::ChannelDestroyed => Self::new(CHANNEL_DESTROYED, err.to_string()),
            crate::Error::TooManyPendingCalls { .. } => {
                Self::new(TOO_MANY_PENDING, err.to_string())
            }
            other => Self::transport(other.to_string()),
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Joins a scope and a method; an empty scope leaves the method bare.
#[inline]
#[must_use]
pub fn scoped_method(scope: &str, method: &str) -> String {
    if scope.is_empty() {
        method.to_string()
    } else {
        format!("{scope}{SCOPE_SEPARATOR}{method}")
    }
}

/// Strips `scope::` from a scoped method.
///
/// Returns `None` if the method belongs to another scope.
#[inline]
#[must_use]
pub fn strip_scope<'a>(scope: &str, method: &'a str) -> Option<&'a str> {
    if scope.is_empty() {
        return (!method.contains(SCOPE_SEPARATOR)).then_some(method);
    }
    method
        .strip_prefix(scope)
        .and_then(|rest| rest.strip_prefix(SCOPE_SEPARATOR))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let request = Request::new("mozid", "get", json!({"requiredEmail": null}));
        let json = serde_json::to_value(&request).expect("serialize");

        assert_eq!(json["method"], "mozid::get");
        assert!(json["id"].is_u64());
    }

    #[test]
    fn test_parse_shapes() {
        let request = Envelope::parse(r#"{"id": 1, "method": "vep_prov::genKeyPair"}"#)
            .expect("request");
        assert!(matches!(request, Envelope::Request(ref r) if r.params.is_null()));

        let result = Envelope::parse(r#"{"id": 1, "result": "ASSERTION1"}"#).expect("result");
        assert!(matches!(result, Envelope::Response(ref r) if !r.is_error()));

        let notify = Envelope::parse(r#"{"method": "mozid::ping", "params": 3}"#).expect("notify");
        assert_eq!(notify.method(), Some("mozid::ping"));
        assert!(matches!(notify, Envelope::Notification(_)));

        assert!(Envelope::parse(r#"{"hello": "world"}"#).is_err());
        assert!(Envelope::parse("not json").is_err());
    }

    #[test]
    fn test_error_response_wire_format() {
        let response = Response::failure(
            TransactionId::from_u64(9),
            RpcError::new("canceled", "user canceled selection"),
        );
        let json = serde_json::to_value(&response).expect("serialize");

        assert_eq!(
            json,
            json!({"id": 9, "error": "canceled", "message": "user canceled selection"})
        );
    }

    #[test]
    fn test_into_result_error() {
        let response: Response =
            serde_json::from_str(r#"{"id": 2, "error": "serverError"}"#).expect("parse");
        let err = response.into_result().expect_err("error response");

        assert_eq!(err.code, "serverError");
        assert_eq!(err.message, "serverError");
    }

    #[test]
    fn test_null_result_is_success() {
        let response: Response = serde_json::from_str(r#"{"id": 3, "result": null}"#).expect("parse");
        assert_eq!(response.into_result(), Ok(Value::Null));
    }

    #[test]
    fn test_timeout_message() {
        let err = RpcError::timeout(200, "mozid::get");
        assert!(err.is_timeout());
        assert_eq!(err.message, "timeout (200ms) exceeded on method 'mozid::get'");
    }

    #[test]
    fn test_strip_scope() {
        assert_eq!(strip_scope("mozid", "mozid::get"), Some("get"));
        assert_eq!(strip_scope("mozid", "vep_prov::get"), None);
        assert_eq!(strip_scope("mozid", "mozidget"), None);
        assert_eq!(strip_scope("", "get"), Some("get"));
        assert_eq!(strip_scope("", "mozid::get"), None);
    }
}
