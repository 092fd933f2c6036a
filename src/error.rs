//! Error types for the identity negotiator.
//!
//! This module defines the crate-level error used by every fallible local
//! operation. Errors that travel over a channel or end a negotiation have
//! their own wire-shaped types:
//!
//! | Type | Where | Shape |
//! |------|-------|-------|
//! | [`Error`] | local API failures | Rust enum |
//! | [`RpcError`](crate::protocol::RpcError) | channel responses | `{code, message}` |
//! | [`ProvisioningError`](crate::provisioning::ProvisioningError) | provisioning | `{code, message}` |
//! | [`NegotiationError`](crate::dialog::NegotiationError) | terminal result | `{code, message}` |
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::InvalidArgument`] |
//! | Addressing | [`Error::InvalidOrigin`], [`Error::InvalidScope`], [`Error::SecurityError`] |
//! | Contexts | [`Error::ContextClosed`], [`Error::RelayNotFound`] |
//! | Channel | [`Error::ChannelDestroyed`], [`Error::TooManyPendingCalls`], [`Error::Protocol`] |
//! | Negotiation | [`Error::AlreadyCompleted`] |
//! | External | [`Error::Json`], [`Error::Url`], [`Error::ChannelClosed`] |

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;

use crate::identifiers::ContextId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when the negotiator is built without a required collaborator.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Invalid argument.
    ///
    /// Returned when caller-supplied parameters fail validation.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    // ========================================================================
    // Addressing Errors
    // ========================================================================
    /// Origin is neither `*` nor an `http(s)://host[:port]` origin.
    #[error("Invalid origin: {origin}")]
    InvalidOrigin {
        /// The rejected origin string.
        origin: String,
    },

    /// Channel scope contains `::`.
    #[error("Invalid scope: '{scope}' may not contain '::'")]
    InvalidScope {
        /// The rejected scope.
        scope: String,
    },

    /// Cross-origin access to a context's globals.
    #[error("Security error: {message}")]
    SecurityError {
        /// Description of the blocked access.
        message: String,
    },

    // ========================================================================
    // Context Errors
    // ========================================================================
    /// Target browsing context has been closed or removed.
    #[error("Context closed: {context_id}")]
    ContextClosed {
        /// The closed context.
        context_id: ContextId,
    },

    /// No relay could be located for the negotiator.
    ///
    /// Fatal: without a relay no result can ever be delivered.
    #[error("relay frame not found")]
    RelayNotFound,

    // ========================================================================
    // Channel Errors
    // ========================================================================
    /// Channel was destroyed before the operation.
    #[error("Channel destroyed")]
    ChannelDestroyed,

    /// Too many outbound calls awaiting a response.
    #[error("Too many pending calls: {pending}/{max}")]
    TooManyPendingCalls {
        /// Current pending count.
        pending: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Protocol violation or unexpected message.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // Negotiation Errors
    // ========================================================================
    /// The negotiation has already produced its terminal result.
    #[error("Negotiation already completed")]
    AlreadyCompleted,

    // ========================================================================
    // External Errors
    // ========================================================================
    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parse error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an invalid origin error.
    #[inline]
    pub fn invalid_origin(origin: impl Into<String>) -> Self {
        Self::InvalidOrigin {
            origin: origin.into(),
        }
    }

    /// Creates an invalid scope error.
    #[inline]
    pub fn invalid_scope(scope: impl Into<String>) -> Self {
        Self::InvalidScope {
            scope: scope.into(),
        }
    }

    /// Creates a security error.
    #[inline]
    pub fn security(message: impl Into<String>) -> Self {
        Self::SecurityError {
            message: message.into(),
        }
    }

    /// Creates a context closed error.
    #[inline]
    pub fn context_closed(context_id: ContextId) -> Self {
        Self::ContextClosed { context_id }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if the error ends the negotiation.
    ///
    /// A missing relay means no result can ever be delivered.
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::RelayNotFound | Self::AlreadyCompleted)
    }

    /// Returns `true` if this is a transport-level error.
    #[inline]
    #[must_use]
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::ContextClosed { .. }
                | Self::ChannelDestroyed
                | Self::ChannelClosed(_)
                | Self::SecurityError { .. }
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::TooManyPendingCalls { .. })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_not_found_display() {
        assert_eq!(Error::RelayNotFound.to_string(), "relay frame not found");
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("missing surface");
        assert_eq!(err.to_string(), "Configuration error: missing surface");
    }

    #[test]
    fn test_is_fatal() {
        assert!(Error::RelayNotFound.is_fatal());
        assert!(!Error::ChannelDestroyed.is_fatal());
    }

    #[test]
    fn test_is_transport_error() {
        assert!(Error::context_closed(ContextId::next()).is_transport_error());
        assert!(Error::ChannelDestroyed.is_transport_error());
        assert!(!Error::config("x").is_transport_error());
    }

    #[test]
    fn test_is_recoverable() {
        let err = Error::TooManyPendingCalls {
            pending: 100,
            max: 100,
        };
        assert!(err.is_recoverable());
        assert!(!Error::RelayNotFound.is_recoverable());
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
