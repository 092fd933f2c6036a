//! Three-party relay between a caller and the negotiator.
//!
//! The caller and the negotiator popup cannot always talk directly. The
//! caller embeds a relay document served from the negotiator's origin; the
//! negotiator, being same-origin with the relay, calls into it directly.
//!
//! # Flow
//!
//! 1. `Caller::get` embeds the relay frame under a single-use name
//! 2. The relay opens a `mozid` channel to the caller and stashes `get`
//! 3. The negotiator opens with `#name`, resolves the relay, registers
//! 4. The relay forwards the caller's origin and options to the negotiator
//! 5. The negotiator completes; the relay answers only the recorded origin
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Relay`] | Relay document endpoint |
//! | [`RelayBridge`] | Negotiator's handle on the relay |
//! | [`TransportResolver`] | Locates the relay (nested frame or direct) |
//! | [`Caller`] | Relying-party `get` |

// ============================================================================
// Submodules
// ============================================================================

/// Negotiator-side relay handle.
pub mod bridge;

/// Relying-party API.
pub mod caller;

/// Relay document endpoint.
pub mod endpoint;

/// Relay resolution strategies.
pub mod resolver;

// ============================================================================
// Re-exports
// ============================================================================

pub use bridge::RelayBridge;
pub use caller::{
    Caller, CallerConfig, CallerOutcome, CallerSession, DEFAULT_DIALOG_PATH, DEFAULT_RELAY_PATH,
    DocumentHost, RELAY_FRAME_PREFIX, RelayStrategy,
};
pub use endpoint::{
    RELAY_GLOBAL, RELAY_SCOPE, Relay, RelayClient, RelayCompletion, RelayRequest, verbose_message,
};
pub use resolver::{DirectResolver, NestedFrameResolver, TransportResolver};
