//! Cross-context messaging.
//!
//! This module models browsing contexts and runs scoped RPC channels between
//! them.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐    post_message     ┌──────────────────┐
//! │  Context A       │────────────────────►│  Context B       │
//! │  Channel ──────► │   {id, method, ..}  │  ──► Handler     │
//! │  callbacks ◄──── │◄────────────────────│  Transaction     │
//! └──────────────────┘   {id, result}      └──────────────────┘
//! ```
//!
//! # Channel Lifecycle
//!
//! 1. `Channel::build` - Subscribe to the local context, spawn the event loop
//! 2. `Channel::bind` - Register handlers for inbound calls
//! 3. `Channel::call` / `Channel::notify` - Talk to the remote
//! 4. `Channel::destroy` - Drop pending calls, release the subscription
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `channel` | RPC channel and event loop |
//! | `context` | Browsing contexts and message delivery |
//! | `origin` | Origins and target-origin matching |
//! | `transaction` | Inbound call state |

// ============================================================================
// Submodules
// ============================================================================

/// RPC channel and event loop.
pub mod channel;

/// Browsing contexts and message delivery.
pub mod context;

/// Web origins.
pub mod origin;

/// Inbound call transactions.
pub mod transaction;

// ============================================================================
// Re-exports
// ============================================================================

pub use channel::{Channel, ChannelConfig, Handler, MAX_PENDING_CALLS};
pub use context::{BrowsingContext, FrameOptions, InboundMessage, MessageListener};
pub use origin::{Origin, TargetOrigin};
pub use transaction::{Transaction, TransactionState};
