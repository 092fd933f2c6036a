//! Identity Negotiator - cross-context identity negotiation.
//!
//! A relying party (the *caller*) asks an identity provider (the
//! *negotiator*) for a signed assertion. The two run in separate browsing
//! contexts with different origins and only talk through origin-checked
//! message passing.
//!
//! # Architecture
//!
//! ```text
//! Caller ──mozid::get──► Relay (IdP origin, in caller) ◄──register── Negotiator popup
//!                                                                     │
//!                                                   StateMachine ◄────┤
//!                                                        │            │
//!                                 Provisioning (vep_prov) ◄────────────┘
//! ```
//!
//! Key design principles:
//!
//! - Every context pair talks over a scoped, origin-validated [`Channel`]
//! - Each request is answered at most once, and only to the origin it came from
//! - One explicit [`NegotiationContext`] per attempt
//! - Dialog steps are [`Module`]s sequenced by the [`StateMachine`]
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use identity_negotiator::{BrowsingContext, Caller, CallerConfig, Negotiator, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let negotiator = Negotiator::builder()
//!         .backend(backend)
//!         .keys(keys)
//!         .surface(surface)
//!         .build()?;
//!
//!     let rp = BrowsingContext::top_level("https://rp.example/")?;
//!     let caller = Caller::new(rp, Arc::new(negotiator), CallerConfig::new("https://login.example"));
//!     caller.get(serde_json::json!({}), |outcome| println!("{outcome:?}"))?;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`dialog`] | Mediator, modules, and the dialog state machine |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`negotiator`] | Identity provider document host and builder |
//! | [`protocol`] | Wire envelopes, commands, and dialog events |
//! | [`provisioning`] | Primary provider key certification |
//! | [`relay`] | Caller, relay endpoint, and relay resolution |
//! | [`transport`] | Browsing contexts and the message channel |

// ============================================================================
// Modules
// ============================================================================

/// The identity dialog.
///
/// A [`StateMachine`] drives [`Module`]s over a [`Mediator`] until the
/// [`NegotiationContext`] delivers its outcome.
pub mod dialog;

/// Error types and result aliases.
///
/// All fallible local operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Identity provider side.
///
/// Use [`Negotiator::builder()`] to create a configured negotiator.
pub mod negotiator;

/// Wire and event types.
pub mod protocol;

/// Primary provider provisioning handshake.
pub mod provisioning;

/// Three-party relay between caller and negotiator.
pub mod relay;

/// Browsing contexts and message channels.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Dialog types
pub use dialog::{
    AccountService, AddressInfo, AddressInfoLookup, AddressType, AssertionIssuer,
    AssertionRequest, CollaboratorError, CollaboratorResult, GetOptions, Mediator, MemoryStore,
    Module, ModuleHandle, NegotiationContext, NegotiationError, NegotiationOutcome,
    PersistentStore, Screen, Services, StateMachine, StoreKey, Surface,
};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ContextId, NegotiationId, SubscriptionId, TransactionId};

// Negotiator types
pub use negotiator::{Negotiation, Negotiator, NegotiatorBuilder, NegotiatorConfig};

// Protocol types
pub use protocol::{Assertion, Command, DialogEvent, EventKind, RpcError};

// Provisioning types
pub use provisioning::{
    CertifiedKey, KeyGenError, KeyPair, KeyPairGenerator, Provisioning, ProvisioningConfig,
    ProvisioningError, ProvisioningFailure, ProvisioningRequest, SecretKey,
};

// Relay types
pub use relay::{
    Caller, CallerConfig, CallerOutcome, CallerSession, DocumentHost, Relay, RelayBridge,
    RelayCompletion, RelayRequest, RelayStrategy, TransportResolver,
};

// Transport types
pub use transport::{BrowsingContext, Channel, ChannelConfig, FrameOptions, Origin, TargetOrigin, Transaction};
