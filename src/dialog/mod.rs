//! The identity dialog.
//!
//! A negotiation runs as a set of modules on a mediator, sequenced by the
//! state machine:
//!
//! ```text
//! Surface ──Command──► Mediator ◄──events── Modules
//!                          │                   ▲
//!                          ▼                   │ goto / pop
//!                     StateMachine ────────────┘
//!                          │
//!                          ▼
//!              NegotiationContext::complete_with / cancel / fail
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `context` | Per-attempt state and the terminal outcome |
//! | `mediator` | FIFO publish/subscribe bus |
//! | `module` | Module trait and handle |
//! | `modules` | One module per dialog step |
//! | `options` | Caller option validation |
//! | `services` | Collaborator traits |
//! | `state_machine` | Module sequencing |

// ============================================================================
// Submodules
// ============================================================================

/// Per-attempt negotiation state.
pub mod context;

/// Publish/subscribe bus.
pub mod mediator;

/// Module lifecycle.
pub mod module;

/// Dialog steps.
pub mod modules;

/// Caller options.
pub mod options;

/// Collaborator traits.
pub mod services;

/// Module sequencing.
pub mod state_machine;

// ============================================================================
// Re-exports
// ============================================================================

pub use context::{NegotiationContext, NegotiationError, NegotiationOutcome};
pub use mediator::{EventHandler, Mediator};
pub use module::{Module, ModuleHandle};
pub use options::{GetOptions, is_valid_email};
pub use services::{
    AccountService, AddressInfo, AddressInfoLookup, AddressType, AssertionIssuer,
    AssertionRequest, CollaboratorError, CollaboratorResult, MemoryStore, PersistentStore, Screen,
    Services, StoreKey, Surface,
};
pub use state_machine::StateMachine;
