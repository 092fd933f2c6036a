//! Identity provider side: document host, configuration, and builder.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Negotiator`] | Serves the relay and dialog documents |
//! | [`NegotiatorBuilder`] | Fluent collaborator wiring |
//! | [`NegotiatorConfig`] | Document paths, strategy, provisioning timing |
//! | [`Negotiation`] | A running negotiation in one dialog |

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder pattern for negotiator configuration.
pub mod builder;

/// Negotiator configuration.
pub mod config;

/// Core negotiator implementation.
pub mod core;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::NegotiatorBuilder;
pub use config::NegotiatorConfig;
pub use core::{Negotiation, Negotiator};
