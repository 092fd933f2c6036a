//! Message types.
//!
//! This module defines what travels between contexts and what travels
//! inside a dialog.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `Request` | Caller → Callee | Method call expecting a response |
//! | `Response` | Callee → Caller | Result or error for a request |
//! | `Notification` | Either | One-way message |
//! | `Command` | Surface → Dialog | User input |
//! | `DialogEvent` | Within the dialog | Mediator event |
//!
//! # Method Naming
//!
//! Channel methods travel as `scope::method`:
//!
//! - `mozid::get`
//! - `vep_prov::beginProvisioning`
//! - `vep_prov::registerCertificate`
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `assertion` | Opaque signed assertions |
//! | `command` | User commands |
//! | `envelope` | Channel wire format |
//! | `event` | Dialog events |

// ============================================================================
// Submodules
// ============================================================================

/// Signed identity assertions.
pub mod assertion;

/// User commands.
pub mod command;

/// Channel wire format.
pub mod envelope;

/// Dialog events.
pub mod event;

// ============================================================================
// Re-exports
// ============================================================================

pub use assertion::Assertion;
pub use command::Command;
pub use envelope::{Envelope, Notification, Request, Response, RpcError};
pub use event::{DialogEvent, EventKind};
