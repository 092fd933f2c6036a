//! Events carried by the dialog mediator.
//!
//! Every state change inside a negotiation is announced as a [`DialogEvent`].
//! Subscribers register by [`EventKind`], so a handler for
//! `EventKind::AddressInfo` sees every address lookup regardless of payload.
//!
//! # Event Types
//!
//! | Kind | Published by | Meaning |
//! |------|--------------|---------|
//! | `Start` | negotiation | A caller request arrived |
//! | `Command` | surface | User input |
//! | `AuthenticationChecked` | `check_auth` | Known addresses listed |
//! | `Authenticate` | state machine | Email entry requested |
//! | `AddressInfo` | `authenticate` | Address looked up |
//! | `AuthenticationFailed` | `enter_password` | Wrong password |
//! | `Authenticated` / `UserCreated` / `EmailChosen` | modules | Address ready to sign |
//! | `ForgotPassword` / `PasswordResetRequested` | `enter_password`, `forgot_password` | Reset flow |
//! | `PrimaryUser*` | provisioning modules | Primary provider flow |
//! | `AssertionGenerated` | `generate_assertion` | Assertion issued |
//! | `CollaboratorFailed` | modules | Recoverable backend failure |
//! | `Fatal` | modules | Unrecoverable failure |

// ============================================================================
// Imports
// ============================================================================

use crate::dialog::{AddressInfo, NegotiationError};
use crate::provisioning::CertifiedKey;

use super::assertion::Assertion;
use super::command::Command;

// ============================================================================
// EventKind
// ============================================================================

/// Discriminant of a [`DialogEvent`], used as the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// [`DialogEvent::Start`].
    Start,
    /// [`DialogEvent::Command`].
    Command,
    /// [`DialogEvent::AuthenticationChecked`].
    AuthenticationChecked,
    /// [`DialogEvent::Authenticate`].
    Authenticate,
    /// [`DialogEvent::AddressInfo`].
    AddressInfo,
    /// [`DialogEvent::AuthenticationFailed`].
    AuthenticationFailed,
    /// [`DialogEvent::Authenticated`].
    Authenticated,
    /// [`DialogEvent::UserCreated`].
    UserCreated,
    /// [`DialogEvent::EmailChosen`].
    EmailChosen,
    /// [`DialogEvent::ForgotPassword`].
    ForgotPassword,
    /// [`DialogEvent::PasswordResetRequested`].
    PasswordResetRequested,
    /// [`DialogEvent::PrimaryUserProvisioned`].
    PrimaryUserProvisioned,
    /// [`DialogEvent::PrimaryUserUnauthenticated`].
    PrimaryUserUnauthenticated,
    /// [`DialogEvent::PrimaryUserAuthenticating`].
    PrimaryUserAuthenticating,
    /// [`DialogEvent::PrimaryUserVerified`].
    PrimaryUserVerified,
    /// [`DialogEvent::AssertionGenerated`].
    AssertionGenerated,
    /// [`DialogEvent::CollaboratorFailed`].
    CollaboratorFailed,
    /// [`DialogEvent::Fatal`].
    Fatal,
}

// ============================================================================
// DialogEvent
// ============================================================================

/// An event published on the dialog mediator.
#[derive(Debug, Clone)]
pub enum DialogEvent {
    /// The negotiation begins.
    Start,

    /// User input.
    Command(Command),

    /// The account service listed the user's addresses.
    AuthenticationChecked {
        /// Addresses the user is signed in with. Empty if signed out.
        emails: Vec<String>,
    },

    /// Show the email entry screen.
    Authenticate {
        /// Address to prefill.
        email: Option<String>,
    },

    /// Address lookup finished.
    AddressInfo {
        /// The address looked up.
        email: String,
        /// What the lookup service knows about it.
        info: AddressInfo,
    },

    /// The password was rejected.
    AuthenticationFailed {
        /// The address signing in.
        email: String,
    },

    /// Password sign-in succeeded.
    Authenticated {
        /// The signed-in address.
        email: String,
    },

    /// A new account or address was created.
    UserCreated {
        /// The new address.
        email: String,
    },

    /// The user chose a known address.
    EmailChosen {
        /// The chosen address.
        email: String,
    },

    /// The user forgot the password for `email`.
    ForgotPassword {
        /// The address to reset.
        email: String,
    },

    /// A reset mail was sent.
    PasswordResetRequested {
        /// The address the mail went to.
        email: String,
    },

    /// The primary provider certified a key.
    PrimaryUserProvisioned {
        /// The certified address.
        email: String,
        /// Key pair and certificate.
        key: CertifiedKey,
    },

    /// The primary provider wants the user to sign in with it first.
    PrimaryUserUnauthenticated {
        /// The address being provisioned.
        email: String,
        /// Lookup result, carrying the provider URLs.
        info: AddressInfo,
    },

    /// The dialog is leaving for the provider's sign-in page.
    PrimaryUserAuthenticating {
        /// The address being verified.
        email: String,
    },

    /// The user came back from the provider.
    PrimaryUserVerified {
        /// The verified address.
        email: String,
        /// Lookup result, carrying the provider URLs.
        info: AddressInfo,
    },

    /// An assertion was issued, or `None` if the issuer declined.
    AssertionGenerated {
        /// The address the assertion vouches for.
        email: String,
        /// The issued assertion.
        assertion: Option<Assertion>,
    },

    /// A backend call failed; the user may retry.
    CollaboratorFailed {
        /// What was being attempted.
        action: &'static str,
        /// Error description.
        message: String,
    },

    /// The negotiation cannot continue.
    Fatal(NegotiationError),
}

impl DialogEvent {
    /// Returns the subscription key for this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Start => EventKind::Start,
            Self::Command(_) => EventKind::Command,
            Self::AuthenticationChecked { .. } => EventKind::AuthenticationChecked,
            Self::Authenticate { .. } => EventKind::Authenticate,
            Self::AddressInfo { .. } => EventKind::AddressInfo,
            Self::AuthenticationFailed { .. } => EventKind::AuthenticationFailed,
            Self::Authenticated { .. } => EventKind::Authenticated,
            Self::UserCreated { .. } => EventKind::UserCreated,
            Self::EmailChosen { .. } => EventKind::EmailChosen,
            Self::ForgotPassword { .. } => EventKind::ForgotPassword,
            Self::PasswordResetRequested { .. } => EventKind::PasswordResetRequested,
            Self::PrimaryUserProvisioned { .. } => EventKind::PrimaryUserProvisioned,
            Self::PrimaryUserUnauthenticated { .. } => EventKind::PrimaryUserUnauthenticated,
            Self::PrimaryUserAuthenticating { .. } => EventKind::PrimaryUserAuthenticating,
            Self::PrimaryUserVerified { .. } => EventKind::PrimaryUserVerified,
            Self::AssertionGenerated { .. } => EventKind::AssertionGenerated,
            Self::CollaboratorFailed { .. } => EventKind::CollaboratorFailed,
            Self::Fatal(_) => EventKind::Fatal,
        }
    }

    /// Returns the wrapped command, if this is a command event.
    #[inline]
    #[must_use]
    pub const fn as_command(&self) -> Option<&Command> {
        match self {
            Self::Command(command) => Some(command),
            _ => None,
        }
    }

    /// Creates a [`DialogEvent::CollaboratorFailed`].
    #[inline]
    pub fn collaborator_failed(action: &'static str, message: impl Into<String>) -> Self {
        Self::CollaboratorFailed {
            action,
            message: message.into(),
        }
    }
}

impl From<Command> for DialogEvent {
    fn from(command: Command) -> Self {
        Self::Command(command)
    }
}

// ============================================================================
// Tests
// ============================================================================
