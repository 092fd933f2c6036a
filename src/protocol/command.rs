//! User commands entering the dialog.
//!
//! Commands are what the rendering surface reports back: a submitted form,
//! a picked address, a click on "cancel". They travel through the mediator
//! wrapped in [`DialogEvent::Command`](super::DialogEvent::Command).
//!
//! # Format
//!
//! ```json
//! { "command": "submit_email", "params": { "email": "user@example.com" } }
//! { "command": "cancel" }
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};

// ============================================================================
// Command
// ============================================================================

/// An input from the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", content = "params", rename_all = "snake_case")]
pub enum Command {
    /// Email address typed into the entry screen.
    SubmitEmail {
        /// The address as typed.
        email: String,
    },

    /// Password typed into the sign-in or new-account screen.
    SubmitPassword {
        /// The password.
        password: String,
    },

    /// An address chosen from the list of known addresses.
    PickEmail {
        /// The chosen address.
        email: String,
    },

    /// Sign in with an address not in the list.
    UseAnotherEmail,

    /// Request a password reset for the current address.
    ForgotPassword,

    /// Leave for the identity provider to sign in there.
    VerifyWithProvider,

    /// Back from the identity provider.
    ProviderReturned,

    /// Retry after a recoverable error.
    Retry,

    /// Go back to the previous screen.
    Back,

    /// Abandon the negotiation.
    Cancel,

    /// Toggle "remember me".
    SetRememberMe {
        /// New setting.
        remember: bool,
    },

    /// The dialog window is going away.
    WindowUnload,
}

impl Command {
    /// Returns the command name as it appears on the wire.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SubmitEmail { .. } => "submit_email",
            Self::SubmitPassword { .. } => "submit_password",
            Self::PickEmail { .. } => "pick_email",
            Self::UseAnotherEmail => "use_another_email",
            Self::ForgotPassword => "forgot_password",
            Self::VerifyWithProvider => "verify_with_provider",
            Self::ProviderReturned => "provider_returned",
            Self::Retry => "retry",
            Self::Back => "back",
            Self::Cancel => "cancel",
            Self::SetRememberMe { .. } => "set_remember_me",
            Self::WindowUnload => "window_unload",
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
