//! Password reset.

use std::sync::Arc;

use crate::dialog::module::{Module, ModuleHandle};
use crate::dialog::services::Screen;
use crate::protocol::{DialogEvent, EventKind};

/// Sends a reset mail, then tells the user to check their inbox.
#[derive(Debug, Clone)]
pub struct ForgotPassword {
    email: String,
}

impl ForgotPassword {
    /// Resets the password of `email`.
    #[inline]
    #[must_use]
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
        }
    }
}

impl Module for ForgotPassword {
    fn name(&self) -> &'static str {
        "forgot_password"
    }

    fn start(&mut self, handle: &ModuleHandle) {
        handle.render(&Screen::Loading);

        let renderer = handle.clone();
        handle.subscribe(EventKind::PasswordResetRequested, move |event| {
            if let DialogEvent::PasswordResetRequested { email } = event {
                renderer.render(&Screen::CheckEmail {
                    email: email.clone(),
                });
            }
        });

        let accounts = Arc::clone(&handle.context().services().accounts);
        let email = self.email.clone();
        handle.spawn(async move {
            Some(match accounts.request_password_reset(&email).await {
                Ok(()) => DialogEvent::PasswordResetRequested { email },
                Err(e) => DialogEvent::collaborator_failed("request_password_reset", e.message),
            })
        });
    }
}
