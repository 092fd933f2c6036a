//! Email entry and address lookup.

use std::sync::Arc;

use crate::dialog::module::{Module, ModuleHandle};
use crate::dialog::options::is_valid_email;
use crate::dialog::services::Screen;
use crate::protocol::{Command, DialogEvent};

/// Asks for an address, then looks it up.
///
/// With a fixed address the entry screen is skipped.
#[derive(Debug, Clone, Default)]
pub struct Authenticate {
    email: Option<String>,
    fixed: bool,
}

impl Authenticate {
    /// Shows the entry screen, prefilled with `email`.
    #[inline]
    #[must_use]
    pub fn new(email: Option<String>) -> Self {
        Self {
            email,
            fixed: false,
        }
    }

    /// Looks up `email` without asking.
    #[inline]
    #[must_use]
    pub fn fixed(email: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            fixed: true,
        }
    }

    fn look_up(handle: &ModuleHandle, email: String) {
        handle.render(&Screen::Loading);
        let lookup = Arc::clone(&handle.context().services().address_info);
        handle.spawn(async move {
            Some(match lookup.address_info(&email).await {
                Ok(info) => DialogEvent::AddressInfo { email, info },
                Err(e) => DialogEvent::collaborator_failed("address_info", e.message),
            })
        });
    }
}

impl Module for Authenticate {
    fn name(&self) -> &'static str {
        "authenticate"
    }

    fn start(&mut self, handle: &ModuleHandle) {
        if let (true, Some(email)) = (self.fixed, self.email.clone()) {
            Self::look_up(handle, email);
            return;
        }

        handle.render(&Screen::EnterEmail {
            email: self.email.clone(),
            error: None,
        });

        let worker = handle.clone();
        handle.on_command(move |command| {
            let Command::SubmitEmail { email } = command else {
                return;
            };
            let email = email.trim().to_string();
            if is_valid_email(&email) {
                Self::look_up(&worker, email);
            } else {
                worker.render(&Screen::EnterEmail {
                    email: Some(email),
                    error: Some("invalid email address".to_string()),
                });
            }
        });
    }
}
