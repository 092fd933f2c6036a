//! Password sign-in for a known secondary address.

use std::sync::Arc;

use crate::dialog::module::{Module, ModuleHandle};
use crate::dialog::services::Screen;
use crate::protocol::{Command, DialogEvent, EventKind};

/// Password entry screen.
#[derive(Debug, Clone)]
pub struct EnterPassword {
    email: String,
}

impl EnterPassword {
    /// Signs in as `email`.
    #[inline]
    #[must_use]
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
        }
    }
}

impl Module for EnterPassword {
    fn name(&self) -> &'static str {
        "enter_password"
    }

    fn start(&mut self, handle: &ModuleHandle) {
        let email = self.email.clone();
        handle.render(&Screen::EnterPassword {
            email: email.clone(),
            error: None,
        });

        let renderer = handle.clone();
        let shown = email.clone();
        handle.subscribe(EventKind::AuthenticationFailed, move |_| {
            renderer.render(&Screen::EnterPassword {
                email: shown.clone(),
                error: Some("incorrect password".to_string()),
            });
        });

        let worker = handle.clone();
        handle.on_command(move |command| match command {
            Command::SubmitPassword { password } if password.is_empty() => {
                worker.render(&Screen::EnterPassword {
                    email: email.clone(),
                    error: Some("password is required".to_string()),
                });
            }
            Command::SubmitPassword { password } => {
                let accounts = Arc::clone(&worker.context().services().accounts);
                let (email, password) = (email.clone(), password.clone());
                worker.render(&Screen::Loading);
                worker.spawn(async move {
                    Some(match accounts.authenticate(&email, &password).await {
                        Ok(true) => DialogEvent::Authenticated { email },
                        Ok(false) => DialogEvent::AuthenticationFailed { email },
                        Err(e) => DialogEvent::collaborator_failed("authenticate", e.message),
                    })
                });
            }
            Command::ForgotPassword => {
                worker.publish(DialogEvent::ForgotPassword {
                    email: email.clone(),
                });
            }
            _ => {}
        });
    }
}
