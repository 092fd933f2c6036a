//! Account creation for an unknown secondary address.

use std::sync::Arc;

use crate::dialog::module::{Module, ModuleHandle};
use crate::dialog::options::{PASSWORD_MAX_LENGTH, PASSWORD_MIN_LENGTH, is_valid_password};
use crate::dialog::services::Screen;
use crate::protocol::{Command, DialogEvent};

/// New account screen.
///
/// A signed-in user gets the address added to the existing account instead.
#[derive(Debug, Clone)]
pub struct NewUser {
    email: String,
}

impl NewUser {
    /// Creates an account for `email`.
    #[inline]
    #[must_use]
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
        }
    }
}

impl Module for NewUser {
    fn name(&self) -> &'static str {
        "new_user"
    }

    fn start(&mut self, handle: &ModuleHandle) {
        let email = self.email.clone();
        handle.render(&Screen::NewUser {
            email: email.clone(),
            error: None,
        });

        let worker = handle.clone();
        handle.on_command(move |command| {
            let Command::SubmitPassword { password } = command else {
                return;
            };
            if !is_valid_password(password) {
                worker.render(&Screen::NewUser {
                    email: email.clone(),
                    error: Some(format!(
                        "password must be between {PASSWORD_MIN_LENGTH} and {PASSWORD_MAX_LENGTH} characters"
                    )),
                });
                return;
            }

            let accounts = Arc::clone(&worker.context().services().accounts);
            let signed_in = worker.context().is_signed_in();
            let (email, password) = (email.clone(), password.clone());
            worker.render(&Screen::Loading);
            worker.spawn(async move {
                let created = if signed_in {
                    accounts.add_email(&email).await
                } else {
                    accounts.create_user(&email, &password).await
                };
                Some(match created {
                    Ok(()) => DialogEvent::UserCreated { email },
                    Err(e) => DialogEvent::collaborator_failed("create_user", e.message),
                })
            });
        });
    }
}
