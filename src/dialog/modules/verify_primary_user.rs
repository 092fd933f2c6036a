//! Sign-in at a primary provider.

use tracing::info;

use crate::dialog::context::NegotiationError;
use crate::dialog::module::{Module, ModuleHandle};
use crate::dialog::services::{AddressInfo, Screen};
use crate::protocol::{Command, DialogEvent};

/// Offers to leave for the provider's sign-in page, and picks up when the
/// user comes back.
#[derive(Debug, Clone)]
pub struct VerifyPrimaryUser {
    email: String,
    info: AddressInfo,
}

impl VerifyPrimaryUser {
    /// Verifies `email` with the provider described in `info`.
    #[inline]
    #[must_use]
    pub fn new(email: impl Into<String>, info: AddressInfo) -> Self {
        Self {
            email: email.into(),
            info,
        }
    }
}

impl Module for VerifyPrimaryUser {
    fn name(&self) -> &'static str {
        "verify_primary_user"
    }

    fn start(&mut self, handle: &ModuleHandle) {
        let Some(auth_url) = self.info.auth.clone() else {
            handle.publish(DialogEvent::Fatal(NegotiationError::new(
                "internal",
                format!("no authentication url for {}", self.email),
            )));
            return;
        };
        handle.render(&Screen::VerifyPrimaryUser {
            email: self.email.clone(),
            auth_url: auth_url.clone(),
        });

        let worker = handle.clone();
        let (email, info) = (self.email.clone(), self.info.clone());
        handle.on_command(move |command| match command {
            Command::VerifyWithProvider => {
                let context = worker.context();
                context.begin_provider_sign_in(&email);
                info!(email = %email, provider = %auth_url, "Leaving for provider sign-in");
                context.services().surface.navigate(&auth_url);
                worker.publish(DialogEvent::PrimaryUserAuthenticating {
                    email: email.clone(),
                });
            }
            Command::ProviderReturned => {
                worker.publish(DialogEvent::PrimaryUserVerified {
                    email: email.clone(),
                    info: info.clone(),
                });
            }
            _ => {}
        });
    }
}
