//! Choose one of the signed-in user's addresses.

use tracing::debug;

use crate::dialog::module::{Module, ModuleHandle};
use crate::dialog::services::Screen;
use crate::protocol::{Command, DialogEvent};

/// Address list screen.
#[derive(Debug, Clone)]
pub struct PickEmail {
    emails: Vec<String>,
}

impl PickEmail {
    /// Offers `emails`.
    #[inline]
    #[must_use]
    pub fn new(emails: Vec<String>) -> Self {
        Self { emails }
    }

    fn selected(&self, handle: &ModuleHandle) -> Option<String> {
        handle
            .context()
            .last_used_email()
            .filter(|email| self.emails.contains(email))
            .or_else(|| self.emails.first().cloned())
    }
}

impl Module for PickEmail {
    fn name(&self) -> &'static str {
        "pick_email"
    }

    fn start(&mut self, handle: &ModuleHandle) {
        handle.render(&Screen::PickEmail {
            emails: self.emails.clone(),
            selected: self.selected(handle),
            allow_persistent: handle.context().options().allow_persistent,
        });

        let emails = self.emails.clone();
        let publisher = handle.clone();
        handle.on_command(move |command| match command {
            Command::PickEmail { email } if emails.contains(email) => {
                publisher.publish(DialogEvent::EmailChosen {
                    email: email.clone(),
                });
            }
            Command::PickEmail { email } => {
                debug!(email = %email, "Picked address not offered");
            }
            Command::UseAnotherEmail => {
                publisher.publish(DialogEvent::Authenticate { email: None });
            }
            _ => {}
        });
    }
}
