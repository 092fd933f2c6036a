//! Lists the addresses the user is signed in with.

use std::sync::Arc;

use crate::dialog::module::{Module, ModuleHandle};
use crate::dialog::services::Screen;
use crate::protocol::DialogEvent;

/// First step of every negotiation.
#[derive(Debug, Default)]
pub struct CheckAuth;

impl Module for CheckAuth {
    fn name(&self) -> &'static str {
        "check_auth"
    }

    fn start(&mut self, handle: &ModuleHandle) {
        handle.render(&Screen::Loading);
        let accounts = Arc::clone(&handle.context().services().accounts);
        handle.spawn(async move {
            Some(match accounts.list_emails().await {
                Ok(emails) => DialogEvent::AuthenticationChecked { emails },
                Err(e) => DialogEvent::collaborator_failed("list_emails", e.message),
            })
        });
    }
}
