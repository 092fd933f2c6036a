//! Certificate provisioning from a primary provider.

use std::sync::Arc;

use tracing::debug;

use crate::dialog::context::NegotiationError;
use crate::dialog::module::{Module, ModuleHandle};
use crate::dialog::services::{AddressInfo, Screen};
use crate::protocol::DialogEvent;
use crate::provisioning::{Provisioning, ProvisioningRequest};

/// Runs a provisioning session for a primary address.
///
/// A provider refusal becomes [`DialogEvent::PrimaryUserUnauthenticated`];
/// timeouts and internal failures are fatal.
#[derive(Debug)]
pub struct ProvisionPrimaryUser {
    email: String,
    info: AddressInfo,
    session: Option<Provisioning>,
}

impl ProvisionPrimaryUser {
    /// Provisions `email`, served by the provider described in `info`.
    #[inline]
    #[must_use]
    pub fn new(email: impl Into<String>, info: AddressInfo) -> Self {
        Self {
            email: email.into(),
            info,
            session: None,
        }
    }
}

impl Module for ProvisionPrimaryUser {
    fn name(&self) -> &'static str {
        "provision_primary_user"
    }

    fn start(&mut self, handle: &ModuleHandle) {
        let Some(prov) = self.info.prov.clone() else {
            handle.publish(DialogEvent::Fatal(NegotiationError::new(
                "internal",
                format!("no provisioning url for {}", self.email),
            )));
            return;
        };
        handle.render(&Screen::Loading);

        let context = handle.context();
        let request = ProvisioningRequest::new(self.email.as_str(), prov.as_str())
            .with_persistent(context.is_persistent());

        let (on_success, on_failure) = (handle.clone(), handle.clone());
        let (email, info) = (self.email.clone(), self.info.clone());
        let provisioned = self.email.clone();
        self.session = Some(Provisioning::start(
            context.host(),
            request,
            Arc::clone(&context.services().keys),
            context.provisioning(),
            move |key| {
                on_success.publish(DialogEvent::PrimaryUserProvisioned {
                    email: provisioned,
                    key,
                });
            },
            move |error| {
                let event = if error.is_primary_error() {
                    DialogEvent::PrimaryUserUnauthenticated { email, info }
                } else {
                    DialogEvent::Fatal(error.into())
                };
                on_failure.publish(event);
            },
        ));
    }

    fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            debug!(email = %self.email, active = session.is_active(), "Provisioning module stopped");
            session.cancel();
        }
    }
}
