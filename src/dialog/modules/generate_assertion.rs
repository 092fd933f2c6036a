//! Assertion issuance.

use std::sync::Arc;

use crate::dialog::module::{Module, ModuleHandle};
use crate::dialog::services::{AssertionRequest, Screen};
use crate::protocol::DialogEvent;
use crate::provisioning::CertifiedKey;

/// Signs an assertion for the chosen address.
#[derive(Debug, Clone)]
pub struct GenerateAssertion {
    email: String,
    certificate: Option<CertifiedKey>,
}

impl GenerateAssertion {
    /// Signs for `email`, with a provider certificate for primary addresses.
    #[inline]
    #[must_use]
    pub fn new(email: impl Into<String>, certificate: Option<CertifiedKey>) -> Self {
        Self {
            email: email.into(),
            certificate,
        }
    }
}

impl Module for GenerateAssertion {
    fn name(&self) -> &'static str {
        "generate_assertion"
    }

    fn start(&mut self, handle: &ModuleHandle) {
        handle.render(&Screen::Loading);

        let issuer = Arc::clone(&handle.context().services().issuer);
        let request = AssertionRequest {
            email: self.email.clone(),
            audience: handle.context().origin().clone(),
            certificate: self.certificate.clone(),
        };
        handle.spawn(async move {
            let email = request.email.clone();
            Some(match issuer.issue(request).await {
                Ok(assertion) => DialogEvent::AssertionGenerated { email, assertion },
                Err(e) => DialogEvent::collaborator_failed("issue_assertion", e.message),
            })
        });
    }
}
