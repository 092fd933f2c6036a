//! Builder pattern for negotiator configuration.
//!
//! Provides a fluent API for wiring collaborators into a [`Negotiator`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use identity_negotiator::Negotiator;
//!
//! let negotiator = Negotiator::builder()
//!     .backend(Arc::clone(&backend))
//!     .keys(Arc::new(generator))
//!     .surface(Arc::new(surface))
//!     .build()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use crate::dialog::{
    AccountService, AddressInfoLookup, AssertionIssuer, MemoryStore, PersistentStore, Services,
    Surface,
};
use crate::error::{Error, Result};
use crate::provisioning::KeyPairGenerator;

use super::config::NegotiatorConfig;
use super::core::Negotiator;

// ============================================================================
// NegotiatorBuilder
// ============================================================================

/// Builder for configuring a [`Negotiator`] instance.
///
/// Use [`Negotiator::builder()`] to create a new builder.
#[derive(Default, Clone)]
pub struct NegotiatorBuilder {
    address_info: Option<Arc<dyn AddressInfoLookup>>,
    issuer: Option<Arc<dyn AssertionIssuer>>,
    accounts: Option<Arc<dyn AccountService>>,
    store: Option<Arc<dyn PersistentStore>>,
    keys: Option<Arc<dyn KeyPairGenerator>>,
    surface: Option<Arc<dyn Surface>>,
    config: NegotiatorConfig,
}

impl fmt::Debug for NegotiatorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NegotiatorBuilder")
            .field("address_info", &self.address_info.is_some())
            .field("issuer", &self.issuer.is_some())
            .field("accounts", &self.accounts.is_some())
            .field("store", &self.store.is_some())
            .field("keys", &self.keys.is_some())
            .field("surface", &self.surface.is_some())
            .field("config", &self.config)
            .finish()
    }
}

// ============================================================================
// NegotiatorBuilder Implementation
// ============================================================================

impl NegotiatorBuilder {
    /// Creates a new builder with no collaborators.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the address lookup service.
    #[inline]
    #[must_use]
    pub fn address_info(mut self, lookup: Arc<dyn AddressInfoLookup>) -> Self {
        self.address_info = Some(lookup);
        self
    }

    /// Sets the assertion issuer.
    #[inline]
    #[must_use]
    pub fn issuer(mut self, issuer: Arc<dyn AssertionIssuer>) -> Self {
        self.issuer = Some(issuer);
        self
    }

    /// Sets the account service.
    #[inline]
    #[must_use]
    pub fn accounts(mut self, accounts: Arc<dyn AccountService>) -> Self {
        self.accounts = Some(accounts);
        self
    }

    /// Sets lookup, issuer, and accounts from one backend.
    #[must_use]
    pub fn backend<B>(self, backend: Arc<B>) -> Self
    where
        B: AddressInfoLookup + AssertionIssuer + AccountService + 'static,
    {
        self.address_info(backend.clone())
            .issuer(backend.clone())
            .accounts(backend)
    }

    /// Sets the per-origin store. Defaults to a [`MemoryStore`].
    #[inline]
    #[must_use]
    pub fn store(mut self, store: Arc<dyn PersistentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the key generator used during provisioning.
    #[inline]
    #[must_use]
    pub fn keys(mut self, keys: Arc<dyn KeyPairGenerator>) -> Self {
        self.keys = Some(keys);
        self
    }

    /// Sets the rendering surface.
    #[inline]
    #[must_use]
    pub fn surface(mut self, surface: Arc<dyn Surface>) -> Self {
        self.surface = Some(surface);
        self
    }

    /// Replaces the configuration.
    #[inline]
    #[must_use]
    pub fn config(mut self, config: NegotiatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the negotiator with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if a required collaborator is not set
    /// - [`Error::Config`] if the configuration is invalid
    pub fn build(self) -> Result<Negotiator> {
        self.config.validate().map_err(Error::config)?;
        let services = self.validate_services()?;

        Ok(Negotiator::new(self.config, services))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl NegotiatorBuilder {
    /// Validates that every required collaborator is present.
    fn validate_services(&self) -> Result<Services> {
        Ok(Services {
            address_info: required(&self.address_info, "Address lookup", "address_info")?,
            issuer: required(&self.issuer, "Assertion issuer", "issuer")?,
            accounts: required(&self.accounts, "Account service", "accounts")?,
            store: self
                .store
                .clone()
                .unwrap_or_else(|| Arc::new(MemoryStore::new())),
            keys: required(&self.keys, "Key generator", "keys")?,
            surface: required(&self.surface, "Surface", "surface")?,
        })
    }
}

fn required<T: ?Sized>(value: &Option<Arc<T>>, what: &str, setter: &str) -> Result<Arc<T>> {
    value.clone().ok_or_else(|| {
        Error::config(format!(
            "{what} is required. Use .{setter}() to set it.\n\
             Example: Negotiator::builder().backend(backend).keys(keys).surface(surface)"
        ))
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialog::context::tests::{FakeBackend, RecordingSurface};

    fn complete() -> NegotiatorBuilder {
        let backend = Arc::new(FakeBackend::default());
        NegotiatorBuilder::new()
            .backend(Arc::clone(&backend))
            .keys(backend)
            .surface(Arc::new(RecordingSurface::default()))
    }

    #[test]
    fn test_new_creates_empty_builder() {
        let builder = NegotiatorBuilder::new();
        assert!(builder.address_info.is_none());
        assert!(builder.surface.is_none());
        assert_eq!(builder.config, NegotiatorConfig::default());
    }

    #[test]
    fn test_backend_sets_three_collaborators() {
        let builder = NegotiatorBuilder::new().backend(Arc::new(FakeBackend::default()));
        assert!(builder.address_info.is_some());
        assert!(builder.issuer.is_some());
        assert!(builder.accounts.is_some());
        assert!(builder.keys.is_none());
    }

    #[test]
    fn test_build_requires_surface() {
        let backend = Arc::new(FakeBackend::default());
        let err = NegotiatorBuilder::new()
            .backend(Arc::clone(&backend))
            .keys(backend)
            .build()
            .expect_err("missing surface");
        assert!(matches!(err, Error::Config { .. }));
        assert!(err.to_string().contains(".surface()"));
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let err = complete()
            .config(NegotiatorConfig::new().with_dialog_path("sign_in"))
            .build()
            .expect_err("relative path");
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_build_defaults_store() {
        let negotiator = complete().build().expect("build");
        assert_eq!(negotiator.active_count(), 0);
    }
}
