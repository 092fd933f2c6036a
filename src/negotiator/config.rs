//! Negotiator configuration.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use identity_negotiator::NegotiatorConfig;
//!
//! let config = NegotiatorConfig::new()
//!     .with_provisioning_timeout(Duration::from_secs(30))
//!     .with_dialog_path("/sign_in");
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::borrow::Cow;
use std::time::Duration;

use crate::provisioning::ProvisioningConfig;
use crate::relay::{DEFAULT_DIALOG_PATH, DEFAULT_RELAY_PATH, RelayStrategy};

// ============================================================================
// NegotiatorConfig
// ============================================================================

/// Where the negotiator serves its documents and how it reaches callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatorConfig {
    /// Path of the relay document.
    pub relay_path: Cow<'static, str>,

    /// Path of the dialog document.
    pub dialog_path: Cow<'static, str>,

    /// How the dialog finds its relay.
    pub strategy: RelayStrategy,

    /// Provisioning timing.
    pub provisioning: ProvisioningConfig,
}

impl Default for NegotiatorConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl NegotiatorConfig {
    /// Creates the default configuration.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            relay_path: Cow::Borrowed(DEFAULT_RELAY_PATH),
            dialog_path: Cow::Borrowed(DEFAULT_DIALOG_PATH),
            strategy: RelayStrategy::NestedFrame,
            provisioning: ProvisioningConfig::new(),
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl NegotiatorConfig {
    /// Sets the relay document path.
    #[inline]
    #[must_use]
    pub fn with_relay_path(mut self, path: impl Into<Cow<'static, str>>) -> Self {
        self.relay_path = path.into();
        self
    }

    /// Sets the dialog document path.
    #[inline]
    #[must_use]
    pub fn with_dialog_path(mut self, path: impl Into<Cow<'static, str>>) -> Self {
        self.dialog_path = path.into();
        self
    }

    /// Sets how the dialog finds its relay.
    #[inline]
    #[must_use]
    pub const fn with_strategy(mut self, strategy: RelayStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets the provisioning budget.
    #[inline]
    #[must_use]
    pub const fn with_provisioning_timeout(mut self, timeout: Duration) -> Self {
        self.provisioning.timeout = timeout;
        self
    }

    /// Sets certificate lifetimes for persistent and ephemeral sessions.
    #[inline]
    #[must_use]
    pub const fn with_cert_durations(mut self, persistent: Duration, ephemeral: Duration) -> Self {
        self.provisioning.persistent_cert_duration = persistent;
        self.provisioning.ephemeral_cert_duration = ephemeral;
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl NegotiatorConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error message if a path is not absolute, both paths are
    /// equal, or a duration is zero.
    pub fn validate(&self) -> Result<(), String> {
        for (name, path) in [("relay", &self.relay_path), ("dialog", &self.dialog_path)] {
            if !path.starts_with('/') || path.starts_with("//") {
                return Err(format!("{name} path must be an absolute path: ({path})"));
            }
        }
        if self.relay_path == self.dialog_path {
            return Err("relay and dialog paths must differ".to_string());
        }
        if self.provisioning.timeout.is_zero() {
            return Err("provisioning timeout must be greater than zero".to_string());
        }
        if self.provisioning.persistent_cert_duration.is_zero()
            || self.provisioning.ephemeral_cert_duration.is_zero()
        {
            return Err("certificate durations must be greater than zero".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provisioning::DEFAULT_PROVISIONING_TIMEOUT;

    #[test]
    fn test_defaults() {
        let config = NegotiatorConfig::default();
        assert_eq!(config.relay_path, "/relay");
        assert_eq!(config.dialog_path, "/sign_in");
        assert_eq!(config.strategy, RelayStrategy::NestedFrame);
        assert_eq!(config.provisioning.timeout, DEFAULT_PROVISIONING_TIMEOUT);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_methods() {
        let config = NegotiatorConfig::new()
            .with_relay_path("/communication_iframe")
            .with_strategy(RelayStrategy::Direct)
            .with_provisioning_timeout(Duration::from_secs(5))
            .with_cert_durations(Duration::from_secs(60), Duration::from_secs(30));

        assert_eq!(config.relay_path, "/communication_iframe");
        assert_eq!(config.strategy, RelayStrategy::Direct);
        assert_eq!(config.provisioning.timeout, Duration::from_secs(5));
        assert_eq!(config.provisioning.cert_duration(true), Duration::from_secs(60));
        assert_eq!(config.provisioning.cert_duration(false), Duration::from_secs(30));
    }

    #[test]
    fn test_validation() {
        assert!(NegotiatorConfig::new().with_dialog_path("sign_in").validate().is_err());
        assert!(NegotiatorConfig::new().with_relay_path("//evil").validate().is_err());
        assert!(NegotiatorConfig::new().with_relay_path("/sign_in").validate().is_err());
        assert!(
            NegotiatorConfig::new()
                .with_provisioning_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
    }
}
