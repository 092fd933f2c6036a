//! Certificate provisioning from a primary identity provider.
//!
//! The negotiator embeds the provider's hidden provisioning document and
//! answers its calls over a `vep_prov` channel. The provider receives only
//! the public key; the secret key never leaves the negotiator.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Provisioning`] | One provisioning session |
//! | [`ProvisioningRequest`] | Email, provisioning URL, persistence |
//! | [`ProvisioningConfig`] | Timeout and certificate lifetimes |
//! | [`KeyPairGenerator`] | Key generation collaborator |
//! | [`CertifiedKey`] | Key pair plus provider certificate |

// ============================================================================
// Submodules
// ============================================================================

/// Provisioning session and channel handlers.
pub mod handshake;

/// Key material types and the key generation trait.
pub mod keys;

// ============================================================================
// Re-exports
// ============================================================================

pub use handshake::{
    DEFAULT_PROVISIONING_TIMEOUT, EPHEMERAL_CERT_DURATION, PERSISTENT_CERT_DURATION,
    PROVISIONING_SCOPE, Provisioning, ProvisioningConfig, ProvisioningError, ProvisioningFailure,
    ProvisioningRequest, provisioning_origin,
};
pub use keys::{CertifiedKey, KeyGenError, KeyPair, KeyPairGenerator, SecretKey};
