//! Key material handled during provisioning.
//!
//! Key generation is a collaborator concern: the crate never inspects key
//! bytes. The public half travels to the provider as a serialized string;
//! the secret half stays in the negotiator and is only handed to the
//! assertion issuer.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

// ============================================================================
// SecretKey
// ============================================================================

/// Opaque private key material.
///
/// `Debug` never prints the bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey(Arc<[u8]>);

impl SecretKey {
    /// Wraps raw key bytes.
    #[inline]
    #[must_use]
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self(bytes.into())
    }

    /// Returns the raw key bytes.
    #[inline]
    #[must_use]
    pub fn expose(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

// ============================================================================
// KeyPair
// ============================================================================

/// A generated key pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    public_key: String,
    secret: SecretKey,
}

impl KeyPair {
    /// Creates a key pair from a serialized public key and its secret.
    #[inline]
    #[must_use]
    pub fn new(public_key: impl Into<String>, secret: SecretKey) -> Self {
        Self {
            public_key: public_key.into(),
            secret,
        }
    }

    /// Returns the serialized public key sent to the provider.
    #[inline]
    #[must_use]
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Returns the secret half.
    #[inline]
    #[must_use]
    pub fn secret(&self) -> &SecretKey {
        &self.secret
    }
}

// ============================================================================
// CertifiedKey
// ============================================================================

/// A key pair together with the certificate a provider issued for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertifiedKey {
    /// The key pair generated for this provisioning.
    pub key_pair: KeyPair,
    /// The provider-signed certificate over the public key.
    pub certificate: String,
}

// ============================================================================
// KeyPairGenerator
// ============================================================================

/// Key generation failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Key generation failed: {message}")]
pub struct KeyGenError {
    /// Description of the failure.
    pub message: String,
}

impl KeyGenError {
    /// Creates a key generation error.
    #[inline]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Generates key pairs for provisioning.
#[async_trait]
pub trait KeyPairGenerator: Send + Sync {
    /// Generates a fresh key pair.
    async fn generate(&self) -> Result<KeyPair, KeyGenError>;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_key_debug_is_redacted() {
        let secret = SecretKey::new(vec![1u8, 2, 3]);
        assert_eq!(format!("{secret:?}"), "SecretKey(..)");
        assert_eq!(secret.expose(), &[1, 2, 3]);
    }

    #[test]
    fn test_key_pair_accessors() {
        let pair = KeyPair::new("PUB", SecretKey::new(vec![9u8]));
        assert_eq!(pair.public_key(), "PUB");
        assert!(!format!("{pair:?}").contains('9'));
    }
}
