//! Collaborators the dialog depends on.
//!
//! The dialog never renders, stores accounts, or signs anything itself. It
//! talks to these traits, which the host implements.
//!
//! | Trait | Concern |
//! |-------|---------|
//! | [`AddressInfoLookup`] | Primary or secondary, known or not |
//! | [`AssertionIssuer`] | Signing assertions |
//! | [`AccountService`] | Account sessions and management |
//! | [`PersistentStore`] | Per-origin preferences |
//! | [`Surface`] | Rendering and navigation |
//!
//! Key generation uses [`KeyPairGenerator`] from the provisioning module.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::protocol::Assertion;
use crate::provisioning::{CertifiedKey, KeyPairGenerator};
use crate::transport::Origin;

// ============================================================================
// CollaboratorError
// ============================================================================

/// A collaborator call failed.
///
/// These failures are recoverable: the dialog shows a retry panel and stays
/// where it is.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct CollaboratorError {
    /// Error description.
    pub message: String,
}

impl CollaboratorError {
    /// Creates a collaborator error.
    #[inline]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Result of a collaborator call.
pub type CollaboratorResult<T> = std::result::Result<T, CollaboratorError>;

// ============================================================================
// AddressInfo
// ============================================================================

/// Who vouches for an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressType {
    /// The address's domain runs its own identity provider.
    Primary,
    /// The fallback provider vouches for the address.
    Secondary,
}

/// What the lookup service knows about an address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressInfo {
    /// Primary or secondary.
    #[serde(rename = "type")]
    pub kind: AddressType,
    /// The address has an account.
    #[serde(default)]
    pub known: bool,
    /// The user is signed in with this address.
    #[serde(default)]
    pub authed: bool,
    /// Provider sign-in page, for primary addresses.
    #[serde(default)]
    pub auth: Option<Url>,
    /// Provider provisioning page, for primary addresses.
    #[serde(default)]
    pub prov: Option<Url>,
}

impl AddressInfo {
    /// Creates info for a secondary address.
    #[inline]
    #[must_use]
    pub const fn secondary(known: bool) -> Self {
        Self {
            kind: AddressType::Secondary,
            known,
            authed: false,
            auth: None,
            prov: None,
        }
    }

    /// Creates info for a primary address served by `auth` and `prov`.
    #[inline]
    #[must_use]
    pub const fn primary(auth: Url, prov: Url) -> Self {
        Self {
            kind: AddressType::Primary,
            known: true,
            authed: false,
            auth: Some(auth),
            prov: Some(prov),
        }
    }

    /// Returns `true` for primary addresses.
    #[inline]
    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.kind == AddressType::Primary
    }
}

/// Looks up addresses.
#[async_trait]
pub trait AddressInfoLookup: Send + Sync {
    /// Returns what is known about `email`.
    async fn address_info(&self, email: &str) -> CollaboratorResult<AddressInfo>;
}

// ============================================================================
// AssertionIssuer
// ============================================================================

/// What to sign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionRequest {
    /// The address the assertion vouches for.
    pub email: String,
    /// The relying party the assertion is bound to.
    pub audience: Origin,
    /// Provider-certified key for primary addresses. `None` asks the
    /// issuer to certify a key itself.
    pub certificate: Option<CertifiedKey>,
}

/// Signs assertions.
#[async_trait]
pub trait AssertionIssuer: Send + Sync {
    /// Issues an assertion, or `None` if the address cannot be used.
    async fn issue(&self, request: AssertionRequest) -> CollaboratorResult<Option<Assertion>>;
}

// ============================================================================
// AccountService
// ============================================================================

/// Account sessions and management.
#[async_trait]
pub trait AccountService: Send + Sync {
    /// Lists the addresses of the signed-in user. Empty if signed out.
    async fn list_emails(&self) -> CollaboratorResult<Vec<String>>;

    /// Signs in with a password. `Ok(false)` means the password was wrong.
    async fn authenticate(&self, email: &str, password: &str) -> CollaboratorResult<bool>;

    /// Creates an account for `email`.
    async fn create_user(&self, email: &str, password: &str) -> CollaboratorResult<()>;

    /// Adds `email` to the signed-in account.
    async fn add_email(&self, email: &str) -> CollaboratorResult<()>;

    /// Sends a password reset mail.
    async fn request_password_reset(&self, email: &str) -> CollaboratorResult<()>;
}

// ============================================================================
// PersistentStore
// ============================================================================

/// Keys of the per-origin store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKey {
    /// Address last used with the origin.
    LastUsedEmail,
    /// "Remember me" setting, `"true"` or `"false"`.
    RememberMe,
    /// Address awaiting sign-in at its primary provider.
    PendingVerification,
}

/// Per-origin key/value storage.
pub trait PersistentStore: Send + Sync {
    /// Reads a value.
    fn get(&self, origin: &Origin, key: StoreKey) -> Option<String>;

    /// Writes a value.
    fn set(&self, origin: &Origin, key: StoreKey, value: &str);

    /// Removes a value, returning the old one.
    fn remove(&self, origin: &Origin, key: StoreKey) -> Option<String>;
}

/// In-memory [`PersistentStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<FxHashMap<(Origin, StoreKey), String>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored values.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if nothing is stored.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl PersistentStore for MemoryStore {
    fn get(&self, origin: &Origin, key: StoreKey) -> Option<String> {
        self.entries.lock().get(&(origin.clone(), key)).cloned()
    }

    fn set(&self, origin: &Origin, key: StoreKey, value: &str) {
        self.entries
            .lock()
            .insert((origin.clone(), key), value.to_string());
    }

    fn remove(&self, origin: &Origin, key: StoreKey) -> Option<String> {
        self.entries.lock().remove(&(origin.clone(), key))
    }
}

// ============================================================================
// Surface
// ============================================================================

/// A screen the surface should show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screen {
    /// Busy indicator.
    Loading,
    /// Email entry.
    EnterEmail {
        /// Prefilled address.
        email: Option<String>,
        /// Inline validation message.
        error: Option<String>,
    },
    /// Address list.
    PickEmail {
        /// Known addresses.
        emails: Vec<String>,
        /// Address to preselect.
        selected: Option<String>,
        /// Offer "remember me".
        allow_persistent: bool,
    },
    /// Password entry for an existing account.
    EnterPassword {
        /// The address signing in.
        email: String,
        /// Inline validation message.
        error: Option<String>,
    },
    /// Password choice for a new account.
    NewUser {
        /// The new address.
        email: String,
        /// Inline validation message.
        error: Option<String>,
    },
    /// Offer to sign in at the primary provider.
    VerifyPrimaryUser {
        /// The address to verify.
        email: String,
        /// Provider sign-in page.
        auth_url: Url,
    },
    /// A reset mail was sent.
    CheckEmail {
        /// The address the mail went to.
        email: String,
    },
    /// Error panel.
    Error {
        /// Error code.
        code: String,
        /// Error description.
        message: String,
        /// The user may retry.
        retryable: bool,
    },
}

impl Screen {
    /// Returns `true` for error panels.
    #[inline]
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

/// Rendering and navigation boundary.
pub trait Surface: Send + Sync {
    /// Shows `screen`.
    fn render(&self, screen: &Screen);

    /// Leaves the dialog for `url`.
    fn navigate(&self, url: &Url);

    /// Closes the dialog.
    fn close(&self);
}

// ============================================================================
// Services
// ============================================================================

/// The full set of collaborators for a negotiation.
#[derive(Clone)]
pub struct Services {
    /// Address lookup.
    pub address_info: Arc<dyn AddressInfoLookup>,
    /// Assertion signing.
    pub issuer: Arc<dyn AssertionIssuer>,
    /// Account management.
    pub accounts: Arc<dyn AccountService>,
    /// Per-origin preferences.
    pub store: Arc<dyn PersistentStore>,
    /// Key generation for provisioning.
    pub keys: Arc<dyn KeyPairGenerator>,
    /// Rendering.
    pub surface: Arc<dyn Surface>,
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_address_info_wire_format() {
        let info: AddressInfo = serde_json::from_value(json!({
            "type": "primary",
            "auth": "https://idp.example/auth",
            "prov": "https://idp.example/prov",
        }))
        .expect("parse");
        assert!(info.is_primary());
        assert!(!info.known);
        assert_eq!(info.prov.as_ref().map(Url::as_str), Some("https://idp.example/prov"));

        let info: AddressInfo =
            serde_json::from_value(json!({ "type": "secondary", "known": true })).expect("parse");
        assert_eq!(info, AddressInfo::secondary(true));
    }

    #[test]
    fn test_memory_store_is_per_origin() {
        let store = MemoryStore::new();
        let rp = Origin::parse("https://rp.example").expect("origin");
        let other = Origin::parse("https://other.example").expect("origin");

        store.set(&rp, StoreKey::LastUsedEmail, "a@rp.example");
        assert_eq!(
            store.get(&rp, StoreKey::LastUsedEmail).as_deref(),
            Some("a@rp.example")
        );
        assert_eq!(store.get(&other, StoreKey::LastUsedEmail), None);
        assert_eq!(store.get(&rp, StoreKey::RememberMe), None);

        assert_eq!(
            store.remove(&rp, StoreKey::LastUsedEmail).as_deref(),
            Some("a@rp.example")
        );
        assert!(store.is_empty());
    }
}
