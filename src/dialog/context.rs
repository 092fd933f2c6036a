//! Per-attempt negotiation state.
//!
//! Everything one negotiation needs (who asked, with which options, through
//! which collaborators, and where the outcome goes) lives in a
//! [`NegotiationContext`]. Modules and the state machine receive it
//! explicitly; nothing is global, so concurrent negotiations never share
//! state.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::identifiers::NegotiationId;
use crate::protocol::{Assertion, RpcError};
use crate::provisioning::{ProvisioningConfig, ProvisioningError};
use crate::transport::{BrowsingContext, Origin};

use super::options::GetOptions;
use super::services::{Screen, Services, StoreKey};

// ============================================================================
// NegotiationError
// ============================================================================

/// Terminal error of a negotiation.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct NegotiationError {
    /// Error code.
    pub code: String,
    /// Human-readable description.
    pub message: String,
}

impl NegotiationError {
    /// Creates a negotiation error.
    #[inline]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Malformed caller options.
    #[inline]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new("invalid_params", message)
    }

    /// `requiredEmail` is not an address.
    #[inline]
    pub fn invalid_required_email(email: impl Into<String>) -> Self {
        Self::new(
            "invalid_required_email",
            format!("invalid required email: {}", email.into()),
        )
    }

    /// The primary provider refused a user who already signed in with it.
    #[inline]
    pub fn primary_verification_failed(email: &str) -> Self {
        Self::new(
            "primaryError",
            format!("{email} could not be verified by its identity provider"),
        )
    }
}

impl From<ProvisioningError> for NegotiationError {
    fn from(err: ProvisioningError) -> Self {
        Self::new(err.code.as_str(), err.message)
    }
}

impl From<NegotiationError> for RpcError {
    fn from(err: NegotiationError) -> Self {
        Self::new(err.code, err.message)
    }
}

/// Terminal result of a negotiation: an assertion, `None` for
/// cancellation, or an error.
pub type NegotiationOutcome = std::result::Result<Option<Assertion>, NegotiationError>;

type Completion = Box<dyn FnOnce(NegotiationOutcome) + Send>;

// ============================================================================
// NegotiationContext
// ============================================================================

struct ContextInner {
    id: NegotiationId,
    origin: Origin,
    options: GetOptions,
    services: Services,
    host: BrowsingContext,
    provisioning: ProvisioningConfig,
    completion: Mutex<Option<Completion>>,
    emails: Mutex<Vec<String>>,
    succeeded: AtomicBool,
    leaving: AtomicBool,
    verified_with_provider: AtomicBool,
}

/// State and collaborators of one negotiation. Cheap to clone.
#[derive(Clone)]
pub struct NegotiationContext {
    inner: Arc<ContextInner>,
}

impl fmt::Debug for NegotiationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NegotiationContext")
            .field("id", &self.inner.id)
            .field("origin", &self.inner.origin)
            .field("complete", &self.is_complete())
            .finish_non_exhaustive()
    }
}

impl NegotiationContext {
    /// Creates the context for a request from `origin`.
    ///
    /// `host` is the dialog's own browsing context; provisioning documents
    /// are embedded into it. `on_complete` fires exactly once.
    pub fn new<F>(
        origin: Origin,
        options: GetOptions,
        services: Services,
        host: BrowsingContext,
        provisioning: ProvisioningConfig,
        on_complete: F,
    ) -> Self
    where
        F: FnOnce(NegotiationOutcome) + Send + 'static,
    {
        let remember_me = services
            .store
            .get(&origin, StoreKey::RememberMe)
            .is_some_and(|v| v == "true");
        let context = Self {
            inner: Arc::new(ContextInner {
                id: NegotiationId::generate(),
                origin,
                options,
                services,
                host,
                provisioning,
                completion: Mutex::new(Some(Box::new(on_complete))),
                emails: Mutex::new(Vec::new()),
                succeeded: AtomicBool::new(false),
                leaving: AtomicBool::new(false),
                verified_with_provider: AtomicBool::new(false),
            }),
        };
        debug!(negotiation = %context.id(), origin = %context.origin(), remember_me, "Negotiation context created");
        context
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Returns the negotiation ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> NegotiationId {
        self.inner.id
    }

    /// Returns the caller's origin, the audience of the assertion.
    #[inline]
    #[must_use]
    pub fn origin(&self) -> &Origin {
        &self.inner.origin
    }

    /// Returns the caller's options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &GetOptions {
        &self.inner.options
    }

    /// Returns the collaborators.
    #[inline]
    #[must_use]
    pub fn services(&self) -> &Services {
        &self.inner.services
    }

    /// Returns the dialog's browsing context.
    #[inline]
    #[must_use]
    pub fn host(&self) -> &BrowsingContext {
        &self.inner.host
    }

    /// Returns the provisioning settings.
    #[inline]
    #[must_use]
    pub fn provisioning(&self) -> ProvisioningConfig {
        self.inner.provisioning
    }

    /// Shows `screen` on the surface.
    #[inline]
    pub fn render(&self, screen: &Screen) {
        self.inner.services.surface.render(screen);
    }

    // ========================================================================
    // Session state
    // ========================================================================

    /// Records the addresses of the signed-in user.
    pub fn set_emails(&self, emails: Vec<String>) {
        *self.inner.emails.lock() = emails;
    }

    /// Returns the addresses of the signed-in user.
    #[must_use]
    pub fn emails(&self) -> Vec<String> {
        self.inner.emails.lock().clone()
    }

    /// Returns `true` if the user is signed in with at least one address.
    #[must_use]
    pub fn is_signed_in(&self) -> bool {
        !self.inner.emails.lock().is_empty()
    }

    /// Returns the "remember me" setting for this origin.
    #[must_use]
    pub fn remember_me(&self) -> bool {
        self.inner
            .services
            .store
            .get(&self.inner.origin, StoreKey::RememberMe)
            .is_some_and(|v| v == "true")
    }

    /// Stores the "remember me" setting for this origin.
    pub fn set_remember_me(&self, remember: bool) {
        let value = if remember { "true" } else { "false" };
        self.inner
            .services
            .store
            .set(&self.inner.origin, StoreKey::RememberMe, value);
    }

    /// Returns `true` if certificates should be long-lived.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.inner.options.allow_persistent && self.remember_me()
    }

    /// Returns the address last used with this origin.
    #[must_use]
    pub fn last_used_email(&self) -> Option<String> {
        self.inner
            .services
            .store
            .get(&self.inner.origin, StoreKey::LastUsedEmail)
    }

    /// Records that the dialog is leaving for the primary provider with
    /// `email`. An unload while leaving does not cancel.
    pub fn begin_provider_sign_in(&self, email: &str) {
        self.inner.leaving.store(true, Ordering::SeqCst);
        self.inner
            .services
            .store
            .set(&self.inner.origin, StoreKey::PendingVerification, email);
    }

    /// Takes the address left pending at the primary provider, if any.
    pub fn take_pending_verification(&self) -> Option<String> {
        let email = self
            .inner
            .services
            .store
            .remove(&self.inner.origin, StoreKey::PendingVerification)?;
        self.mark_verified_with_provider();
        Some(email)
    }

    /// Records that the user signed in at the primary provider and clears
    /// the pending address.
    pub fn mark_verified_with_provider(&self) {
        self.inner
            .services
            .store
            .remove(&self.inner.origin, StoreKey::PendingVerification);
        self.inner.leaving.store(false, Ordering::SeqCst);
        self.inner
            .verified_with_provider
            .store(true, Ordering::SeqCst);
    }

    /// Returns `true` once the user has signed in at the primary provider.
    #[inline]
    #[must_use]
    pub fn verified_with_provider(&self) -> bool {
        self.inner.verified_with_provider.load(Ordering::SeqCst)
    }

    /// Returns `true` while the dialog is away at the primary provider.
    #[inline]
    #[must_use]
    pub fn is_leaving(&self) -> bool {
        self.inner.leaving.load(Ordering::SeqCst)
    }

    /// Returns `true` once an assertion has been produced.
    #[inline]
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.inner.succeeded.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Completion
    // ========================================================================

    /// Returns `true` once an outcome has been delivered.
    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.inner.completion.lock().is_none()
    }

    /// Completes with `assertion` for `email` and closes the surface.
    ///
    /// Nothing is recorded if an outcome was already delivered.
    pub fn complete_with(&self, email: &str, assertion: Assertion) -> bool {
        let Some(completion) = self.inner.completion.lock().take() else {
            debug!(negotiation = %self.id(), "Outcome already delivered");
            return false;
        };
        self.inner.succeeded.store(true, Ordering::SeqCst);
        self.inner
            .services
            .store
            .set(&self.inner.origin, StoreKey::LastUsedEmail, email);
        completion(Ok(Some(assertion)));

        info!(negotiation = %self.id(), origin = %self.origin(), "Assertion delivered");
        self.inner.services.surface.close();
        true
    }

    /// Completes with `None` and closes the surface.
    pub fn cancel(&self) -> bool {
        let delivered = self.deliver(Ok(None));
        if delivered {
            info!(negotiation = %self.id(), "Negotiation cancelled");
            self.inner.services.surface.close();
        }
        delivered
    }

    /// Renders a non-retryable panel and completes with `error`.
    pub fn fail(&self, error: NegotiationError) -> bool {
        if self.is_complete() {
            return false;
        }
        warn!(negotiation = %self.id(), code = %error.code, message = %error.message, "Negotiation failed");
        self.render(&Screen::Error {
            code: error.code.clone(),
            message: error.message.clone(),
            retryable: false,
        });
        self.deliver(Err(error))
    }

    /// Drops the pending outcome without delivering it.
    ///
    /// Returns `false` if an outcome was already delivered.
    pub(crate) fn discard(&self) -> bool {
        let discarded = self.inner.completion.lock().take().is_some();
        if discarded {
            debug!(negotiation = %self.id(), "Outcome discarded");
        }
        discarded
    }

    fn deliver(&self, outcome: NegotiationOutcome) -> bool {
        let completion = self.inner.completion.lock().take();
        match completion {
            Some(completion) => {
                completion(outcome);
                true
            }
            None => {
                debug!(negotiation = %self.id(), "Outcome already delivered");
                false
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::dialog::services::{
        AccountService, AddressInfo, AddressInfoLookup, AssertionIssuer, AssertionRequest,
        CollaboratorResult, MemoryStore, Surface,
    };
    use crate::provisioning::{KeyGenError, KeyPair, KeyPairGenerator, SecretKey};
    use async_trait::async_trait;
    use url::Url;

    /// Surface that records what it was asked to do.
    #[derive(Default)]
    pub(crate) struct RecordingSurface {
        pub screens: Mutex<Vec<Screen>>,
        pub navigations: Mutex<Vec<Url>>,
        pub closed: AtomicBool,
    }

    impl RecordingSurface {
        pub fn last(&self) -> Option<Screen> {
            self.screens.lock().last().cloned()
        }
    }

    impl Surface for RecordingSurface {
        fn render(&self, screen: &Screen) {
            self.screens.lock().push(screen.clone());
        }

        fn navigate(&self, url: &Url) {
            self.navigations.lock().push(url.clone());
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    /// Collaborators answering from fixed data.
    pub(crate) struct FakeBackend {
        pub emails: Vec<String>,
        pub password: &'static str,
        pub primary: Option<AddressInfo>,
        pub fail_listing: bool,
    }

    impl Default for FakeBackend {
        fn default() -> Self {
            Self {
                emails: Vec::new(),
                password: "correct horse",
                primary: None,
                fail_listing: false,
            }
        }
    }

    #[async_trait]
    impl AddressInfoLookup for FakeBackend {
        async fn address_info(&self, email: &str) -> CollaboratorResult<AddressInfo> {
            if email.ends_with("@primary.example") {
                return self
                    .primary
                    .clone()
                    .ok_or_else(|| crate::dialog::CollaboratorError::new("no primary"));
            }
            Ok(AddressInfo::secondary(email.starts_with("known")))
        }
    }

    #[async_trait]
    impl AssertionIssuer for FakeBackend {
        async fn issue(&self, request: AssertionRequest) -> CollaboratorResult<Option<Assertion>> {
            Ok(Some(Assertion::new(format!(
                "assertion:{}:{}",
                request.email, request.audience
            ))))
        }
    }

    #[async_trait]
    impl AccountService for FakeBackend {
        async fn list_emails(&self) -> CollaboratorResult<Vec<String>> {
            if self.fail_listing {
                return Err(crate::dialog::CollaboratorError::new("backend down"));
            }
            Ok(self.emails.clone())
        }

        async fn authenticate(&self, _email: &str, password: &str) -> CollaboratorResult<bool> {
            Ok(password == self.password)
        }

        async fn create_user(&self, _email: &str, _password: &str) -> CollaboratorResult<()> {
            Ok(())
        }

        async fn add_email(&self, _email: &str) -> CollaboratorResult<()> {
            Ok(())
        }

        async fn request_password_reset(&self, _email: &str) -> CollaboratorResult<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl KeyPairGenerator for FakeBackend {
        async fn generate(&self) -> std::result::Result<KeyPair, KeyGenError> {
            Ok(KeyPair::new("public", SecretKey::new(vec![7u8; 4])))
        }
    }

    pub(crate) fn services(
        backend: FakeBackend,
        surface: Arc<RecordingSurface>,
        store: Arc<MemoryStore>,
    ) -> Services {
        let backend = Arc::new(backend);
        Services {
            address_info: backend.clone(),
            issuer: backend.clone(),
            accounts: backend.clone(),
            store,
            keys: backend,
            surface,
        }
    }

    pub(crate) type Outcomes = Arc<Mutex<Vec<NegotiationOutcome>>>;

    pub(crate) fn context_with(
        backend: FakeBackend,
        options: GetOptions,
    ) -> (NegotiationContext, Arc<RecordingSurface>, Outcomes) {
        let surface = Arc::new(RecordingSurface::default());
        let outcomes: Outcomes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&outcomes);
        let host = BrowsingContext::top_level("https://idp.example/sign_in").expect("host");
        let context = NegotiationContext::new(
            Origin::parse("https://rp.example").expect("origin"),
            options,
            services(backend, Arc::clone(&surface), Arc::new(MemoryStore::new())),
            host,
            ProvisioningConfig::new(),
            move |outcome| sink.lock().push(outcome),
        );
        (context, surface, outcomes)
    }

    #[test]
    fn test_outcome_delivered_once() {
        let (context, surface, outcomes) = context_with(FakeBackend::default(), GetOptions::default());

        assert!(context.complete_with("a@rp.example", Assertion::new("A1")));
        assert!(!context.cancel());
        assert!(!context.fail(NegotiationError::new("x", "y")));

        assert_eq!(*outcomes.lock(), vec![Ok(Some(Assertion::new("A1")))]);
        assert!(context.succeeded());
        assert!(surface.closed.load(Ordering::SeqCst));
        assert_eq!(context.last_used_email().as_deref(), Some("a@rp.example"));
    }

    #[test]
    fn test_late_assertion_records_nothing() {
        let (context, _, outcomes) = context_with(FakeBackend::default(), GetOptions::default());

        assert!(context.cancel());
        assert!(!context.complete_with("late@rp.example", Assertion::new("LATE")));

        assert_eq!(*outcomes.lock(), vec![Ok(None)]);
        assert!(!context.succeeded());
        assert_eq!(context.last_used_email(), None);
    }

    #[test]
    fn test_discarded_outcome_is_never_delivered() {
        let (context, _, outcomes) = context_with(FakeBackend::default(), GetOptions::default());

        assert!(context.discard());
        assert!(context.is_complete());
        assert!(!context.cancel());
        assert!(!context.discard());
        assert!(outcomes.lock().is_empty());
    }

    #[test]
    fn test_fail_renders_panel() {
        let (context, surface, outcomes) = context_with(FakeBackend::default(), GetOptions::default());

        assert!(context.fail(NegotiationError::new("timeoutError", "Provisioning timed out.")));
        assert_eq!(
            surface.last(),
            Some(Screen::Error {
                code: "timeoutError".into(),
                message: "Provisioning timed out.".into(),
                retryable: false,
            })
        );
        assert!(matches!(outcomes.lock().as_slice(), [Err(e)] if e.code == "timeoutError"));
        assert!(!surface.closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_persistence_needs_permission_and_preference() {
        let (context, _, _) = context_with(FakeBackend::default(), GetOptions::default());
        context.set_remember_me(true);
        assert!(context.remember_me());
        assert!(!context.is_persistent());

        let options = GetOptions {
            allow_persistent: true,
            ..GetOptions::default()
        };
        let (context, _, _) = context_with(FakeBackend::default(), options);
        context.set_remember_me(true);
        assert!(context.is_persistent());
    }

    #[test]
    fn test_pending_verification_round_trip() {
        let (context, _, _) = context_with(FakeBackend::default(), GetOptions::default());
        context.begin_provider_sign_in("u@primary.example");
        assert!(context.is_leaving());

        assert_eq!(
            context.take_pending_verification().as_deref(),
            Some("u@primary.example")
        );
        assert!(context.verified_with_provider());
        assert!(!context.is_leaving());
        assert_eq!(context.take_pending_verification(), None);
    }
}
