//! Primary provisioning session.
//!
//! A [`Provisioning`] embeds the provider's hidden provisioning document,
//! opens a `vep_prov` channel to it and serves the provider's calls:
//!
//! | Method | Reply |
//! |--------|-------|
//! | `beginProvisioning` | `{email, cert_duration_s}` |
//! | `genKeyPair` | serialized public key (delayed return) |
//! | `registerCertificate` | ends the session with success |
//! | `raiseProvisioningFailure` | ends the session with `primaryError` |
//!
//! The session ends exactly once: success, explicit failure, timeout or
//! cancellation. Every ending tears the session down (timer, channel, hidden
//! document) before the callback runs.
//!
//! # Timeout
//!
//! The budget starts when the hidden document signals it loaded and restarts
//! on every later load. No budget runs before the first load.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, LazyLock, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::protocol::RpcError;
use crate::transport::{
    BrowsingContext, Channel, ChannelConfig, FrameOptions, Origin, TargetOrigin, Transaction,
};

use super::keys::{CertifiedKey, KeyPair, KeyPairGenerator};

// ============================================================================
// Constants
// ============================================================================

/// Channel scope for provisioning.
pub const PROVISIONING_SCOPE: &str = "vep_prov";

/// Default provisioning budget, counted from the hidden document's load.
pub const DEFAULT_PROVISIONING_TIMEOUT: Duration = Duration::from_secs(20);

/// Certificate lifetime requested for a persistent session.
pub const PERSISTENT_CERT_DURATION: Duration = Duration::from_secs(6 * 60 * 60);

/// Certificate lifetime requested for an ephemeral session.
pub const EPHEMERAL_CERT_DURATION: Duration = Duration::from_secs(60 * 60);

static PROVISIONING_ORIGIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(https?://[^/]+)/").expect("provisioning origin regex is valid")
});

// ============================================================================
// ProvisioningFailure
// ============================================================================

/// Why a provisioning session failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProvisioningFailure {
    /// Bad arguments, bad provisioning URL, or a protocol violation.
    Internal,
    /// The provider refused; usually the user must authenticate with it.
    PrimaryError,
    /// The provider did not finish within the budget.
    TimeoutError,
}

impl ProvisioningFailure {
    /// Returns the wire code.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::PrimaryError => "primaryError",
            Self::TimeoutError => "timeoutError",
        }
    }
}

impl fmt::Display for ProvisioningFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed provisioning session.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct ProvisioningError {
    /// Failure category.
    pub code: ProvisioningFailure,
    /// Human-readable description.
    pub message: String,
}

impl ProvisioningError {
    /// Creates a provisioning error.
    #[inline]
    pub fn new(code: ProvisioningFailure, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Returns `true` if the provider wants the user to authenticate first.
    #[inline]
    #[must_use]
    pub fn is_primary_error(&self) -> bool {
        self.code == ProvisioningFailure::PrimaryError
    }
}

// ============================================================================
// ProvisioningRequest
// ============================================================================

/// What to provision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisioningRequest {
    /// Address the certificate vouches for.
    pub email: String,
    /// Provider's provisioning document URL.
    pub url: String,
    /// Whether the user asked to stay signed in.
    pub persistent: bool,
}

impl ProvisioningRequest {
    /// Creates an ephemeral-session request.
    #[inline]
    #[must_use]
    pub fn new(email: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            url: url.into(),
            persistent: false,
        }
    }

    /// Sets whether the session is persistent.
    #[inline]
    #[must_use]
    pub fn with_persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }
}

// ============================================================================
// ProvisioningConfig
// ============================================================================

/// Timing parameters for provisioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProvisioningConfig {
    /// Budget after the hidden document loads.
    pub timeout: Duration,
    /// Certificate lifetime for persistent sessions.
    pub persistent_cert_duration: Duration,
    /// Certificate lifetime for ephemeral sessions.
    pub ephemeral_cert_duration: Duration,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ProvisioningConfig {
    /// Creates the default configuration.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            timeout: DEFAULT_PROVISIONING_TIMEOUT,
            persistent_cert_duration: PERSISTENT_CERT_DURATION,
            ephemeral_cert_duration: EPHEMERAL_CERT_DURATION,
        }
    }

    /// Sets the provisioning budget.
    #[inline]
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the certificate lifetime requested for a session.
    #[inline]
    #[must_use]
    pub const fn cert_duration(&self, persistent: bool) -> Duration {
        if persistent {
            self.persistent_cert_duration
        } else {
            self.ephemeral_cert_duration
        }
    }
}

/// Extracts the provider origin from a provisioning URL.
#[must_use]
pub fn provisioning_origin(url: &str) -> Option<Origin> {
    let captures = PROVISIONING_ORIGIN.captures(url)?;
    Origin::parse(captures.get(1)?.as_str()).ok()
}

// ============================================================================
// Session
// ============================================================================

/// Success callback.
type SuccessCallback = Box<dyn FnOnce(CertifiedKey) + Send>;

/// Failure callback.
type FailureCallback = Box<dyn FnOnce(ProvisioningError) + Send>;

struct Callbacks {
    on_success: SuccessCallback,
    on_failure: FailureCallback,
}

/// Shared session state.
///
/// The timer task holds the only strong reference besides the handle, so a
/// running session stays alive until it ends. Channel handlers hold weak
/// references.
struct Session {
    email: String,
    host: BrowsingContext,
    callbacks: Mutex<Option<Callbacks>>,
    frame: Mutex<Option<BrowsingContext>>,
    channel: Mutex<Option<Channel>>,
    timer: Mutex<Option<JoinHandle<()>>>,
    key_pair: Mutex<Option<KeyPair>>,
}

impl Session {
    fn succeed(&self, certificate: String) {
        let Some(key_pair) = self.key_pair.lock().clone() else {
            self.fail(
                ProvisioningFailure::Internal,
                "certificate registered before key generation",
            );
            return;
        };

        let callbacks = self.callbacks.lock().take();
        self.tear_down();

        match callbacks {
            Some(callbacks) => {
                info!(email = %self.email, "Provisioning succeeded");
                (callbacks.on_success)(CertifiedKey {
                    key_pair,
                    certificate,
                });
            }
            None => debug!(email = %self.email, "Late certificate ignored"),
        }
    }

    fn fail(&self, code: ProvisioningFailure, message: impl Into<String>) {
        let error = ProvisioningError::new(code, message);
        let callbacks = self.callbacks.lock().take();
        self.tear_down();

        match callbacks {
            Some(callbacks) => {
                warn!(email = %self.email, code = %error.code, message = %error.message, "Provisioning failed");
                (callbacks.on_failure)(error);
            }
            None => debug!(email = %self.email, code = %error.code, "Late failure ignored"),
        }
    }

    /// Cancels the timer, destroys the channel and removes the hidden
    /// document. Idempotent.
    fn tear_down(&self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
        if let Some(channel) = self.channel.lock().take() {
            channel.destroy();
        }
        if let Some(frame) = self.frame.lock().take() {
            self.host.remove_frame(frame.id());
            trace!(email = %self.email, "Provisioning torn down");
        }
    }
}

// ============================================================================
// Provisioning
// ============================================================================

/// Handle to a running provisioning session.
pub struct Provisioning {
    session: Arc<Session>,
}

impl fmt::Debug for Provisioning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provisioning")
            .field("email", &self.session.email)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Provisioning {
    /// Starts provisioning `request.email` from `host`.
    ///
    /// Exactly one callback fires, unless the session is cancelled first.
    /// Argument errors are reported as `internal` failures on a later tick.
    /// Must be called within a tokio runtime.
    pub fn start<S, F>(
        host: &BrowsingContext,
        request: ProvisioningRequest,
        keygen: Arc<dyn KeyPairGenerator>,
        config: ProvisioningConfig,
        on_success: S,
        on_failure: F,
    ) -> Self
    where
        S: FnOnce(CertifiedKey) + Send + 'static,
        F: FnOnce(ProvisioningError) + Send + 'static,
    {
        let session = Arc::new(Session {
            email: request.email.clone(),
            host: host.clone(),
            callbacks: Mutex::new(Some(Callbacks {
                on_success: Box::new(on_success),
                on_failure: Box::new(on_failure),
            })),
            frame: Mutex::new(None),
            channel: Mutex::new(None),
            timer: Mutex::new(None),
            key_pair: Mutex::new(None),
        });

        if let Err(message) = Self::launch(&session, host, &request, keygen, config) {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                session.fail(ProvisioningFailure::Internal, message);
            });
        }

        Self { session }
    }

    /// Cancels the session without invoking either callback.
    pub fn cancel(&self) {
        if self.session.callbacks.lock().take().is_some() {
            debug!(email = %self.session.email, "Provisioning cancelled");
        }
        self.session.tear_down();
    }

    /// Returns `true` until the session ends.
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.session.callbacks.lock().is_some()
    }

    /// Returns the hidden provisioning document while the session runs.
    #[must_use]
    pub fn frame(&self) -> Option<BrowsingContext> {
        self.session.frame.lock().clone()
    }

    fn launch(
        session: &Arc<Session>,
        host: &BrowsingContext,
        request: &ProvisioningRequest,
        keygen: Arc<dyn KeyPairGenerator>,
        config: ProvisioningConfig,
    ) -> std::result::Result<(), String> {
        if request.email.is_empty() || request.url.is_empty() {
            return Err("missing required arguments".to_string());
        }

        let origin = provisioning_origin(&request.url)
            .ok_or_else(|| "bad provisioning url, can't extract origin".to_string())?;

        let frame = host
            .embed_frame(&request.url, FrameOptions::hidden())
            .map_err(|e| e.to_string())?;
        *session.frame.lock() = Some(frame.clone());

        let loads = frame.load_events();
        let timer = tokio::spawn(Self::run_timer(Arc::clone(session), loads, config.timeout));
        *session.timer.lock() = Some(timer);

        let channel = Channel::build(
            ChannelConfig::new(host.clone(), frame, TargetOrigin::Exact(origin.clone()))
                .with_scope(PROVISIONING_SCOPE),
        )
        .map_err(|e| e.to_string())?;

        Self::bind_handlers(&channel, session, request, keygen, config)
            .map_err(|e| e.to_string())?;
        *session.channel.lock() = Some(channel);

        debug!(
            email = %request.email,
            origin = %origin,
            persistent = request.persistent,
            "Provisioning started"
        );

        Ok(())
    }

    fn bind_handlers(
        channel: &Channel,
        session: &Arc<Session>,
        request: &ProvisioningRequest,
        keygen: Arc<dyn KeyPairGenerator>,
        config: ProvisioningConfig,
    ) -> crate::Result<()> {
        let email = request.email.clone();
        let cert_duration_s = config.cert_duration(request.persistent).as_secs();
        channel.bind("beginProvisioning", move |_, _| {
            Ok(json!({
                "email": email,
                "cert_duration_s": cert_duration_s,
            }))
        })?;

        let weak = Arc::downgrade(session);
        channel.bind("genKeyPair", move |tx, _| {
            tx.delay_return(true);
            tokio::spawn(Self::generate_key_pair(
                Weak::clone(&weak),
                Arc::clone(&keygen),
                tx.clone(),
            ));
            Ok(Value::Null)
        })?;

        let weak = Arc::downgrade(session);
        channel.bind("raiseProvisioningFailure", move |_, reason| {
            if let Some(session) = weak.upgrade() {
                session.fail(ProvisioningFailure::PrimaryError, failure_reason(reason));
            }
            Ok(Value::Null)
        })?;

        let weak = Arc::downgrade(session);
        channel.bind("registerCertificate", move |_, certificate| {
            let Some(session) = weak.upgrade() else {
                return Ok(Value::Null);
            };
            match certificate {
                Value::String(certificate) if !certificate.is_empty() => {
                    session.succeed(certificate);
                    Ok(Value::Null)
                }
                _ => {
                    session.fail(ProvisioningFailure::Internal, "malformed certificate");
                    Err(RpcError::runtime("certificate must be a non-empty string"))
                }
            }
        })?;

        Ok(())
    }

    async fn generate_key_pair(
        session: Weak<Session>,
        keygen: Arc<dyn KeyPairGenerator>,
        tx: Transaction,
    ) {
        let result = keygen.generate().await;
        let Some(session) = session.upgrade() else {
            return;
        };
        if session.callbacks.lock().is_none() {
            trace!("Key generated after session ended");
            return;
        }

        match result {
            Ok(key_pair) => {
                let public_key = key_pair.public_key().to_string();
                *session.key_pair.lock() = Some(key_pair);
                tx.complete(Value::String(public_key));
            }
            Err(e) => {
                tx.fail(RpcError::runtime(e.message.clone()));
                session.fail(ProvisioningFailure::Internal, e.to_string());
            }
        }
    }

    /// Timer task: waits for the first load, then enforces the budget,
    /// restarting it on every later load.
    async fn run_timer(session: Arc<Session>, mut loads: watch::Receiver<u64>, budget: Duration) {
        if loads.changed().await.is_err() {
            return;
        }
        trace!(email = %session.email, budget_ms = budget.as_millis(), "Provisioning timer armed");

        loop {
            tokio::select! {
                () = tokio::time::sleep(budget) => {
                    session.fail(ProvisioningFailure::TimeoutError, "Provisioning timed out.");
                    return;
                }

                changed = loads.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    trace!(email = %session.email, "Provisioning timer re-armed");
                }
            }
        }
    }
}

fn failure_reason(reason: Value) -> String {
    match reason {
        Value::String(reason) => reason,
        Value::Null => "provider raised a provisioning failure".to_string(),
        other => other.to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================
