//! Caller (relying party) side of the relay protocol.
//!
//! [`Caller::get`] embeds the negotiator's relay document, opens the
//! negotiator in a popup whose fragment names the relay frame, and calls
//! `mozid::get` on the relay. The callback fires once with the assertion,
//! `None` for a cancelled negotiation, or the negotiator's error; the relay
//! frame and popup are removed before it runs.
//!
//! # Example
//!
//! ```ignore
//! let caller = Caller::new(rp, host, CallerConfig::new("https://login.example"));
//! caller.get(json!({"requiredEmail": null}), |outcome| match outcome {
//!     Ok(Some(assertion)) => println!("signed in: {assertion}"),
//!     Ok(None) => println!("cancelled"),
//!     Err(e) => println!("failed: {e}"),
//! })?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use crate::error::Result;
use crate::protocol::{Assertion, RpcError};
use crate::transport::{BrowsingContext, Channel, ChannelConfig, FrameOptions, Origin, TargetOrigin};

use super::endpoint::{GET_METHOD, RELAY_SCOPE};

// ============================================================================
// Constants
// ============================================================================

/// Prefix of generated relay frame names.
pub const RELAY_FRAME_PREFIX: &str = "__persona_relay_";

/// Default path of the relay document.
pub const DEFAULT_RELAY_PATH: &str = "/relay";

/// Default path of the negotiator document.
pub const DEFAULT_DIALOG_PATH: &str = "/sign_in";

// ============================================================================
// DocumentHost
// ============================================================================

/// Serves documents into browsing contexts.
///
/// Loading a URL into a context runs the document served for it, the way a
/// browser runs a page's scripts. The negotiator implements this for its
/// relay and dialog documents.
pub trait DocumentHost: Send + Sync {
    /// Runs the document for `context.url()` inside `context`.
    ///
    /// # Errors
    ///
    /// Returns an error if no document is served at that URL or the
    /// document fails to start.
    fn load(&self, context: &BrowsingContext) -> Result<()>;
}

// ============================================================================
// CallerConfig
// ============================================================================

/// How the caller reaches the negotiator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RelayStrategy {
    /// Through an embedded relay frame named in the popup's fragment.
    #[default]
    NestedFrame,
    /// Directly with the popup.
    Direct,
}

/// Caller configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerConfig {
    /// Base URL of the negotiator's origin.
    pub idp: String,
    /// Path of the relay document.
    pub relay_path: String,
    /// Path of the negotiator document.
    pub dialog_path: String,
    /// Transport strategy.
    pub strategy: RelayStrategy,
}

impl CallerConfig {
    /// Creates a config with default paths and the nested-frame strategy.
    #[inline]
    #[must_use]
    pub fn new(idp: impl Into<String>) -> Self {
        Self {
            idp: idp.into(),
            relay_path: DEFAULT_RELAY_PATH.to_string(),
            dialog_path: DEFAULT_DIALOG_PATH.to_string(),
            strategy: RelayStrategy::NestedFrame,
        }
    }

    /// Sets the transport strategy.
    #[inline]
    #[must_use]
    pub fn with_strategy(mut self, strategy: RelayStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

// ============================================================================
// Caller
// ============================================================================

/// Outcome of [`Caller::get`].
pub type CallerOutcome = std::result::Result<Option<Assertion>, RpcError>;

/// Relying-party entry point.
pub struct Caller {
    rp: BrowsingContext,
    host: Arc<dyn DocumentHost>,
    config: CallerConfig,
}

impl fmt::Debug for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Caller")
            .field("rp", &self.rp)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Resources held for one `get`.
struct Session {
    rp: BrowsingContext,
    channel: Channel,
    relay_frame: Option<BrowsingContext>,
    popup: BrowsingContext,
}

impl Session {
    fn close(&self) {
        self.channel.destroy();
        if let Some(frame) = &self.relay_frame {
            self.rp.remove_frame(frame.id());
        }
        self.popup.close();
    }
}

type Pending = Arc<Mutex<Option<Box<dyn FnOnce(CallerOutcome) + Send>>>>;

/// Handle to an in-flight `get`.
pub struct CallerSession {
    session: Arc<Session>,
    pending: Pending,
}

impl fmt::Debug for CallerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallerSession")
            .field("popup", &self.session.popup.id())
            .field("pending", &self.is_pending())
            .finish()
    }
}

impl CallerSession {
    /// Returns the negotiator popup.
    #[inline]
    #[must_use]
    pub fn popup(&self) -> &BrowsingContext {
        &self.session.popup
    }

    /// Returns `true` until the callback has fired or the session was
    /// abandoned.
    #[inline]
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Tears the session down without invoking the callback.
    pub fn abandon(&self) {
        self.pending.lock().take();
        self.session.close();
    }
}

impl Caller {
    /// Creates a caller for the relying party page `rp`.
    #[inline]
    #[must_use]
    pub fn new(rp: BrowsingContext, host: Arc<dyn DocumentHost>, config: CallerConfig) -> Self {
        Self { rp, host, config }
    }

    /// Requests an assertion.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidOrigin`](crate::Error::InvalidOrigin) or
    ///   [`Error::Url`](crate::Error::Url) for a bad negotiator URL
    /// - Errors from loading the relay or negotiator documents
    pub fn get<F>(&self, options: Value, callback: F) -> Result<CallerSession>
    where
        F: FnOnce(CallerOutcome) + Send + 'static,
    {
        let base = Url::parse(&self.config.idp)?;
        let idp_origin = Origin::from_url(&base)?;
        let mut dialog_url = base.join(&self.config.dialog_path)?;

        let relay_frame = match self.config.strategy {
            RelayStrategy::NestedFrame => {
                let name = format!("{RELAY_FRAME_PREFIX}{}", Uuid::new_v4().simple());
                let relay_url = base.join(&self.config.relay_path)?;
                let frame = self
                    .rp
                    .embed_frame(relay_url.as_str(), FrameOptions::hidden().with_name(&name))?;
                self.host.load(&frame)?;
                frame.mark_loaded();
                dialog_url.set_fragment(Some(urlencoding::encode(&name).as_ref()));
                Some(frame)
            }
            RelayStrategy::Direct => None,
        };

        let popup = self.rp.open_popup(dialog_url.as_str())?;
        let remote = relay_frame.clone().unwrap_or_else(|| popup.clone());
        let channel = Channel::build(
            ChannelConfig::new(self.rp.clone(), remote, TargetOrigin::Exact(idp_origin))
                .with_scope(RELAY_SCOPE),
        )?;

        let session = Arc::new(Session {
            rp: self.rp.clone(),
            channel: channel.clone(),
            relay_frame,
            popup: popup.clone(),
        });
        let pending: Pending = Arc::new(Mutex::new(Some(Box::new(callback))));

        if let Err(e) = self.host.load(&popup) {
            session.close();
            return Err(e);
        }
        popup.mark_loaded();

        let (ok_session, ok_pending) = (Arc::clone(&session), Arc::clone(&pending));
        let (err_session, err_pending) = (Arc::clone(&session), Arc::clone(&pending));
        channel.call(
            GET_METHOD,
            options,
            move |value| {
                let outcome = match value {
                    Value::Null => Ok(None),
                    Value::String(assertion) => Ok(Some(Assertion::new(assertion))),
                    other => Err(RpcError::new(
                        "malformed_result",
                        format!("expected an assertion or null, got {other}"),
                    )),
                };
                Self::finish(&ok_session, &ok_pending, outcome);
            },
            move |error| Self::finish(&err_session, &err_pending, Err(error)),
        );

        debug!(
            rp = %self.rp.origin(),
            popup = %popup.id(),
            strategy = ?self.config.strategy,
            "Assertion requested"
        );

        Ok(CallerSession { session, pending })
    }

    fn finish(session: &Session, pending: &Pending, outcome: CallerOutcome) {
        session.close();
        let callback = pending.lock().take();
        if let Some(callback) = callback {
            info!(
                rp = %session.rp.origin(),
                signed_in = matches!(outcome, Ok(Some(_))),
                "Assertion request finished"
            );
            callback(outcome);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
