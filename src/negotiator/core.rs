//! Negotiator coordinator.
//!
//! The [`Negotiator`] serves the identity provider's two documents. Loading
//! the relay path into a frame opens a [`Relay`]; loading the dialog path
//! into a popup resolves the relay, registers with it, and runs one
//! [`StateMachine`] per caller request.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use identity_negotiator::{Caller, CallerConfig, Negotiator};
//!
//! let negotiator = Arc::new(Negotiator::builder()
//!     .backend(backend)
//!     .keys(keys)
//!     .surface(surface)
//!     .build()?);
//!
//! let caller = Caller::new(rp, negotiator.clone(), CallerConfig::new("https://login.example"));
//! caller.get(serde_json::json!({}), |outcome| println!("{outcome:?}"))?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use crate::dialog::{
    GetOptions, Mediator, NegotiationContext, NegotiationOutcome, Screen, Services, StateMachine,
};
use crate::error::{Error, Result};
use crate::identifiers::{ContextId, NegotiationId};
use crate::protocol::{Command, DialogEvent};
use crate::relay::{
    DirectResolver, DocumentHost, NestedFrameResolver, Relay, RelayBridge, RelayCompletion,
    RelayRequest, RelayStrategy, TransportResolver,
};
use crate::transport::{BrowsingContext, Origin};

use super::builder::NegotiatorBuilder;
use super::config::NegotiatorConfig;

// ============================================================================
// Negotiation
// ============================================================================

/// A running negotiation in one dialog.
#[derive(Clone)]
pub struct Negotiation {
    id: NegotiationId,
    origin: Origin,
    mediator: Mediator,
    machine: StateMachine,
    completion: RelayCompletion,
}

impl fmt::Debug for Negotiation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Negotiation")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("current", &self.machine.current())
            .finish()
    }
}

impl Negotiation {
    /// Returns the negotiation ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> NegotiationId {
        self.id
    }

    /// Returns the caller's origin.
    #[inline]
    #[must_use]
    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Returns the foreground module name.
    #[inline]
    #[must_use]
    pub fn current(&self) -> Option<&'static str> {
        self.machine.current()
    }

    /// Returns `true` once the outcome has been delivered.
    #[inline]
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.machine.is_finished()
    }

    /// Publishes user input. Returns `false` once the dialog has closed.
    pub fn send(&self, command: Command) -> bool {
        self.mediator.publish(DialogEvent::Command(command))
    }

    /// Stops the dialog and answers its caller with `canceled`. The
    /// context's own completion never runs, so the dialog stays open for
    /// the request that replaced this one.
    fn abandon(&self) {
        self.machine.shutdown();
        self.mediator.close();
        self.machine.context().discard();
        self.completion.complete(None, Some("canceled"));
    }
}

// ============================================================================
// Types
// ============================================================================

/// Internal shared state for the negotiator.
pub(crate) struct NegotiatorInner {
    /// Paths and timing.
    config: NegotiatorConfig,

    /// Collaborators shared by every negotiation.
    services: Services,

    /// Relay lookup for the configured strategy.
    resolver: Box<dyn TransportResolver>,

    /// Relay bridges by dialog context.
    bridges: Mutex<FxHashMap<ContextId, Arc<RelayBridge>>>,

    /// Running negotiations by dialog context.
    negotiations: Mutex<FxHashMap<ContextId, Negotiation>>,
}

// ============================================================================
// Negotiator
// ============================================================================

/// Identity provider side of the negotiation.
///
/// Implements [`DocumentHost`], so it can be handed directly to a
/// [`Caller`](crate::relay::Caller).
#[derive(Clone)]
pub struct Negotiator {
    inner: Arc<NegotiatorInner>,
}

impl fmt::Debug for Negotiator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Negotiator")
            .field("config", &self.inner.config)
            .field("resolver", &self.inner.resolver.name())
            .field("active", &self.active_count())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Negotiator - Public API
// ============================================================================

impl Negotiator {
    /// Creates a configuration builder for the negotiator.
    #[inline]
    #[must_use]
    pub fn builder() -> NegotiatorBuilder {
        NegotiatorBuilder::new()
    }

    /// Returns the configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &NegotiatorConfig {
        &self.inner.config
    }

    /// Returns the number of running negotiations.
    #[inline]
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner.negotiations.lock().len()
    }

    /// Returns the negotiation running in `dialog`.
    #[must_use]
    pub fn negotiation(&self, dialog: &BrowsingContext) -> Option<Negotiation> {
        self.inner.negotiations.lock().get(&dialog.id()).cloned()
    }

    /// Returns `true` if a negotiation is running in `dialog`.
    #[inline]
    #[must_use]
    pub fn is_active(&self, dialog: &BrowsingContext) -> bool {
        self.inner.negotiations.lock().contains_key(&dialog.id())
    }

    /// Publishes user input to the negotiation running in `dialog`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if no negotiation runs in `dialog`.
    pub fn send(&self, dialog: &BrowsingContext, command: Command) -> Result<()> {
        let negotiation = self.negotiation(dialog).ok_or_else(|| {
            Error::invalid_argument(format!("no negotiation running in context {}", dialog.id()))
        })?;
        debug!(negotiation = %negotiation.id, command = command.name(), "Command received");
        negotiation.send(command);
        Ok(())
    }
}

// ============================================================================
// Negotiator - Internal
// ============================================================================

impl Negotiator {
    pub(crate) fn new(config: NegotiatorConfig, services: Services) -> Self {
        let resolver: Box<dyn TransportResolver> = match config.strategy {
            RelayStrategy::NestedFrame => Box::new(NestedFrameResolver),
            RelayStrategy::Direct => Box::new(DirectResolver),
        };
        info!(
            relay_path = %config.relay_path,
            dialog_path = %config.dialog_path,
            resolver = resolver.name(),
            "Negotiator ready"
        );
        Self {
            inner: Arc::new(NegotiatorInner {
                config,
                services,
                resolver,
                bridges: Mutex::new(FxHashMap::default()),
                negotiations: Mutex::new(FxHashMap::default()),
            }),
        }
    }

    /// Runs the dialog document in `dialog`.
    fn open_dialog(&self, dialog: &BrowsingContext) -> Result<()> {
        let bridge = match RelayBridge::open(dialog, self.inner.resolver.as_ref()) {
            Ok(bridge) => Arc::new(bridge),
            Err(e) => {
                self.inner.services.surface.render(&Screen::Error {
                    code: "relay_not_found".to_string(),
                    message: e.to_string(),
                    retryable: false,
                });
                return Err(e);
            }
        };
        self.inner
            .bridges
            .lock()
            .insert(dialog.id(), Arc::clone(&bridge));

        let weak: Weak<NegotiatorInner> = Arc::downgrade(&self.inner);
        let host = dialog.clone();
        bridge.register(move |request, completion| match weak.upgrade() {
            Some(inner) => Self { inner }.begin(&host, request, completion),
            None => {
                completion.complete(None, Some("serverError"));
            }
        });

        debug!(context = %dialog.id(), "Dialog opened");
        Ok(())
    }

    /// Starts a negotiation for a forwarded request.
    fn begin(&self, dialog: &BrowsingContext, request: RelayRequest, completion: RelayCompletion) {
        let RelayRequest { origin, params } = request;

        let previous = self.inner.negotiations.lock().remove(&dialog.id());
        if let Some(previous) = previous {
            warn!(negotiation = %previous.id, "Negotiation superseded by a newer request");
            previous.abandon();
        }

        let parsed = GetOptions::from_params(&origin, &params);
        let options = parsed.clone().unwrap_or_default();

        let weak: Weak<NegotiatorInner> = Arc::downgrade(&self.inner);
        let dialog_id = dialog.id();
        let replier = completion.clone();
        let context = NegotiationContext::new(
            origin.clone(),
            options,
            self.inner.services.clone(),
            dialog.clone(),
            self.inner.config.provisioning,
            move |outcome: NegotiationOutcome| {
                match outcome {
                    Ok(assertion) => completion.complete(assertion, None),
                    Err(error) => completion.fail(error.into()),
                };
                if let Some(inner) = weak.upgrade() {
                    Self { inner }.finish(dialog_id);
                }
            },
        );

        if let Err(error) = parsed {
            context.fail(error);
            return;
        }

        let mediator = Mediator::new();
        let machine = StateMachine::new(mediator.clone(), context.clone());
        let negotiation = Negotiation {
            id: context.id(),
            origin,
            mediator: mediator.clone(),
            machine: machine.clone(),
            completion: replier,
        };
        info!(negotiation = %negotiation.id, origin = %negotiation.origin, "Negotiation started");

        self.inner
            .negotiations
            .lock()
            .insert(dialog_id, negotiation);
        tokio::spawn(async move { mediator.run().await });
        machine.start();
    }

    /// Tears down the dialog after its outcome was delivered.
    fn finish(&self, dialog: ContextId) {
        let negotiation = self.inner.negotiations.lock().remove(&dialog);
        if let Some(negotiation) = &negotiation {
            negotiation.mediator.close();
        }
        let bridge = self.inner.bridges.lock().remove(&dialog);
        if let Some(bridge) = bridge {
            bridge.close();
        }
        debug!(context = %dialog, "Dialog finished");
    }
}

// ============================================================================
// DocumentHost
// ============================================================================

impl DocumentHost for Negotiator {
    fn load(&self, context: &BrowsingContext) -> Result<()> {
        let url = context.url();
        let path = url.path();
        if path == self.inner.config.relay_path {
            Relay::open_in_frame(context).map(|_| ())
        } else if path == self.inner.config.dialog_path {
            self.open_dialog(context)
        } else {
            Err(Error::invalid_argument(format!("no document served at {path}")))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
