//! Negotiator-side handle on the relay.

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use crate::error::Result;
use crate::transport::BrowsingContext;

use super::endpoint::{Relay, RelayCompletion, RelayRequest};
use super::resolver::TransportResolver;

// ============================================================================
// RelayBridge
// ============================================================================

/// The negotiator's connection to the caller, through a relay.
#[derive(Debug)]
pub struct RelayBridge {
    relay: Relay,
    negotiator: BrowsingContext,
    closed: AtomicBool,
}

impl RelayBridge {
    /// Resolves the relay for `negotiator`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RelayNotFound`](crate::Error::RelayNotFound) if the
    /// resolver cannot reach a relay. This is fatal for the negotiation.
    pub fn open(negotiator: &BrowsingContext, resolver: &dyn TransportResolver) -> Result<Self> {
        let relay = resolver.resolve(negotiator).inspect_err(|e| {
            warn!(context = %negotiator.id(), resolver = resolver.name(), error = %e, "Relay unavailable");
        })?;

        debug!(
            context = %negotiator.id(),
            resolver = resolver.name(),
            relay = %relay.context().id(),
            "Relay bridge open"
        );

        Ok(Self {
            relay,
            negotiator: negotiator.clone(),
            closed: AtomicBool::new(false),
        })
    }

    /// Registers the negotiator's request handler with the relay.
    pub fn register<F>(&self, client: F)
    where
        F: Fn(RelayRequest, RelayCompletion) + Send + Sync + 'static,
    {
        self.relay.register_client(client);
    }

    /// Unregisters from the relay. A relay living in the negotiator itself
    /// is also closed. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.relay.unregister_client();
        if self.relay.context() == &self.negotiator {
            self.relay.close();
        }
        debug!(context = %self.negotiator.id(), "Relay bridge closed");
    }

    /// Returns `true` after [`close`](Self::close).
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Tests
// ============================================================================
