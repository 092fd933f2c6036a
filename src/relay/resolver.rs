//! Strategies for locating the relay a negotiator reports through.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::transport::BrowsingContext;

use super::endpoint::{RELAY_GLOBAL, Relay};

// ============================================================================
// TransportResolver
// ============================================================================

/// Finds or builds the relay for a negotiator context.
pub trait TransportResolver: Send + Sync {
    /// Resolves the relay for `negotiator`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RelayNotFound`] if no relay can be reached.
    fn resolve(&self, negotiator: &BrowsingContext) -> Result<Relay>;

    /// Returns a short name for logs.
    fn name(&self) -> &'static str;
}

// ============================================================================
// NestedFrameResolver
// ============================================================================

/// Finds a relay frame the caller embedded in the opener.
///
/// The frame name arrives in the negotiator's URL fragment. The fragment is
/// consumed on resolution; a name of one character or less is rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct NestedFrameResolver;

impl NestedFrameResolver {
    /// Reads and clears the relay name from the URL fragment.
    fn take_relay_name(negotiator: &BrowsingContext) -> Option<String> {
        let fragment = negotiator.take_fragment()?;
        let name = urlencoding::decode(&fragment).ok()?.into_owned();
        (name.chars().count() > 1).then_some(name)
    }
}

impl TransportResolver for NestedFrameResolver {
    fn resolve(&self, negotiator: &BrowsingContext) -> Result<Relay> {
        let Some(name) = Self::take_relay_name(negotiator) else {
            debug!(context = %negotiator.id(), "No relay name in fragment");
            return Err(Error::RelayNotFound);
        };
        let Some(opener) = negotiator.opener() else {
            debug!(context = %negotiator.id(), "Negotiator has no opener");
            return Err(Error::RelayNotFound);
        };
        let Some(frame) = opener.frame_by_name(&name) else {
            debug!(relay = %name, "Relay frame missing from opener");
            return Err(Error::RelayNotFound);
        };

        match frame.lookup::<Relay>(RELAY_GLOBAL, negotiator) {
            Ok(Some(relay)) => Ok(Relay::clone(&relay)),
            Ok(None) => {
                debug!(relay = %name, "Frame exposes no relay");
                Err(Error::RelayNotFound)
            }
            Err(e) => {
                debug!(relay = %name, error = %e, "Relay frame unreachable");
                Err(Error::RelayNotFound)
            }
        }
    }

    fn name(&self) -> &'static str {
        "nested-frame"
    }
}

// ============================================================================
// DirectResolver
// ============================================================================

/// Builds a relay inside the negotiator itself, talking straight to the
/// opener. The relay is exposed on the negotiator context and lives as long
/// as it does.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectResolver;

impl TransportResolver for DirectResolver {
    fn resolve(&self, negotiator: &BrowsingContext) -> Result<Relay> {
        let Some(opener) = negotiator.opener() else {
            debug!(context = %negotiator.id(), "Negotiator has no opener");
            return Err(Error::RelayNotFound);
        };
        let relay = Relay::open(negotiator.clone(), opener)?;
        negotiator.expose(RELAY_GLOBAL, Arc::new(relay.clone()));
        Ok(relay)
    }

    fn name(&self) -> &'static str {
        "direct"
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::FrameOptions;

    fn rp_with_relay(name: &str) -> BrowsingContext {
        let rp = BrowsingContext::top_level("https://rp.example/").expect("rp");
        let frame = rp
            .embed_frame(
                "https://idp.example/relay",
                FrameOptions::hidden().with_name(name),
            )
            .expect("frame");
        Relay::open_in_frame(&frame).expect("relay");
        rp
    }

    #[tokio::test]
    async fn test_nested_frame_found() {
        let rp = rp_with_relay("__relay_abc");
        let dialog = rp
            .open_popup("https://idp.example/sign_in#__relay_abc")
            .expect("dialog");

        let relay = NestedFrameResolver.resolve(&dialog).expect("relay");
        assert_eq!(relay.context().name(), Some("__relay_abc"));
        assert_eq!(dialog.url().fragment(), None);
    }

    #[tokio::test]
    async fn test_nested_frame_short_name_rejected() {
        let rp = rp_with_relay("x");
        let dialog = rp.open_popup("https://idp.example/sign_in#x").expect("dialog");

        assert!(matches!(
            NestedFrameResolver.resolve(&dialog),
            Err(Error::RelayNotFound)
        ));
    }

    #[tokio::test]
    async fn test_nested_frame_missing() {
        let rp = rp_with_relay("__relay_abc");
        let dialog = rp
            .open_popup("https://idp.example/sign_in#__relay_other")
            .expect("dialog");

        let err = NestedFrameResolver.resolve(&dialog).expect_err("missing");
        assert_eq!(err.to_string(), "relay frame not found");
    }

    #[tokio::test]
    async fn test_cross_origin_relay_not_usable() {
        let rp = rp_with_relay("__relay_abc");
        let dialog = rp
            .open_popup("https://evil.example/sign_in#__relay_abc")
            .expect("dialog");

        assert!(matches!(
            NestedFrameResolver.resolve(&dialog),
            Err(Error::RelayNotFound)
        ));
    }

    #[tokio::test]
    async fn test_direct_requires_opener() {
        let dialog = BrowsingContext::top_level("https://idp.example/sign_in").expect("dialog");
        assert!(matches!(
            DirectResolver.resolve(&dialog),
            Err(Error::RelayNotFound)
        ));

        let rp = BrowsingContext::top_level("https://rp.example/").expect("rp");
        let popup = rp.open_popup("https://idp.example/sign_in").expect("popup");
        let relay = DirectResolver.resolve(&popup).expect("relay");
        assert_eq!(relay.context(), &popup);
    }
}
