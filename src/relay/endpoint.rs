//! The relay document.
//!
//! The relay runs in an invisible frame served from the negotiator's origin
//! and embedded in the caller's page. It learns the caller's origin by
//! accepting the caller's `mozid::get` call, holds that transaction open,
//! and hands it to the negotiator once the negotiator registers.
//!
//! ```text
//! Caller ──mozid::get──► Relay (stash) ◄──register_client── Negotiator
//!   ▲                      │
//!   └────result/error──────┘ (only to the caller's recorded origin)
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::protocol::{Assertion, RpcError};
use crate::transport::{
    BrowsingContext, Channel, ChannelConfig, Origin, TargetOrigin, Transaction,
};

// ============================================================================
// Constants
// ============================================================================

/// Channel scope shared by the caller and the relay.
pub const RELAY_SCOPE: &str = "mozid";

/// Name under which a relay exposes itself to same-origin contexts.
pub const RELAY_GLOBAL: &str = "BrowserID.Relay";

/// The only method a relay serves.
pub const GET_METHOD: &str = "get";

// ============================================================================
// Verbose Messages
// ============================================================================

/// Returns the human-readable message sent with a relay error code.
#[must_use]
pub fn verbose_message(code: &str) -> &'static str {
    match code {
        "canceled" => "user canceled selection",
        "notImplemented" => "the user tried to invoke behavior that's not yet implemented",
        "serverError" => {
            "a technical problem was encountered while trying to communicate with BrowserID servers."
        }
        _ => "unknown error",
    }
}

// ============================================================================
// RelayRequest / RelayCompletion
// ============================================================================

/// A caller request forwarded to the negotiator.
#[derive(Debug, Clone)]
pub struct RelayRequest {
    /// The caller's origin, as recorded when the request arrived.
    pub origin: Origin,
    /// The caller's options.
    pub params: Value,
}

/// Delivers the negotiation outcome through the caller's pending transaction.
#[derive(Debug, Clone)]
pub struct RelayCompletion {
    transaction: Transaction,
}

impl RelayCompletion {
    /// Completes the caller's request.
    ///
    /// An error code wins over a result and is described by
    /// [`verbose_message`]; a missing result is delivered as `null`
    /// (cancellation). Returns `false` if the request was already answered.
    pub fn complete(&self, result: Option<Assertion>, error: Option<&str>) -> bool {
        if let Some(code) = error {
            return self.transaction.error(code, verbose_message(code));
        }
        let value = result.map_or(Value::Null, |assertion| Value::String(assertion.into_inner()));
        self.transaction.complete(value)
    }

    /// Fails the caller's request with a negotiation error, keeping its
    /// message. Returns `false` if the request was already answered.
    pub fn fail(&self, error: RpcError) -> bool {
        self.transaction.fail(error)
    }

    /// Returns the origin the outcome will be delivered to.
    #[inline]
    #[must_use]
    pub fn origin(&self) -> &Origin {
        self.transaction.origin()
    }

    /// Returns `true` once the outcome has been delivered.
    #[inline]
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.transaction.state().is_finished()
    }
}

/// Negotiator callback invoked for each forwarded request.
pub type RelayClient = Arc<dyn Fn(RelayRequest, RelayCompletion) + Send + Sync>;

// ============================================================================
// Relay
// ============================================================================

struct PendingCall {
    transaction: Transaction,
    params: Value,
}

#[derive(Default)]
struct RelayState {
    client: Option<RelayClient>,
    pending: Option<PendingCall>,
}

struct RelayInner {
    context: BrowsingContext,
    channel: Channel,
    state: Mutex<RelayState>,
}

/// Relay between a caller and a negotiator.
///
/// Holds at most one pending request; a newer request replaces it.
#[derive(Clone)]
pub struct Relay {
    inner: Arc<RelayInner>,
}

impl fmt::Debug for Relay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Relay")
            .field("context", &self.inner.context.id())
            .field("registered", &state.client.is_some())
            .field("pending", &state.pending.is_some())
            .finish()
    }
}

impl Relay {
    /// Opens a relay in a frame, talking to the frame's parent, and exposes
    /// it to same-origin contexts under [`RELAY_GLOBAL`].
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if the context is not a frame
    /// - Errors from [`Relay::open`]
    pub fn open_in_frame(frame: &BrowsingContext) -> Result<Self> {
        let parent = frame
            .parent()
            .ok_or_else(|| Error::invalid_argument("relay context has no parent"))?;

        let relay = Self::open(frame.clone(), parent)?;
        frame.expose(RELAY_GLOBAL, Arc::new(relay.clone()));
        Ok(relay)
    }

    /// Opens a relay in `local` accepting `get` from `remote`, whatever its
    /// origin.
    ///
    /// # Errors
    ///
    /// Returns channel construction errors.
    pub fn open(local: BrowsingContext, remote: BrowsingContext) -> Result<Self> {
        let channel = Channel::build(
            ChannelConfig::new(local.clone(), remote, TargetOrigin::Any).with_scope(RELAY_SCOPE),
        )?;

        let inner = Arc::new(RelayInner {
            context: local,
            channel,
            state: Mutex::new(RelayState::default()),
        });

        let weak: Weak<RelayInner> = Arc::downgrade(&inner);
        inner.channel.bind(GET_METHOD, move |tx, params| {
            tx.delay_return(true);
            if let Some(inner) = weak.upgrade() {
                Relay { inner }.forward(Some(PendingCall {
                    transaction: tx.clone(),
                    params,
                }));
            }
            Ok(Value::Null)
        })?;

        debug!(context = %inner.context.id(), "Relay opened");
        Ok(Self { inner })
    }

    /// Registers the negotiator; a stashed request is forwarded immediately.
    ///
    /// A later registration replaces an earlier one.
    pub fn register_client<F>(&self, client: F)
    where
        F: Fn(RelayRequest, RelayCompletion) + Send + Sync + 'static,
    {
        {
            let mut state = self.inner.state.lock();
            if state.client.is_some() {
                debug!(context = %self.inner.context.id(), "Relay client replaced");
            }
            state.client = Some(Arc::new(client));
        }
        self.forward(None);
    }

    /// Removes the registered negotiator.
    pub fn unregister_client(&self) {
        self.inner.state.lock().client = None;
        trace!(context = %self.inner.context.id(), "Relay client unregistered");
    }

    /// Returns `true` if a request is waiting for a negotiator.
    #[inline]
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.inner.state.lock().pending.is_some()
    }

    /// Returns the context the relay runs in.
    #[inline]
    #[must_use]
    pub fn context(&self) -> &BrowsingContext {
        &self.inner.context
    }

    /// Destroys the relay channel.
    pub fn close(&self) {
        self.inner.channel.destroy();
        *self.inner.state.lock() = RelayState::default();
    }

    /// Forwards `call`, or the stashed call, to the registered client.
    /// Without a client the call is stashed.
    fn forward(&self, call: Option<PendingCall>) {
        let (client, call) = {
            let mut state = self.inner.state.lock();
            let Some(call) = call.or_else(|| state.pending.take()) else {
                return;
            };
            let Some(client) = state.client.clone() else {
                trace!(origin = %call.transaction.origin(), "Request stashed");
                state.pending = Some(call);
                return;
            };
            (client, call)
        };

        debug!(origin = %call.transaction.origin(), "Request forwarded");
        client(
            RelayRequest {
                origin: call.transaction.origin().clone(),
                params: call.params,
            },
            RelayCompletion {
                transaction: call.transaction,
            },
        );
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::FrameOptions;
    use serde_json::json;
    use tokio::sync::oneshot;

    struct Fixture {
        relay: Relay,
        rp_side: Channel,
    }

    fn fixture() -> Fixture {
        let rp = BrowsingContext::top_level("https://rp.example/").expect("rp");
        let frame = rp
            .embed_frame(
                "https://idp.example/relay",
                FrameOptions::hidden().with_name("relay-1"),
            )
            .expect("frame");
        let relay = Relay::open_in_frame(&frame).expect("relay");
        let rp_side = Channel::build(
            ChannelConfig::new(rp, frame.clone(), TargetOrigin::Exact(frame.origin().clone()))
                .with_scope(RELAY_SCOPE),
        )
        .expect("rp channel");
        Fixture { relay, rp_side }
    }

    async fn settle() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_request_before_registration_is_stashed() {
        let f = fixture();
        let rp_side = f.rp_side.clone();
        let call = tokio::spawn(async move { rp_side.request("get", json!({"x": 1})).await });
        settle().await;
        assert!(f.relay.has_pending());

        let (seen_tx, seen_rx) = oneshot::channel();
        let seen_tx = Mutex::new(Some(seen_tx));
        f.relay.register_client(move |request, completion| {
            if let Some(tx) = seen_tx.lock().take() {
                let _ = tx.send((request.origin.clone(), request.params.clone()));
            }
            completion.complete(Some(Assertion::new("ASSERTION1")), None);
        });

        let (origin, params) = seen_rx.await.expect("forwarded");
        assert_eq!(origin.as_str(), "https://rp.example");
        assert_eq!(params, json!({"x": 1}));
        assert_eq!(call.await.expect("join"), Ok(json!("ASSERTION1")));
        assert!(!f.relay.has_pending());
    }

    #[tokio::test]
    async fn test_registration_before_request() {
        let f = fixture();
        f.relay.register_client(|_, completion| {
            completion.complete(None, None);
        });

        let result = f.rp_side.request("get", Value::Null).await;
        assert_eq!(result, Ok(Value::Null));
    }

    #[tokio::test]
    async fn test_error_carries_verbose_message() {
        let f = fixture();
        f.relay.register_client(|_, completion| {
            completion.complete(None, Some("canceled"));
        });

        let err = f.rp_side.request("get", Value::Null).await.expect_err("error");
        assert_eq!(err, RpcError::new("canceled", "user canceled selection"));
    }

    #[tokio::test]
    async fn test_fail_keeps_negotiation_message() {
        let f = fixture();
        f.relay.register_client(|_, completion| {
            assert!(completion.fail(RpcError::new("timeoutError", "provisioning timed out")));
            assert!(!completion.complete(None, Some("canceled")));
        });

        let err = f.rp_side.request("get", Value::Null).await.expect_err("error");
        assert_eq!(err, RpcError::new("timeoutError", "provisioning timed out"));
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let f = fixture();
        f.relay.register_client(|_, completion| {
            completion.complete(Some(Assertion::new("FIRST")), None);
        });
        f.relay.register_client(|_, completion| {
            completion.complete(Some(Assertion::new("SECOND")), None);
        });

        let result = f.rp_side.request("get", Value::Null).await;
        assert_eq!(result, Ok(json!("SECOND")));
    }

    #[tokio::test]
    async fn test_unregistered_relay_stashes_again() {
        let f = fixture();
        f.relay.register_client(|_, _| {});
        f.relay.unregister_client();

        f.rp_side.call("get", Value::Null, |_| {}, |_| {});
        settle().await;
        assert!(f.relay.has_pending());
    }

    #[test]
    fn test_verbose_messages() {
        assert_eq!(verbose_message("canceled"), "user canceled selection");
        assert!(verbose_message("serverError").starts_with("a technical problem"));
        assert_eq!(verbose_message("bogus"), "unknown error");
    }

    #[test]
    fn test_relay_requires_parent() {
        let top = BrowsingContext::top_level("https://idp.example/relay").expect("top");
        assert!(matches!(
            Relay::open_in_frame(&top),
            Err(Error::InvalidArgument { .. })
        ));
    }
}
