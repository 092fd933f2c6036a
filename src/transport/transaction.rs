//! Inbound RPC transactions.
//!
//! A [`Transaction`] is created for every request a channel receives and
//! handed to the bound handler. It records the origin the request came from;
//! that origin is the only one its response is ever posted to.
//!
//! # States
//!
//! ```text
//! Pending ──delay_return(true)──► DelayedPending
//!    │                                  │
//!    ├── complete() ──► Completed ◄─────┤
//!    └── error() ─────► Errored   ◄─────┘
//! ```
//!
//! `complete` and `error` take effect at most once. Later calls are absorbed
//! and logged.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, trace};

use crate::identifiers::TransactionId;
use crate::protocol::{Response, RpcError};

use super::context::BrowsingContext;
use super::origin::{Origin, TargetOrigin};

// ============================================================================
// TransactionState
// ============================================================================

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Handler is running; its return value becomes the response.
    Pending,
    /// Handler opted into answering later via `complete` or `error`.
    DelayedPending,
    /// A result was sent.
    Completed,
    /// An error was sent.
    Errored,
}

impl TransactionState {
    /// Returns `true` once a response has been sent.
    #[inline]
    #[must_use]
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Errored)
    }
}

// ============================================================================
// Transaction
// ============================================================================

struct TransactionInner {
    id: TransactionId,
    method: String,
    origin: Origin,
    state: Mutex<TransactionState>,
    local: BrowsingContext,
    remote: BrowsingContext,
    one_way: bool,
}

/// Handle to an inbound call.
///
/// Cloning is cheap; clones share state, so a handler may move a clone into
/// a task and answer later.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TransactionInner>,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("method", &self.inner.method)
            .field("origin", &self.inner.origin)
            .field("state", &self.state())
            .finish()
    }
}

impl Transaction {
    pub(crate) fn new(
        id: TransactionId,
        method: impl Into<String>,
        origin: Origin,
        local: BrowsingContext,
        remote: BrowsingContext,
    ) -> Self {
        Self {
            inner: Arc::new(TransactionInner {
                id,
                method: method.into(),
                origin,
                state: Mutex::new(TransactionState::Pending),
                local,
                remote,
                one_way: false,
            }),
        }
    }

    /// Creates a transaction for a notification; its response is discarded.
    pub(crate) fn one_way(
        method: impl Into<String>,
        origin: Origin,
        local: BrowsingContext,
        remote: BrowsingContext,
    ) -> Self {
        Self {
            inner: Arc::new(TransactionInner {
                id: TransactionId::from_u64(0),
                method: method.into(),
                origin,
                state: Mutex::new(TransactionState::Pending),
                local,
                remote,
                one_way: true,
            }),
        }
    }

    /// Returns the transaction ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.inner.id
    }

    /// Returns the unscoped method name.
    #[inline]
    #[must_use]
    pub fn method(&self) -> &str {
        &self.inner.method
    }

    /// Returns the origin the request came from.
    #[inline]
    #[must_use]
    pub fn origin(&self) -> &Origin {
        &self.inner.origin
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> TransactionState {
        *self.inner.state.lock()
    }

    /// Returns `true` if the handler deferred its answer.
    #[inline]
    #[must_use]
    pub fn is_delayed(&self) -> bool {
        self.state() == TransactionState::DelayedPending
    }

    /// Defers (or un-defers) the response.
    ///
    /// When delayed, the handler's return value is ignored and the
    /// transaction stays open until `complete` or `error` is called.
    pub fn delay_return(&self, delay: bool) {
        let mut state = self.inner.state.lock();
        *state = match (*state, delay) {
            (TransactionState::Pending, true) => TransactionState::DelayedPending,
            (TransactionState::DelayedPending, false) => TransactionState::Pending,
            (current, _) => current,
        };
    }

    /// Sends a result.
    ///
    /// Returns `false` if the transaction was already finished.
    pub fn complete(&self, value: Value) -> bool {
        if !self.finish(TransactionState::Completed) {
            return false;
        }
        self.post(Response::success(self.inner.id, value));
        true
    }

    /// Sends an error.
    ///
    /// Returns `false` if the transaction was already finished.
    pub fn error(&self, code: impl Into<String>, message: impl Into<String>) -> bool {
        self.fail(RpcError::new(code, message))
    }

    /// Sends an [`RpcError`].
    ///
    /// Returns `false` if the transaction was already finished.
    pub fn fail(&self, error: RpcError) -> bool {
        if !self.finish(TransactionState::Errored) {
            return false;
        }
        self.post(Response::failure(self.inner.id, error));
        true
    }

    /// Applies a handler's return value.
    ///
    /// A successful return is ignored when the response was delayed; an
    /// error always finishes the transaction if it is still open.
    pub(crate) fn settle(&self, outcome: Result<Value, RpcError>) {
        match outcome {
            Ok(value) if !self.is_delayed() => {
                self.complete(value);
            }
            Ok(_) => {}
            Err(error) => {
                self.fail(error);
            }
        }
    }

    fn finish(&self, next: TransactionState) -> bool {
        let mut state = self.inner.state.lock();
        if state.is_finished() {
            debug!(
                id = %self.inner.id,
                method = %self.inner.method,
                state = ?*state,
                "Duplicate completion ignored"
            );
            return false;
        }
        *state = next;
        true
    }

    fn post(&self, response: Response) {
        if self.inner.one_way {
            return;
        }

        let data = match serde_json::to_string(&response) {
            Ok(data) => data,
            Err(e) => {
                debug!(id = %self.inner.id, error = %e, "Failed to serialize response");
                return;
            }
        };

        let target = TargetOrigin::Exact(self.inner.origin.clone());
        if let Err(e) = self.inner.remote.post_message(data, &target, &self.inner.local) {
            trace!(id = %self.inner.id, error = %e, "Response not delivered");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Envelope;
    use crate::transport::context::FrameOptions;
    use proptest::prelude::*;
    use serde_json::json;

    fn fixture() -> (BrowsingContext, BrowsingContext) {
        let rp = BrowsingContext::top_level("https://rp.example/").expect("rp");
        let relay = rp
            .embed_frame("https://idp.example/relay", FrameOptions::hidden())
            .expect("relay");
        (rp, relay)
    }

    fn transaction(rp: &BrowsingContext, relay: &BrowsingContext, origin: &str) -> Transaction {
        Transaction::new(
            TransactionId::next(),
            "get",
            Origin::parse(origin).expect("origin"),
            relay.clone(),
            rp.clone(),
        )
    }

    #[test]
    fn test_complete_posts_once() {
        let (rp, relay) = fixture();
        let mut listener = rp.add_listener();
        let tx = transaction(&rp, &relay, "https://rp.example");

        assert!(tx.complete(json!("ASSERTION1")));
        assert!(!tx.complete(json!("ASSERTION2")));
        assert!(!tx.error("canceled", "late"));
        assert_eq!(tx.state(), TransactionState::Completed);

        let message = listener.try_recv().expect("response");
        let envelope = Envelope::parse(&message.data).expect("envelope");
        let Envelope::Response(response) = envelope else {
            panic!("expected response");
        };
        assert_eq!(response.result, Some(json!("ASSERTION1")));
        assert!(listener.try_recv().is_none());
    }

    #[test]
    fn test_response_only_to_recorded_origin() {
        let (rp, relay) = fixture();
        let mut listener = rp.add_listener();
        let tx = transaction(&rp, &relay, "https://evil.example");

        assert!(tx.complete(json!("secret")));
        assert!(listener.try_recv().is_none());
    }

    #[test]
    fn test_settle_respects_delay() {
        let (rp, relay) = fixture();
        let tx = transaction(&rp, &relay, "https://rp.example");

        tx.delay_return(true);
        tx.settle(Ok(Value::Null));
        assert_eq!(tx.state(), TransactionState::DelayedPending);

        tx.settle(Err(RpcError::runtime("boom")));
        assert_eq!(tx.state(), TransactionState::Errored);
    }

    #[test]
    fn test_one_way_never_posts() {
        let (rp, relay) = fixture();
        let mut listener = rp.add_listener();
        let tx = Transaction::one_way(
            "ping",
            Origin::parse("https://rp.example").expect("origin"),
            relay.clone(),
            rp.clone(),
        );

        assert!(tx.complete(json!(1)));
        assert!(listener.try_recv().is_none());
    }

    #[test]
    fn test_delay_return_after_finish_is_noop() {
        let (rp, relay) = fixture();
        let tx = transaction(&rp, &relay, "https://rp.example");

        tx.complete(Value::Null);
        tx.delay_return(true);
        assert_eq!(tx.state(), TransactionState::Completed);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Complete,
        Error,
        Delay(bool),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Complete),
            Just(Op::Error),
            any::<bool>().prop_map(Op::Delay),
        ]
    }

    proptest! {
        #[test]
        fn prop_at_most_one_response(ops in prop::collection::vec(op(), 0..16)) {
            let (rp, relay) = fixture();
            let mut listener = rp.add_listener();
            let tx = transaction(&rp, &relay, "https://rp.example");

            let mut accepted = 0usize;
            for op in &ops {
                match op {
                    Op::Complete => accepted += usize::from(tx.complete(Value::Null)),
                    Op::Error => accepted += usize::from(tx.error("x", "y")),
                    Op::Delay(delay) => tx.delay_return(*delay),
                }
            }

            let mut posted = 0usize;
            while listener.try_recv().is_some() {
                posted += 1;
            }

            let expected = usize::from(ops.iter().any(|op| !matches!(op, Op::Delay(_))));
            prop_assert_eq!(accepted, expected);
            prop_assert_eq!(posted, expected);
        }
    }
}
