//! Scoped RPC channel between two browsing contexts.
//!
//! A [`Channel`] speaks the envelope protocol over `post_message` with
//! exactly one remote context.
//!
//! # Event Loop
//!
//! Building a channel spawns a tokio task that handles:
//!
//! - Inbound requests, dispatched to bound handlers in arrival order
//! - Responses, correlated to outbound calls by transaction ID
//! - Notifications, dispatched without a response
//! - Internal commands (call expiry, shutdown)
//!
//! Messages are ignored unless they come from the configured remote context,
//! from an acceptable origin, and within the channel's scope.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::TransactionId;
use crate::protocol::envelope::{SCOPE_SEPARATOR, strip_scope};
use crate::protocol::{Envelope, Notification, Request, Response, RpcError};

use super::context::{BrowsingContext, InboundMessage, MessageListener};
use super::origin::TargetOrigin;
use super::transaction::Transaction;

// ============================================================================
// Constants
// ============================================================================

/// Maximum outbound calls awaiting a response before new calls are refused.
pub const MAX_PENDING_CALLS: usize = 100;

// ============================================================================
// Types
// ============================================================================

/// Handler for a bound method.
///
/// Return `Ok(value)` to answer with a result, `Err(error)` to answer with an
/// error, or call [`Transaction::delay_return`] and answer later.
pub type Handler =
    Arc<dyn Fn(&Transaction, Value) -> std::result::Result<Value, RpcError> + Send + Sync>;

/// Success callback for an outbound call.
pub type SuccessCallback = Box<dyn FnOnce(Value) + Send>;

/// Error callback for an outbound call.
pub type ErrorCallback = Box<dyn FnOnce(RpcError) + Send>;

/// An outbound call awaiting its response.
struct OutboundCall {
    method: String,
    on_success: SuccessCallback,
    on_error: ErrorCallback,
    expiry: Option<(JoinHandle<()>, Duration)>,
}

impl OutboundCall {
    fn cancel_expiry(&mut self) {
        if let Some((timer, _)) = self.expiry.take() {
            timer.abort();
        }
    }
}

/// Map of transaction IDs to outbound calls.
type OutboundMap = FxHashMap<TransactionId, OutboundCall>;

/// Map of unscoped method names to handlers.
type HandlerMap = FxHashMap<String, Handler>;

// ============================================================================
// ChannelConfig
// ============================================================================

/// Parameters for [`Channel::build`].
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Context the channel lives in.
    pub local: BrowsingContext,
    /// The only context messages are exchanged with.
    pub remote: BrowsingContext,
    /// Origins requests are posted to and messages accepted from.
    pub origin: TargetOrigin,
    /// Namespace prefixed to every method.
    pub scope: String,
}

impl ChannelConfig {
    /// Creates a config with an empty scope.
    #[inline]
    #[must_use]
    pub fn new(local: BrowsingContext, remote: BrowsingContext, origin: TargetOrigin) -> Self {
        Self {
            local,
            remote,
            origin,
            scope: String::new(),
        }
    }

    /// Sets the scope.
    #[inline]
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }
}

// ============================================================================
// ChannelCommand
// ============================================================================

/// Internal commands for the event loop.
enum ChannelCommand {
    /// An outbound call's timer fired.
    Expire(TransactionId),
    /// Stop the event loop.
    Shutdown,
}

// ============================================================================
// Channel
// ============================================================================

struct ChannelInner {
    config: ChannelConfig,
    handlers: RwLock<HandlerMap>,
    outbound: Mutex<OutboundMap>,
    command_tx: mpsc::UnboundedSender<ChannelCommand>,
    destroyed: AtomicBool,
}

/// RPC channel to one remote context.
///
/// Cloning is cheap; all clones drive the same event loop.
///
/// # Thread Safety
///
/// `Channel` is `Send + Sync`. Handlers and callbacks run on the channel's
/// event-loop task, one at a time.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("local", &self.inner.config.local.id())
            .field("remote", &self.inner.config.remote.id())
            .field("origin", &self.inner.config.origin)
            .field("scope", &self.inner.config.scope)
            .field("pending", &self.pending_count())
            .finish()
    }
}

// ============================================================================
// Channel - Construction
// ============================================================================

impl Channel {
    /// Builds a channel and spawns its event loop.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidScope`] if the scope contains `::`
    /// - [`Error::ContextClosed`] if either context is closed
    pub fn build(config: ChannelConfig) -> Result<Self> {
        if config.scope.contains(SCOPE_SEPARATOR) {
            return Err(Error::invalid_scope(config.scope));
        }
        for context in [&config.local, &config.remote] {
            if context.is_closed() {
                return Err(Error::context_closed(context.id()));
            }
        }

        let listener = config.local.add_listener();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(ChannelInner {
            config,
            handlers: RwLock::new(HandlerMap::default()),
            outbound: Mutex::new(OutboundMap::default()),
            command_tx,
            destroyed: AtomicBool::new(false),
        });

        debug!(
            local = %inner.config.local.id(),
            remote = %inner.config.remote.id(),
            origin = %inner.config.origin,
            scope = %inner.config.scope,
            "Channel built"
        );

        tokio::spawn(Self::run_event_loop(
            listener,
            command_rx,
            Arc::downgrade(&inner),
        ));

        Ok(Self { inner })
    }
}

// ============================================================================
// Channel - Handlers
// ============================================================================

impl Channel {
    /// Binds a handler to `method`, replacing any previous one.
    ///
    /// # Errors
    ///
    /// - [`Error::ChannelDestroyed`] after [`destroy`](Self::destroy)
    /// - [`Error::InvalidArgument`] if the method contains `::`
    pub fn bind<F>(&self, method: &str, handler: F) -> Result<()>
    where
        F: Fn(&Transaction, Value) -> std::result::Result<Value, RpcError> + Send + Sync + 'static,
    {
        self.ensure_live()?;
        if method.is_empty() || method.contains(SCOPE_SEPARATOR) {
            return Err(Error::invalid_argument(format!(
                "method name '{method}' is empty or contains '::'"
            )));
        }

        self.inner
            .handlers
            .write()
            .insert(method.to_string(), Arc::new(handler));

        trace!(scope = %self.inner.config.scope, method, "Handler bound");
        Ok(())
    }

    /// Removes the handler for `method`.
    ///
    /// Returns `false` if nothing was bound.
    pub fn unbind(&self, method: &str) -> bool {
        self.inner.handlers.write().remove(method).is_some()
    }
}

// ============================================================================
// Channel - Outbound
// ============================================================================

impl Channel {
    /// Calls `method` on the remote.
    ///
    /// Exactly one of the callbacks fires, once, unless the channel is
    /// destroyed first, in which case neither fires.
    pub fn call<S, E>(&self, method: &str, params: Value, on_success: S, on_error: E)
    where
        S: FnOnce(Value) + Send + 'static,
        E: FnOnce(RpcError) + Send + 'static,
    {
        self.dispatch(method, params, Box::new(on_success), Box::new(on_error), None);
    }

    /// Calls `method` and fails with `timeout_error` if no response arrives
    /// within `timeout`. A late response is ignored.
    pub fn call_with_timeout<S, E>(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
        on_success: S,
        on_error: E,
    ) where
        S: FnOnce(Value) + Send + 'static,
        E: FnOnce(RpcError) + Send + 'static,
    {
        self.dispatch(
            method,
            params,
            Box::new(on_success),
            Box::new(on_error),
            Some(timeout),
        );
    }

    /// Calls `method` and awaits the outcome.
    ///
    /// # Errors
    ///
    /// Returns the remote's [`RpcError`], or a local one if the call could
    /// not be made or the channel was destroyed while it was pending.
    pub async fn request(&self, method: &str, params: Value) -> std::result::Result<Value, RpcError> {
        let (tx, rx) = oneshot::channel();
        let tx = Arc::new(Mutex::new(Some(tx)));
        let tx_err = Arc::clone(&tx);

        self.call(
            method,
            params,
            move |value| {
                if let Some(tx) = tx.lock().take() {
                    let _ = tx.send(Ok(value));
                }
            },
            move |error| {
                if let Some(tx) = tx_err.lock().take() {
                    let _ = tx.send(Err(error));
                }
            },
        );

        rx.await
            .unwrap_or_else(|_| Err(RpcError::from(Error::ChannelDestroyed)))
    }

    /// Sends a one-way notification.
    ///
    /// # Errors
    ///
    /// - [`Error::ChannelDestroyed`] after [`destroy`](Self::destroy)
    /// - [`Error::ContextClosed`] if the remote context is gone
    pub fn notify(&self, method: &str, params: Value) -> Result<()> {
        self.ensure_live()?;
        let notification = Notification::new(&self.inner.config.scope, method, params);
        self.post(&serde_json::to_string(&notification)?)
    }

    fn dispatch(
        &self,
        method: &str,
        params: Value,
        on_success: SuccessCallback,
        on_error: ErrorCallback,
        timeout: Option<Duration>,
    ) {
        if let Err(e) = self.ensure_live() {
            on_error(RpcError::from(e));
            return;
        }

        let request = Request::new(&self.inner.config.scope, method, params);
        let id = request.id;

        let data = match serde_json::to_string(&request) {
            Ok(data) => data,
            Err(e) => {
                on_error(RpcError::from(Error::Json(e)));
                return;
            }
        };

        // Store correlation before posting
        {
            let mut outbound = self.inner.outbound.lock();
            if outbound.len() >= MAX_PENDING_CALLS {
                let pending = outbound.len();
                drop(outbound);
                warn!(pending, max = MAX_PENDING_CALLS, "Too many pending calls");
                on_error(RpcError::from(Error::TooManyPendingCalls {
                    pending,
                    max: MAX_PENDING_CALLS,
                }));
                return;
            }

            let expiry = timeout.map(|duration| (self.spawn_expiry(id, duration), duration));
            outbound.insert(
                id,
                OutboundCall {
                    method: request.method.clone(),
                    on_success,
                    on_error,
                    expiry,
                },
            );
        }

        if let Err(e) = self.post(&data) {
            let call = self.inner.outbound.lock().remove(&id);
            if let Some(mut call) = call {
                call.cancel_expiry();
                (call.on_error)(RpcError::from(e));
            }
            return;
        }

        trace!(%id, method = %request.method, "Request sent");
    }

    fn spawn_expiry(&self, id: TransactionId, duration: Duration) -> JoinHandle<()> {
        let command_tx = self.inner.command_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = command_tx.send(ChannelCommand::Expire(id));
        })
    }

    fn post(&self, data: &str) -> Result<()> {
        let config = &self.inner.config;
        config.remote.post_message(data, &config.origin, &config.local)
    }
}

// ============================================================================
// Channel - Lifecycle
// ============================================================================

impl Channel {
    /// Returns the channel scope.
    #[inline]
    #[must_use]
    pub fn scope(&self) -> &str {
        &self.inner.config.scope
    }

    /// Returns the remote context.
    #[inline]
    #[must_use]
    pub fn remote(&self) -> &BrowsingContext {
        &self.inner.config.remote
    }

    /// Returns the number of outbound calls awaiting a response.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.outbound.lock().len()
    }

    /// Returns `true` after [`destroy`](Self::destroy).
    #[inline]
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    /// Releases the transport subscription.
    ///
    /// Pending outbound calls are dropped without invoking their callbacks.
    /// Idempotent.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        let dropped: Vec<_> = self.inner.outbound.lock().drain().collect();
        let count = dropped.len();
        for (_, mut call) in dropped {
            call.cancel_expiry();
        }
        self.inner.handlers.write().clear();

        let _ = self.inner.command_tx.send(ChannelCommand::Shutdown);

        debug!(scope = %self.inner.config.scope, dropped = count, "Channel destroyed");
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(Error::ChannelDestroyed);
        }
        Ok(())
    }
}

// ============================================================================
// Channel - Event Loop
// ============================================================================

impl Channel {
    /// Event loop that handles inbound messages and internal commands.
    async fn run_event_loop(
        mut listener: MessageListener,
        mut command_rx: mpsc::UnboundedReceiver<ChannelCommand>,
        inner: Weak<ChannelInner>,
    ) {
        loop {
            tokio::select! {
                message = listener.recv() => {
                    let Some(message) = message else {
                        debug!("Local context closed");
                        break;
                    };
                    let Some(inner) = inner.upgrade() else {
                        break;
                    };
                    if inner.destroyed.load(Ordering::SeqCst) {
                        break;
                    }
                    Self::handle_incoming_message(&inner, message);
                }

                command = command_rx.recv() => {
                    match command {
                        Some(ChannelCommand::Expire(id)) => {
                            if let Some(inner) = inner.upgrade() {
                                Self::expire_call(&inner, id);
                            }
                        }

                        Some(ChannelCommand::Shutdown) | None => {
                            debug!("Shutdown command received");
                            break;
                        }
                    }
                }
            }
        }

        trace!("Channel event loop terminated");
    }

    /// Handles a message delivered to the local context.
    fn handle_incoming_message(inner: &Arc<ChannelInner>, message: InboundMessage) {
        let config = &inner.config;

        if message.source != config.remote.id() {
            trace!(source = %message.source, "Message from other context ignored");
            return;
        }
        if !config.origin.matches(&message.origin) {
            trace!(origin = %message.origin, expected = %config.origin, "Message from unexpected origin ignored");
            return;
        }

        let envelope = match Envelope::parse(&message.data) {
            Ok(envelope) => envelope,
            Err(e) => {
                trace!(error = %e, "Non-envelope message ignored");
                return;
            }
        };

        match envelope {
            Envelope::Request(request) => Self::handle_request(inner, request, &message),
            Envelope::Response(response) => Self::handle_response(inner, response),
            Envelope::Notification(notification) => {
                Self::handle_notification(inner, notification, &message);
            }
        }
    }

    fn handle_request(inner: &Arc<ChannelInner>, request: Request, message: &InboundMessage) {
        let config = &inner.config;
        let Some(method) = strip_scope(&config.scope, &request.method) else {
            trace!(method = %request.method, "Request for other scope ignored");
            return;
        };

        let transaction = Transaction::new(
            request.id,
            method,
            message.origin.clone(),
            config.local.clone(),
            config.remote.clone(),
        );

        let handler = inner.handlers.read().get(method).cloned();
        match handler {
            Some(handler) => {
                trace!(id = %request.id, method, "Dispatching request");
                let outcome = handler(&transaction, request.params);
                transaction.settle(outcome);
            }
            None => {
                debug!(id = %request.id, method, "No handler bound");
                transaction.fail(RpcError::unknown_method(&request.method));
            }
        }
    }

    fn handle_notification(
        inner: &Arc<ChannelInner>,
        notification: Notification,
        message: &InboundMessage,
    ) {
        let config = &inner.config;
        let Some(method) = strip_scope(&config.scope, &notification.method) else {
            return;
        };

        let handler = inner.handlers.read().get(method).cloned();
        if let Some(handler) = handler {
            let transaction = Transaction::one_way(
                method,
                message.origin.clone(),
                config.local.clone(),
                config.remote.clone(),
            );
            if let Err(e) = handler(&transaction, notification.params) {
                debug!(method, error = %e, "Notification handler failed");
            }
        } else {
            trace!(method, "Notification without handler ignored");
        }
    }

    fn handle_response(inner: &Arc<ChannelInner>, response: Response) {
        let call = inner.outbound.lock().remove(&response.id);

        let Some(mut call) = call else {
            trace!(id = %response.id, "Response for unknown call ignored");
            return;
        };
        call.cancel_expiry();

        match response.into_result() {
            Ok(value) => (call.on_success)(value),
            Err(error) => (call.on_error)(error),
        }
    }

    fn expire_call(inner: &Arc<ChannelInner>, id: TransactionId) {
        let call = inner.outbound.lock().remove(&id);

        if let Some(call) = call {
            let timeout_ms = call
                .expiry
                .map_or(0, |(_, duration)| u64::try_from(duration.as_millis()).unwrap_or(u64::MAX));
            debug!(%id, method = %call.method, timeout_ms, "Call timed out");
            (call.on_error)(RpcError::timeout(timeout_ms, &call.method));
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
