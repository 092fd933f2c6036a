//! Browsing contexts and message delivery.
//!
//! A [`BrowsingContext`] models a top-level window or a nested frame: it has
//! an origin, a URL, an optional name, child frames, an optional opener and a
//! set of message listeners. Delivery follows the browser rules the protocol
//! depends on:
//!
//! - A message posted with an exact target origin is dropped unless the
//!   receiving context has that origin.
//! - Every delivered message is tagged with the sender's origin and context.
//! - Delivery is queued; listeners see messages in posting order.
//! - Globals exposed by a context are only reachable from the same origin.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────┐   opener    ┌──────────────────────┐
//! │ Caller (https://rp)       │◄────────────│ Negotiator (IdP)     │
//! │  └─ frame "relay" (IdP)   │             │  └─ hidden prov frame │
//! └───────────────────────────┘             └──────────────────────┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::ContextId;

use super::origin::{Origin, TargetOrigin};

// ============================================================================
// Types
// ============================================================================

/// Exposed same-origin globals keyed by name.
type GlobalsMap = FxHashMap<&'static str, Arc<dyn Any + Send + Sync>>;

/// A message as seen by a receiving context.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Origin of the sending context, as recorded by the platform.
    pub origin: Origin,
    /// The sending context.
    pub source: ContextId,
    /// Serialized payload.
    pub data: String,
}

/// Options for embedding a nested frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameOptions {
    /// Frame name, used for `frames[name]` lookup.
    pub name: Option<String>,
    /// Whether the frame is invisible.
    pub hidden: bool,
}

impl FrameOptions {
    /// Creates options for an invisible frame.
    #[inline]
    #[must_use]
    pub fn hidden() -> Self {
        Self {
            name: None,
            hidden: true,
        }
    }

    /// Sets the frame name.
    #[inline]
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Internal shared state for a browsing context.
pub(crate) struct ContextInner {
    id: ContextId,
    origin: Origin,
    url: RwLock<Url>,
    name: Option<String>,
    hidden: bool,
    parent: Option<Weak<ContextInner>>,
    opener: Option<Weak<ContextInner>>,
    frames: RwLock<Vec<BrowsingContext>>,
    listeners: Mutex<FxHashMap<u64, mpsc::UnboundedSender<InboundMessage>>>,
    next_listener: AtomicU64,
    globals: Mutex<GlobalsMap>,
    loads: watch::Sender<u64>,
    closed: AtomicBool,
}

// ============================================================================
// BrowsingContext
// ============================================================================

/// A handle to a browsing context.
///
/// Cloning is cheap; all clones refer to the same context.
#[derive(Clone)]
pub struct BrowsingContext {
    pub(crate) inner: Arc<ContextInner>,
}

impl fmt::Debug for BrowsingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrowsingContext")
            .field("id", &self.inner.id)
            .field("origin", &self.inner.origin)
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

impl PartialEq for BrowsingContext {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for BrowsingContext {}

// ============================================================================
// BrowsingContext - Constructors
// ============================================================================

impl BrowsingContext {
    /// Creates a top-level context loaded from `url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Url`] or [`Error::InvalidOrigin`] for bad URLs.
    pub fn top_level(url: &str) -> Result<Self> {
        Self::create(url, None, false, None, None)
    }

    /// Opens a popup whose opener is this context.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Url`] or [`Error::InvalidOrigin`] for bad URLs.
    pub fn open_popup(&self, url: &str) -> Result<Self> {
        Self::create(url, None, false, None, Some(Arc::downgrade(&self.inner)))
    }

    /// Embeds a nested frame loaded from `url`.
    ///
    /// # Errors
    ///
    /// - [`Error::ContextClosed`] if this context is closed
    /// - [`Error::Url`] or [`Error::InvalidOrigin`] for bad URLs
    pub fn embed_frame(&self, url: &str, options: FrameOptions) -> Result<Self> {
        self.ensure_open()?;

        let frame = Self::create(
            url,
            options.name,
            options.hidden,
            Some(Arc::downgrade(&self.inner)),
            None,
        )?;
        self.inner.frames.write().push(frame.clone());

        debug!(
            parent = %self.inner.id,
            frame = %frame.inner.id,
            origin = %frame.inner.origin,
            hidden = frame.inner.hidden,
            "Frame embedded"
        );

        Ok(frame)
    }

    fn create(
        url: &str,
        name: Option<String>,
        hidden: bool,
        parent: Option<Weak<ContextInner>>,
        opener: Option<Weak<ContextInner>>,
    ) -> Result<Self> {
        let url = Url::parse(url)?;
        let origin = Origin::from_url(&url)?;
        let (loads, _) = watch::channel(0);

        Ok(Self {
            inner: Arc::new(ContextInner {
                id: ContextId::next(),
                origin,
                url: RwLock::new(url),
                name,
                hidden,
                parent,
                opener,
                frames: RwLock::new(Vec::new()),
                listeners: Mutex::new(FxHashMap::default()),
                next_listener: AtomicU64::new(1),
                globals: Mutex::new(FxHashMap::default()),
                loads,
                closed: AtomicBool::new(false),
            }),
        })
    }
}

// ============================================================================
// BrowsingContext - Accessors
// ============================================================================

impl BrowsingContext {
    /// Returns the context ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    /// Returns the context's origin.
    #[inline]
    #[must_use]
    pub fn origin(&self) -> &Origin {
        &self.inner.origin
    }

    /// Returns the current URL.
    #[must_use]
    pub fn url(&self) -> Url {
        self.inner.url.read().clone()
    }

    /// Returns the frame name, if any.
    #[inline]
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Returns `true` for invisible frames.
    #[inline]
    #[must_use]
    pub fn is_hidden(&self) -> bool {
        self.inner.hidden
    }

    /// Returns `true` once the context has been closed or removed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Returns the embedding context, for frames.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        upgrade(self.inner.parent.as_ref())
    }

    /// Returns the context that opened this popup.
    #[must_use]
    pub fn opener(&self) -> Option<Self> {
        upgrade(self.inner.opener.as_ref())
    }

    /// Returns the child frames.
    #[must_use]
    pub fn frames(&self) -> Vec<Self> {
        self.inner.frames.read().clone()
    }

    /// Finds a direct child frame by name (`window.frames[name]`).
    #[must_use]
    pub fn frame_by_name(&self, name: &str) -> Option<Self> {
        self.inner
            .frames
            .read()
            .iter()
            .find(|frame| frame.name() == Some(name))
            .cloned()
    }

    /// Reads the URL fragment and clears it, as a page consuming a one-shot
    /// token from `location.hash` does.
    pub fn take_fragment(&self) -> Option<String> {
        let mut url = self.inner.url.write();
        let fragment = url.fragment().map(str::to_string);
        url.set_fragment(None);
        fragment
    }
}

// ============================================================================
// BrowsingContext - Messaging
// ============================================================================

impl BrowsingContext {
    /// Posts a message to this context from `source`.
    ///
    /// A message whose exact target origin differs from this context's origin
    /// is dropped without error, as the platform does.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ContextClosed`] if this context is closed.
    pub fn post_message(
        &self,
        data: impl Into<String>,
        target_origin: &TargetOrigin,
        source: &BrowsingContext,
    ) -> Result<()> {
        self.ensure_open()?;

        if !target_origin.matches(&self.inner.origin) {
            trace!(
                target = %self.inner.id,
                expected = %target_origin,
                actual = %self.inner.origin,
                "Message dropped: target origin mismatch"
            );
            return Ok(());
        }

        let message = InboundMessage {
            origin: source.inner.origin.clone(),
            source: source.inner.id,
            data: data.into(),
        };

        let mut listeners = self.inner.listeners.lock();
        listeners.retain(|_, tx| tx.send(message.clone()).is_ok());

        trace!(
            target = %self.inner.id,
            source = %message.source,
            listeners = listeners.len(),
            "Message delivered"
        );

        Ok(())
    }

    /// Subscribes to messages delivered to this context.
    ///
    /// The subscription ends when the returned listener is dropped.
    #[must_use]
    pub fn add_listener(&self) -> MessageListener {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);

        if !self.is_closed() {
            self.inner.listeners.lock().insert(id, tx);
        }

        MessageListener {
            id,
            context: Arc::downgrade(&self.inner),
            rx,
        }
    }

    /// Returns the number of active listeners.
    #[inline]
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }
}

// ============================================================================
// BrowsingContext - Same-Origin Globals
// ============================================================================

impl BrowsingContext {
    /// Exposes a value that same-origin contexts may call into directly.
    pub fn expose<T: Any + Send + Sync>(&self, name: &'static str, value: Arc<T>) {
        self.inner.globals.lock().insert(name, value);
    }

    /// Looks up an exposed value on behalf of `accessor`.
    ///
    /// Returns `Ok(None)` if nothing of that name and type is exposed.
    ///
    /// # Errors
    ///
    /// - [`Error::SecurityError`] if `accessor` is cross-origin
    /// - [`Error::ContextClosed`] if this context is closed
    pub fn lookup<T: Any + Send + Sync>(
        &self,
        name: &str,
        accessor: &BrowsingContext,
    ) -> Result<Option<Arc<T>>> {
        self.ensure_open()?;

        if accessor.origin() != self.origin() {
            return Err(Error::security(format!(
                "{} may not access globals of {}",
                accessor.origin(),
                self.origin()
            )));
        }

        let value = self.inner.globals.lock().get(name).cloned();
        Ok(value.and_then(|v| v.downcast::<T>().ok()))
    }
}

// ============================================================================
// BrowsingContext - Lifecycle
// ============================================================================

impl BrowsingContext {
    /// Signals that the document finished loading.
    ///
    /// Each call is a distinct load event.
    pub fn mark_loaded(&self) {
        self.inner.loads.send_modify(|count| *count += 1);
        debug!(context = %self.inner.id, "Context loaded");
    }

    /// Subscribes to load events.
    ///
    /// The receiver only reports loads that happen after this call.
    #[must_use]
    pub fn load_events(&self) -> watch::Receiver<u64> {
        self.inner.loads.subscribe()
    }

    /// Removes a child frame and closes it.
    ///
    /// Returns `false` if no such frame exists.
    pub fn remove_frame(&self, id: ContextId) -> bool {
        let removed = {
            let mut frames = self.inner.frames.write();
            frames
                .iter()
                .position(|frame| frame.id() == id)
                .map(|index| frames.remove(index))
        };

        match removed {
            Some(frame) => {
                frame.close();
                debug!(parent = %self.inner.id, frame = %id, "Frame removed");
                true
            }
            None => false,
        }
    }

    /// Closes this context and all of its frames.
    ///
    /// Listeners are released; later posts fail with
    /// [`Error::ContextClosed`].
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.inner.listeners.lock().clear();
        self.inner.globals.lock().clear();

        let frames: Vec<_> = self.inner.frames.write().drain(..).collect();
        for frame in frames {
            frame.close();
        }

        debug!(context = %self.inner.id, "Context closed");
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::context_closed(self.inner.id));
        }
        Ok(())
    }
}

fn upgrade(weak: Option<&Weak<ContextInner>>) -> Option<BrowsingContext> {
    weak.and_then(Weak::upgrade)
        .map(|inner| BrowsingContext { inner })
}

// ============================================================================
// MessageListener
// ============================================================================

/// A subscription to a context's inbound messages.
pub struct MessageListener {
    id: u64,
    context: Weak<ContextInner>,
    rx: mpsc::UnboundedReceiver<InboundMessage>,
}

impl MessageListener {
    /// Receives the next message, or `None` once the context closes.
    pub async fn recv(&mut self) -> Option<InboundMessage> {
        self.rx.recv().await
    }

    /// Receives a queued message without waiting.
    pub fn try_recv(&mut self) -> Option<InboundMessage> {
        self.rx.try_recv().ok()
    }
}

impl fmt::Debug for MessageListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageListener")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl Drop for MessageListener {
    fn drop(&mut self) {
        if let Some(context) = self.context.upgrade() {
            context.listeners.lock().remove(&self.id);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn exact(origin: &str) -> TargetOrigin {
        TargetOrigin::parse(origin).expect("origin")
    }

    #[tokio::test]
    async fn test_post_message_tags_sender_origin() {
        let rp = BrowsingContext::top_level("https://rp.example/").expect("rp");
        let frame = rp
            .embed_frame("https://idp.example/relay", FrameOptions::default())
            .expect("frame");

        let mut listener = rp.add_listener();
        rp.post_message("hello", &exact("https://rp.example"), &frame)
            .expect("post");

        let message = listener.recv().await.expect("message");
        assert_eq!(message.origin.as_str(), "https://idp.example");
        assert_eq!(message.source, frame.id());
        assert_eq!(message.data, "hello");
    }

    #[tokio::test]
    async fn test_post_message_drops_on_target_mismatch() {
        let rp = BrowsingContext::top_level("https://rp.example/").expect("rp");
        let other = BrowsingContext::top_level("https://idp.example/").expect("idp");

        let mut listener = rp.add_listener();
        rp.post_message("secret", &exact("https://evil.example"), &other)
            .expect("dropped silently");

        assert!(listener.try_recv().is_none());
    }

    #[test]
    fn test_post_to_closed_context_fails() {
        let rp = BrowsingContext::top_level("https://rp.example/").expect("rp");
        let other = BrowsingContext::top_level("https://idp.example/").expect("idp");
        rp.close();

        let result = rp.post_message("x", &TargetOrigin::Any, &other);
        assert!(matches!(result, Err(Error::ContextClosed { .. })));
    }

    #[test]
    fn test_frame_lookup_and_removal() {
        let rp = BrowsingContext::top_level("https://rp.example/").expect("rp");
        let frame = rp
            .embed_frame(
                "https://idp.example/relay",
                FrameOptions::hidden().with_name("relay-1"),
            )
            .expect("frame");

        assert_eq!(rp.frame_by_name("relay-1"), Some(frame.clone()));
        assert_eq!(frame.parent(), Some(rp.clone()));
        assert!(rp.remove_frame(frame.id()));
        assert!(frame.is_closed());
        assert!(rp.frame_by_name("relay-1").is_none());
        assert!(!rp.remove_frame(frame.id()));
    }

    #[test]
    fn test_globals_are_same_origin_only() {
        let rp = BrowsingContext::top_level("https://rp.example/").expect("rp");
        let relay = rp
            .embed_frame("https://idp.example/relay", FrameOptions::default())
            .expect("frame");
        let dialog = rp.open_popup("https://idp.example/sign_in").expect("popup");

        relay.expose("answer", Arc::new(42u32));

        let value = relay.lookup::<u32>("answer", &dialog).expect("same origin");
        assert_eq!(value.as_deref(), Some(&42));

        let denied = relay.lookup::<u32>("answer", &rp);
        assert!(matches!(denied, Err(Error::SecurityError { .. })));

        let wrong_type = relay.lookup::<String>("answer", &dialog).expect("lookup");
        assert!(wrong_type.is_none());
    }

    #[test]
    fn test_take_fragment_clears_it() {
        let rp = BrowsingContext::top_level("https://rp.example/").expect("rp");
        let dialog = rp
            .open_popup("https://idp.example/sign_in#relay-1")
            .expect("popup");

        assert_eq!(dialog.take_fragment().as_deref(), Some("relay-1"));
        assert_eq!(dialog.take_fragment(), None);
        assert_eq!(dialog.opener(), Some(rp));
    }

    #[test]
    fn test_dropping_listener_unsubscribes() {
        let rp = BrowsingContext::top_level("https://rp.example/").expect("rp");
        let listener = rp.add_listener();
        assert_eq!(rp.listener_count(), 1);
        drop(listener);
        assert_eq!(rp.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_load_events_only_after_subscribe() {
        let frame = BrowsingContext::top_level("https://idp.example/prov").expect("frame");
        frame.mark_loaded();

        let mut loads = frame.load_events();
        assert!(!loads.has_changed().expect("sender alive"));

        frame.mark_loaded();
        loads.changed().await.expect("load");
        assert_eq!(*loads.borrow(), 2);
    }
}
