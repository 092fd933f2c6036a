//! Dialog module lifecycle.
//!
//! A module is one screen or step of the dialog. The state machine starts
//! it with a fresh [`ModuleHandle`]; everything the module subscribes to or
//! spawns goes through that handle, and the handle releases all of it when
//! the module is stopped. Results of collaborator calls that finish after
//! the stop are dropped.
//!
//! # Lifecycle
//!
//! ```text
//! start ──► (foreground) ──► stop ──► (suspended) ──► resume ──► ...
//!                              │
//!                              └────► destroy
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tracing::trace;

use crate::identifiers::SubscriptionId;
use crate::protocol::{DialogEvent, EventKind};

use super::context::NegotiationContext;
use super::mediator::Mediator;
use super::services::Screen;

// ============================================================================
// Module
// ============================================================================

/// One step of the dialog.
pub trait Module: Send {
    /// Returns the module name for logs.
    fn name(&self) -> &'static str;

    /// Makes the module the foreground.
    fn start(&mut self, handle: &ModuleHandle);

    /// Brings a suspended module back. Defaults to [`start`](Self::start).
    fn resume(&mut self, handle: &ModuleHandle) {
        self.start(handle);
    }

    /// Called after the handle has been released.
    fn stop(&mut self) {}

    /// Called once, when the module will never run again.
    fn destroy(&mut self) {}
}

// ============================================================================
// ModuleHandle
// ============================================================================

struct HandleInner {
    name: &'static str,
    mediator: Mediator,
    context: NegotiationContext,
    live: AtomicBool,
    subscriptions: Mutex<Vec<SubscriptionId>>,
    tasks: Mutex<Vec<AbortHandle>>,
}

/// A module's access to the mediator for one activation.
#[derive(Clone)]
pub struct ModuleHandle {
    inner: Arc<HandleInner>,
}

impl fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("module", &self.inner.name)
            .field("live", &self.is_live())
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

impl ModuleHandle {
    pub(crate) fn new(name: &'static str, mediator: Mediator, context: NegotiationContext) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                name,
                mediator,
                context,
                live: AtomicBool::new(true),
                subscriptions: Mutex::new(Vec::new()),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Returns the negotiation context.
    #[inline]
    #[must_use]
    pub fn context(&self) -> &NegotiationContext {
        &self.inner.context
    }

    /// Returns `true` until the module is stopped.
    #[inline]
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// Returns the number of subscriptions this activation holds.
    #[inline]
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.lock().len()
    }

    /// Subscribes to `kind` for as long as the module is live.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&DialogEvent) + Send + Sync + 'static,
    {
        let live = self.clone();
        let id = self.inner.mediator.subscribe(kind, move |event| {
            if live.is_live() {
                handler(event);
            }
        });
        self.inner.subscriptions.lock().push(id);
        id
    }

    /// Subscribes to user commands.
    pub fn on_command<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&crate::protocol::Command) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::Command, move |event| {
            if let Some(command) = event.as_command() {
                handler(command);
            }
        })
    }

    /// Publishes `event` if the module is live.
    pub fn publish(&self, event: DialogEvent) -> bool {
        if !self.is_live() {
            trace!(module = self.inner.name, kind = ?event.kind(), "Stale publish dropped");
            return false;
        }
        self.inner.mediator.publish(event)
    }

    /// Shows `screen` if the module is live.
    pub fn render(&self, screen: &Screen) {
        if self.is_live() {
            self.inner.context.render(screen);
        }
    }

    /// Runs a collaborator call; its event is published only if the module
    /// is still live when it finishes.
    ///
    /// Must be called within a tokio runtime.
    pub fn spawn<Fut>(&self, future: Fut)
    where
        Fut: Future<Output = Option<DialogEvent>> + Send + 'static,
    {
        let handle = self.clone();
        let task = tokio::spawn(async move {
            if let Some(event) = future.await {
                handle.publish(event);
            }
        });
        self.inner.tasks.lock().push(task.abort_handle());
    }

    /// Ends this activation: unsubscribes everything and aborts spawned
    /// calls. Returns the number of subscriptions released.
    pub(crate) fn release(&self) -> usize {
        if !self.inner.live.swap(false, Ordering::SeqCst) {
            return 0;
        }
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
        let subscriptions: Vec<SubscriptionId> = self.inner.subscriptions.lock().drain(..).collect();
        for id in &subscriptions {
            self.inner.mediator.unsubscribe(*id);
        }
        trace!(module = self.inner.name, released = subscriptions.len(), "Module released");
        subscriptions.len()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialog::GetOptions;
    use crate::dialog::context::tests::{FakeBackend, context_with};
    use crate::protocol::Command;

    fn handle() -> (ModuleHandle, Mediator) {
        let (context, _, _) = context_with(FakeBackend::default(), GetOptions::default());
        let mediator = Mediator::new();
        (ModuleHandle::new("test", mediator.clone(), context), mediator)
    }

    #[test]
    fn test_release_drops_exactly_own_subscriptions() {
        let (handle, mediator) = handle();
        mediator.subscribe(EventKind::Start, |_| {});
        handle.subscribe(EventKind::Start, |_| {});
        handle.on_command(|_| {});
        assert_eq!(mediator.subscriber_count(), 3);

        assert_eq!(handle.release(), 2);
        assert_eq!(handle.release(), 0);
        assert_eq!(mediator.subscriber_count(), 1);
        assert!(!handle.is_live());
    }

    #[test]
    fn test_released_handle_cannot_publish() {
        let (handle, mediator) = handle();
        assert!(handle.publish(DialogEvent::Start));
        handle.release();
        assert!(!handle.publish(DialogEvent::Start));
        assert_eq!(mediator.queued(), 1);
    }

    #[test]
    fn test_on_command_filters() {
        let (handle, mediator) = handle();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        handle.on_command(move |command| sink.lock().push(command.clone()));

        mediator.publish(DialogEvent::Command(Command::Retry));
        mediator.drain();
        assert_eq!(*seen.lock(), vec![Command::Retry]);
    }

    #[tokio::test]
    async fn test_stale_collaborator_result_dropped() {
        let (handle, mediator) = handle();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        handle.spawn(async move {
            let _ = rx.await;
            Some(DialogEvent::Start)
        });

        handle.release();
        let _ = tx.send(());
        tokio::task::yield_now().await;
        assert_eq!(mediator.queued(), 0);
    }

    #[tokio::test]
    async fn test_live_collaborator_result_published() {
        let (handle, mediator) = handle();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        mediator.subscribe(EventKind::Start, move |_| {
            let _ = tx.send(());
        });
        handle.spawn(async { Some(DialogEvent::Start) });

        let runner = tokio::spawn({
            let mediator = mediator.clone();
            async move { mediator.run().await }
        });
        rx.recv().await.expect("published");
        mediator.close();
        runner.await.expect("loop ends");
    }
}
