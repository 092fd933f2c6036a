//! Publish/subscribe bus inside one negotiation.
//!
//! Published events are queued and dispatched one at a time, in FIFO order.
//! A handler that publishes only enqueues; dispatch never re-enters, so each
//! handler finishes before the next event is looked at.
//!
//! # Example
//!
//! ```ignore
//! let mediator = Mediator::new();
//! let id = mediator.subscribe(EventKind::Start, |_| println!("started"));
//! mediator.publish(DialogEvent::Start);
//! mediator.drain();
//! mediator.unsubscribe(id);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{trace, warn};

use crate::identifiers::SubscriptionId;
use crate::protocol::{DialogEvent, EventKind};

// ============================================================================
// Types
// ============================================================================

/// Subscriber callback.
pub type EventHandler = Arc<dyn Fn(&DialogEvent) + Send + Sync>;

struct Subscriber {
    id: SubscriptionId,
    kind: EventKind,
    handler: EventHandler,
}

struct MediatorInner {
    queue: Mutex<VecDeque<DialogEvent>>,
    subscribers: Mutex<Vec<Subscriber>>,
    dispatching: AtomicBool,
    closed: AtomicBool,
    wake: Notify,
}

// ============================================================================
// Mediator
// ============================================================================

/// Event bus for one negotiation. Cheap to clone.
#[derive(Clone)]
pub struct Mediator {
    inner: Arc<MediatorInner>,
}

impl fmt::Debug for Mediator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mediator")
            .field("queued", &self.queued())
            .field("subscribers", &self.subscriber_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Default for Mediator {
    fn default() -> Self {
        Self::new()
    }
}

impl Mediator {
    /// Creates an empty mediator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MediatorInner {
                queue: Mutex::new(VecDeque::new()),
                subscribers: Mutex::new(Vec::new()),
                dispatching: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                wake: Notify::new(),
            }),
        }
    }

    /// Queues `event` for dispatch.
    ///
    /// Returns `false` if the mediator is closed.
    pub fn publish(&self, event: DialogEvent) -> bool {
        if self.is_closed() {
            trace!(kind = ?event.kind(), "Publish after close dropped");
            return false;
        }
        trace!(kind = ?event.kind(), "Event queued");
        self.inner.queue.lock().push_back(event);
        self.inner.wake.notify_one();
        true
    }

    /// Registers `handler` for events of `kind`.
    ///
    /// Handlers for the same kind run in registration order.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&DialogEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId::next();
        self.inner.subscribers.lock().push(Subscriber {
            id,
            kind,
            handler: Arc::new(handler),
        });
        trace!(%id, ?kind, "Subscribed");
        id
    }

    /// Removes a subscription. Returns `false` if it was not registered.
    ///
    /// A handler unsubscribed while an event is being dispatched does not
    /// see that event.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.inner.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        before != subscribers.len()
    }

    /// Dispatches queued events until the queue is empty.
    ///
    /// Returns the number of events dispatched. Called from inside a
    /// handler, returns 0 immediately; the outer dispatch picks up whatever
    /// the handler published.
    pub fn drain(&self) -> usize {
        if self.inner.dispatching.swap(true, Ordering::AcqRel) {
            return 0;
        }

        let mut dispatched = 0;
        loop {
            let Some(event) = self.inner.queue.lock().pop_front() else {
                break;
            };
            self.dispatch(&event);
            dispatched += 1;
        }

        self.inner.dispatching.store(false, Ordering::Release);
        dispatched
    }

    /// Dispatches events as they are published until [`close`](Self::close).
    pub async fn run(&self) {
        loop {
            self.drain();
            if self.is_closed() {
                break;
            }
            self.inner.wake.notified().await;
        }
        trace!("Mediator loop terminated");
    }

    /// Drops queued events and subscribers; later publishes are ignored.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let dropped = {
            let mut queue = self.inner.queue.lock();
            let dropped = queue.len();
            queue.clear();
            dropped
        };
        self.inner.subscribers.lock().clear();
        self.inner.wake.notify_one();
        if dropped > 0 {
            warn!(dropped, "Mediator closed with queued events");
        }
    }

    /// Returns `true` after [`close`](Self::close).
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Returns the number of queued events.
    #[inline]
    #[must_use]
    pub fn queued(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Returns the number of live subscriptions.
    #[inline]
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    /// Returns the number of live subscriptions for `kind`.
    #[must_use]
    pub fn subscriber_count_for(&self, kind: EventKind) -> usize {
        self.inner
            .subscribers
            .lock()
            .iter()
            .filter(|s| s.kind == kind)
            .count()
    }

    fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.inner.subscribers.lock().iter().any(|s| s.id == id)
    }

    fn dispatch(&self, event: &DialogEvent) {
        let kind = event.kind();
        let handlers: Vec<(SubscriptionId, EventHandler)> = self
            .inner
            .subscribers
            .lock()
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| (s.id, Arc::clone(&s.handler)))
            .collect();

        trace!(?kind, handlers = handlers.len(), "Dispatching");

        for (id, handler) in handlers {
            if self.is_subscribed(id) {
                handler(event);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Command;

    fn recorder(mediator: &Mediator, kind: EventKind) -> Arc<Mutex<Vec<EventKind>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        mediator.subscribe(kind, move |event| sink.lock().push(event.kind()));
        seen
    }

    #[test]
    fn test_fifo_dispatch() {
        let mediator = Mediator::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for kind in [EventKind::Start, EventKind::Command] {
            let sink = Arc::clone(&order);
            mediator.subscribe(kind, move |event| sink.lock().push(event.kind()));
        }

        mediator.publish(DialogEvent::Command(Command::Back));
        mediator.publish(DialogEvent::Start);
        assert_eq!(mediator.drain(), 2);
        assert_eq!(*order.lock(), vec![EventKind::Command, EventKind::Start]);
    }

    #[test]
    fn test_publish_from_handler_does_not_reenter() {
        let mediator = Mediator::new();
        let trace = Arc::new(Mutex::new(Vec::new()));

        let (inner, sink) = (mediator.clone(), Arc::clone(&trace));
        mediator.subscribe(EventKind::Start, move |_| {
            sink.lock().push("start:begin");
            inner.publish(DialogEvent::Command(Command::Cancel));
            assert_eq!(inner.drain(), 0);
            sink.lock().push("start:end");
        });
        let sink = Arc::clone(&trace);
        mediator.subscribe(EventKind::Command, move |_| sink.lock().push("command"));

        mediator.publish(DialogEvent::Start);
        assert_eq!(mediator.drain(), 2);
        assert_eq!(*trace.lock(), vec!["start:begin", "start:end", "command"]);
    }

    #[test]
    fn test_unsubscribe_during_dispatch() {
        let mediator = Mediator::new();
        let second_id = Arc::new(Mutex::new(None));

        let (inner, target) = (mediator.clone(), Arc::clone(&second_id));
        mediator.subscribe(EventKind::Start, move |_| {
            if let Some(id) = target.lock().take() {
                inner.unsubscribe(id);
            }
        });
        let hits = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&hits);
        let id = mediator.subscribe(EventKind::Start, move |_| *sink.lock() += 1);
        *second_id.lock() = Some(id);

        mediator.publish(DialogEvent::Start);
        mediator.drain();
        assert_eq!(*hits.lock(), 0);
        assert_eq!(mediator.subscriber_count_for(EventKind::Start), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let mediator = Mediator::new();
        let seen = recorder(&mediator, EventKind::Start);
        let id = mediator.subscribe(EventKind::Start, |_| {});
        assert_eq!(mediator.subscriber_count(), 2);

        assert!(mediator.unsubscribe(id));
        assert!(!mediator.unsubscribe(id));

        mediator.publish(DialogEvent::Start);
        mediator.drain();
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_close_drops_everything() {
        let mediator = Mediator::new();
        let seen = recorder(&mediator, EventKind::Start);
        mediator.publish(DialogEvent::Start);

        mediator.close();
        assert!(!mediator.publish(DialogEvent::Start));
        assert_eq!(mediator.drain(), 0);
        assert!(seen.lock().is_empty());
        assert_eq!(mediator.subscriber_count(), 0);
    }

    #[test]
    fn test_run_loop_parks_until_woken() {
        let mediator = Mediator::new();
        let seen = recorder(&mediator, EventKind::Start);
        let mut run = tokio_test::task::spawn(mediator.run());

        tokio_test::assert_pending!(run.poll());
        mediator.publish(DialogEvent::Start);
        assert!(run.is_woken());
        tokio_test::assert_pending!(run.poll());
        assert_eq!(seen.lock().len(), 1);

        mediator.close();
        assert!(run.is_woken());
        tokio_test::assert_ready!(run.poll());
    }

    #[tokio::test]
    async fn test_run_loop_dispatches_until_closed() {
        let mediator = Mediator::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        mediator.subscribe(EventKind::Start, move |_| {
            let _ = tx.send(());
        });

        let runner = tokio::spawn({
            let mediator = mediator.clone();
            async move { mediator.run().await }
        });

        mediator.publish(DialogEvent::Start);
        rx.recv().await.expect("dispatched");

        mediator.close();
        runner.await.expect("loop ends");
    }
}
