//! Event dispatcher for unsolicited notifications.
//!
//! Notifications decoded by the reader thread are queued on an unbounded
//! channel and delivered to subscribers from a dedicated dispatcher thread,
//! so a slow or misbehaving observer never stalls the reader or a pending
//! command. Within one notification, observers run in registration order.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use aclock_protocol::Notification;
use crossbeam_channel::Receiver;
use parking_lot::Mutex;

/// Handle identifying one subscription, for [`unsubscribe`].
///
/// [`unsubscribe`]: crate::AlarmClock::unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Observer callback invoked on the dispatcher thread.
pub(crate) type EventCallback = Box<dyn Fn(&Notification) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    /// Category token to match, or `None` for all notifications.
    category: Option<String>,
    callback: EventCallback,
}

type Registry = Arc<Mutex<Vec<Arc<Subscription>>>>;

/// Dispatcher thread handle plus the subscriber registry.
pub(crate) struct EventDispatcher {
    registry: Registry,
    next_id: AtomicU64,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
}

impl EventDispatcher {
    /// Start the dispatcher thread.
    ///
    /// The thread runs until the sending side (owned by the reader thread)
    /// hangs up, then drains whatever is still queued and exits.
    pub(crate) fn spawn(receiver: Receiver<Notification>) -> Self {
        let registry: Registry = Arc::new(Mutex::new(Vec::new()));
        let thread_registry = Arc::clone(&registry);

        let thread_handle = thread::spawn(move || {
            for event in receiver.iter() {
                tracing::debug!(category = event.category(), "dispatching notification");
                dispatch(&thread_registry, &event);
            }
        });

        EventDispatcher {
            registry,
            next_id: AtomicU64::new(1),
            thread_handle: Mutex::new(Some(thread_handle)),
        }
    }

    /// Register an observer for one category, or for everything.
    pub(crate) fn subscribe(
        &self,
        category: Option<String>,
        callback: EventCallback,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.registry.lock().push(Arc::new(Subscription {
            id,
            category,
            callback,
        }));
        id
    }

    /// Remove an observer. Returns false if the id was not registered.
    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.registry.lock();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    /// Wait for the dispatcher thread to drain and finish.
    ///
    /// Only meaningful after the sender has been dropped; called from
    /// client close.
    pub(crate) fn join(&self) {
        if let Some(handle) = self.thread_handle.lock().take() {
            let _ = handle.join();
        }
    }
}

fn dispatch(registry: &Mutex<Vec<Arc<Subscription>>>, event: &Notification) {
    // Snapshot outside the callback so an observer can (un)subscribe
    // without deadlocking.
    let matching: Vec<Arc<Subscription>> = registry
        .lock()
        .iter()
        .filter(|s| {
            s.category
                .as_deref()
                .map_or(true, |category| category == event.category())
        })
        .cloned()
        .collect();

    for subscription in matching {
        let result = catch_unwind(AssertUnwindSafe(|| (subscription.callback)(event)));
        if result.is_err() {
            tracing::warn!(
                category = event.category(),
                "event subscriber panicked, continuing with the rest"
            );
        }
    }
}
