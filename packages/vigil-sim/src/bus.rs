//! bus.rs — In-process publish/subscribe fan-out
//!
//! Explicit registry of topic → ordered subscriptions with stable handles.
//! - Delivery is synchronous, in subscription order, on the emitting thread
//! - No history: a subscriber only sees emissions made after it subscribed
//! - A failing or panicking handler is logged and skipped; siblings still run
//! - The registry lock is never held while handlers run, so handlers may
//!   subscribe, unsubscribe or stop the simulation from inside a delivery

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{HandlerError, SimError};

/// Published once per tick with the latest snapshot.
pub const TOPIC_UPDATED: &str = "simulation:updated";
/// Published once when a run ends.
pub const TOPIC_STOPPED: &str = "simulation:stopped";

pub type Handler<P> = Arc<dyn Fn(&P) -> Result<(), HandlerError> + Send + Sync>;

/// Returned by [`EventBus::on`]; pass to [`EventBus::off`] to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

struct Subscription<P> {
    id: u64,
    active: Arc<AtomicBool>,
    handler: Handler<P>,
}

struct BusInner<P> {
    next_id: AtomicU64,
    topics: Mutex<HashMap<String, Vec<Subscription<P>>>>,
}

pub struct EventBus<P> {
    inner: Arc<BusInner<P>>,
}

impl<P> Clone for EventBus<P> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<P> Default for EventBus<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> EventBus<P> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                next_id: AtomicU64::new(1),
                topics: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe `handler` to `topic`. Handlers run in subscription order.
    pub fn on<F>(&self, topic: &str, handler: F) -> SubscriptionHandle
    where
        F: Fn(&P) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let sub = Subscription {
            id,
            active: Arc::new(AtomicBool::new(true)),
            handler: Arc::new(handler),
        };
        self.inner
            .topics
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push(sub);
        debug!("bus: subscription {id} on '{topic}'");
        SubscriptionHandle(id)
    }

    /// Remove a subscription. Unknown or already-removed handles are ignored.
    /// Once this returns the handler receives nothing further, including the
    /// rest of an emission that is in progress on another handler.
    pub fn off(&self, handle: SubscriptionHandle) {
        let mut topics = self.inner.topics.lock();
        for subs in topics.values_mut() {
            if let Some(pos) = subs.iter().position(|s| s.id == handle.0) {
                let sub = subs.remove(pos);
                sub.active.store(false, Ordering::SeqCst);
                debug!("bus: subscription {} removed", handle.0);
                return;
            }
        }
    }

    /// Deliver `payload` to every current subscriber of `topic`.
    /// Returns how many handlers completed without error.
    pub fn emit(&self, topic: &str, payload: &P) -> usize {
        let targets: Vec<(Arc<AtomicBool>, Handler<P>)> = {
            let topics = self.inner.topics.lock();
            match topics.get(topic) {
                Some(subs) => subs
                    .iter()
                    .map(|s| (s.active.clone(), s.handler.clone()))
                    .collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        for (active, handler) in targets {
            if !active.load(Ordering::SeqCst) {
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| handler(payload))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    let err = SimError::Handler { topic: topic.to_string(), message: e.0 };
                    warn!("bus: {err}");
                }
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "handler panicked".to_string());
                    let err = SimError::Handler { topic: topic.to_string(), message };
                    warn!("bus: {err}");
                }
            }
        }
        delivered
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner.topics.lock().get(topic).map_or(0, Vec::len)
    }
}
