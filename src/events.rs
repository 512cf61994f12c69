/*
 *
 *    Multicast events and the one-shot handoff used between the hook thread and the game thread.
 *
 *    Subscribers run synchronously on whatever thread publishes, in subscription order. The
 *    subscriber list is snapshotted before dispatch, so a handler may subscribe or unsubscribe
 *    (itself included) while it is running. The change applies from the next publish.
 *
 * */

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

pub type SubscriptionId = u64;

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

pub struct Event<T> {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(SubscriptionId, Handler<T>)>>,
}

impl<T> Event<T> {
    pub const fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            handlers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe<H>(&self, handler: H) -> SubscriptionId
    where
        H: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().push((id, Arc::new(handler)));
        id
    }

    ///Returns false if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.lock();
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        handlers.len() != before
    }

    pub fn publish(&self, payload: &T) {
        let snapshot: Vec<Handler<T>> = self.lock().iter().map(|(_, h)| h.clone()).collect();
        for handler in snapshot {
            handler(payload);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(SubscriptionId, Handler<T>)>> {
        self.handlers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<T> Default for Event<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

///Binary signal. Repeated signals before a wait coalesce into one.
#[derive(Debug, Default)]
pub struct Handoff {
    signaled: Mutex<bool>,
    condvar: Condvar,
}

impl Handoff {
    pub const fn new() -> Self {
        Self {
            signaled: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    pub fn signal(&self) {
        *self.signaled.lock().unwrap_or_else(|e| e.into_inner()) = true;
        self.condvar.notify_all();
    }

    ///Blocks until signaled, then consumes the signal.
    pub fn wait(&self) {
        let mut signaled = self.signaled.lock().unwrap_or_else(|e| e.into_inner());
        while !*signaled {
            signaled = self
                .condvar
                .wait(signaled)
                .unwrap_or_else(|e| e.into_inner());
        }
        *signaled = false;
    }

    ///Returns true if the signal arrived (and was consumed) before `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let signaled = self.signaled.lock().unwrap_or_else(|e| e.into_inner());
        let (mut signaled, _) = self
            .condvar
            .wait_timeout_while(signaled, timeout, |s| !*s)
            .unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *signaled, false)
    }
}
