//! Per-key listeners for committed changes.

use concord_types::Value;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use tracing::{debug, error};

/// A committed change delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub key: String,
    pub value: Value,
    pub previous: Option<Value>,
}

type Callback = Arc<dyn Fn(&StateChange) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    /// key -> (subscription id -> callback), in registration order.
    by_key: HashMap<String, IndexMap<u64, Callback>>,
}

/// Registry of per-key listeners.
///
/// Listeners run in registration order. A listener that panics is logged and
/// skipped; the remaining listeners still run.
#[derive(Clone, Default)]
pub struct SubscriberRegistry {
    inner: Arc<Mutex<Listeners>>,
}

impl std::fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SubscriberRegistry")
            .field("keys", &inner.by_key.len())
            .finish()
    }
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for `key`.
    pub fn subscribe<F>(&self, key: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        let key = key.into();
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner
            .by_key
            .entry(key.clone())
            .or_default()
            .insert(id, Arc::new(callback));
        debug!(key = %key, subscription = id, "Subscribed");

        Subscription {
            registry: Arc::downgrade(&self.inner),
            key,
            id,
        }
    }

    /// Number of listeners on `key`.
    pub fn count(&self, key: &str) -> usize {
        self.inner.lock().by_key.get(key).map_or(0, IndexMap::len)
    }

    /// Invoke every listener on `change.key`.
    pub fn notify(&self, change: &StateChange) {
        // Snapshot so listeners may (un)subscribe without deadlocking.
        let callbacks: Vec<(u64, Callback)> = {
            let inner = self.inner.lock();
            match inner.by_key.get(&change.key) {
                Some(listeners) => listeners
                    .iter()
                    .map(|(id, cb)| (*id, Arc::clone(cb)))
                    .collect(),
                None => return,
            }
        };

        for (id, callback) in callbacks {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(change))) {
                error!(
                    key = %change.key,
                    subscription = id,
                    panic = panic_message(panic.as_ref()),
                    "Subscriber panicked"
                );
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        *s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Handle to a registered listener.
///
/// Dropping the handle keeps the listener registered; call
/// [`Subscription::unsubscribe`] to remove it.
#[derive(Debug)]
pub struct Subscription {
    registry: Weak<Mutex<Listeners>>,
    key: String,
    id: u64,
}

impl Subscription {
    /// Key this subscription listens on.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Remove the listener. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let mut inner = registry.lock();
        let Some(listeners) = inner.by_key.get_mut(&self.key) else {
            return false;
        };
        let removed = listeners.shift_remove(&self.id).is_some();
        if listeners.is_empty() {
            inner.by_key.remove(&self.key);
        }
        debug!(key = %self.key, subscription = self.id, removed, "Unsubscribed");
        removed
    }
}
