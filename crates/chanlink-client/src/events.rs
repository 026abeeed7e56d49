//! Subscriber lists for received messages and errors.
//!
//! Callbacks run synchronously on the run loop, in registration order. A
//! panicking callback is logged and skipped; the remaining callbacks still
//! see the event.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chanlink_frame::{BinaryFrame, JsonMessage};

use crate::error::ClientError;

/// Handle returned by a subscribe call, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

pub(crate) type JsonCallback = dyn Fn(&JsonMessage) + Send + Sync;
pub(crate) type BinaryCallback = dyn for<'a> Fn(&BinaryFrame<'a>) + Send + Sync;
pub(crate) type ErrorCallback = dyn Fn(&ClientError) + Send + Sync;

pub(crate) struct Subscribers<F: ?Sized> {
    entries: RwLock<Vec<(SubscriptionId, Arc<F>)>>,
}

impl<F: ?Sized> Subscribers<F> {
    fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    fn add(&self, id: SubscriptionId, callback: Arc<F>) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, callback));
    }

    fn remove(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|(entry, _)| *entry != id);
        entries.len() != before
    }

    /// Copy the list out so callbacks run without the lock held.
    fn snapshot(&self) -> Vec<Arc<F>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect()
    }

    fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

pub(crate) struct Events {
    next_id: AtomicU64,
    json: Subscribers<JsonCallback>,
    binary: Subscribers<BinaryCallback>,
    error: Subscribers<ErrorCallback>,
}

impl Events {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            json: Subscribers::new(),
            binary: Subscribers::new(),
            error: Subscribers::new(),
        }
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn subscribe_json(&self, callback: Arc<JsonCallback>) -> SubscriptionId {
        let id = self.next_id();
        self.json.add(id, callback);
        id
    }

    pub(crate) fn subscribe_binary(&self, callback: Arc<BinaryCallback>) -> SubscriptionId {
        let id = self.next_id();
        self.binary.add(id, callback);
        id
    }

    pub(crate) fn subscribe_error(&self, callback: Arc<ErrorCallback>) -> SubscriptionId {
        let id = self.next_id();
        self.error.add(id, callback);
        id
    }

    /// Remove a subscription from whichever list holds it.
    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.json.remove(id) || self.binary.remove(id) || self.error.remove(id)
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.json.len() + self.binary.len() + self.error.len()
    }

    pub(crate) fn emit_json(&self, message: &JsonMessage) {
        for callback in self.json.snapshot() {
            guarded("json", || callback(message));
        }
    }

    pub(crate) fn emit_binary(&self, frame: &BinaryFrame<'_>) {
        for callback in self.binary.snapshot() {
            guarded("binary", || callback(frame));
        }
    }

    /// Publish an error. Internal control-flow errors are dropped.
    pub(crate) fn report(&self, error: &ClientError) {
        if error.is_internal() {
            return;
        }
        tracing::warn!(error = %error, "client error");
        for callback in self.error.snapshot() {
            guarded("error", || callback(error));
        }
    }
}

fn guarded(event: &'static str, callback: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(callback)).is_err() {
        tracing::warn!(event, "subscriber panicked");
    }
}
