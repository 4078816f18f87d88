//! Ordered multicast listener sets.
//!
//! Listeners are stored as `Arc`s so a set can be snapshotted cheaply and
//! invoked after every lock protecting the owner has been released. Invocation
//! order is registration order. Each invocation is isolated: a panicking
//! listener is recorded as a failure and the remaining listeners still run.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Work queued while a lock is held, executed once the lock is released.
pub type Effect = Box<dyn FnOnce() + Send>;

/// Handle returned on registration, used to remove a listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

pub struct Listeners<F: ?Sized> {
    entries: Vec<(ListenerId, Arc<F>)>,
}

impl<F: ?Sized> Default for Listeners<F> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<F: ?Sized> Listeners<F> {
    /// Register a listener. Every registration gets its own id, even for a
    /// listener that is already present.
    pub fn add(&mut self, listener: Arc<F>) -> ListenerId {
        let id = ListenerId::next();
        self.entries.push((id, listener));
        id
    }

    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(existing, _)| *existing != id);
        before != self.entries.len()
    }

    /// Copy of the current listeners, safe to iterate while the set changes.
    pub fn snapshot(&self) -> Vec<Arc<F>> {
        self.entries
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect()
    }
}

/// Invoke every listener in `listeners`, isolating panics.
///
/// Returns the failures in invocation order.
pub fn dispatch<F: ?Sized>(listeners: &[Arc<F>], mut invoke: impl FnMut(&F)) -> Vec<String> {
    let mut failures = Vec::new();
    for listener in listeners {
        if let Err(failure) = guarded(|| invoke(listener)) {
            failures.push(failure);
        }
    }
    failures
}

/// Run `f`, converting a panic into an error message.
pub fn guarded(f: impl FnOnce()) -> Result<(), String> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|panic| panic_message(panic.as_ref()))
}

/// Log collected listener failures; never re-raises them.
pub fn report(context: &str, failures: &[String]) {
    if !failures.is_empty() {
        tracing::error!(context, ?failures, "Errors occurred during listener invocation");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "listener panicked".to_string()
    }
}
