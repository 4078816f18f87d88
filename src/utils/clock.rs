//! Time source and timer scheduling.
//!
//! The client never reads wall time or arms timers directly; it goes through
//! [`Clock`] so timeouts and reconnection can be exercised deterministically.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::utils::error::{Error, Result};

const MIN_INTERVAL: Duration = Duration::from_millis(1);

pub type TimerTask = Box<dyn FnOnce() + Send>;
pub type IntervalTask = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub(crate) u64);

pub trait Clock: Send + Sync {
    /// Current time in milliseconds.
    fn now(&self) -> u64;

    /// Run `task` once after `delay`.
    fn set_timeout(&self, delay: Duration, task: TimerTask) -> TimerId;

    /// Run `task` every `period` until cancelled.
    fn set_interval(&self, period: Duration, task: IntervalTask) -> TimerId;

    /// Cancel a pending timeout or interval. Unknown ids are ignored.
    fn cancel(&self, id: TimerId);
}

/// Production clock: wall time from `chrono`, timers on the tokio runtime.
pub struct TokioClock {
    runtime: Handle,
    next_id: AtomicU64,
    timers: Arc<Mutex<HashMap<TimerId, JoinHandle<()>>>>,
}

impl TokioClock {
    /// Must be called from within a tokio runtime.
    pub fn new() -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;
        Ok(Self {
            runtime,
            next_id: AtomicU64::new(1),
            timers: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn allocate(&self) -> TimerId {
        TimerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl Clock for TokioClock {
    fn now(&self) -> u64 {
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }

    fn set_timeout(&self, delay: Duration, task: TimerTask) -> TimerId {
        let id = self.allocate();
        let timers = self.timers.clone();

        // Held across spawn so the task cannot deregister before it is registered.
        let mut registry = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            timers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
            task();
        });
        registry.insert(id, handle);
        id
    }

    fn set_interval(&self, period: Duration, task: IntervalTask) -> TimerId {
        let id = self.allocate();
        // tokio rejects a zero period
        let period = period.max(MIN_INTERVAL);
        let handle = self.runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                task();
            }
        });
        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, handle);
        id
    }

    fn cancel(&self, id: TimerId) {
        if let Some(handle) = self
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
        {
            handle.abort();
        }
    }
}

impl Drop for TokioClock {
    fn drop(&mut self) {
        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, handle) in timers.drain() {
            handle.abort();
        }
    }
}
