use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Debounced task slots.
///
/// Scheduling under a key that already has a pending task aborts the old
/// one, so only the last request within the delay window runs. Only the
/// delay can be aborted; a task that started running always completes.
/// Outside a tokio runtime nothing is scheduled.
#[derive(Debug, Default)]
pub struct SaveScheduler {
    slots: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl SaveScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false, dropping `task`, when called outside a runtime
    pub fn schedule<F>(&self, key: impl Into<String>, delay: Duration, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let key = key.into();
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::warn!("Cannot schedule {} without a tokio runtime: {}", key, e);
                return false;
            }
        };

        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            tokio::spawn(task);
        });

        if let Some(previous) = self.slots().insert(key.clone(), handle) {
            previous.abort();
            tracing::debug!("Rescheduled {}", key);
        }
        true
    }

    /// Abort the pending task for `key`; false if nothing was pending
    pub fn cancel(&self, key: &str) -> bool {
        match self.slots().remove(key) {
            Some(handle) => {
                let pending = !handle.is_finished();
                handle.abort();
                pending
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for (_, handle) in self.slots().drain() {
            handle.abort();
        }
    }

    pub fn is_scheduled(&self, key: &str) -> bool {
        self.slots()
            .get(key)
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, HashMap<String, JoinHandle<()>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SaveScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
