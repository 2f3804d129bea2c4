//! # Background Tasks
//!
//! Fire-and-forget work (provisioning, reconfiguration) with a deadline and
//! a completion callback. Callers never see the result: the callback is the
//! only place an outcome lands, and it only writes state and events.
//!
//! A semaphore caps how many tasks run at once. A task's deadline starts
//! once it holds a permit, so queueing behind a burst does not eat into it.

use fleet_telemetry::BACKGROUND_TASKS_INFLIGHT;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedMutexGuard, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::domain::TaskFailure;

/// How a background task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome<T> {
    Completed(T),
    Failed(TaskFailure),
    TimedOut(Duration),
}

/// Bounded pool of background tasks.
#[derive(Clone)]
pub struct BackgroundTasks {
    permits: Arc<Semaphore>,
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl BackgroundTasks {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            handles: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Run `work` under `deadline`, then hand its outcome to `complete`.
    pub fn spawn<T, W, C, CF>(&self, name: impl Into<String>, deadline: Duration, work: W, complete: C)
    where
        T: Send + 'static,
        W: Future<Output = Result<T, TaskFailure>> + Send + 'static,
        C: FnOnce(TaskOutcome<T>) -> CF + Send + 'static,
        CF: Future<Output = ()> + Send + 'static,
    {
        self.spawn_inner(name.into(), None, deadline, work, complete)
    }

    /// Like [`spawn`](Self::spawn), but holds the lock for `key` from before
    /// `work` starts until `complete` returns. Tasks sharing a key run one
    /// at a time and never interleave with each other's completion.
    pub fn spawn_keyed<T, W, C, CF>(
        &self,
        locks: &Arc<KeyedLocks>,
        key: i64,
        name: impl Into<String>,
        deadline: Duration,
        work: W,
        complete: C,
    ) where
        T: Send + 'static,
        W: Future<Output = Result<T, TaskFailure>> + Send + 'static,
        C: FnOnce(TaskOutcome<T>) -> CF + Send + 'static,
        CF: Future<Output = ()> + Send + 'static,
    {
        self.spawn_inner(name.into(), Some((Arc::clone(locks), key)), deadline, work, complete)
    }

    fn spawn_inner<T, W, C, CF>(
        &self,
        name: String,
        serial: Option<(Arc<KeyedLocks>, i64)>,
        deadline: Duration,
        work: W,
        complete: C,
    ) where
        T: Send + 'static,
        W: Future<Output = Result<T, TaskFailure>> + Send + 'static,
        C: FnOnce(TaskOutcome<T>) -> CF + Send + 'static,
        CF: Future<Output = ()> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);

        let handle = tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    warn!(task = %name, "Task pool closed, dropping task");
                    return;
                }
            };
            let _serial = match &serial {
                Some((locks, key)) => Some(locks.lock(*key).await),
                None => None,
            };
            BACKGROUND_TASKS_INFLIGHT.inc();
            debug!(task = %name, "Background task started");

            let outcome = match tokio::time::timeout(deadline, work).await {
                Ok(Ok(value)) => TaskOutcome::Completed(value),
                Ok(Err(failure)) => TaskOutcome::Failed(failure),
                Err(_) => TaskOutcome::TimedOut(deadline),
            };
            complete(outcome).await;

            BACKGROUND_TASKS_INFLIGHT.dec();
            debug!(task = %name, "Background task finished");
        });

        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Tasks spawned and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.handles.lock().iter().filter(|h| !h.is_finished()).count()
    }

    /// Wait for every spawned task, including ones spawned while draining.
    pub async fn drain(&self) {
        loop {
            let pending: Vec<_> = std::mem::take(&mut *self.handles.lock());
            if pending.is_empty() {
                return;
            }
            for handle in pending {
                if let Err(e) = handle.await {
                    warn!(error = %e, "Background task panicked");
                }
            }
        }
    }
}

/// Per-key async locks, used to serialize background work on one node.
#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            locks.retain(|k, l| *k == key || Arc::strong_count(l) > 1);
            Arc::clone(locks.entry(key).or_default())
        };
        lock.lock_owned().await
    }

    /// Whether someone currently holds the lock for `key`.
    pub fn is_locked(&self, key: i64) -> bool {
        self.locks
            .lock()
            .get(&key)
            .is_some_and(|l| l.try_lock().is_err())
    }
}
