//! Ordered task execution and listener fan-out.
//!
//! All listener notifications and periodic checks in the SDK run on one
//! dedicated worker task, one at a time, in submission order. This keeps
//! delivery order identical for every listener and means a listener
//! callback never runs concurrently with another notification. The worker
//! is never used for flag evaluation, so a slow listener cannot stall the
//! evaluation hot path.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// A single background worker executing submitted tasks in order.
///
/// Must be created from within a tokio runtime. Shutting the runner down
/// aborts the worker; tasks that were queued but not yet run are
/// discarded.
pub struct TaskRunner {
    tx: mpsc::UnboundedSender<Task>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TaskRunner {
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
        let worker = tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                task();
            }
        });
        Self {
            tx,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Enqueue a task. Returns false if the runner has been shut down.
    pub fn submit(&self, task: impl FnOnce() + Send + 'static) -> bool {
        self.tx.send(Box::new(task)).is_ok()
    }

    /// Enqueue a task after a delay. The delay elapses off-queue, so it
    /// does not hold up other tasks; ordering is only guaranteed relative
    /// to tasks submitted after the delay fires.
    pub fn submit_after(&self, delay: Duration, task: impl FnOnce() + Send + 'static) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Box::new(task));
        });
    }

    /// Stop the worker immediately, discarding queued tasks.
    pub fn shutdown(&self) {
        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
        }
    }
}

impl Default for TaskRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TaskRunner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Handle returned by listener registration; pass back to remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Fan-out of events to registered listeners.
///
/// Publishing never invokes listener code inline: the listener list is
/// snapshotted outside the lock and delivery happens as one task on the
/// shared [`TaskRunner`], so all broadcasters sharing a runner deliver in
/// one global publish order.
pub struct EventBroadcaster<E> {
    listeners: RwLock<Vec<(u64, Listener<E>)>>,
    next_id: AtomicU64,
    runner: Arc<TaskRunner>,
}

impl<E: Clone + Send + 'static> EventBroadcaster<E> {
    pub fn new(runner: Arc<TaskRunner>) -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            runner,
        }
    }

    pub fn add_listener(&self, listener: Listener<E>) -> ListenerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().push((id, listener));
        ListenerHandle(id)
    }

    pub fn remove_listener(&self, handle: ListenerHandle) {
        self.listeners.write().retain(|(id, _)| *id != handle.0);
    }

    pub fn has_listeners(&self) -> bool {
        !self.listeners.read().is_empty()
    }

    pub fn broadcast(&self, event: E) {
        let snapshot: Vec<Listener<E>> = self
            .listeners
            .read()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        if snapshot.is_empty() {
            return;
        }
        self.runner.submit(move || {
            for listener in &snapshot {
                listener(&event);
            }
        });
    }
}
