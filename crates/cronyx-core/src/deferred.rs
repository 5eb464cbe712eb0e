//! Deferred task queue. Moves event delivery out of restricted context.
//!
//! Hardware collaborators report receive/transmit/modem events from contexts
//! where blocking is not allowed. They never call administrative code there;
//! instead they append a [`DeferredTask`] to this FIFO and a single worker
//! thread executes the tasks one after another.
//!
//! # Design
//!
//! - **FIFO of task shapes** protected by its own `parking_lot::Mutex`,
//!   independent of the administrative lock
//! - **One wake-up per idle → busy transition**: the worker is signalled only
//!   when the queue was empty and nobody was draining it
//! - **Execute without holding the queue lock**: pop one task, release the
//!   lock, run it, re-acquire
//! - **Bounded for notifications only**: `Notify` tasks beyond `capacity` are
//!   refused and handed back to the caller; barriers always enter the queue
//! - **No cancellation**: once enqueued a task always runs, including during
//!   shutdown
//!
//! ```text
//!  hardware ctx ──enqueue──► [Notify][Notify][Barrier][Notify] ──► worker
//!                                                                   │
//!                                            runs each task in order ┘
//! ```

use crate::item::ItemRef;
use crate::protocol::Notification;
use crate::sync::Completion;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};
use tracing::{debug, error};

// =============================================================================
// Task Shapes
// =============================================================================

/// A one-shot unit of deferred work.
///
/// Owned by the queue until dequeued, then by the worker for the duration of
/// the call, then discarded.
pub enum DeferredTask {
    /// Deliver a hardware event to the protocol bound to `item`.
    Notify {
        /// Item the event was raised on.
        item: ItemRef,
        /// The event itself.
        event: Notification,
    },
    /// Run the per-second hardware tick over all live items.
    Tick,
    /// Signal the completion once every earlier task has run.
    Barrier(Completion),
    /// Signal `wake`, park the worker until `proceed`, then signal `wake`
    /// again. Used by flush-and-lock.
    TwoPhaseBarrier {
        /// Signalled twice: when the worker parks and when it resumes.
        wake: Completion,
        /// Released by the caller once it owns the administrative lock.
        proceed: Completion,
    },
    /// Arbitrary closure run in worker context.
    Call(Box<dyn FnOnce() + Send>),
}

impl DeferredTask {
    fn is_marker(&self) -> bool {
        matches!(
            self,
            DeferredTask::Barrier(_) | DeferredTask::TwoPhaseBarrier { .. }
        )
    }
}

impl std::fmt::Debug for DeferredTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeferredTask::Notify { item, event } => f
                .debug_struct("Notify")
                .field("item", &item.id())
                .field("event", &event.name())
                .finish(),
            DeferredTask::Tick => f.write_str("Tick"),
            DeferredTask::Barrier(_) => f.write_str("Barrier"),
            DeferredTask::TwoPhaseBarrier { .. } => f.write_str("TwoPhaseBarrier"),
            DeferredTask::Call(_) => f.write_str("Call"),
        }
    }
}

// =============================================================================
// Queue
// =============================================================================

#[derive(Debug, Default)]
struct QueueState {
    tasks: VecDeque<DeferredTask>,
    draining: bool,
    started: bool,
    shutdown: bool,
    worker: Option<ThreadId>,
    executed: u64,
}

/// FIFO of deferred tasks drained by exactly one worker thread.
#[derive(Debug)]
pub struct DeferredQueue {
    state: Mutex<QueueState>,
    wakeup: Condvar,
    capacity: usize,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DeferredQueue {
    /// Creates a stopped queue bounded to `capacity` notifications.
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState::default()),
            wakeup: Condvar::new(),
            capacity,
            handle: Mutex::new(None),
        })
    }

    /// Spawns the worker thread.
    ///
    /// `dispatch` receives the `Notify` and `Tick` tasks; barriers and
    /// closures are executed by the queue itself.
    pub fn start<F>(self: &Arc<Self>, name: &str, dispatch: F) -> std::io::Result<()>
    where
        F: FnMut(DeferredTask) + Send + 'static,
    {
        let queue = self.clone();
        self.state.lock().started = true;
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || queue.drain(dispatch))?;
        *self.handle.lock() = Some(handle);
        Ok(())
    }

    /// Appends a task.
    ///
    /// Returns the task back when the queue is stopped or when a notification
    /// would exceed the capacity; the caller decides how to account for it.
    pub fn enqueue(&self, task: DeferredTask) -> Result<(), DeferredTask> {
        let mut state = self.state.lock();
        if state.shutdown {
            return Err(task);
        }
        if !task.is_marker() && state.tasks.len() >= self.capacity {
            return Err(task);
        }
        let was_idle = state.tasks.is_empty() && !state.draining;
        state.tasks.push_back(task);
        if was_idle {
            self.wakeup.notify_one();
        }
        Ok(())
    }

    /// Whether the calling thread is this queue's worker.
    pub fn is_worker(&self) -> bool {
        self.state.lock().worker == Some(std::thread::current().id())
    }

    /// Whether the queue still accepts tasks.
    pub fn is_running(&self) -> bool {
        let state = self.state.lock();
        state.started && !state.shutdown
    }

    /// Number of queued, not yet started tasks.
    pub fn len(&self) -> usize {
        self.state.lock().tasks.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of tasks the worker has finished.
    pub fn executed(&self) -> u64 {
        self.state.lock().executed
    }

    /// Stops accepting tasks, lets the worker drain what is queued and joins it.
    pub fn shutdown(&self) {
        {
            let mut state = self.state.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            self.wakeup.notify_one();
        }
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != std::thread::current().id() && handle.join().is_err() {
                error!("deferred worker terminated abnormally");
            }
        }
    }

    /// Worker body.
    fn drain<F>(&self, mut dispatch: F)
    where
        F: FnMut(DeferredTask),
    {
        let mut state = self.state.lock();
        state.worker = Some(std::thread::current().id());
        debug!("deferred worker started");
        loop {
            while let Some(task) = state.tasks.pop_front() {
                state.draining = true;
                drop(state);
                self.run(task, &mut dispatch);
                state = self.state.lock();
                state.executed += 1;
            }
            state.draining = false;
            if state.shutdown {
                break;
            }
            self.wakeup.wait(&mut state);
        }
        state.worker = None;
        debug!(executed = state.executed, "deferred worker stopped");
    }

    fn run<F>(&self, task: DeferredTask, dispatch: &mut F)
    where
        F: FnMut(DeferredTask),
    {
        match task {
            DeferredTask::Barrier(done) => done.complete(),
            DeferredTask::TwoPhaseBarrier { wake, proceed } => {
                wake.complete();
                proceed.wait();
                wake.complete();
            }
            DeferredTask::Call(call) => {
                if catch_unwind(AssertUnwindSafe(call)).is_err() {
                    error!("deferred call panicked");
                }
            }
            task @ (DeferredTask::Notify { .. } | DeferredTask::Tick) => {
                if catch_unwind(AssertUnwindSafe(|| dispatch(task))).is_err() {
                    error!("deferred notification handler panicked");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn started() -> Arc<DeferredQueue> {
        let queue = DeferredQueue::new(8);
        queue.start("test-deferred", |_| {}).unwrap();
        queue
    }

    #[test]
    fn test_runs_calls_in_fifo_order() {
        let queue = started();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let order = order.clone();
            queue
                .enqueue(DeferredTask::Call(Box::new(move || order.lock().push(i))))
                .unwrap();
        }
        let done = Completion::new();
        queue.enqueue(DeferredTask::Barrier(done.clone())).unwrap();
        assert!(done.wait_timeout(Duration::from_secs(5)));
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
        queue.shutdown();
    }

    #[test]
    fn test_worker_identity() {
        let queue = started();
        assert!(!queue.is_worker());
        let seen = Arc::new(AtomicUsize::new(0));
        let (q, s) = (queue.clone(), seen.clone());
        queue
            .enqueue(DeferredTask::Call(Box::new(move || {
                if q.is_worker() {
                    s.store(1, Ordering::SeqCst);
                }
            })))
            .unwrap();
        let done = Completion::new();
        queue.enqueue(DeferredTask::Barrier(done.clone())).unwrap();
        done.wait();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        queue.shutdown();
    }

    #[test]
    fn test_capacity_applies_to_work_not_markers() {
        // Not started: nothing drains, so the bound is observable.
        let queue = DeferredQueue::new(2);
        queue.enqueue(DeferredTask::Tick).unwrap();
        queue.enqueue(DeferredTask::Tick).unwrap();
        assert!(queue.enqueue(DeferredTask::Tick).is_err());
        assert!(queue
            .enqueue(DeferredTask::Barrier(Completion::new()))
            .is_ok());
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_shutdown_drains_pending_tasks() {
        let queue = started();
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let ran = ran.clone();
            queue
                .enqueue(DeferredTask::Call(Box::new(move || {
                    std::thread::sleep(Duration::from_millis(2));
                    ran.fetch_add(1, Ordering::SeqCst);
                })))
                .unwrap();
        }
        queue.shutdown();
        assert_eq!(ran.load(Ordering::SeqCst), 4);
        assert!(queue.enqueue(DeferredTask::Tick).is_err());
    }

    #[test]
    fn test_panicking_call_does_not_kill_worker() {
        let queue = started();
        queue
            .enqueue(DeferredTask::Call(Box::new(|| panic!("boom"))))
            .unwrap();
        let done = Completion::new();
        queue.enqueue(DeferredTask::Barrier(done.clone())).unwrap();
        assert!(done.wait_timeout(Duration::from_secs(5)));
        queue.shutdown();
    }
}
