//! Flush-and-synchronize protocol.
//!
//! An administrative caller about to mutate the tree must know that no event
//! for the item it touches is still sitting in the deferred queue, and that the
//! worker cannot race with its critical section. [`Engine`] composes the
//! [`AdminLock`] and the [`DeferredQueue`] to provide exactly that:
//!
//! - [`Engine::flush`] returns only after every task enqueued before the call
//!   has run.
//! - [`Engine::flush_and_lock`] additionally hands the administrative lock to
//!   the caller while the worker is parked behind a marker task:
//!
//! ```text
//!  caller                         worker
//!  ──────                         ──────
//!  enqueue TwoPhaseBarrier  ──►   ... older tasks ...
//!  wait(wake)               ◄──   wake.complete()
//!                                 proceed.wait()      (parked)
//!  admin.lock()
//!  proceed.complete()       ──►   resumes
//!  wait(wake)               ◄──   wake.complete()
//!  return guard                   drains newer tasks
//! ```
//!
//! Both calls are no-ops (plain lock acquisition for `flush_and_lock`) when the
//! caller already is the worker or already holds the lock, since either case
//! already provides the ordering and waiting would deadlock.

use crate::deferred::{DeferredQueue, DeferredTask};
use crate::sync::{AdminGuard, AdminLock, Completion};
use std::sync::Arc;
use tracing::trace;

/// Administrative lock plus deferred queue.
#[derive(Debug)]
pub struct Engine {
    lock: AdminLock,
    queue: Arc<DeferredQueue>,
}

impl Engine {
    /// Creates an engine around a (possibly not yet started) queue.
    pub fn new(queue: Arc<DeferredQueue>) -> Self {
        Self {
            lock: AdminLock::new(),
            queue,
        }
    }

    /// The administrative lock.
    pub fn admin(&self) -> &AdminLock {
        &self.lock
    }

    /// The deferred queue.
    pub fn queue(&self) -> &Arc<DeferredQueue> {
        &self.queue
    }

    /// Plain lock acquisition without flushing.
    pub fn lock(&self) -> AdminGuard<'_> {
        self.lock.lock()
    }

    fn must_skip_flush(&self) -> bool {
        self.queue.is_worker() || self.lock.is_held_by_current() || !self.queue.is_running()
    }

    /// Waits until every deferred task enqueued before this call has completed.
    pub fn flush(&self) {
        if self.must_skip_flush() {
            return;
        }
        let done = Completion::new();
        if self.queue.enqueue(DeferredTask::Barrier(done.clone())).is_err() {
            // Queue shut down: its worker already drained everything.
            return;
        }
        trace!("flush: waiting for barrier");
        done.wait();
    }

    /// Flushes the queue and acquires the administrative lock while the worker
    /// is parked.
    pub fn flush_and_lock(&self) -> AdminGuard<'_> {
        if self.must_skip_flush() {
            return self.lock.lock();
        }
        let wake = Completion::new();
        let proceed = Completion::new();
        let marker = DeferredTask::TwoPhaseBarrier {
            wake: wake.clone(),
            proceed: proceed.clone(),
        };
        if self.queue.enqueue(marker).is_err() {
            return self.lock.lock();
        }
        wake.wait();
        let guard = self.lock.lock();
        proceed.complete();
        wake.wait();
        trace!("flush_and_lock: lock acquired behind marker");
        guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn engine() -> Engine {
        let queue = DeferredQueue::new(64);
        queue.start("test-engine", |_| {}).unwrap();
        Engine::new(queue)
    }

    #[test]
    fn test_flush_waits_for_prior_tasks() {
        let engine = engine();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let counter = counter.clone();
            engine
                .queue()
                .enqueue(DeferredTask::Call(Box::new(move || {
                    std::thread::sleep(Duration::from_millis(1));
                    counter.fetch_add(1, Ordering::SeqCst);
                })))
                .unwrap();
        }
        engine.flush();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        engine.queue().shutdown();
    }

    #[test]
    fn test_flush_is_noop_for_lock_holder() {
        let engine = engine();
        let outer = engine.lock();
        // Would deadlock if it enqueued a marker and the worker needed the lock.
        engine.flush();
        let nested = engine.flush_and_lock();
        assert_eq!(engine.admin().depth(), 2);
        drop(nested);
        drop(outer);
        engine.queue().shutdown();
    }

    #[test]
    fn test_flush_and_lock_orders_after_prior_tasks() {
        let engine = engine();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let counter = counter.clone();
            engine
                .queue()
                .enqueue(DeferredTask::Call(Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })))
                .unwrap();
        }
        let guard = engine.flush_and_lock();
        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert!(engine.admin().is_held_by_current());
        drop(guard);
        engine.queue().shutdown();
    }

    #[test]
    fn test_flush_after_shutdown_returns() {
        let engine = engine();
        engine.queue().shutdown();
        engine.flush();
        let _g = engine.flush_and_lock();
    }
}
