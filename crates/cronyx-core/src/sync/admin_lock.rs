//! Reentrant administrative lock.
//!
//! A single mutex guards the item tree, the protocol list, the minor table and
//! every attach/detach transition. The owning thread may re-acquire it; only
//! the outermost guard releases the underlying mutex.
//!
//! The lock carries no data. Structures it protects sit in their own
//! `parking_lot::Mutex`, which is only ever taken while this lock is held and
//! is therefore uncontended.

use parking_lot::{Condvar, Mutex};
use std::marker::PhantomData;
use std::thread::{self, ThreadId};

#[derive(Debug, Default)]
struct Owner {
    thread: Option<ThreadId>,
    depth: usize,
}

/// Mutex with per-holder re-entrance counting.
#[derive(Debug, Default)]
pub struct AdminLock {
    owner: Mutex<Owner>,
    released: Condvar,
}

impl AdminLock {
    /// Creates an unlocked lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock, sleeping while another thread holds it.
    ///
    /// If the calling thread already holds the lock only the depth counter
    /// is incremented.
    pub fn lock(&self) -> AdminGuard<'_> {
        let me = thread::current().id();
        let mut owner = self.owner.lock();
        if owner.thread == Some(me) {
            owner.depth += 1;
        } else {
            while owner.thread.is_some() {
                self.released.wait(&mut owner);
            }
            owner.thread = Some(me);
            owner.depth = 1;
        }
        AdminGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    /// Acquires the lock only if it is free or already held by this thread.
    pub fn try_lock(&self) -> Option<AdminGuard<'_>> {
        let me = thread::current().id();
        let mut owner = self.owner.lock();
        match owner.thread {
            Some(t) if t == me => owner.depth += 1,
            Some(_) => return None,
            None => {
                owner.thread = Some(me);
                owner.depth = 1;
            }
        }
        Some(AdminGuard {
            lock: self,
            _not_send: PhantomData,
        })
    }

    /// Whether the calling thread currently holds the lock.
    pub fn is_held_by_current(&self) -> bool {
        self.owner.lock().thread == Some(thread::current().id())
    }

    /// Whether any thread holds the lock.
    pub fn is_locked(&self) -> bool {
        self.owner.lock().thread.is_some()
    }

    /// Re-entrance depth of the calling thread (0 when not the holder).
    pub fn depth(&self) -> usize {
        let owner = self.owner.lock();
        if owner.thread == Some(thread::current().id()) {
            owner.depth
        } else {
            0
        }
    }

    fn unlock(&self) {
        let mut owner = self.owner.lock();
        debug_assert_eq!(owner.thread, Some(thread::current().id()));
        owner.depth -= 1;
        if owner.depth == 0 {
            owner.thread = None;
            drop(owner);
            self.released.notify_one();
        }
    }
}

/// RAII guard for one level of [`AdminLock`] ownership.
///
/// Guards are tied to the acquiring thread and cannot be sent elsewhere.
#[must_use = "the administrative lock is released when the guard is dropped"]
pub struct AdminGuard<'a> {
    lock: &'a AdminLock,
    _not_send: PhantomData<*const ()>,
}

impl std::fmt::Debug for AdminGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminGuard")
            .field("depth", &self.lock.depth())
            .finish()
    }
}

impl Drop for AdminGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_reentrant_depth() {
        let lock = AdminLock::new();
        assert_eq!(lock.depth(), 0);
        let outer = lock.lock();
        {
            let _inner = lock.lock();
            assert_eq!(lock.depth(), 2);
        }
        assert_eq!(lock.depth(), 1);
        assert!(lock.is_held_by_current());
        drop(outer);
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_excludes_other_threads_until_outermost_release() {
        let lock = Arc::new(AdminLock::new());
        let acquired = Arc::new(AtomicBool::new(false));

        let outer = lock.lock();
        let inner = lock.lock();

        let handle = {
            let lock = lock.clone();
            let acquired = acquired.clone();
            std::thread::spawn(move || {
                let _g = lock.lock();
                acquired.store(true, Ordering::SeqCst);
            })
        };

        drop(inner);
        std::thread::sleep(Duration::from_millis(50));
        assert!(!acquired.load(Ordering::SeqCst));

        drop(outer);
        handle.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_try_lock_from_other_thread_fails() {
        let lock = Arc::new(AdminLock::new());
        let _g = lock.lock();
        let other = lock.clone();
        let got = std::thread::spawn(move || {
            let guard = other.try_lock();
            guard.is_some()
        })
        .join()
        .unwrap();
        assert!(!got);
        assert!(lock.try_lock().is_some());
    }
}
