//! Counting completion signal.
//!
//! Each `complete()` deposits one token; each `wait()` blocks until a token is
//! available and consumes it. A marker task can therefore signal the same
//! completion twice and the waiter observes both signals in order.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Inner {
    tokens: Mutex<usize>,
    cond: Condvar,
}

/// Cloneable handle to a shared completion object.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    inner: Arc<Inner>,
}

impl Completion {
    /// Creates a completion with no pending tokens.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deposits one token and wakes a waiter.
    pub fn complete(&self) {
        let mut tokens = self.inner.tokens.lock();
        *tokens += 1;
        self.inner.cond.notify_one();
    }

    /// Blocks until a token is available, then consumes it.
    pub fn wait(&self) {
        let mut tokens = self.inner.tokens.lock();
        while *tokens == 0 {
            self.inner.cond.wait(&mut tokens);
        }
        *tokens -= 1;
    }

    /// Like [`Completion::wait`] but gives up after `timeout`.
    ///
    /// Returns `true` when a token was consumed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut tokens = self.inner.tokens.lock();
        while *tokens == 0 {
            if self.inner.cond.wait_until(&mut tokens, deadline).timed_out() {
                break;
            }
        }
        if *tokens == 0 {
            return false;
        }
        *tokens -= 1;
        true
    }

    /// Number of deposited, not yet consumed tokens.
    pub fn pending(&self) -> usize {
        *self.inner.tokens.lock()
    }
}
