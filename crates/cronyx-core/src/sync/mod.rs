//! Synchronization primitives shared by the registry, binder and lamp engine.
//!
//! - [`AdminLock`]: the reentrant administrative mutex
//! - [`Completion`]: a counting one-shot signal used by flush markers
//! - [`Timer`]: a periodic or one-shot timer thread

mod admin_lock;
mod completion;
mod timer;

pub use admin_lock::{AdminGuard, AdminLock};
pub use completion::Completion;
pub use timer::Timer;
