//! Timer threads for the lamp engine and the per-second tick.
//!
//! A [`Timer`] owns one named thread that sleeps until its deadline and then
//! runs the callback outside of the timer's own lock. Periodic timers re-arm
//! themselves; one-shot timers go idle until [`Timer::arm`] is called again.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug)]
struct State {
    deadline: Option<Instant>,
    period: Option<Duration>,
    stopped: bool,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    cond: Condvar,
}

/// Periodic or one-shot timer backed by a dedicated thread.
#[derive(Debug)]
pub struct Timer {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Timer {
    /// Starts a timer that fires every `period`, first after one period.
    pub fn periodic<F>(name: &str, period: Duration, callback: F) -> std::io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        Self::spawn(
            name,
            State {
                deadline: Some(Instant::now() + period),
                period: Some(period),
                stopped: false,
            },
            callback,
        )
    }

    /// Starts an idle one-shot timer; it fires once per [`Timer::arm`].
    pub fn one_shot<F>(name: &str, callback: F) -> std::io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        Self::spawn(
            name,
            State {
                deadline: None,
                period: None,
                stopped: false,
            },
            callback,
        )
    }

    fn spawn<F>(name: &str, state: State, mut callback: F) -> std::io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let shared = Arc::new(Shared {
            state: Mutex::new(state),
            cond: Condvar::new(),
        });
        let thread_shared = shared.clone();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run(&thread_shared, &mut callback))?;
        Ok(Self {
            shared,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// (Re)arms the timer to fire `after` from now, replacing any pending
    /// deadline.
    pub fn arm(&self, after: Duration) {
        let mut state = self.shared.state.lock();
        state.deadline = Some(Instant::now() + after);
        self.shared.cond.notify_one();
    }

    /// Whether a deadline is pending.
    pub fn is_armed(&self) -> bool {
        self.shared.state.lock().deadline.is_some()
    }

    /// Stops the timer and joins its thread.
    ///
    /// A callback already running is allowed to finish. Calling `stop` from
    /// the timer's own callback only flags the stop.
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            state.stopped = true;
            state.deadline = None;
            self.shared.cond.notify_one();
        }
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != std::thread::current().id() {
                let name = handle.thread().name().unwrap_or("timer").to_string();
                if handle.join().is_err() {
                    warn!(timer = %name, "timer callback panicked");
                }
            }
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(shared: &Shared, callback: &mut dyn FnMut()) {
    let mut state = shared.state.lock();
    loop {
        if state.stopped {
            return;
        }
        let Some(deadline) = state.deadline else {
            shared.cond.wait(&mut state);
            continue;
        };
        let now = Instant::now();
        if now < deadline {
            shared.cond.wait_until(&mut state, deadline);
            continue;
        }
        state.deadline = state.period.map(|period| {
            let next = deadline + period;
            // Skip missed ticks instead of firing a burst.
            if next <= now {
                now + period
            } else {
                next
            }
        });
        drop(state);
        callback();
        state = shared.state.lock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    #[test]
    fn test_periodic_fires_repeatedly() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let timer = Timer::periodic("test-periodic", Duration::from_millis(5), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        std::thread::sleep(Duration::from_millis(100));
        timer.stop();
        let fired = count.load(Ordering::SeqCst);
        assert!(fired >= 3, "fired {fired} times");
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::SeqCst), fired);
    }

    #[test]
    fn test_one_shot_fires_once_per_arm() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let timer = Timer::one_shot("test-oneshot", move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        timer.arm(Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!timer.is_armed());
    }

    #[traced_test]
    #[test]
    fn test_panicking_callback_is_logged_on_stop() {
        let timer = Timer::periodic("test-panics", Duration::from_millis(1), || {
            panic!("callback failure");
        })
        .unwrap();
        std::thread::sleep(Duration::from_millis(50));
        timer.stop();
        assert!(logs_contain("timer callback panicked"));
    }
}
