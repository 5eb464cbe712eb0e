//! Front-panel lamp of the simulated adapter.

use cronyx_core::led::{CADENCE_ALARM, CADENCE_ON};
use cronyx_core::LedOutput;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Records what the cadence engine drives onto the lamp.
#[derive(Debug, Default)]
pub struct MockLamp {
    lit: AtomicBool,
    switches: AtomicU64,
    alarm: AtomicBool,
}

impl MockLamp {
    /// Dark lamp without alarm.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current lamp level.
    pub fn is_lit(&self) -> bool {
        self.lit.load(Ordering::Acquire)
    }

    /// Number of level changes seen so far.
    pub fn switches(&self) -> u64 {
        self.switches.load(Ordering::Acquire)
    }

    /// Raises or clears the alarm that the derived cadence reflects.
    pub fn set_alarm(&self, on: bool) {
        self.alarm.store(on, Ordering::Release);
    }

    /// Whether the alarm is raised.
    pub fn alarm(&self) -> bool {
        self.alarm.load(Ordering::Acquire)
    }
}

impl LedOutput for MockLamp {
    fn set_lamp(&self, on: bool) {
        if self.lit.swap(on, Ordering::AcqRel) != on {
            self.switches.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn derive_cadence(&self) -> u32 {
        if self.alarm() {
            CADENCE_ALARM
        } else {
            CADENCE_ON
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_counting() {
        let lamp = MockLamp::new();
        lamp.set_lamp(false);
        assert_eq!(lamp.switches(), 0);
        lamp.set_lamp(true);
        lamp.set_lamp(true);
        lamp.set_lamp(false);
        assert_eq!(lamp.switches(), 2);
        assert!(!lamp.is_lit());
    }

    #[test]
    fn test_derived_cadence_follows_alarm() {
        let lamp = MockLamp::new();
        assert_eq!(lamp.derive_cadence(), CADENCE_ON);
        lamp.set_alarm(true);
        assert_eq!(lamp.derive_cadence(), CADENCE_ALARM);
    }
}
