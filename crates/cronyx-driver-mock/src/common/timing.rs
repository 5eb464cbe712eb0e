//! Line timing for paced traffic.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Hardware-like delays used outside [`super::MockMode::Instant`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Gap between generated frames, in microseconds.
    pub frame_interval_us: u64,
    /// Time the receiver needs to lock after `link_up`, in milliseconds.
    pub link_settle_ms: u64,
}

impl TimingConfig {
    /// A 2048 kbit/s E1 channel carrying 256-octet frames.
    pub fn e1() -> Self {
        Self {
            frame_interval_us: 1_000,
            link_settle_ms: 5,
        }
    }

    /// A 64 kbit/s serial line.
    pub fn serial() -> Self {
        Self {
            frame_interval_us: 32_000,
            link_settle_ms: 20,
        }
    }

    /// Gap between generated frames.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_micros(self.frame_interval_us)
    }

    /// Delay before a raised link reports carrier.
    pub fn link_settle(&self) -> Duration {
        Duration::from_millis(self.link_settle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        assert!(TimingConfig::serial().frame_interval() > TimingConfig::e1().frame_interval());
        assert_eq!(TimingConfig::default().link_settle(), Duration::ZERO);
    }
}
