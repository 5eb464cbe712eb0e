//! Shared hard limits and timing constants.
//!
//! This module centralizes:
//! - Naming and topology bounds for the item registry
//! - Identity and enumeration constants used by the control surface
//! - Timer periods for the indicator engine and the per-second tick
//!
//! Values that operators may want to tune live in [`crate::config::CoreConfig`]
//! instead; the defaults there refer back to the constants below.

use std::time::Duration;

// =============================================================================
// Registry Bounds
// =============================================================================

/// Maximum length in bytes of a synthesized item name or an alias.
pub const MAX_NAME_LEN: usize = 64;

/// Maximum nesting depth (adapter → interface → channel → sub-channel).
pub const MAX_DEPTH: usize = 4;

/// Largest id handed out before the allocator wraps back to 1.
///
/// Ids travel through the control surface as `i32`, so the positive `i32`
/// range is the id space.
pub const MAX_ITEM_ID: u32 = i32::MAX as u32;

/// Number of ids returned by a single `enumerate` call.
pub const ENUM_PAGE: usize = 16;

/// Value filling unused `enumerate` slots. Never a valid id.
pub const ENUM_SENTINEL: i32 = 0;

/// Value of `minor` while none is assigned.
pub const MINOR_UNASSIGNED: i32 = -1;

/// Minor number reserved for the control device itself.
pub const MINOR_CONTROL: i32 = 0;

// =============================================================================
// Default Sizes
// =============================================================================

/// Default number of allocatable minors (`1..=DEFAULT_MINOR_POOL`).
pub const DEFAULT_MINOR_POOL: usize = 128;

/// Default bound on queued deferred notifications.
///
/// Barrier markers used by flush are never subject to the bound.
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

/// Default MTU assigned to channels that do not specify one.
pub const DEFAULT_MTU: u32 = 1504;

/// Upper bound accepted when setting `Mtu`.
pub const MAX_MTU: u32 = 16 * 1024;

/// Upper bound accepted when setting `QueueLength`.
pub const MAX_QUEUE_LENGTH: u32 = 1024;

// =============================================================================
// Timing
// =============================================================================

/// Period of the lamp cadence tick (32 steps ≈ 2.7 s per pattern).
pub const LED_TICK: Duration = Duration::from_millis(83);

/// Length of the activity pulse produced by a lamp kick.
pub const LED_KICK: Duration = Duration::from_millis(30);

/// Period of the hardware per-second tick.
pub const SECOND_TICK: Duration = Duration::from_secs(1);

/// Minimum spacing between repeated "no free minors" warnings.
pub const MINOR_WARN_INTERVAL: Duration = Duration::from_secs(1);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels_are_not_ids() {
        assert_eq!(ENUM_SENTINEL, 0);
        assert!(MINOR_UNASSIGNED < MINOR_CONTROL);
        assert!(MAX_ITEM_ID <= i32::MAX as u32);
    }

    #[test]
    fn test_led_pattern_period() {
        let period = LED_TICK * 32;
        assert!(period > Duration::from_secs(2) && period < Duration::from_secs(3));
    }
}
