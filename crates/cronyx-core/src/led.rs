//! Indicator cadence engine.
//!
//! Every adapter may own a status lamp. The lamp level is synthesized from a
//! 32-step phase counter advanced by a periodic tick (~83 ms) and a 32-bit
//! cadence pattern: at step `n` the lamp shows bit `n` of the pattern. Hot-path
//! code may *kick* the lamp to flash activity; a kick XORs a short pulse into
//! the output without disturbing the base cadence and is cleared by a one-shot
//! timer.
//!
//! # Locking
//!
//! Each [`LedFlasher`] has its own small mutex guarding `counter`, `last` and
//! `kick`. Lamp updates are far more frequent than registry changes and never
//! take the administrative lock. Registration and unregistration go through
//! flush-and-lock, and unregistration also waits for any tick in progress, so
//! the collaborator's output outlives every lamp update that targets it.

use crate::engine::Engine;
use crate::error::{BinderError, BinderResult};
use crate::sync::Timer;
use bitflags::bitflags;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::debug;

// =============================================================================
// Cadences
// =============================================================================

/// Number of phase steps in one cadence period.
pub const CADENCE_STEPS: u8 = 32;

/// Lamp permanently dark.
pub const CADENCE_OFF: u32 = 0;
/// Lamp permanently lit.
pub const CADENCE_ON: u32 = u32::MAX;
/// Half period on, half off.
pub const CADENCE_SLOW: u32 = 0x0000_FFFF;
/// Four blinks per period.
pub const CADENCE_FAST: u32 = 0x0F0F_0F0F;
/// One short blip per period.
pub const CADENCE_FLASH: u32 = 0x0000_0003;
/// Fastest possible toggle.
pub const CADENCE_ALARM: u32 = 0x5555_5555;

/// Lamp mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "pattern", rename_all = "snake_case")]
pub enum LedMode {
    /// Forced dark.
    #[default]
    Off,
    /// Forced lit.
    On,
    /// Follow the given bit pattern.
    Cadence(u32),
    /// Ask the collaborator for a pattern on every step.
    Derived,
}

impl LedMode {
    fn pattern(&self, output: &dyn LedOutput) -> u32 {
        match self {
            LedMode::Off => CADENCE_OFF,
            LedMode::On => CADENCE_ON,
            LedMode::Cadence(pattern) => *pattern,
            LedMode::Derived => output.derive_cadence(),
        }
    }
}

impl fmt::Display for LedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedMode::Off => f.write_str("off"),
            LedMode::On => f.write_str("on"),
            LedMode::Derived => f.write_str("derived"),
            LedMode::Cadence(CADENCE_SLOW) => f.write_str("slow"),
            LedMode::Cadence(CADENCE_FAST) => f.write_str("fast"),
            LedMode::Cadence(CADENCE_FLASH) => f.write_str("flash"),
            LedMode::Cadence(CADENCE_ALARM) => f.write_str("alarm"),
            LedMode::Cadence(pattern) => write!(f, "{pattern:#010x}"),
        }
    }
}

impl FromStr for LedMode {
    type Err = BinderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(LedMode::Off),
            "on" => Ok(LedMode::On),
            "derived" => Ok(LedMode::Derived),
            "slow" => Ok(LedMode::Cadence(CADENCE_SLOW)),
            "fast" => Ok(LedMode::Cadence(CADENCE_FAST)),
            "flash" => Ok(LedMode::Cadence(CADENCE_FLASH)),
            "alarm" => Ok(LedMode::Cadence(CADENCE_ALARM)),
            other => other
                .strip_prefix("0x")
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .map(LedMode::Cadence)
                .ok_or_else(|| BinderError::InvalidArgument(format!("unknown lamp mode '{s}'"))),
        }
    }
}

bitflags! {
    /// Reasons for an activity kick.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LedKick: u32 {
        /// Frame received.
        const RX = 1 << 0;
        /// Frame transmitted.
        const TX = 1 << 1;
        /// Line error.
        const ERROR = 1 << 2;
    }
}

/// Lamp driver supplied by the hardware collaborator.
pub trait LedOutput: Send + Sync {
    /// Switches the physical lamp.
    fn set_lamp(&self, on: bool);

    /// Pattern for [`LedMode::Derived`], typically computed from alarm state.
    fn derive_cadence(&self) -> u32 {
        CADENCE_OFF
    }
}

// =============================================================================
// Flasher
// =============================================================================

#[derive(Debug)]
struct FlasherState {
    mode: LedMode,
    counter: u8,
    last: bool,
    kick: bool,
}

/// Per-device lamp state.
pub struct LedFlasher {
    name: String,
    kick_mask: LedKick,
    state: Mutex<FlasherState>,
    output: Arc<dyn LedOutput>,
    kick_timer: Mutex<Weak<Timer>>,
    kick_pulse: Mutex<Duration>,
}

impl LedFlasher {
    /// Creates a dark flasher reacting to every kick reason.
    pub fn new(name: impl Into<String>, output: Arc<dyn LedOutput>) -> Arc<Self> {
        Self::with_kick_mask(name, output, LedKick::all())
    }

    /// Creates a flasher reacting only to kicks in `kick_mask`.
    pub fn with_kick_mask(
        name: impl Into<String>,
        output: Arc<dyn LedOutput>,
        kick_mask: LedKick,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            kick_mask,
            state: Mutex::new(FlasherState {
                mode: LedMode::Off,
                counter: 0,
                last: false,
                kick: false,
            }),
            output,
            kick_timer: Mutex::new(Weak::new()),
            kick_pulse: Mutex::new(crate::limits::LED_KICK),
        })
    }

    /// Flasher name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current mode.
    pub fn mode(&self) -> LedMode {
        self.state.lock().mode
    }

    /// Changes the mode and refreshes the lamp immediately.
    pub fn set_mode(&self, mode: LedMode) {
        let mut state = self.state.lock();
        state.mode = mode;
        self.update(&mut state);
    }

    /// Last level written to the lamp.
    pub fn level(&self) -> bool {
        self.state.lock().last
    }

    /// Current phase step.
    pub fn counter(&self) -> u8 {
        self.state.lock().counter
    }

    /// Whether an activity pulse is active.
    pub fn is_kicked(&self) -> bool {
        self.state.lock().kick
    }

    /// Flashes activity for `reason` if the kick mask accepts it.
    ///
    /// Ignored while the flasher is not registered, since nothing would clear
    /// the pulse. Safe to call from notification hot paths: takes only the flasher lock.
    pub fn kick(&self, reason: LedKick) {
        if !self.kick_mask.intersects(reason) {
            return;
        }
        let pulse = *self.kick_pulse.lock();
        // Held until the pulse is armed so that `unregister` cannot detach the
        // clearing timer between the check and the arm.
        let slot = self.kick_timer.lock();
        let Some(timer) = slot.upgrade() else {
            return;
        };
        {
            let mut state = self.state.lock();
            if state.kick {
                return;
            }
            state.kick = true;
            self.update(&mut state);
        }
        timer.arm(pulse);
    }

    /// Advances the phase counter by one step.
    pub fn tick(&self) {
        let mut state = self.state.lock();
        state.counter = (state.counter + 1) % CADENCE_STEPS;
        self.update(&mut state);
    }

    /// Ends the activity pulse.
    pub fn clear_kick(&self) {
        let mut state = self.state.lock();
        if state.kick {
            state.kick = false;
            self.update(&mut state);
        }
    }

    fn update(&self, state: &mut FlasherState) {
        let pattern = state.mode.pattern(self.output.as_ref());
        let level = ((pattern >> state.counter) & 1 == 1) ^ state.kick;
        if level != state.last {
            state.last = level;
            self.output.set_lamp(level);
        }
    }
}

impl fmt::Debug for LedFlasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("LedFlasher")
            .field("name", &self.name)
            .field("mode", &state.mode)
            .field("counter", &state.counter)
            .field("last", &state.last)
            .field("kick", &state.kick)
            .finish()
    }
}

// =============================================================================
// Engine
// =============================================================================

#[derive(Default)]
struct Shared {
    flashers: Mutex<Vec<Arc<LedFlasher>>>,
}

/// Drives every registered flasher from two timers: the cadence tick and the
/// kick-clearing pulse.
pub struct LedEngine {
    shared: Arc<Shared>,
    tick: Timer,
    kick: Arc<Timer>,
    pulse: Duration,
}

impl LedEngine {
    /// Starts the timers.
    pub fn start(tick: Duration, pulse: Duration) -> std::io::Result<Self> {
        let shared = Arc::new(Shared::default());

        let tick_shared = shared.clone();
        let tick_timer = Timer::periodic("cronyx-led-tick", tick, move || {
            for flasher in tick_shared.flashers.lock().iter() {
                flasher.tick();
            }
        })?;

        let kick_shared = shared.clone();
        let kick_timer = Timer::one_shot("cronyx-led-kick", move || {
            for flasher in kick_shared.flashers.lock().iter() {
                flasher.clear_kick();
            }
        })?;

        Ok(Self {
            shared,
            tick: tick_timer,
            kick: Arc::new(kick_timer),
            pulse,
        })
    }

    /// Adds `flasher` to the tick set.
    pub fn register(&self, engine: &Engine, flasher: &Arc<LedFlasher>) -> BinderResult<()> {
        let _guard = engine.flush_and_lock();
        let mut flashers = self.shared.flashers.lock();
        if flashers.iter().any(|f| Arc::ptr_eq(f, flasher)) {
            return Err(BinderError::AlreadyExists(format!("lamp {}", flasher.name())));
        }
        *flasher.kick_timer.lock() = Arc::downgrade(&self.kick);
        *flasher.kick_pulse.lock() = self.pulse;
        flashers.push(flasher.clone());
        debug!(lamp = %flasher.name(), "lamp registered");
        Ok(())
    }

    /// Removes `flasher`; returns once no timer callback can touch it.
    pub fn unregister(&self, engine: &Engine, flasher: &Arc<LedFlasher>) -> BinderResult<()> {
        let _guard = engine.flush_and_lock();
        let mut flashers = self.shared.flashers.lock();
        let before = flashers.len();
        flashers.retain(|f| !Arc::ptr_eq(f, flasher));
        if flashers.len() == before {
            return Err(BinderError::NotFound(format!("lamp {}", flasher.name())));
        }
        *flasher.kick_timer.lock() = Weak::new();
        flasher.clear_kick();
        debug!(lamp = %flasher.name(), "lamp unregistered");
        Ok(())
    }

    /// Number of registered flashers.
    pub fn len(&self) -> usize {
        self.shared.flashers.lock().len()
    }

    /// Whether no flasher is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops both timers.
    pub fn stop(&self) {
        self.tick.stop();
        self.kick.stop();
    }
}

impl fmt::Debug for LedEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedEngine")
            .field("flashers", &self.len())
            .field("pulse", &self.pulse)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    #[derive(Default)]
    struct Lamp {
        on: AtomicBool,
        writes: AtomicU32,
        derived: AtomicU32,
    }

    impl LedOutput for Lamp {
        fn set_lamp(&self, on: bool) {
            self.on.store(on, Ordering::SeqCst);
            self.writes.fetch_add(1, Ordering::SeqCst);
        }

        fn derive_cadence(&self) -> u32 {
            self.derived.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn test_cadence_follows_counter() {
        let lamp = Arc::new(Lamp::default());
        let flasher = LedFlasher::new("test", lamp.clone());
        flasher.set_mode(LedMode::Cadence(0b0110));

        let mut levels = Vec::new();
        for _ in 0..4 {
            flasher.tick();
            levels.push(flasher.level());
        }
        // Steps 1, 2, 3, 4.
        assert_eq!(levels, vec![true, true, false, false]);
        assert!(!lamp.on.load(Ordering::SeqCst));
    }

    #[test]
    fn test_counter_wraps_after_32_steps() {
        let flasher = LedFlasher::new("wrap", Arc::new(Lamp::default()));
        for _ in 0..CADENCE_STEPS {
            flasher.tick();
        }
        assert_eq!(flasher.counter(), 0);
    }

    #[test]
    fn test_forced_modes_ignore_counter() {
        let lamp = Arc::new(Lamp::default());
        let flasher = LedFlasher::new("forced", lamp.clone());
        flasher.set_mode(LedMode::On);
        for _ in 0..40 {
            flasher.tick();
            assert!(flasher.level());
        }
        // Only the initial transition reached the hardware.
        assert_eq!(lamp.writes.load(Ordering::SeqCst), 1);
        flasher.set_mode(LedMode::Off);
        assert!(!lamp.on.load(Ordering::SeqCst));
    }

    fn idle_engine() -> Engine {
        Engine::new(crate::deferred::DeferredQueue::new(16))
    }

    /// Engine whose pulse outlasts any test, so only `clear_kick` ends it.
    fn slow_leds() -> LedEngine {
        LedEngine::start(Duration::from_secs(3600), Duration::from_secs(3600)).unwrap()
    }

    #[test]
    fn test_kick_inverts_without_disturbing_cadence() {
        let engine = idle_engine();
        let leds = slow_leds();
        let flasher = LedFlasher::new("kick", Arc::new(Lamp::default()));
        leds.register(&engine, &flasher).unwrap();
        flasher.set_mode(LedMode::On);
        flasher.kick(LedKick::RX);
        assert!(flasher.is_kicked());
        assert!(!flasher.level());
        let counter = flasher.counter();
        flasher.clear_kick();
        assert!(flasher.level());
        assert_eq!(flasher.counter(), counter);
    }

    #[test]
    fn test_kick_mask_filters_reasons() {
        let engine = idle_engine();
        let leds = slow_leds();
        let flasher =
            LedFlasher::with_kick_mask("errors", Arc::new(Lamp::default()), LedKick::ERROR);
        leds.register(&engine, &flasher).unwrap();
        flasher.kick(LedKick::RX | LedKick::TX);
        assert!(!flasher.is_kicked());
        flasher.kick(LedKick::ERROR);
        assert!(flasher.is_kicked());
    }

    #[test]
    fn test_kick_needs_registration() {
        let engine = idle_engine();
        let leds = slow_leds();
        let flasher = LedFlasher::new("cycle", Arc::new(Lamp::default()));
        flasher.kick(LedKick::RX);
        assert!(!flasher.is_kicked());

        leds.register(&engine, &flasher).unwrap();
        leds.unregister(&engine, &flasher).unwrap();
        flasher.kick(LedKick::RX);
        assert!(!flasher.is_kicked());
        assert!(!flasher.level());

        leds.register(&engine, &flasher).unwrap();
        flasher.kick(LedKick::RX);
        assert!(flasher.is_kicked());
    }

    #[test]
    fn test_unregister_clears_pending_kick() {
        let engine = idle_engine();
        let leds = slow_leds();
        let flasher = LedFlasher::new("pending", Arc::new(Lamp::default()));
        leds.register(&engine, &flasher).unwrap();
        flasher.kick(LedKick::TX);
        assert!(flasher.level());

        leds.unregister(&engine, &flasher).unwrap();
        assert!(!flasher.is_kicked());
        assert!(!flasher.level());
    }

    #[test]
    fn test_pulse_clears_and_rearms_after_reregistration() {
        let engine = idle_engine();
        let leds = LedEngine::start(Duration::from_secs(3600), Duration::from_millis(10)).unwrap();
        let flasher = LedFlasher::new("pulse", Arc::new(Lamp::default()));
        leds.register(&engine, &flasher).unwrap();
        leds.unregister(&engine, &flasher).unwrap();
        flasher.kick(LedKick::RX);
        leds.register(&engine, &flasher).unwrap();

        for _ in 0..2 {
            flasher.kick(LedKick::RX);
            assert!(flasher.is_kicked());
            let deadline = std::time::Instant::now() + Duration::from_secs(5);
            while flasher.is_kicked() {
                assert!(std::time::Instant::now() < deadline, "pulse never cleared");
                std::thread::sleep(Duration::from_millis(5));
            }
        }
        leds.stop();
    }

    #[test]
    fn test_derived_mode_queries_output() {
        let lamp = Arc::new(Lamp::default());
        let flasher = LedFlasher::new("derived", lamp.clone());
        flasher.set_mode(LedMode::Derived);
        assert!(!flasher.level());
        lamp.derived.store(CADENCE_ON, Ordering::SeqCst);
        flasher.tick();
        assert!(flasher.level());
    }

    #[test]
    fn test_mode_strings() {
        assert_eq!("fast".parse::<LedMode>().unwrap(), LedMode::Cadence(CADENCE_FAST));
        assert_eq!(
            "0x000000ff".parse::<LedMode>().unwrap(),
            LedMode::Cadence(0xff)
        );
        assert_eq!(LedMode::Cadence(CADENCE_SLOW).to_string(), "slow");
        assert_eq!(LedMode::Cadence(0xff).to_string(), "0x000000ff");
        assert!("blinky".parse::<LedMode>().is_err());
    }
}
