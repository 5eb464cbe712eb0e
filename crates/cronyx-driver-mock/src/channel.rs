//! Simulated channel hardware.
//!
//! One [`MockHardware`] operation table serves every channel of every mock
//! adapter; per-channel register state lives in a [`MockChannel`] attached to
//! the item as hardware data. The register lock is always released before a
//! notification is raised back into the core.

use crate::common::{ErrorConfig, MockMode, MockRng, TimingConfig};
use bytes::Bytes;
use cronyx_core::{
    BinderError, BinderResult, HardwareOps, Item, ItemRef, LineError, ParamId, ParamValue,
    Signal, WeakCore,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// Frames kept in a channel's transmit log.
pub const TX_LOG_DEPTH: usize = 256;

/// Operating modes the simulated framer accepts.
pub const MODES: [&str; 4] = ["hdlc", "async", "bisync", "raw"];

/// Line codes the simulated line interface accepts.
pub const LINE_CODES: [&str; 4] = ["hdb3", "ami", "nrz", "nrzi"];

/// Channel-associated signalling modes.
pub const CAS_MODES: [&str; 4] = ["off", "set", "pass", "cross"];

#[derive(Debug, Clone)]
struct Registers {
    mode: String,
    loopback: bool,
    line_code: String,
    cas: String,
    timeslots: u64,
    dtr: bool,
    rts: bool,
    carrier: bool,
}

impl Default for Registers {
    fn default() -> Self {
        Self {
            mode: "hdlc".to_string(),
            loopback: false,
            line_code: "hdb3".to_string(),
            cas: "off".to_string(),
            // Timeslot 0 carries framing.
            timeslots: 0xFFFF_FFFE,
            dtr: false,
            rts: false,
            carrier: false,
        }
    }
}

/// Register state of one simulated channel.
pub struct MockChannel {
    index: usize,
    source: String,
    regs: Mutex<Registers>,
    tx_log: Mutex<VecDeque<Bytes>>,
    tx_frames: AtomicU64,
    seconds: AtomicU64,
    item: Mutex<Weak<Item>>,
    core: WeakCore,
    mode: MockMode,
    timing: TimingConfig,
    errors: ErrorConfig,
    rng: Arc<MockRng>,
}

impl MockChannel {
    pub(crate) fn new(
        index: usize,
        source: String,
        core: WeakCore,
        mode: MockMode,
        timing: TimingConfig,
        errors: ErrorConfig,
        rng: Arc<MockRng>,
    ) -> Arc<Self> {
        Arc::new(Self {
            index,
            source,
            regs: Mutex::new(Registers::default()),
            tx_log: Mutex::new(VecDeque::new()),
            tx_frames: AtomicU64::new(0),
            seconds: AtomicU64::new(0),
            item: Mutex::new(Weak::new()),
            core,
            mode,
            timing,
            errors,
            rng,
        })
    }

    pub(crate) fn set_item(&self, item: &ItemRef) {
        *self.item.lock() = Arc::downgrade(item);
    }

    /// Position of the channel on its adapter.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Frames transmitted since creation.
    pub fn tx_frames(&self) -> u64 {
        self.tx_frames.load(Ordering::Acquire)
    }

    /// The most recent transmitted frames, oldest first.
    pub fn tx_log(&self) -> Vec<Bytes> {
        self.tx_log.lock().iter().cloned().collect()
    }

    /// Seconds the per-second timer has ticked for this channel.
    pub fn seconds(&self) -> u64 {
        self.seconds.load(Ordering::Acquire)
    }

    /// Carrier-detect input.
    pub fn carrier(&self) -> bool {
        self.regs.lock().carrier
    }

    /// Changes the carrier input and reports the modem event like a status
    /// interrupt would.
    pub fn set_carrier(&self, on: bool) {
        let changed = {
            let mut regs = self.regs.lock();
            std::mem::replace(&mut regs.carrier, on) != on
        };
        if changed {
            self.raise(|core, item| core.notify_modem_event(item));
        }
    }

    /// Runs `f` with the live core and item, if both still exist.
    pub(crate) fn raise(&self, f: impl FnOnce(&cronyx_core::Core, &ItemRef)) {
        let item = self.item.lock().upgrade();
        if let (Some(core), Some(item)) = (self.core.upgrade(), item) {
            f(&core, &item);
        }
    }
}

impl std::fmt::Debug for MockChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockChannel")
            .field("index", &self.index)
            .field("regs", &*self.regs.lock())
            .field("tx_frames", &self.tx_frames())
            .finish()
    }
}

fn pick(param: ParamId, value: &ParamValue, allowed: &[&str]) -> BinderResult<String> {
    let text = value.as_text()?;
    if allowed.contains(&text) {
        Ok(text.to_string())
    } else {
        Err(BinderError::InvalidArgument(format!(
            "{param} must be one of {}",
            allowed.join(", ")
        )))
    }
}

/// Operation table shared by all mock channels.
#[derive(Debug, Default)]
pub struct MockHardware;

impl MockHardware {
    fn channel(item: &Item) -> BinderResult<Arc<MockChannel>> {
        item.hardware_data::<MockChannel>().ok_or_else(|| {
            BinderError::Unsupported(format!("item {} is not a mock channel", item.id()))
        })
    }
}

impl HardwareOps for MockHardware {
    fn link_up(&self, item: &Item) -> BinderResult<()> {
        let chan = Self::channel(item)?;
        chan.errors.check_operation(&chan.source, "link_up")?;
        if chan.mode.is_paced() {
            std::thread::sleep(chan.timing.link_settle());
        }
        chan.regs.lock().carrier = true;
        debug!(channel = chan.index, "receiver locked");
        Ok(())
    }

    fn link_down(&self, item: &Item) {
        if let Ok(chan) = Self::channel(item) {
            chan.regs.lock().carrier = false;
        }
    }

    fn transmit(&self, item: &Item, data: &Bytes) -> bool {
        let Ok(chan) = Self::channel(item) else {
            return false;
        };
        if chan.errors.check_operation(&chan.source, "transmit").is_err() {
            chan.raise(|core, item| core.notify_transmit_error(item, LineError::Underrun));
            return false;
        }
        let loopback = {
            let mut log = chan.tx_log.lock();
            if log.len() == TX_LOG_DEPTH {
                log.pop_front();
            }
            log.push_back(data.clone());
            chan.regs.lock().loopback
        };
        chan.tx_frames.fetch_add(1, Ordering::AcqRel);
        trace!(channel = chan.index, len = data.len(), "frame queued");

        chan.raise(|core, item| {
            core.notify_transmit_done(item);
            if loopback {
                core.notify_receive(item, data.clone());
            }
        });
        true
    }

    fn set_dtr(&self, item: &Item, on: bool) {
        if let Ok(chan) = Self::channel(item) {
            chan.regs.lock().dtr = on;
        }
    }

    fn set_rts(&self, item: &Item, on: bool) {
        if let Ok(chan) = Self::channel(item) {
            chan.regs.lock().rts = on;
        }
    }

    fn query_signal(&self, item: &Item, signal: Signal) -> bool {
        let Ok(chan) = Self::channel(item) else {
            return false;
        };
        let regs = chan.regs.lock();
        // A null-modem cable: CTS follows RTS and DSR follows DTR.
        match signal {
            Signal::Dtr | Signal::Dsr => regs.dtr,
            Signal::Rts | Signal::Cts => regs.rts,
            Signal::Cd => regs.carrier,
        }
    }

    fn ctl_get(&self, item: &Item, param: ParamId) -> BinderResult<ParamValue> {
        let chan = Self::channel(item)?;
        let regs = chan.regs.lock();
        match param {
            ParamId::Mode => Ok(ParamValue::Text(regs.mode.clone())),
            ParamId::LoopMode => Ok(ParamValue::Flag(regs.loopback)),
            ParamId::LineCode => Ok(ParamValue::Text(regs.line_code.clone())),
            ParamId::CasMode => Ok(ParamValue::Text(regs.cas.clone())),
            ParamId::TimeslotMask => Ok(ParamValue::Number(regs.timeslots)),
            other => Err(BinderError::Unsupported(format!("mock get {other}"))),
        }
    }

    fn ctl_set(&self, item: &Item, param: ParamId, value: &ParamValue) -> BinderResult<()> {
        let chan = Self::channel(item)?;
        match param {
            ParamId::Mode => {
                let mode = pick(param, value, &MODES)?;
                chan.regs.lock().mode = mode;
            }
            ParamId::LoopMode => {
                let on = match value {
                    ParamValue::Flag(on) => *on,
                    other => other.as_number()? != 0,
                };
                chan.regs.lock().loopback = on;
            }
            ParamId::LineCode => {
                let code = pick(param, value, &LINE_CODES)?;
                chan.regs.lock().line_code = code;
            }
            ParamId::CasMode => {
                let cas = pick(param, value, &CAS_MODES)?;
                chan.regs.lock().cas = cas;
            }
            ParamId::TimeslotMask => {
                let mask = value.as_number()?;
                if mask == 0 || mask > u64::from(u32::MAX) || mask & 1 != 0 {
                    return Err(BinderError::InvalidArgument(format!(
                        "timeslot mask {mask:#x} must select slots 1..=31"
                    )));
                }
                chan.regs.lock().timeslots = mask;
            }
            other => return Err(BinderError::Unsupported(format!("mock set {other}"))),
        }
        debug!(channel = chan.index, param = %param, value = %value, "register written");
        Ok(())
    }

    fn second_timer(&self, item: &Item) {
        let Ok(chan) = Self::channel(item) else {
            return;
        };
        chan.seconds.fetch_add(1, Ordering::AcqRel);
        if chan.mode.is_chaotic() && item.is_running() && chan.rng.should_fail(0.1) {
            let on = !chan.carrier();
            debug!(channel = chan.index, carrier = on, "carrier flap");
            chan.set_carrier(on);
        }
    }
}
