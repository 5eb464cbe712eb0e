//! Reference protocol modules.
//!
//! - [`EchoProtocol`] (`"echo"`): raises the link, sends every received frame
//!   back out and keeps a short backlog readable through the device file.
//! - [`NullProtocol`] (`"null"`, `"null-irq"`): counts and discards; the
//!   `-irq` flavour runs with immediate dispatch.

use crate::common::ErrorConfig;
use bytes::Bytes;
use cronyx_core::{
    BinderError, BinderResult, Core, ItemRef, LineError, ParamLocks, PollFlags, Protocol,
    ProtocolOps,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Received frames kept for device-file readers.
pub const RX_BACKLOG: usize = 64;

/// Raw command: `data[0]` switches echoing off (0) or on; returns the
/// previous setting.
pub const RAW_ECHO_ENABLE: u32 = 0x4501;

/// Raw command: fills `data` with the received, echoed and error counters as
/// little-endian `u64`s.
pub const RAW_ECHO_COUNTERS: u32 = 0x4502;

/// Per-channel state of the echo protocol.
#[derive(Debug)]
pub struct EchoState {
    backlog: Mutex<VecDeque<Bytes>>,
    echo: AtomicBool,
    received: AtomicU64,
    echoed: AtomicU64,
    errors: AtomicU64,
}

impl Default for EchoState {
    fn default() -> Self {
        Self {
            backlog: Mutex::new(VecDeque::new()),
            echo: AtomicBool::new(true),
            received: AtomicU64::new(0),
            echoed: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }
}

impl EchoState {
    /// Frames received.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Acquire)
    }

    /// Frames transmitted back.
    pub fn echoed(&self) -> u64 {
        self.echoed.load(Ordering::Acquire)
    }

    /// Line errors reported.
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Acquire)
    }

    /// Frames waiting for a device-file read.
    pub fn backlog(&self) -> usize {
        self.backlog.lock().len()
    }
}

/// Loopback tester: every received frame is transmitted back.
///
/// With the channel's hardware loop enabled, echoing has to be switched off
/// through [`RAW_ECHO_ENABLE`] or the frame circulates forever.
#[derive(Debug, Default)]
pub struct EchoProtocol {
    errors: ErrorConfig,
    attached: AtomicUsize,
}

impl EchoProtocol {
    /// Registered protocol name.
    pub const NAME: &'static str = "echo";

    /// Echo protocol without failure injection.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Echo protocol whose `attach`/`detach` consult `errors`.
    pub fn with_errors(errors: ErrorConfig) -> Arc<Self> {
        Arc::new(Self {
            errors,
            attached: AtomicUsize::new(0),
        })
    }

    /// Registration record; the channel mode is frozen while bound.
    pub fn protocol(self: &Arc<Self>) -> Protocol {
        Protocol::new(Self::NAME, self.clone()).with_locks(ParamLocks::MODE)
    }

    /// Channels currently attached.
    pub fn attached(&self) -> usize {
        self.attached.load(Ordering::Acquire)
    }

    /// Echo state of `item`, while bound.
    pub fn state(item: &ItemRef) -> Option<Arc<EchoState>> {
        item.protocol_data::<EchoState>()
    }

    fn bound_state(item: &ItemRef) -> BinderResult<Arc<EchoState>> {
        Self::state(item)
            .ok_or_else(|| BinderError::NotFound(format!("echo state of item {}", item.id())))
    }
}

impl ProtocolOps for EchoProtocol {
    fn attach(&self, _core: &Core, item: &ItemRef) -> BinderResult<()> {
        self.errors.check_operation(Self::NAME, "attach")?;
        item.link_up()?;
        item.set_dtr(true)?;
        item.set_rts(true)?;
        item.set_protocol_data(Some(Arc::new(EchoState::default())));
        self.attached.fetch_add(1, Ordering::AcqRel);
        info!(item = %item.name(), "echo attached");
        Ok(())
    }

    fn detach(&self, _core: &Core, item: &ItemRef) -> BinderResult<()> {
        self.errors.check_operation(Self::NAME, "detach")?;
        item.set_rts(false)?;
        item.set_dtr(false)?;
        item.link_down();
        item.set_protocol_data(None);
        self.attached.fetch_sub(1, Ordering::AcqRel);
        info!(item = %item.name(), "echo detached");
        Ok(())
    }

    fn notify_receive(&self, item: &ItemRef, data: Bytes) {
        let Some(state) = Self::state(item) else {
            return;
        };
        state.received.fetch_add(1, Ordering::AcqRel);
        {
            let mut backlog = state.backlog.lock();
            if backlog.len() == RX_BACKLOG {
                backlog.pop_front();
            }
            backlog.push_back(data.clone());
        }
        if state.echo.load(Ordering::Acquire) && item.transmit(&data) {
            state.echoed.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn notify_receive_error(&self, item: &ItemRef, error: LineError) {
        if let Some(state) = Self::state(item) {
            state.errors.fetch_add(1, Ordering::AcqRel);
        }
        debug!(item = %item.name(), code = error.code(), "receive error");
    }

    fn notify_transmit_error(&self, item: &ItemRef, error: LineError) {
        if let Some(state) = Self::state(item) {
            state.errors.fetch_add(1, Ordering::AcqRel);
        }
        debug!(item = %item.name(), code = error.code(), "transmit error");
    }

    fn notify_modem_event(&self, item: &ItemRef) {
        debug!(
            item = %item.name(),
            cd = item.query_signal(cronyx_core::Signal::Cd).unwrap_or(false),
            "modem status changed"
        );
    }

    fn raw_command(&self, item: &ItemRef, cmd: u32, data: &mut Vec<u8>) -> BinderResult<u32> {
        let state = Self::bound_state(item)?;
        match cmd {
            RAW_ECHO_ENABLE => {
                let on = data.first().copied().unwrap_or(1) != 0;
                let previous = state.echo.swap(on, Ordering::AcqRel);
                Ok(u32::from(previous))
            }
            RAW_ECHO_COUNTERS => {
                data.clear();
                for counter in [state.received(), state.echoed(), state.errors()] {
                    data.extend_from_slice(&counter.to_le_bytes());
                }
                Ok(0)
            }
            other => Err(BinderError::Unsupported(format!("echo raw command {other:#x}"))),
        }
    }

    fn open(&self, item: &ItemRef) -> BinderResult<()> {
        Self::bound_state(item).map(|_| ())
    }

    fn read(&self, item: &ItemRef, buf: &mut [u8]) -> BinderResult<usize> {
        let state = Self::bound_state(item)?;
        let Some(frame) = state.backlog.lock().pop_front() else {
            return Ok(0);
        };
        let len = frame.len().min(buf.len());
        buf[..len].copy_from_slice(&frame[..len]);
        Ok(len)
    }

    fn write(&self, item: &ItemRef, data: &[u8]) -> BinderResult<usize> {
        if item.transmit(&Bytes::copy_from_slice(data)) {
            Ok(data.len())
        } else {
            Err(BinderError::Busy(format!("item {} transmit refused", item.id())))
        }
    }

    fn poll(&self, item: &ItemRef) -> PollFlags {
        let mut flags = PollFlags::empty();
        if Self::state(item).is_some_and(|s| s.backlog() > 0) {
            flags |= PollFlags::READABLE;
        }
        if item.is_running() {
            flags |= PollFlags::WRITABLE;
        }
        flags
    }
}

/// Discards everything, counting what it saw.
#[derive(Debug, Default)]
pub struct NullProtocol {
    frames: AtomicU64,
    errors: AtomicU64,
}

impl NullProtocol {
    /// Name of the deferred-dispatch variant.
    pub const NAME: &'static str = "null";
    /// Name of the immediate-dispatch variant.
    pub const IMMEDIATE_NAME: &'static str = "null-irq";

    /// Fresh counters.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Deferred-dispatch registration record.
    pub fn protocol(self: &Arc<Self>) -> Protocol {
        Protocol::new(Self::NAME, self.clone())
    }

    /// Immediate-dispatch registration record sharing the same counters.
    pub fn immediate_protocol(self: &Arc<Self>) -> Protocol {
        Protocol::new(Self::IMMEDIATE_NAME, self.clone()).immediate()
    }

    /// Frames received.
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    /// Line errors reported.
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Acquire)
    }
}

impl ProtocolOps for NullProtocol {
    fn attach(&self, _core: &Core, _item: &ItemRef) -> BinderResult<()> {
        Ok(())
    }

    fn detach(&self, _core: &Core, _item: &ItemRef) -> BinderResult<()> {
        Ok(())
    }

    fn notify_receive(&self, _item: &ItemRef, _data: Bytes) {
        self.frames.fetch_add(1, Ordering::AcqRel);
    }

    fn notify_receive_error(&self, _item: &ItemRef, _error: LineError) {
        self.errors.fetch_add(1, Ordering::AcqRel);
    }
}

/// Registers `echo`, `null` and `null-irq` with `core`.
pub fn register_all(core: &Core) -> BinderResult<(Arc<EchoProtocol>, Arc<NullProtocol>)> {
    let echo = EchoProtocol::new();
    let null = NullProtocol::new();
    core.register_protocol(echo.protocol())?;
    core.register_protocol(null.protocol())?;
    core.register_protocol(null.immediate_protocol())?;
    Ok((echo, null))
}
