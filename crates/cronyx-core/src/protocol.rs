//! Protocol module plug-in contract.
//!
//! A protocol is a named, globally registered capability bundle that turns a
//! channel's raw frame stream into something useful (a tty, a network device,
//! a loopback tester). Channels reference protocols, never own them; the
//! [`Protocol::users`] counter keeps a protocol registered while any channel is
//! bound to it.
//!
//! # Example
//!
//! ```rust,ignore
//! struct Counter(AtomicU64);
//!
//! impl ProtocolOps for Counter {
//!     fn attach(&self, _core: &Core, _item: &ItemRef) -> BinderResult<()> { Ok(()) }
//!     fn detach(&self, _core: &Core, _item: &ItemRef) -> BinderResult<()> { Ok(()) }
//!     fn notify_receive(&self, _item: &ItemRef, _data: Bytes) {
//!         self.0.fetch_add(1, Ordering::Relaxed);
//!     }
//! }
//!
//! core.register_protocol(Protocol::new("count", Arc::new(Counter(AtomicU64::new(0)))))?;
//! ```

use crate::core::Core;
use crate::error::{BinderError, BinderResult};
use crate::item::ItemRef;
use crate::param::{ParamId, ParamValue};
use crate::provider::Provider;
use bitflags::bitflags;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

bitflags! {
    /// Parameters a bound protocol forbids administrators to change.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ParamLocks: u32 {
        /// Channel mode.
        const MODE = 1 << 0;
        /// Timeslot map.
        const TIMESLOTS = 1 << 1;
        /// Maximum transfer unit.
        const MTU = 1 << 2;
    }
}

impl ParamLocks {
    /// Lock bit covering `param`, if any.
    pub fn for_param(param: ParamId) -> ParamLocks {
        match param {
            ParamId::Mode => ParamLocks::MODE,
            ParamId::TimeslotMask => ParamLocks::TIMESLOTS,
            ParamId::Mtu => ParamLocks::MTU,
            _ => ParamLocks::empty(),
        }
    }
}

bitflags! {
    /// Readiness reported by a protocol's `poll`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PollFlags: u32 {
        /// Data is waiting to be read.
        const READABLE = 1 << 0;
        /// A write would be accepted.
        const WRITABLE = 1 << 1;
        /// The link went down.
        const HANGUP = 1 << 2;
    }
}

/// Static properties of a protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProtocolFlags {
    /// Deliver notifications directly from the hardware collaborator's
    /// context instead of the deferred queue. Only valid for handlers that
    /// never block or allocate.
    pub immediate_dispatch: bool,
    /// Parameters frozen while the protocol is bound.
    pub locks: ParamLocks,
}

/// Line-level error reported with receive/transmit error notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineError {
    /// Receiver overrun.
    Overrun,
    /// Frame longer than the buffer.
    Overflow,
    /// Checksum mismatch.
    Crc,
    /// Framing violation.
    Framing,
    /// Frame aborted by the sender.
    Abort,
    /// Transmitter underrun.
    Underrun,
    /// Hardware-specific code.
    Other(u32),
}

impl LineError {
    /// Numeric code as reported by the hardware.
    pub fn code(&self) -> u32 {
        match self {
            LineError::Overrun => 1,
            LineError::Overflow => 2,
            LineError::Crc => 3,
            LineError::Framing => 4,
            LineError::Abort => 5,
            LineError::Underrun => 6,
            LineError::Other(code) => *code,
        }
    }
}

/// Hardware-originated event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A frame arrived.
    Receive(Bytes),
    /// The receiver reported an error.
    ReceiveError(LineError),
    /// A previously transmitted frame left the hardware.
    TransmitDone,
    /// A modem status line changed.
    ModemEvent,
    /// The transmitter reported an error.
    TransmitError(LineError),
}

impl Notification {
    /// Short event name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Notification::Receive(_) => "receive",
            Notification::ReceiveError(_) => "receive_error",
            Notification::TransmitDone => "transmit_done",
            Notification::ModemEvent => "modem_event",
            Notification::TransmitError(_) => "transmit_error",
        }
    }
}

/// Entry points of a protocol module.
///
/// `attach` and `detach` run on an administrative thread with the
/// administrative lock released by the binder and may sleep. They must not
/// wait for deferred work. Notification handlers run on the deferred worker
/// (or in the hardware context for immediate-dispatch protocols).
pub trait ProtocolOps: Send + Sync {
    /// Binds the protocol to `item`. An error leaves the item unbound.
    fn attach(&self, core: &Core, item: &ItemRef) -> BinderResult<()>;

    /// Unbinds the protocol. An error keeps the binding in place.
    fn detach(&self, core: &Core, item: &ItemRef) -> BinderResult<()>;

    /// A frame arrived on `item`.
    fn notify_receive(&self, _item: &ItemRef, _data: Bytes) {}

    /// The receiver reported an error.
    fn notify_receive_error(&self, _item: &ItemRef, _error: LineError) {}

    /// A frame left the hardware.
    fn notify_transmit_done(&self, _item: &ItemRef) {}

    /// A modem line changed.
    fn notify_modem_event(&self, _item: &ItemRef) {}

    /// The transmitter reported an error.
    fn notify_transmit_error(&self, _item: &ItemRef, _error: LineError) {}

    /// Reads a protocol-owned parameter.
    fn ctl_get(&self, _item: &ItemRef, param: ParamId) -> BinderResult<ParamValue> {
        Err(BinderError::Unsupported(format!("protocol get {param}")))
    }

    /// Writes a protocol-owned parameter.
    fn ctl_set(&self, _item: &ItemRef, param: ParamId, _value: &ParamValue) -> BinderResult<()> {
        Err(BinderError::Unsupported(format!("protocol set {param}")))
    }

    /// Raw command passthrough; returns a command-specific status word.
    fn raw_command(&self, _item: &ItemRef, cmd: u32, _data: &mut Vec<u8>) -> BinderResult<u32> {
        Err(BinderError::Unsupported(format!("raw command {cmd:#x}")))
    }

    /// Device file opened on the item's minor.
    fn open(&self, _item: &ItemRef) -> BinderResult<()> {
        Err(BinderError::Unsupported("open".into()))
    }

    /// Device file closed.
    fn close(&self, _item: &ItemRef) {}

    /// Reads from the device file.
    fn read(&self, _item: &ItemRef, _buf: &mut [u8]) -> BinderResult<usize> {
        Err(BinderError::Unsupported("read".into()))
    }

    /// Writes to the device file.
    fn write(&self, _item: &ItemRef, _data: &[u8]) -> BinderResult<usize> {
        Err(BinderError::Unsupported("write".into()))
    }

    /// Device file readiness.
    fn poll(&self, _item: &ItemRef) -> PollFlags {
        PollFlags::empty()
    }
}

/// A registered protocol module.
pub struct Protocol {
    name: String,
    flags: ProtocolFlags,
    ops: Arc<dyn ProtocolOps>,
    users: Provider,
}

impl Protocol {
    /// Creates a deferred-dispatch protocol without parameter locks.
    pub fn new(name: impl Into<String>, ops: Arc<dyn ProtocolOps>) -> Self {
        let name = name.into();
        Self {
            users: Provider::new(name.clone()),
            name,
            flags: ProtocolFlags::default(),
            ops,
        }
    }

    /// Requests immediate dispatch of notifications.
    pub fn immediate(mut self) -> Self {
        self.flags.immediate_dispatch = true;
        self
    }

    /// Freezes `locks` while bound.
    pub fn with_locks(mut self, locks: ParamLocks) -> Self {
        self.flags.locks = locks;
        self
    }

    /// Protocol name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Static flags.
    pub fn flags(&self) -> ProtocolFlags {
        self.flags
    }

    /// Entry points.
    pub fn ops(&self) -> &Arc<dyn ProtocolOps> {
        &self.ops
    }

    /// Reference counter held by bound channels.
    pub fn users(&self) -> &Provider {
        &self.users
    }

    /// Routes `event` to the matching notification handler.
    pub(crate) fn deliver(&self, item: &ItemRef, event: Notification) {
        match event {
            Notification::Receive(data) => self.ops.notify_receive(item, data),
            Notification::ReceiveError(err) => self.ops.notify_receive_error(item, err),
            Notification::TransmitDone => self.ops.notify_transmit_done(item),
            Notification::ModemEvent => self.ops.notify_modem_event(item),
            Notification::TransmitError(err) => self.ops.notify_transmit_error(item, err),
        }
    }
}

impl std::fmt::Debug for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Protocol")
            .field("name", &self.name)
            .field("flags", &self.flags)
            .field("users", &self.users.users())
            .finish()
    }
}
