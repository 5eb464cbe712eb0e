//! Core → hardware collaborator interface.
//!
//! Adapter drivers implement [`HardwareOps`] once per adapter family and attach
//! it to each item they register. The core and protocol modules reach the
//! hardware only through these entry points. Implementations hold their own
//! register-level lock; that lock must never be held while calling back into
//! the administrative API.

use crate::error::{BinderError, BinderResult};
use crate::item::Item;
use crate::param::{ParamId, ParamValue};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Modem control and status lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    /// Data terminal ready (output).
    Dtr,
    /// Request to send (output).
    Rts,
    /// Clear to send (input).
    Cts,
    /// Data set ready (input).
    Dsr,
    /// Carrier detect (input).
    Cd,
}

/// Hardware operation table attached to an item.
///
/// Only `link_up`, `link_down` and `transmit` are mandatory; the remaining
/// entries default to "not supported" so that adapters without modem lines or
/// extra parameters stay small.
pub trait HardwareOps: Send + Sync {
    /// Starts the channel's receiver and transmitter.
    fn link_up(&self, item: &Item) -> BinderResult<()>;

    /// Stops the channel. Must not fail.
    fn link_down(&self, item: &Item);

    /// Queues one frame for transmission; `false` when the transmit ring is full.
    fn transmit(&self, item: &Item, data: &Bytes) -> bool;

    /// Drives the DTR output.
    fn set_dtr(&self, _item: &Item, _on: bool) {}

    /// Drives the RTS output.
    fn set_rts(&self, _item: &Item, _on: bool) {}

    /// Samples a modem line.
    fn query_signal(&self, _item: &Item, _signal: Signal) -> bool {
        false
    }

    /// Reads a hardware-owned parameter.
    fn ctl_get(&self, _item: &Item, param: ParamId) -> BinderResult<ParamValue> {
        Err(BinderError::Unsupported(format!("hardware get {param}")))
    }

    /// Writes a hardware-owned parameter.
    fn ctl_set(&self, _item: &Item, param: ParamId, _value: &ParamValue) -> BinderResult<()> {
        Err(BinderError::Unsupported(format!("hardware set {param}")))
    }

    /// Called once per second from the deferred worker.
    fn second_timer(&self, _item: &Item) {}
}
