//! Hardware → core notification entry points.
//!
//! These are the only functions a hardware collaborator may call from a
//! restricted context. They never block on the administrative lock: they read
//! the item's current binding and either call an immediate-dispatch handler
//! directly or queue a [`DeferredTask::Notify`] for the worker.
//!
//! Every notification ends in exactly one of two ways: delivered to a
//! protocol handler, or counted in the item's `dropped` statistic. Drops
//! happen when the item has no protocol at dispatch time, has been removed, or
//! the queue is full.

use crate::core::{Core, CoreInner};
use crate::deferred::DeferredTask;
use crate::item::ItemRef;
use crate::led::LedKick;
use crate::protocol::{LineError, Notification, Protocol};
use bytes::Bytes;
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

impl Core {
    /// A frame arrived on `item`.
    pub fn notify_receive(&self, item: &ItemRef, data: Bytes) {
        self.notify(item, Notification::Receive(data));
    }

    /// The receiver of `item` reported an error.
    pub fn notify_receive_error(&self, item: &ItemRef, error: LineError) {
        self.notify(item, Notification::ReceiveError(error));
    }

    /// A frame left the hardware.
    pub fn notify_transmit_done(&self, item: &ItemRef) {
        self.notify(item, Notification::TransmitDone);
    }

    /// A modem status line of `item` changed.
    pub fn notify_modem_event(&self, item: &ItemRef) {
        self.notify(item, Notification::ModemEvent);
    }

    /// The transmitter of `item` reported an error.
    pub fn notify_transmit_error(&self, item: &ItemRef, error: LineError) {
        self.notify(item, Notification::TransmitError(error));
    }

    fn notify(&self, item: &ItemRef, event: Notification) {
        // Held across an immediate handler so that an unbind cannot finish
        // while the handler still runs.
        let binding = item.binding.read_recursive();
        let Some(protocol) = binding.protocol.clone() else {
            drop(binding);
            drop_notification(item, &event, "no protocol bound");
            return;
        };
        if protocol.flags().immediate_dispatch {
            deliver(item, &protocol, event);
            return;
        }
        drop(binding);

        let task = DeferredTask::Notify {
            item: item.clone(),
            event,
        };
        if let Err(task) = self.engine().queue().enqueue(task) {
            if let DeferredTask::Notify { item, event } = task {
                item.stats().record_dropped();
                warn!(
                    id = %item.id(),
                    event = event.name(),
                    queued = self.engine().queue().len(),
                    "deferred queue refused notification"
                );
            }
        }
    }
}

fn deliver(item: &ItemRef, protocol: &Arc<Protocol>, event: Notification) {
    item.stats().record(&event);
    match &event {
        Notification::Receive(_) => item.kick(LedKick::RX),
        Notification::ReceiveError(_) | Notification::TransmitError(_) => {
            item.kick(LedKick::ERROR)
        }
        Notification::TransmitDone | Notification::ModemEvent => {}
    }
    if item.debug_level() > 0 {
        trace!(
            id = %item.id(),
            protocol = %protocol.name(),
            event = event.name(),
            "delivering notification"
        );
    }
    protocol.deliver(item, event);
}

fn drop_notification(item: &ItemRef, event: &Notification, reason: &str) {
    item.stats().record_dropped();
    if item.debug_level() > 0 {
        debug!(id = %item.id(), event = event.name(), reason, "notification dropped");
    }
}

/// Worker-side handler for `Notify` and `Tick` tasks.
pub(crate) fn run_task(core: &Weak<CoreInner>, task: DeferredTask) {
    let Some(inner) = core.upgrade() else {
        if let DeferredTask::Notify { item, event } = task {
            drop_notification(&item, &event, "core gone");
        }
        return;
    };
    match task {
        DeferredTask::Notify { item, event } => {
            let _guard = inner.engine.lock();
            let protocol = if item.is_live() { item.protocol() } else { None };
            match protocol {
                Some(protocol) => deliver(&item, &protocol, event),
                None => drop_notification(&item, &event, "unbound or removed"),
            }
        }
        DeferredTask::Tick => {
            let _guard = inner.engine.lock();
            let items = inner.tree.lock().items();
            for item in items {
                if let Some(hw) = item.hardware() {
                    hw.second_timer(&item);
                }
            }
        }
        other => debug!(task = ?other, "unexpected task routed to dispatcher"),
    }
}
