//! Registry items: adapters, interfaces and channels.
//!
//! An [`Item`] is shared as an [`ItemRef`] (`Arc<Item>`). The registry owns the
//! tree topology; the item itself only carries identity, capacity attributes,
//! its hardware binding and its protocol binding. Fields the administrative
//! API may change live behind small `RwLock`s so that the notification hot
//! path can read them without taking the administrative lock.

use crate::error::{BinderError, BinderResult};
use crate::hardware::{HardwareOps, Signal};
use crate::led::{LedFlasher, LedKick};
use crate::limits::{DEFAULT_MTU, MINOR_UNASSIGNED};
use crate::param::StatsSnapshot;
use crate::protocol::{Notification, ParamLocks, Protocol};
use crate::provider::ProviderRef;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Shared handle to an item.
pub type ItemRef = Arc<Item>;

/// Opaque private state attached by a hardware collaborator or protocol.
pub type PrivateData = Arc<dyn Any + Send + Sync>;

// =============================================================================
// Identity
// =============================================================================

/// Item identity. Never zero for a registered item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(u32);

impl ItemId {
    /// The "no item" id, used for the root and as the enumeration sentinel.
    pub const NONE: ItemId = ItemId(0);

    /// Wraps a raw id.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw value.
    pub const fn get(&self) -> u32 {
        self.0
    }

    /// Whether this is [`ItemId::NONE`].
    pub const fn is_none(&self) -> bool {
        self.0 == 0
    }

    /// Value as reported on the control surface.
    pub fn as_i32(&self) -> i32 {
        i32::try_from(self.0).unwrap_or(i32::MAX)
    }

    /// Parses a control-surface id; negative values are rejected.
    pub fn from_i32(raw: i32) -> BinderResult<Self> {
        u32::try_from(raw)
            .map(ItemId)
            .map_err(|_| BinderError::InvalidArgument(format!("negative item id {raw}")))
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What an item represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    /// A physical adapter board.
    Adapter,
    /// A line interface on an adapter (E1 port, serial port group).
    Interface,
    /// A data channel; the only kind a protocol can bind to.
    Channel,
    /// Unlinked from the tree; kept alive only by outstanding references.
    Removed,
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ItemKind::Adapter => "adapter",
            ItemKind::Interface => "interface",
            ItemKind::Channel => "channel",
            ItemKind::Removed => "removed",
        })
    }
}

/// Device-file flavour a minor number is handed out for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceClass {
    /// No device file.
    #[default]
    None,
    /// Character terminal.
    Tty,
    /// Framed packet device.
    Packet,
    /// Raw bit stream.
    Raw,
}

impl fmt::Display for ServiceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ServiceClass::None => "none",
            ServiceClass::Tty => "tty",
            ServiceClass::Packet => "packet",
            ServiceClass::Raw => "raw",
        })
    }
}

/// Protocol binding state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindState {
    /// No protocol.
    #[default]
    Unbound,
    /// Protocol `attach` in progress.
    Attaching,
    /// Protocol attached.
    Bound,
    /// Protocol `detach` in progress.
    Detaching,
    /// Rollback failed; unbound until explicitly cleared.
    Faulted,
}

impl BindState {
    /// Whether an attach or detach is in progress.
    pub fn in_transition(&self) -> bool {
        matches!(self, BindState::Attaching | BindState::Detaching)
    }
}

impl fmt::Display for BindState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BindState::Unbound => "unbound",
            BindState::Attaching => "attaching",
            BindState::Bound => "bound",
            BindState::Detaching => "detaching",
            BindState::Faulted => "faulted",
        })
    }
}

// =============================================================================
// Mutable state
// =============================================================================

#[derive(Debug, Clone)]
pub(crate) struct ItemMeta {
    pub(crate) name: String,
    pub(crate) alias: Option<String>,
    pub(crate) kind: ItemKind,
    pub(crate) order: u32,
    /// Order was chosen by the builder rather than the registry.
    pub(crate) fixed_order: bool,
    pub(crate) parent: ItemId,
    pub(crate) minor: i32,
    pub(crate) service: ServiceClass,
    pub(crate) mtu: u32,
    pub(crate) fifo_size: u32,
    pub(crate) debug_level: u8,
}

#[derive(Default)]
pub(crate) struct Binding {
    pub(crate) state: BindState,
    pub(crate) protocol: Option<Arc<Protocol>>,
    pub(crate) user: Option<ProviderRef>,
    /// Locks of a protocol currently attaching.
    pub(crate) pending_locks: ParamLocks,
    /// Locked parameters an administrative `set` is currently changing.
    pub(crate) in_flight: ParamLocks,
}

impl Binding {
    pub(crate) fn effective_locks(&self) -> ParamLocks {
        let bound = self
            .protocol
            .as_ref()
            .map(|p| p.flags().locks)
            .unwrap_or_default();
        bound | self.pending_locks
    }
}

/// Per-item notification counters.
#[derive(Debug, Default)]
pub struct ItemStats {
    rx_frames: AtomicU64,
    rx_bytes: AtomicU64,
    rx_errors: AtomicU64,
    tx_done: AtomicU64,
    tx_errors: AtomicU64,
    modem_events: AtomicU64,
    dropped: AtomicU64,
}

impl ItemStats {
    pub(crate) fn record(&self, event: &Notification) {
        match event {
            Notification::Receive(data) => {
                self.rx_frames.fetch_add(1, Ordering::Relaxed);
                self.rx_bytes.fetch_add(data.len() as u64, Ordering::Relaxed);
            }
            Notification::ReceiveError(_) => {
                self.rx_errors.fetch_add(1, Ordering::Relaxed);
            }
            Notification::TransmitDone => {
                self.tx_done.fetch_add(1, Ordering::Relaxed);
            }
            Notification::ModemEvent => {
                self.modem_events.fetch_add(1, Ordering::Relaxed);
            }
            Notification::TransmitError(_) => {
                self.tx_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Notifications dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Copies the counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            rx_frames: self.rx_frames.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            rx_errors: self.rx_errors.load(Ordering::Relaxed),
            tx_done: self.tx_done.load(Ordering::Relaxed),
            tx_errors: self.tx_errors.load(Ordering::Relaxed),
            modem_events: self.modem_events.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    /// Zeroes every counter.
    pub fn reset(&self) {
        for counter in [
            &self.rx_frames,
            &self.rx_bytes,
            &self.rx_errors,
            &self.tx_done,
            &self.tx_errors,
            &self.modem_events,
            &self.dropped,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

// =============================================================================
// Item
// =============================================================================

/// One adapter, interface or channel.
pub struct Item {
    id: AtomicU32,
    pub(crate) meta: RwLock<ItemMeta>,
    pub(crate) binding: RwLock<Binding>,
    /// Kept apart from `binding` so immediate handlers may update it while
    /// dispatch holds the binding read lock.
    proto_data: Mutex<Option<PrivateData>>,
    hardware: Option<Arc<dyn HardwareOps>>,
    hw_data: Option<PrivateData>,
    pub(crate) provider: Mutex<Option<ProviderRef>>,
    led: Option<Arc<LedFlasher>>,
    stats: ItemStats,
    running: AtomicBool,
    open_count: AtomicUsize,
    pub(crate) registered: AtomicBool,
    /// Set while `remove_node` detaches the subtree.
    pub(crate) removing: AtomicBool,
    pub(crate) torn_down: AtomicBool,
}

impl Item {
    /// Starts building an item of `kind`.
    pub fn builder(kind: ItemKind) -> ItemBuilder {
        ItemBuilder::new(kind)
    }

    /// Registry id; [`ItemId::NONE`] before registration.
    pub fn id(&self) -> ItemId {
        ItemId(self.id.load(Ordering::Acquire))
    }

    pub(crate) fn set_id(&self, id: ItemId) {
        self.id.store(id.0, Ordering::Release);
    }

    /// Full dotted name.
    pub fn name(&self) -> String {
        self.meta.read().name.clone()
    }

    /// Optional short name.
    pub fn alias(&self) -> Option<String> {
        self.meta.read().alias.clone()
    }

    /// Current kind.
    pub fn kind(&self) -> ItemKind {
        self.meta.read().kind
    }

    /// Sibling order index.
    pub fn order(&self) -> u32 {
        self.meta.read().order
    }

    /// Parent id; [`ItemId::NONE`] for root items.
    pub fn parent(&self) -> ItemId {
        self.meta.read().parent
    }

    /// Device minor, or `-1` when none is assigned.
    pub fn minor(&self) -> i32 {
        self.meta.read().minor
    }

    /// Device-file flavour.
    pub fn service_class(&self) -> ServiceClass {
        self.meta.read().service
    }

    /// Maximum transfer unit.
    pub fn mtu(&self) -> u32 {
        self.meta.read().mtu
    }

    /// Hardware FIFO size hint.
    pub fn fifo_size(&self) -> u32 {
        self.meta.read().fifo_size
    }

    /// Diagnostic verbosity.
    pub fn debug_level(&self) -> u8 {
        self.meta.read().debug_level
    }

    /// Whether the item is currently linked into a registry.
    pub fn is_live(&self) -> bool {
        self.registered.load(Ordering::Acquire) && self.kind() != ItemKind::Removed
    }

    /// Binding state.
    pub fn bind_state(&self) -> BindState {
        self.binding.read_recursive().state
    }

    /// The bound protocol, if any.
    pub fn protocol(&self) -> Option<Arc<Protocol>> {
        self.binding.read_recursive().protocol.clone()
    }

    /// Name of the bound protocol, if any.
    pub fn protocol_name(&self) -> Option<String> {
        self.binding
            .read_recursive()
            .protocol
            .as_ref()
            .map(|p| p.name().to_string())
    }

    /// Stores protocol-private state; normally called from `attach`.
    pub fn set_protocol_data(&self, data: Option<PrivateData>) {
        *self.proto_data.lock() = data;
    }

    /// Protocol-private state downcast to `T`.
    pub fn protocol_data<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.proto_data
            .lock()
            .clone()
            .and_then(|data| data.downcast::<T>().ok())
    }

    /// Hardware-private state downcast to `T`.
    pub fn hardware_data<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.hw_data
            .clone()
            .and_then(|data| data.downcast::<T>().ok())
    }

    /// Hardware operation table.
    pub fn hardware(&self) -> Option<&Arc<dyn HardwareOps>> {
        self.hardware.as_ref()
    }

    /// Status lamp, if the hardware attached one.
    pub fn led(&self) -> Option<&Arc<LedFlasher>> {
        self.led.as_ref()
    }

    /// Notification counters.
    pub fn stats(&self) -> &ItemStats {
        &self.stats
    }

    /// Whether the hardware link is up.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Number of open device files.
    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::Acquire)
    }

    pub(crate) fn opened(&self) {
        self.open_count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn closed(&self) {
        let _ = self
            .open_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    fn hw(&self) -> BinderResult<&Arc<dyn HardwareOps>> {
        self.hardware
            .as_ref()
            .ok_or_else(|| BinderError::Unsupported(format!("item {} has no hardware", self.id())))
    }

    pub(crate) fn kick(&self, reason: LedKick) {
        if let Some(led) = &self.led {
            led.kick(reason);
        }
    }

    // -------------------------------------------------------------------------
    // Hardware passthrough for protocol modules
    // -------------------------------------------------------------------------

    /// Starts the hardware link.
    pub fn link_up(&self) -> BinderResult<()> {
        let hw = self.hw()?;
        if self.running.load(Ordering::Acquire) {
            return Ok(());
        }
        hw.link_up(self)?;
        self.running.store(true, Ordering::Release);
        debug!(item = %self.name(), "link up");
        Ok(())
    }

    /// Stops the hardware link if it is running.
    pub fn link_down(&self) {
        if let Some(hw) = &self.hardware {
            if self.running.swap(false, Ordering::AcqRel) {
                hw.link_down(self);
                debug!(item = %self.name(), "link down");
            }
        }
    }

    /// Queues one frame; `false` when the hardware refused it.
    pub fn transmit(&self, data: &Bytes) -> bool {
        let Some(hw) = &self.hardware else {
            return false;
        };
        if !self.running.load(Ordering::Acquire) {
            return false;
        }
        let queued = hw.transmit(self, data);
        if queued {
            self.kick(LedKick::TX);
        }
        queued
    }

    /// Drives DTR.
    pub fn set_dtr(&self, on: bool) -> BinderResult<()> {
        self.hw()?.set_dtr(self, on);
        Ok(())
    }

    /// Drives RTS.
    pub fn set_rts(&self, on: bool) -> BinderResult<()> {
        self.hw()?.set_rts(self, on);
        Ok(())
    }

    /// Samples a modem line.
    pub fn query_signal(&self, signal: Signal) -> BinderResult<bool> {
        Ok(self.hw()?.query_signal(self, signal))
    }
}

impl fmt::Debug for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let meta = self.meta.read();
        f.debug_struct("Item")
            .field("id", &self.id())
            .field("name", &meta.name)
            .field("alias", &meta.alias)
            .field("kind", &meta.kind)
            .field("minor", &meta.minor)
            .field("state", &self.bind_state())
            .finish()
    }
}

/// Builder for [`Item`].
pub struct ItemBuilder {
    kind: ItemKind,
    order: Option<u32>,
    mtu: u32,
    fifo_size: u32,
    service: ServiceClass,
    debug_level: u8,
    hardware: Option<Arc<dyn HardwareOps>>,
    hw_data: Option<PrivateData>,
    provider: Option<ProviderRef>,
    led: Option<Arc<LedFlasher>>,
}

impl ItemBuilder {
    fn new(kind: ItemKind) -> Self {
        Self {
            kind,
            order: None,
            mtu: DEFAULT_MTU,
            fifo_size: 0,
            service: ServiceClass::None,
            debug_level: 0,
            hardware: None,
            hw_data: None,
            provider: None,
            led: None,
        }
    }

    /// Fixes the sibling order instead of letting the registry pick one.
    pub fn order(mut self, order: u32) -> Self {
        self.order = Some(order);
        self
    }

    /// Maximum transfer unit.
    pub fn mtu(mut self, mtu: u32) -> Self {
        self.mtu = mtu;
        self
    }

    /// Hardware FIFO size hint.
    pub fn fifo_size(mut self, size: u32) -> Self {
        self.fifo_size = size;
        self
    }

    /// Device-file flavour used when a minor is allocated.
    pub fn service(mut self, service: ServiceClass) -> Self {
        self.service = service;
        self
    }

    /// Initial diagnostic verbosity.
    pub fn debug_level(mut self, level: u8) -> Self {
        self.debug_level = level;
        self
    }

    /// Attaches the hardware operation table.
    pub fn hardware(mut self, ops: Arc<dyn HardwareOps>) -> Self {
        self.hardware = Some(ops);
        self
    }

    /// Attaches opaque hardware-private state.
    pub fn hardware_data(mut self, data: PrivateData) -> Self {
        self.hw_data = Some(data);
        self
    }

    /// Provider reference; required for root items, inherited otherwise.
    pub fn provider(mut self, provider: ProviderRef) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Status lamp.
    pub fn led(mut self, led: Arc<LedFlasher>) -> Self {
        self.led = Some(led);
        self
    }

    /// Finishes the item. It stays unnamed and id-less until registered.
    pub fn build(self) -> ItemRef {
        Arc::new(Item {
            id: AtomicU32::new(0),
            meta: RwLock::new(ItemMeta {
                name: String::new(),
                alias: None,
                kind: self.kind,
                order: self.order.unwrap_or(0),
                fixed_order: self.order.is_some(),
                parent: ItemId::NONE,
                minor: MINOR_UNASSIGNED,
                service: self.service,
                mtu: self.mtu,
                fifo_size: self.fifo_size,
                debug_level: self.debug_level,
            }),
            binding: RwLock::new(Binding::default()),
            proto_data: Mutex::new(None),
            hardware: self.hardware,
            hw_data: self.hw_data,
            provider: Mutex::new(self.provider),
            led: self.led,
            stats: ItemStats::default(),
            running: AtomicBool::new(false),
            open_count: AtomicUsize::new(0),
            registered: AtomicBool::new(false),
            removing: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::LineError;

    struct Wire {
        sent: AtomicUsize,
    }

    impl HardwareOps for Wire {
        fn link_up(&self, _item: &Item) -> BinderResult<()> {
            Ok(())
        }

        fn link_down(&self, _item: &Item) {}

        fn transmit(&self, _item: &Item, _data: &Bytes) -> bool {
            self.sent.fetch_add(1, Ordering::SeqCst);
            true
        }

        fn query_signal(&self, _item: &Item, signal: Signal) -> bool {
            signal == Signal::Cd
        }
    }

    #[test]
    fn test_new_item_is_unregistered() {
        let item = Item::builder(ItemKind::Channel).mtu(1600).build();
        assert!(item.id().is_none());
        assert!(!item.is_live());
        assert_eq!(item.minor(), MINOR_UNASSIGNED);
        assert_eq!(item.mtu(), 1600);
        assert_eq!(item.bind_state(), BindState::Unbound);
    }

    #[test]
    fn test_item_id_conversions() {
        assert_eq!(ItemId::from_i32(7).unwrap(), ItemId::new(7));
        assert!(ItemId::from_i32(-1).is_err());
        assert_eq!(ItemId::new(42).as_i32(), 42);
    }

    #[test]
    fn test_stats_accounting() {
        let stats = ItemStats::default();
        stats.record(&Notification::Receive(Bytes::from_static(b"abcd")));
        stats.record(&Notification::Receive(Bytes::from_static(b"ef")));
        stats.record(&Notification::ReceiveError(LineError::Crc));
        stats.record_dropped();
        let snap = stats.snapshot();
        assert_eq!(snap.rx_frames, 2);
        assert_eq!(snap.rx_bytes, 6);
        assert_eq!(snap.rx_errors, 1);
        assert_eq!(snap.dropped, 1);
        stats.reset();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn test_transmit_requires_running_link() {
        let wire = Arc::new(Wire {
            sent: AtomicUsize::new(0),
        });
        let item = Item::builder(ItemKind::Channel)
            .hardware(wire.clone())
            .build();
        assert!(!item.transmit(&Bytes::from_static(b"x")));
        item.link_up().unwrap();
        assert!(item.is_running());
        assert!(item.transmit(&Bytes::from_static(b"x")));
        assert_eq!(wire.sent.load(Ordering::SeqCst), 1);
        assert!(item.query_signal(Signal::Cd).unwrap());
        item.link_down();
        assert!(!item.is_running());
    }

    #[test]
    fn test_passthrough_without_hardware_is_unsupported() {
        let item = Item::builder(ItemKind::Interface).build();
        assert!(item.link_up().is_err());
        assert!(item.set_dtr(true).is_err());
    }

    #[test]
    fn test_private_data_downcast() {
        let item = Item::builder(ItemKind::Channel)
            .hardware_data(Arc::new(5u32))
            .build();
        assert_eq!(item.hardware_data::<u32>().as_deref(), Some(&5));
        assert!(item.hardware_data::<String>().is_none());
        item.set_protocol_data(Some(Arc::new(String::from("ctx"))));
        assert_eq!(item.protocol_data::<String>().unwrap().as_str(), "ctx");
    }

    #[test]
    fn test_open_count_saturates() {
        let item = Item::builder(ItemKind::Channel).build();
        item.closed();
        assert_eq!(item.open_count(), 0);
        item.opened();
        assert_eq!(item.open_count(), 1);
    }
}
