//! Control-command surface.
//!
//! [`ControlSession`] is what a thin front end (CLI, ioctl shim) talks to:
//! version, enumeration, item info, parameter get/set and device-file
//! passthrough. A read-only session may look but not touch.
//!
//! # Parameter routing
//!
//! ```text
//!   get/set(param)
//!       │
//!       ├── core-owned (proto, debug, mtu, qlen, stat, led) ──► served here
//!       │
//!       └── otherwise ──► bound protocol ctl ──Unsupported──► hardware ctl
//! ```
//!
//! `mode`, `timeslots` and `mtu` cannot be changed while the bound or
//! attaching protocol locks them.

use crate::core::Core;
use crate::error::{BinderError, BinderResult};
use crate::item::{ItemId, ItemKind, ItemRef, ServiceClass};
use crate::limits::{MAX_MTU, MAX_QUEUE_LENGTH};
use crate::param::{ParamId, ParamValue, StatsSnapshot};
use crate::protocol::{ParamLocks, PollFlags, Protocol};
use crate::registry::EnumPage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Privilege level of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    /// Queries only.
    ReadOnly,
    /// Queries and state changes.
    Admin,
}

/// How `item_info` picks its item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// By registry id.
    Id(ItemId),
    /// By name, alias or unique dotted suffix.
    Name(String),
}

impl Selector {
    /// Numeric input selects by id, anything else by name.
    pub fn parse(input: &str) -> Self {
        match input.parse::<u32>() {
            Ok(raw) => Selector::Id(ItemId::new(raw)),
            Err(_) => Selector::Name(input.to_string()),
        }
    }
}

impl From<ItemId> for Selector {
    fn from(id: ItemId) -> Self {
        Selector::Id(id)
    }
}

impl From<&str> for Selector {
    fn from(name: &str) -> Self {
        Selector::Name(name.to_string())
    }
}

/// Answer to `item_info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemInfo {
    /// Full dotted name.
    pub name: String,
    /// Optional short name.
    pub alias: Option<String>,
    /// Registry id.
    pub id: i32,
    /// Parent id, `0` for roots.
    pub parent_id: i32,
    /// Device minor, `-1` when unassigned.
    pub minor: i32,
    /// Device-file flavour.
    pub service_class: ServiceClass,
    /// Item kind.
    pub kind: ItemKind,
    /// Sibling order index.
    pub order: u32,
}

impl ItemInfo {
    fn of(item: &ItemRef) -> Self {
        let meta = item.meta.read();
        Self {
            name: meta.name.clone(),
            alias: meta.alias.clone(),
            id: item.id().as_i32(),
            parent_id: meta.parent.as_i32(),
            minor: meta.minor,
            service_class: meta.service,
            kind: meta.kind,
            order: meta.order,
        }
    }
}

impl fmt::Display for ItemInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>4} {:<24} {:<10} parent={} minor={} class={} order={}",
            self.id,
            self.name,
            self.kind,
            self.parent_id,
            self.minor,
            self.service_class,
            self.order
        )?;
        if let Some(alias) = &self.alias {
            write!(f, " alias={alias}")?;
        }
        Ok(())
    }
}

/// Core version string.
pub fn version() -> String {
    format!("cronyx-core {}", env!("CARGO_PKG_VERSION"))
}

// =============================================================================
// Parameters
// =============================================================================

impl Core {
    /// Reads a control parameter of `item`.
    pub fn get_param(&self, item: &ItemRef, param: ParamId) -> BinderResult<ParamValue> {
        let _guard = self.engine().lock();
        if !item.is_live() {
            return Err(BinderError::NotFound(format!("item {}", item.id())));
        }
        match param {
            ParamId::Protocol => Ok(ParamValue::Text(item.protocol_name().unwrap_or_default())),
            ParamId::DebugLevel => Ok(ParamValue::Number(u64::from(item.debug_level()))),
            ParamId::Mtu => Ok(ParamValue::Number(u64::from(item.mtu()))),
            ParamId::QueueLength => Ok(ParamValue::Number(u64::from(item.fifo_size()))),
            ParamId::Statistics => Ok(ParamValue::Stats(item.stats().snapshot())),
            ParamId::LampMode => item
                .led()
                .map(|led| ParamValue::Lamp(led.mode()))
                .ok_or_else(|| BinderError::Unsupported(format!("item {} has no lamp", item.id()))),
            _ => forward_get(item, param),
        }
    }

    /// Writes a control parameter of `item`.
    pub fn set_param(
        &self,
        item: &ItemRef,
        param: ParamId,
        value: &ParamValue,
    ) -> BinderResult<()> {
        if param == ParamId::Protocol {
            let name = value.as_text()?;
            return self.bind(item, (!name.is_empty()).then_some(name));
        }

        let guard = self.engine().flush_and_lock();
        if !item.is_live() {
            return Err(BinderError::NotFound(format!("item {}", item.id())));
        }
        let lock = ParamLocks::for_param(param);
        if !lock.is_empty() {
            let binding = item.binding.read();
            if binding.effective_locks().intersects(lock) {
                return Err(BinderError::Busy(format!(
                    "{param} locked by protocol on item {}",
                    item.id()
                )));
            }
        }

        match param {
            ParamId::DebugLevel => {
                let level = u8::try_from(value.as_number()?)
                    .map_err(|_| BinderError::InvalidArgument(format!("debug level {value}")))?;
                item.meta.write().debug_level = level;
            }
            ParamId::Mtu => {
                let mtu = value.as_number()?;
                if mtu == 0 || mtu > u64::from(MAX_MTU) {
                    return Err(BinderError::InvalidArgument(format!("mtu {mtu}")));
                }
                item.meta.write().mtu = mtu as u32;
            }
            ParamId::QueueLength => {
                let qlen = value.as_number()?;
                if qlen == 0 || qlen > u64::from(MAX_QUEUE_LENGTH) {
                    return Err(BinderError::InvalidArgument(format!("queue length {qlen}")));
                }
                item.meta.write().fifo_size = qlen as u32;
            }
            ParamId::Statistics => match value {
                ParamValue::Number(0) => item.stats().reset(),
                ParamValue::Stats(s) if *s == StatsSnapshot::default() => item.stats().reset(),
                other => {
                    return Err(BinderError::InvalidArgument(format!(
                        "statistics can only be cleared, got {other}"
                    )))
                }
            },
            ParamId::LampMode => {
                let ParamValue::Lamp(mode) = value else {
                    return Err(BinderError::InvalidArgument(format!("lamp mode {value}")));
                };
                let led = item.led().ok_or_else(|| {
                    BinderError::Unsupported(format!("item {} has no lamp", item.id()))
                })?;
                led.set_mode(*mode);
            }
            _ if !lock.is_empty() => {
                // Mark the change in flight and let the collaborator program
                // it without the administrative lock; a conflicting bind in
                // the meantime is refused.
                item.binding.write().in_flight |= lock;
                drop(guard);
                let result = forward_set(item, param, value);
                let _guard = self.engine().flush_and_lock();
                item.binding.write().in_flight.remove(lock);
                return result.map(|()| log_set(item, param, value));
            }
            _ => forward_set(item, param, value)?,
        }
        log_set(item, param, value);
        Ok(())
    }
}

fn log_set(item: &ItemRef, param: ParamId, value: &ParamValue) {
    info!(id = %item.id(), param = %param, value = %value, "parameter set");
}

fn forward_get(item: &ItemRef, param: ParamId) -> BinderResult<ParamValue> {
    if let Some(protocol) = item.protocol() {
        match protocol.ops().ctl_get(item, param) {
            Err(BinderError::Unsupported(_)) => {}
            other => return other,
        }
    }
    match item.hardware() {
        Some(hw) => hw.ctl_get(item, param),
        None => Err(BinderError::Unsupported(format!("{param} on item {}", item.id()))),
    }
}

fn forward_set(item: &ItemRef, param: ParamId, value: &ParamValue) -> BinderResult<()> {
    if let Some(protocol) = item.protocol() {
        match protocol.ops().ctl_set(item, param, value) {
            Err(BinderError::Unsupported(_)) => {}
            other => return other,
        }
    }
    match item.hardware() {
        Some(hw) => hw.ctl_set(item, param, value),
        None => Err(BinderError::Unsupported(format!("{param} on item {}", item.id()))),
    }
}

// =============================================================================
// Device files
// =============================================================================

impl Core {
    fn bound_protocol(item: &ItemRef) -> BinderResult<Arc<Protocol>> {
        item.protocol()
            .ok_or_else(|| BinderError::Unsupported(format!("item {} is unbound", item.id())))
    }

    /// Opens the device file behind `minor`.
    pub fn open(&self, minor: i32) -> BinderResult<ItemRef> {
        let item = self.item_by_minor(minor)?;
        let _guard = self.engine().lock();
        let protocol = Self::bound_protocol(&item)?;
        protocol.ops().open(&item)?;
        item.opened();
        debug!(id = %item.id(), minor, "device opened");
        Ok(item)
    }

    /// Closes one open device file behind `minor`.
    pub fn close(&self, minor: i32) -> BinderResult<()> {
        let item = self.item_by_minor(minor)?;
        let _guard = self.engine().lock();
        if item.open_count() == 0 {
            return Err(BinderError::InvalidArgument(format!("minor {minor} is not open")));
        }
        if let Some(protocol) = item.protocol() {
            protocol.ops().close(&item);
        }
        item.closed();
        debug!(id = %item.id(), minor, "device closed");
        Ok(())
    }

    /// Reads from the device file; may block inside the protocol.
    pub fn read(&self, minor: i32, buf: &mut [u8]) -> BinderResult<usize> {
        let item = self.open_item(minor)?;
        Self::bound_protocol(&item)?.ops().read(&item, buf)
    }

    /// Writes to the device file.
    pub fn write(&self, minor: i32, data: &[u8]) -> BinderResult<usize> {
        let item = self.open_item(minor)?;
        Self::bound_protocol(&item)?.ops().write(&item, data)
    }

    /// Device file readiness.
    pub fn poll(&self, minor: i32) -> BinderResult<PollFlags> {
        let item = self.open_item(minor)?;
        Ok(match item.protocol() {
            Some(protocol) => protocol.ops().poll(&item),
            None => PollFlags::HANGUP,
        })
    }

    /// Raw command passthrough to the bound protocol.
    pub fn raw_command(&self, item: &ItemRef, cmd: u32, data: &mut Vec<u8>) -> BinderResult<u32> {
        let _guard = self.engine().lock();
        Self::bound_protocol(item)?.ops().raw_command(item, cmd, data)
    }

    fn open_item(&self, minor: i32) -> BinderResult<ItemRef> {
        let item = self.item_by_minor(minor)?;
        if item.open_count() == 0 {
            return Err(BinderError::InvalidArgument(format!("minor {minor} is not open")));
        }
        Ok(item)
    }
}

// =============================================================================
// Session
// =============================================================================

/// A front end's view of a [`Core`].
#[derive(Debug, Clone)]
pub struct ControlSession {
    core: Core,
    access: Access,
}

impl ControlSession {
    /// Session on `core` with the given privilege.
    pub fn new(core: Core, access: Access) -> Self {
        Self { core, access }
    }

    /// Session allowed to change state.
    pub fn admin(core: Core) -> Self {
        Self::new(core, Access::Admin)
    }

    /// Session limited to queries.
    pub fn read_only(core: Core) -> Self {
        Self::new(core, Access::ReadOnly)
    }

    /// Privilege level.
    pub fn access(&self) -> Access {
        self.access
    }

    /// The wrapped core.
    pub fn core(&self) -> &Core {
        &self.core
    }

    fn require_admin(&self, what: &str) -> BinderResult<()> {
        match self.access {
            Access::Admin => Ok(()),
            Access::ReadOnly => Err(BinderError::PermissionDenied(format!(
                "{what} needs an admin session"
            ))),
        }
    }

    fn target(&self, target: i32) -> BinderResult<ItemRef> {
        self.core.item(ItemId::from_i32(target)?)
    }

    /// Core version string.
    pub fn version(&self) -> String {
        version()
    }

    /// Page of live ids starting at `from`.
    pub fn enumerate(&self, from: i32) -> BinderResult<EnumPage> {
        self.core.enumerate(from)
    }

    /// Every live item, paging through `enumerate` until the evolution
    /// counter is stable across a full pass.
    pub fn list(&self) -> BinderResult<Vec<ItemInfo>> {
        loop {
            let mut ids = Vec::new();
            let first = self.enumerate(0)?;
            let mut page = first;
            loop {
                ids.extend(page.live_ids());
                if page.evolution != first.evolution {
                    break;
                }
                if ids.len() >= usize::try_from(page.total).unwrap_or(0) {
                    let infos: BinderResult<Vec<ItemInfo>> =
                        ids.iter().map(|id| self.item_info((*id).into())).collect();
                    match infos {
                        Ok(infos) => return Ok(infos),
                        Err(err) if err.kind() == crate::error::ErrorKind::NotFound => break,
                        Err(err) => return Err(err),
                    }
                }
                page = self.enumerate(i32::try_from(ids.len()).unwrap_or(i32::MAX))?;
            }
        }
    }

    /// Describes one item.
    pub fn item_info(&self, selector: Selector) -> BinderResult<ItemInfo> {
        let item = match selector {
            Selector::Id(id) => self.core.item(id)?,
            Selector::Name(name) => self.core.lookup(&name)?,
        };
        Ok(ItemInfo::of(&item))
    }

    /// Reads `param` of item `target`.
    pub fn get(&self, target: i32, param: ParamId) -> BinderResult<ParamValue> {
        let item = self.target(target)?;
        self.core.get_param(&item, param)
    }

    /// Writes `param` of item `target`; admin only.
    pub fn set(&self, target: i32, param: ParamId, value: &ParamValue) -> BinderResult<()> {
        self.require_admin("set")?;
        let item = self.target(target)?;
        self.core.set_param(&item, param, value)
    }

    /// Opens the device file at `minor`.
    pub fn open(&self, minor: i32) -> BinderResult<()> {
        self.core.open(minor).map(|_| ())
    }

    /// Closes the device file at `minor`.
    pub fn close(&self, minor: i32) -> BinderResult<()> {
        self.core.close(minor)
    }

    /// Reads from the device file at `minor`.
    pub fn read(&self, minor: i32, buf: &mut [u8]) -> BinderResult<usize> {
        self.core.read(minor, buf)
    }

    /// Writes to the device file at `minor`; admin only.
    pub fn write(&self, minor: i32, data: &[u8]) -> BinderResult<usize> {
        self.require_admin("write")?;
        self.core.write(minor, data)
    }

    /// Readiness of the device file at `minor`.
    pub fn poll(&self, minor: i32) -> BinderResult<PollFlags> {
        self.core.poll(minor)
    }

    /// Passes a raw command to the protocol bound to `target`; admin only.
    pub fn raw_command(&self, target: i32, cmd: u32, data: &mut Vec<u8>) -> BinderResult<u32> {
        self.require_admin("raw command")?;
        let item = self.target(target)?;
        self.core.raw_command(&item, cmd, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::error::ErrorKind;
    use crate::item::Item;
    use crate::provider::Provider;

    fn session(access: Access) -> (ControlSession, ItemRef, Provider) {
        let core = Core::new(CoreConfig {
            second_timer: false,
            ..CoreConfig::default()
        })
        .unwrap();
        let provider = Provider::new("test");
        let adapter = Item::builder(ItemKind::Adapter)
            .provider(provider.acquire())
            .build();
        let a = core.add_node(ItemId::NONE, "cx", None, &adapter, 0).unwrap();
        let channel = Item::builder(ItemKind::Channel).fifo_size(32).build();
        core.add_node(a, "ch", Some("c0"), &channel, 0).unwrap();
        (ControlSession::new(core, access), channel, provider)
    }

    #[test]
    fn test_item_info_by_alias_and_id() {
        let (s, _channel, _p) = session(Access::ReadOnly);
        let info = s.item_info("c0".into()).unwrap();
        assert_eq!(info.id, 2);
        assert_eq!(info.parent_id, 1);
        assert_eq!(info.kind, ItemKind::Channel);
        assert_eq!(info.alias.as_deref(), Some("c0"));
        assert_eq!(s.item_info(Selector::parse("1")).unwrap().name, "cx0");
    }

    #[test]
    fn test_read_only_session_cannot_set() {
        let (s, _channel, _p) = session(Access::ReadOnly);
        let err = s.set(2, ParamId::Mtu, &ParamValue::Number(1500)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert_eq!(s.get(2, ParamId::Mtu).unwrap(), ParamValue::Number(1504));
    }

    #[test]
    fn test_core_owned_params() {
        let (s, _channel, _p) = session(Access::Admin);
        s.set(2, ParamId::Mtu, &ParamValue::Number(1600)).unwrap();
        assert_eq!(s.get(2, ParamId::Mtu).unwrap(), ParamValue::Number(1600));
        assert!(s.set(2, ParamId::Mtu, &ParamValue::Number(0)).is_err());
        s.set(2, ParamId::DebugLevel, &ParamValue::Number(2)).unwrap();
        assert_eq!(s.get(2, ParamId::QueueLength).unwrap(), ParamValue::Number(32));
        assert_eq!(s.get(2, ParamId::Protocol).unwrap(), ParamValue::Text(String::new()));
        assert!(matches!(
            s.get(2, ParamId::Statistics).unwrap(),
            ParamValue::Stats(_)
        ));
    }

    #[test]
    fn test_unowned_param_without_hardware() {
        let (s, _channel, _p) = session(Access::Admin);
        let err = s.get(2, ParamId::LineCode).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        let err = s.get(2, ParamId::LampMode).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }

    #[test]
    fn test_list_walks_all_pages() {
        let (s, _channel, _p) = session(Access::ReadOnly);
        let core = s.core().clone();
        for _ in 0..20 {
            let ch = Item::builder(ItemKind::Channel).build();
            core.add_node(ItemId::new(1), "ch", None, &ch, 0).unwrap();
        }
        let all = s.list().unwrap();
        assert_eq!(all.len(), 22);
        assert_eq!(all[0].name, "cx0");
    }

    #[test]
    fn test_device_ops_need_binding() {
        let (s, channel, _p) = session(Access::Admin);
        let minor = s.core().minor_get(&channel, ServiceClass::Tty).unwrap();
        assert_eq!(minor, 1);
        let err = s.open(minor).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        assert_eq!(s.open(99).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_version_string() {
        assert!(version().starts_with("cronyx-core "));
    }
}
