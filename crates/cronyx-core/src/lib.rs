//! `cronyx-core`
//!
//! Control-plane core of a multi-protocol synchronous adapter framework.
//!
//! Physical adapters, their line interfaces and their data channels form a
//! tree of addressable items. Each channel can have one hot-swappable
//! protocol module bound to it. Hardware-originated events are moved out of
//! restricted context through a deferred task queue and delivered to the bound
//! protocol on a single worker thread.
//!
//! ## Building Blocks
//!
//! - [`sync::AdminLock`]: reentrant lock guarding the tree, protocol list and
//!   every attach/detach transition
//! - [`deferred::DeferredQueue`]: FIFO drained by one worker thread
//! - [`engine::Engine`]: flush and flush-and-lock on top of the two
//! - [`registry`]: item tree, naming, lookup, enumeration, minors
//! - [`binder`]: protocol registry and the attach/detach state machine
//! - [`led`]: status lamp cadence engine
//! - [`control::ControlSession`]: the control-command surface
//!
//! ## Example
//!
//! ```rust,ignore
//! use cronyx_core::{Core, CoreConfig, Item, ItemId, ItemKind, Provider};
//!
//! let core = Core::new(CoreConfig::default())?;
//! let provider = Provider::new("cxmock");
//! let adapter = Item::builder(ItemKind::Adapter)
//!     .provider(provider.acquire())
//!     .build();
//! let a = core.add_node(ItemId::NONE, "cx", None, &adapter, 0)?;
//! let channel = Item::builder(ItemKind::Channel).hardware(ops).build();
//! core.add_node(a, "ch", Some("c0"), &channel, 0)?;
//! core.bind(&channel, Some("echo"))?;
//! ```

pub mod binder;
pub mod config;
pub mod control;
pub mod core;
pub mod deferred;
pub mod engine;
pub mod error;
pub mod hardware;
pub mod item;
pub mod led;
pub mod limits;
pub mod minor;
mod notify;
pub mod param;
pub mod protocol;
pub mod provider;
pub mod registry;
pub mod sync;

pub use crate::config::CoreConfig;
pub use crate::control::{version, Access, ControlSession, ItemInfo, Selector};
pub use crate::core::{Core, RegistryEvent, WeakCore};
pub use crate::error::{BinderError, BinderResult, ConfigError, ErrorKind};
pub use crate::hardware::{HardwareOps, Signal};
pub use crate::item::{
    BindState, Item, ItemBuilder, ItemId, ItemKind, ItemRef, ItemStats, ServiceClass,
};
pub use crate::led::{LedFlasher, LedKick, LedMode, LedOutput};
pub use crate::param::{ParamId, ParamValue, StatsSnapshot};
pub use crate::protocol::{
    LineError, Notification, ParamLocks, PollFlags, Protocol, ProtocolFlags, ProtocolOps,
};
pub use crate::provider::{Provider, ProviderRef};
pub use crate::registry::EnumPage;
