//! The binder core handle.
//!
//! [`Core`] owns every piece of shared state: the administrative lock and
//! deferred queue ([`Engine`]), the item tree, the minor table, the protocol
//! list, the lamp engine and the per-second ticker. It is a cheap `Clone`
//! handle; hardware collaborators that must not keep the core alive hold a
//! [`WeakCore`] instead.
//!
//! Operations are spread over the modules that own their semantics:
//! registry operations in [`crate::registry`], binding in [`crate::binder`],
//! notification entry points in [`crate::notify`], parameters and device
//! files in [`crate::control`].

use crate::config::CoreConfig;
use crate::deferred::{DeferredQueue, DeferredTask};
use crate::engine::Engine;
use crate::error::{BinderError, BinderResult};
use crate::item::ItemId;
use crate::led::{LedEngine, LedFlasher};
use crate::limits::SECOND_TICK;
use crate::minor::MinorTable;
use crate::notify;
use crate::protocol::Protocol;
use crate::registry::Tree;
use crate::sync::Timer;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Capacity of the registry event channel.
const EVENT_CAPACITY: usize = 256;

/// Registry change published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RegistryEvent {
    /// An item was linked into the tree.
    ItemAdded {
        /// Id of the new item.
        id: ItemId,
        /// Its full name.
        name: String,
    },
    /// An item was unlinked from the tree.
    ItemRemoved {
        /// Id the item had.
        id: ItemId,
        /// Name the item had.
        name: String,
    },
    /// A channel's protocol changed.
    ProtocolChanged {
        /// The channel.
        id: ItemId,
        /// New protocol, `None` when unbound.
        protocol: Option<String>,
    },
}

pub(crate) struct CoreInner {
    config: CoreConfig,
    pub(crate) engine: Engine,
    pub(crate) tree: Mutex<Tree>,
    pub(crate) minors: Mutex<MinorTable>,
    pub(crate) protocols: Mutex<BTreeMap<String, Arc<Protocol>>>,
    events: broadcast::Sender<RegistryEvent>,
    leds: LedEngine,
    ticker: Option<Timer>,
    stopped: AtomicBool,
}

impl CoreInner {
    fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(ticker) = &self.ticker {
            ticker.stop();
        }
        self.leds.stop();
        self.engine.queue().shutdown();
        debug!("core stopped");
    }
}

impl Drop for CoreInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Shared handle to one binder core.
#[derive(Clone)]
pub struct Core {
    pub(crate) inner: Arc<CoreInner>,
}

impl Core {
    /// Starts a core: spawns the deferred worker, the lamp timers and, when
    /// enabled, the per-second ticker.
    pub fn new(config: CoreConfig) -> BinderResult<Self> {
        config
            .validate()
            .map_err(|err| BinderError::InvalidArgument(err.to_string()))?;
        let spawn_failed =
            |err: std::io::Error| BinderError::ResourceExhausted(format!("thread spawn: {err}"));

        let queue = DeferredQueue::new(config.queue_capacity);
        let leds = LedEngine::start(config.led_tick(), config.led_kick()).map_err(spawn_failed)?;
        let ticker = if config.second_timer {
            let tick_queue = queue.clone();
            let timer = Timer::periodic("cronyx-tick", SECOND_TICK, move || {
                // A full queue just skips this second.
                let _ = tick_queue.enqueue(DeferredTask::Tick);
            })
            .map_err(spawn_failed)?;
            Some(timer)
        } else {
            None
        };
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let inner = Arc::new(CoreInner {
            minors: Mutex::new(MinorTable::new(config.minor_pool)),
            engine: Engine::new(queue.clone()),
            tree: Mutex::new(Tree::new()),
            protocols: Mutex::new(BTreeMap::new()),
            events,
            leds,
            ticker,
            stopped: AtomicBool::new(false),
            config,
        });

        let worker_core = Arc::downgrade(&inner);
        queue
            .start(&inner.config.worker_name, move |task| {
                notify::run_task(&worker_core, task);
            })
            .map_err(spawn_failed)?;

        info!(
            minor_pool = inner.config.minor_pool,
            queue_capacity = inner.config.queue_capacity,
            "core started"
        );
        Ok(Self { inner })
    }

    /// Starts a core with default settings.
    pub fn with_defaults() -> BinderResult<Self> {
        Self::new(CoreConfig::default())
    }

    /// Settings this core runs with.
    pub fn config(&self) -> &CoreConfig {
        &self.inner.config
    }

    /// Administrative lock and deferred queue.
    pub fn engine(&self) -> &Engine {
        &self.inner.engine
    }

    /// Non-owning handle for hardware collaborators.
    pub fn downgrade(&self) -> WeakCore {
        WeakCore {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Subscribes to registry changes.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.inner.events.subscribe()
    }

    pub(crate) fn emit(&self, event: RegistryEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    /// Adds a lamp to the cadence engine.
    pub fn register_led(&self, flasher: &Arc<LedFlasher>) -> BinderResult<()> {
        self.inner.leds.register(&self.inner.engine, flasher)
    }

    /// Removes a lamp. Once this returns no timer touches the flasher again.
    pub fn unregister_led(&self, flasher: &Arc<LedFlasher>) -> BinderResult<()> {
        self.inner.leds.unregister(&self.inner.engine, flasher)
    }

    /// Waits for every deferred task queued so far.
    pub fn flush(&self) {
        self.inner.engine.flush();
    }

    /// Drains queued work, stops timers and joins the worker. Idempotent.
    ///
    /// Also runs when the last handle is dropped.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// Whether [`Core::shutdown`] has run.
    pub fn is_shut_down(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Core {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Core")
            .field("items", &self.inner.tree.lock().len())
            .field("protocols", &self.inner.protocols.lock().len())
            .field("queued", &self.inner.engine.queue().len())
            .finish()
    }
}

/// Non-owning handle to a [`Core`].
#[derive(Clone, Debug, Default)]
pub struct WeakCore {
    inner: Weak<CoreInner>,
}

impl WeakCore {
    /// The core, if it is still alive.
    pub fn upgrade(&self) -> Option<Core> {
        self.inner.upgrade().map(|inner| Core { inner })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{Item, ItemKind};
    use crate::provider::Provider;

    fn quiet() -> CoreConfig {
        CoreConfig {
            second_timer: false,
            ..CoreConfig::default()
        }
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = CoreConfig {
            minor_pool: 0,
            ..CoreConfig::default()
        };
        assert!(Core::new(config).is_err());
    }

    #[test]
    fn test_events_published() {
        let core = Core::new(quiet()).unwrap();
        let mut events = core.subscribe();
        let provider = Provider::new("test");
        let adapter = Item::builder(ItemKind::Adapter)
            .provider(provider.acquire())
            .build();
        let id = core.add_node(ItemId::NONE, "cx", None, &adapter, 0).unwrap();
        assert_eq!(
            events.try_recv().unwrap(),
            RegistryEvent::ItemAdded {
                id,
                name: "cx0".into()
            }
        );
        core.remove_node(id).unwrap();
        assert!(matches!(
            events.try_recv().unwrap(),
            RegistryEvent::ItemRemoved { .. }
        ));
        assert_eq!(provider.users(), 0);
    }

    #[test]
    fn test_weak_handle_expires() {
        let core = Core::new(quiet()).unwrap();
        let weak = core.downgrade();
        assert!(weak.upgrade().is_some());
        drop(core);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let core = Core::new(quiet()).unwrap();
        core.shutdown();
        core.shutdown();
        assert!(core.is_shut_down());
        // Flush after shutdown must not hang.
        core.flush();
    }
}
