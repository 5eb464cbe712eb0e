//! Protocol registry and the attach/detach state machine.
//!
//! ```text
//!   Unbound ──bind──► Attaching ──ok──► Bound ──unbind──► Detaching ──ok──► Unbound
//!      ▲                  │                ▲                  │
//!      └──── attach err ──┘                └─── detach err ───┘
//!
//!   rollback re-attach err ──► Faulted ──bind(None)──► Unbound
//! ```
//!
//! Protocol `attach`/`detach` are called with the administrative lock
//! released (they may sleep or queue work) and the lock is re-taken through
//! flush-and-lock afterwards. Helpers therefore take the caller's guard by
//! value and hand a fresh one back.

use crate::core::{Core, RegistryEvent};
use crate::error::{BinderError, BinderResult};
use crate::item::{BindState, ItemKind, ItemRef};
use crate::protocol::{ParamLocks, Protocol};
use crate::sync::AdminGuard;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

impl Core {
    // -------------------------------------------------------------------------
    // Protocol registry
    // -------------------------------------------------------------------------

    /// Makes `protocol` available for binding.
    pub fn register_protocol(&self, protocol: Protocol) -> BinderResult<Arc<Protocol>> {
        let _guard = self.engine().flush_and_lock();
        let mut protocols = self.inner.protocols.lock();
        if protocols.contains_key(protocol.name()) {
            return Err(BinderError::AlreadyExists(format!(
                "protocol '{}'",
                protocol.name()
            )));
        }
        let protocol = Arc::new(protocol);
        protocols.insert(protocol.name().to_string(), protocol.clone());
        info!(
            protocol = %protocol.name(),
            immediate = protocol.flags().immediate_dispatch,
            "protocol registered"
        );
        Ok(protocol)
    }

    /// Withdraws a protocol. Fails with `Busy` while any channel is bound.
    pub fn unregister_protocol(&self, name: &str) -> BinderResult<()> {
        let _guard = self.engine().flush_and_lock();
        let mut protocols = self.inner.protocols.lock();
        let protocol = protocols
            .get(name)
            .ok_or_else(|| BinderError::NotFound(format!("protocol '{name}'")))?;
        if protocol.users().is_in_use() {
            return Err(BinderError::Busy(format!(
                "protocol '{name}' bound to {} channel(s)",
                protocol.users().users()
            )));
        }
        protocols.remove(name);
        info!(protocol = %name, "protocol unregistered");
        Ok(())
    }

    /// Names of registered protocols, sorted.
    pub fn protocols(&self) -> Vec<String> {
        let _guard = self.engine().lock();
        self.inner.protocols.lock().keys().cloned().collect()
    }

    /// Registered protocol by name.
    pub fn protocol(&self, name: &str) -> BinderResult<Arc<Protocol>> {
        let _guard = self.engine().lock();
        self.inner
            .protocols
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| BinderError::NotFound(format!("protocol '{name}'")))
    }

    // -------------------------------------------------------------------------
    // Binding
    // -------------------------------------------------------------------------

    /// Binds the named protocol to a channel, or unbinds with `None`.
    ///
    /// A currently bound protocol is detached first; if it refuses, the old
    /// binding stays and its error is returned without the new protocol ever
    /// being attached. If the new attach fails the previous protocol is
    /// re-attached; should that fail as well the item becomes
    /// [`BindState::Faulted`].
    pub fn bind(&self, item: &ItemRef, protocol: Option<&str>) -> BinderResult<()> {
        let Some(name) = protocol else {
            return self.unbind(item);
        };
        let guard = self.engine().flush_and_lock();
        self.check_bindable(item)?;
        let new = self
            .inner
            .protocols
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| BinderError::NotFound(format!("protocol '{name}'")))?;

        let (state, current, in_flight) = {
            let binding = item.binding.read();
            (binding.state, binding.protocol.clone(), binding.in_flight)
        };
        if state.in_transition() {
            return Err(BinderError::Busy(format!("item {} is {state}", item.id())));
        }
        if state == BindState::Faulted {
            return Err(BinderError::Busy(format!(
                "item {} is faulted; unbind it first",
                item.id()
            )));
        }
        if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, &new)) {
            return Ok(());
        }
        let conflict = new.flags().locks & in_flight;
        if !conflict.is_empty() {
            return Err(BinderError::Busy(format!(
                "protocol '{name}' locks {conflict:?} which is being changed"
            )));
        }

        let mut guard = guard;
        if current.is_some() {
            let (next, result) = self.detach_locked(item, guard);
            guard = next;
            result?;
        }

        let (next, result) = self.attach_locked(item, new.clone(), guard);
        guard = next;
        let Err(err) = result else {
            return Ok(());
        };
        warn!(id = %item.id(), protocol = %name, error = %err, "attach failed");

        if let Some(previous) = current {
            let (next, restored) = self.attach_locked(item, previous.clone(), guard);
            guard = next;
            if let Err(again) = restored {
                item.binding.write().state = BindState::Faulted;
                error!(
                    id = %item.id(),
                    protocol = %previous.name(),
                    error = %again,
                    "restoring previous protocol failed; item faulted"
                );
            }
        }
        drop(guard);
        Err(err)
    }

    /// Detaches the bound protocol, if any. Also clears a fault.
    pub fn unbind(&self, item: &ItemRef) -> BinderResult<()> {
        let guard = self.engine().flush_and_lock();
        self.check_bindable(item)?;
        let state = item.bind_state();
        match state {
            BindState::Attaching | BindState::Detaching => {
                Err(BinderError::Busy(format!("item {} is {state}", item.id())))
            }
            BindState::Faulted => {
                item.binding.write().state = BindState::Unbound;
                info!(id = %item.id(), "fault cleared");
                Ok(())
            }
            BindState::Unbound => Ok(()),
            BindState::Bound => {
                let (_guard, result) = self.detach_locked(item, guard);
                result
            }
        }
    }

    fn check_bindable(&self, item: &ItemRef) -> BinderResult<()> {
        if !item.is_live() {
            return Err(BinderError::NotFound(format!("item {}", item.id())));
        }
        if item.kind() != ItemKind::Channel {
            return Err(BinderError::Unsupported(format!(
                "cannot bind a protocol to {} {}",
                item.kind(),
                item.id()
            )));
        }
        if item.removing.load(Ordering::Acquire) {
            return Err(BinderError::Busy(format!("item {} is being removed", item.id())));
        }
        Ok(())
    }

    /// Runs the detach sequence on a bound item.
    ///
    /// The protocol field is cleared (and observers told) before `detach` runs
    /// unlocked. On failure the binding is restored and observers told again.
    pub(crate) fn detach_locked<'a>(
        &'a self,
        item: &ItemRef,
        guard: AdminGuard<'a>,
    ) -> (AdminGuard<'a>, BinderResult<()>) {
        if item.open_count() > 0 {
            return (
                guard,
                Err(BinderError::Busy(format!(
                    "item {} has {} open device file(s)",
                    item.id(),
                    item.open_count()
                ))),
            );
        }
        let (protocol, user) = {
            let mut binding = item.binding.write();
            let Some(protocol) = binding.protocol.take() else {
                return (guard, Ok(()));
            };
            binding.state = BindState::Detaching;
            (protocol, binding.user.take())
        };
        self.emit(RegistryEvent::ProtocolChanged {
            id: item.id(),
            protocol: None,
        });
        debug!(id = %item.id(), protocol = %protocol.name(), "detaching");

        drop(guard);
        let result = protocol.ops().detach(self, item);
        let guard = self.engine().flush_and_lock();

        let mut binding = item.binding.write();
        match result {
            Ok(()) => {
                binding.state = BindState::Unbound;
                drop(binding);
                item.set_protocol_data(None);
                drop(user);
                info!(id = %item.id(), protocol = %protocol.name(), "protocol detached");
                (guard, Ok(()))
            }
            Err(err) => {
                let name = protocol.name().to_string();
                binding.protocol = Some(protocol);
                binding.user = user;
                binding.state = BindState::Bound;
                drop(binding);
                self.emit(RegistryEvent::ProtocolChanged {
                    id: item.id(),
                    protocol: Some(name.clone()),
                });
                warn!(id = %item.id(), protocol = %name, error = %err, "detach refused");
                (guard, Err(err))
            }
        }
    }

    /// Runs the attach sequence on an unbound item.
    pub(crate) fn attach_locked<'a>(
        &'a self,
        item: &ItemRef,
        protocol: Arc<Protocol>,
        guard: AdminGuard<'a>,
    ) -> (AdminGuard<'a>, BinderResult<()>) {
        let user = protocol.users().acquire();
        {
            let mut binding = item.binding.write();
            binding.state = BindState::Attaching;
            binding.pending_locks = protocol.flags().locks;
        }
        debug!(id = %item.id(), protocol = %protocol.name(), "attaching");

        drop(guard);
        let result = protocol.ops().attach(self, item);
        let guard = self.engine().flush_and_lock();

        let mut binding = item.binding.write();
        binding.pending_locks = ParamLocks::empty();
        match result {
            Ok(()) => {
                let name = protocol.name().to_string();
                binding.protocol = Some(protocol);
                binding.user = Some(user);
                binding.state = BindState::Bound;
                drop(binding);
                self.emit(RegistryEvent::ProtocolChanged {
                    id: item.id(),
                    protocol: Some(name.clone()),
                });
                info!(id = %item.id(), item = %item.name(), protocol = %name, "protocol attached");
                (guard, Ok(()))
            }
            Err(err) => {
                binding.state = BindState::Unbound;
                drop(binding);
                item.set_protocol_data(None);
                (guard, Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::error::ErrorKind;
    use crate::item::{Item, ItemId};
    use crate::protocol::ProtocolOps;
    use crate::provider::Provider;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    #[derive(Default)]
    struct Probe {
        attaches: AtomicUsize,
        detaches: AtomicUsize,
        fail_attach: AtomicBool,
        fail_detach: AtomicBool,
    }

    impl ProtocolOps for Probe {
        fn attach(&self, _core: &Core, _item: &ItemRef) -> BinderResult<()> {
            if self.fail_attach.load(Ordering::SeqCst) {
                return Err(BinderError::InvalidArgument("attach refused".into()));
            }
            self.attaches.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn detach(&self, _core: &Core, _item: &ItemRef) -> BinderResult<()> {
            if self.fail_detach.load(Ordering::SeqCst) {
                return Err(BinderError::Busy("detach refused".into()));
            }
            self.detaches.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Fixture {
        core: Core,
        channel: ItemRef,
        _provider: Provider,
    }

    fn fixture() -> Fixture {
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
        let channel = Item::builder(ItemKind::Channel).build();
        core.add_node(a, "ch", None, &channel, 0).unwrap();
        Fixture {
            core,
            channel,
            _provider: provider,
        }
    }

    fn register(core: &Core, name: &str) -> Arc<Probe> {
        let probe = Arc::new(Probe::default());
        core.register_protocol(Protocol::new(name, probe.clone()))
            .unwrap();
        probe
    }

    #[test]
    fn test_bind_and_unbind() {
        let f = fixture();
        let p = register(&f.core, "p");
        f.core.bind(&f.channel, Some("p")).unwrap();
        assert_eq!(f.channel.bind_state(), BindState::Bound);
        assert_eq!(f.channel.protocol_name().as_deref(), Some("p"));
        assert_eq!(f.core.protocol("p").unwrap().users().users(), 1);

        // Rebinding the same protocol is a no-op.
        f.core.bind(&f.channel, Some("p")).unwrap();
        assert_eq!(p.attaches.load(Ordering::SeqCst), 1);

        f.core.unbind(&f.channel).unwrap();
        assert_eq!(f.channel.bind_state(), BindState::Unbound);
        assert_eq!(p.detaches.load(Ordering::SeqCst), 1);
        assert_eq!(f.core.protocol("p").unwrap().users().users(), 0);
    }

    #[test]
    fn test_refused_detach_keeps_old_binding() {
        let f = fixture();
        let p1 = register(&f.core, "p1");
        let p2 = register(&f.core, "p2");
        f.core.bind(&f.channel, Some("p1")).unwrap();
        p1.fail_detach.store(true, Ordering::SeqCst);

        let err = f.core.bind(&f.channel, Some("p2")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Busy);
        assert_eq!(f.channel.protocol_name().as_deref(), Some("p1"));
        assert_eq!(f.channel.bind_state(), BindState::Bound);
        assert_eq!(p2.attaches.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failed_attach_restores_previous() {
        let f = fixture();
        let p1 = register(&f.core, "p1");
        let p2 = register(&f.core, "p2");
        f.core.bind(&f.channel, Some("p1")).unwrap();
        p2.fail_attach.store(true, Ordering::SeqCst);

        let err = f.core.bind(&f.channel, Some("p2")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(f.channel.protocol_name().as_deref(), Some("p1"));
        assert_eq!(p1.attaches.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failed_rollback_faults_item() {
        let f = fixture();
        let p1 = register(&f.core, "p1");
        let p2 = register(&f.core, "p2");
        f.core.bind(&f.channel, Some("p1")).unwrap();
        p1.fail_attach.store(true, Ordering::SeqCst);
        p2.fail_attach.store(true, Ordering::SeqCst);

        assert!(f.core.bind(&f.channel, Some("p2")).is_err());
        assert_eq!(f.channel.bind_state(), BindState::Faulted);
        assert!(f.channel.protocol().is_none());

        p2.fail_attach.store(false, Ordering::SeqCst);
        let err = f.core.bind(&f.channel, Some("p2")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Busy);

        f.core.bind(&f.channel, None).unwrap();
        f.core.bind(&f.channel, Some("p2")).unwrap();
        assert_eq!(f.channel.bind_state(), BindState::Bound);
    }

    #[test]
    fn test_only_channels_bind() {
        let f = fixture();
        register(&f.core, "p");
        let adapter = f.core.lookup("cx0").unwrap();
        let err = f.core.bind(&adapter, Some("p")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }

    #[test]
    fn test_unknown_protocol() {
        let f = fixture();
        let err = f.core.bind(&f.channel, Some("nope")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_unregister_busy_while_bound() {
        let f = fixture();
        register(&f.core, "p");
        f.core.bind(&f.channel, Some("p")).unwrap();
        assert_eq!(
            f.core.unregister_protocol("p").unwrap_err().kind(),
            ErrorKind::Busy
        );
        f.core.unbind(&f.channel).unwrap();
        f.core.unregister_protocol("p").unwrap();
        assert!(f.core.protocols().is_empty());
    }

    #[test]
    fn test_duplicate_protocol_name() {
        let f = fixture();
        register(&f.core, "p");
        let err = f
            .core
            .register_protocol(Protocol::new("p", Arc::new(Probe::default())))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }
}
