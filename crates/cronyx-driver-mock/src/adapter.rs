//! Simulated adapter board.
//!
//! A mock adapter registers one adapter item, one line interface and a
//! configurable number of channels, all supplied by a shared `cxmock`
//! provider. Channels carry [`MockHardware`]; the adapter carries a status
//! lamp that every channel kicks.
//!
//! # Example
//!
//! ```rust,ignore
//! let core = Core::with_defaults()?;
//! let adapter = MockAdapter::builder()
//!     .channels(2)
//!     .alias(0, "uplink")
//!     .attach(&core)?;
//! core.bind(adapter.channel(0).unwrap(), Some("echo"))?;
//! adapter.receive(0, Bytes::from_static(b"hello"));
//! ```

use crate::channel::{MockChannel, MockHardware};
use crate::common::{ErrorConfig, MockMode, MockRng, TimingConfig};
use crate::lamp::MockLamp;
use crate::traffic::TrafficGenerator;
use bytes::Bytes;
use cronyx_core::{
    BinderError, BinderResult, Core, HardwareOps, Item, ItemId, ItemKind, ItemRef, LedFlasher,
    LineError, Provider,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Name of the provider every mock item is supplied by.
pub const PROVIDER_NAME: &str = "cxmock";

/// Builder for [`MockAdapter`].
#[derive(Debug, Clone)]
pub struct MockAdapterBuilder {
    prefix: String,
    channels: usize,
    aliases: BTreeMap<usize, String>,
    mode: MockMode,
    timing: TimingConfig,
    errors: ErrorConfig,
    seed: Option<u64>,
    lamp: bool,
    provider: Option<Provider>,
}

impl Default for MockAdapterBuilder {
    fn default() -> Self {
        Self {
            prefix: "cx".to_string(),
            channels: 4,
            aliases: BTreeMap::new(),
            mode: MockMode::Instant,
            timing: TimingConfig::default(),
            errors: ErrorConfig::none(),
            seed: None,
            lamp: true,
            provider: None,
        }
    }
}

impl MockAdapterBuilder {
    /// Name prefix of the adapter item (`cx` gives `cx0`, `cx1`...).
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Number of channels on the single interface.
    pub fn channels(mut self, count: usize) -> Self {
        self.channels = count;
        self
    }

    /// Registers channel `index` under `alias`.
    pub fn alias(mut self, index: usize, alias: impl Into<String>) -> Self {
        self.aliases.insert(index, alias.into());
        self
    }

    /// Simulation mode.
    pub fn mode(mut self, mode: MockMode) -> Self {
        self.mode = mode;
        self
    }

    /// Pacing used in the paced modes.
    pub fn timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    /// Failure injection for `link_up` and `transmit`.
    pub fn errors(mut self, errors: ErrorConfig) -> Self {
        self.errors = errors;
        self
    }

    /// Fixed seed for every random draw.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Whether to fit a status lamp.
    pub fn lamp(mut self, fitted: bool) -> Self {
        self.lamp = fitted;
        self
    }

    /// Shares a provider between several adapters of one driver instance.
    pub fn provider(mut self, provider: Provider) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Registers the adapter's items with `core`.
    ///
    /// Either every item is registered or, on failure, none stays behind.
    pub fn attach(self, core: &Core) -> BinderResult<MockAdapter> {
        if self.channels == 0 {
            return Err(BinderError::InvalidArgument(
                "a mock adapter needs at least one channel".into(),
            ));
        }
        if let Some(index) = self.aliases.keys().find(|i| **i >= self.channels) {
            return Err(BinderError::InvalidArgument(format!(
                "alias for channel {index} but only {} channels",
                self.channels
            )));
        }

        let provider = self
            .provider
            .clone()
            .unwrap_or_else(|| Provider::new(PROVIDER_NAME));
        let rng = Arc::new(MockRng::new(self.seed));
        let lamp = Arc::new(MockLamp::new());
        let flasher = if self.lamp {
            let flasher = LedFlasher::new(format!("{} lamp", self.prefix), lamp.clone());
            core.register_led(&flasher)?;
            Some(flasher)
        } else {
            None
        };

        let mut adapter = Item::builder(ItemKind::Adapter).provider(provider.acquire());
        if let Some(flasher) = &flasher {
            adapter = adapter.led(flasher.clone());
        }
        let adapter = adapter.build();
        let adapter_id = match core.add_node(ItemId::NONE, &self.prefix, None, &adapter, 0) {
            Ok(id) => id,
            Err(err) => {
                if let Some(flasher) = &flasher {
                    core.unregister_led(flasher).ok();
                }
                return Err(err);
            }
        };

        match self.populate(core, &provider, adapter_id, flasher.as_ref(), &rng) {
            Ok((interface, channels, states)) => {
                info!(
                    adapter = %adapter.name(),
                    channels = channels.len(),
                    mode = ?self.mode,
                    "mock adapter attached"
                );
                Ok(MockAdapter {
                    core: core.clone(),
                    provider,
                    adapter,
                    interface,
                    channels,
                    states,
                    lamp,
                    flasher,
                    rng,
                    mode: self.mode,
                    timing: self.timing,
                })
            }
            Err(err) => {
                if let Err(cleanup) = core.remove_node(adapter_id) {
                    warn!(
                        adapter = %adapter.name(),
                        error = %cleanup,
                        "partial adapter left behind"
                    );
                }
                if let Some(flasher) = &flasher {
                    core.unregister_led(flasher).ok();
                }
                Err(err)
            }
        }
    }

    #[allow(clippy::type_complexity)]
    fn populate(
        &self,
        core: &Core,
        provider: &Provider,
        adapter_id: ItemId,
        flasher: Option<&Arc<LedFlasher>>,
        rng: &Arc<MockRng>,
    ) -> BinderResult<(ItemRef, Vec<ItemRef>, Vec<Arc<MockChannel>>)> {
        let interface = Item::builder(ItemKind::Interface)
            .provider(provider.acquire())
            .build();
        let interface_id = core.add_node(adapter_id, "e", None, &interface, 0)?;

        let ops: Arc<dyn HardwareOps> = Arc::new(MockHardware);
        let mut channels = Vec::with_capacity(self.channels);
        let mut states = Vec::with_capacity(self.channels);
        for index in 0..self.channels {
            let state = MockChannel::new(
                index,
                format!("{}/{index}", self.prefix),
                core.downgrade(),
                self.mode,
                self.timing,
                self.errors.clone(),
                rng.clone(),
            );
            let mut item = Item::builder(ItemKind::Channel)
                .order(index as u32)
                .hardware(ops.clone())
                .hardware_data(state.clone())
                .provider(provider.acquire());
            if let Some(flasher) = flasher {
                item = item.led(flasher.clone());
            }
            let item = item.build();
            let alias = self.aliases.get(&index).map(String::as_str);
            core.add_node(interface_id, "c", alias, &item, self.channels as u32)?;
            state.set_item(&item);
            channels.push(item);
            states.push(state);
        }
        Ok((interface, channels, states))
    }
}

/// A registered simulated adapter.
pub struct MockAdapter {
    core: Core,
    provider: Provider,
    adapter: ItemRef,
    interface: ItemRef,
    channels: Vec<ItemRef>,
    states: Vec<Arc<MockChannel>>,
    lamp: Arc<MockLamp>,
    flasher: Option<Arc<LedFlasher>>,
    rng: Arc<MockRng>,
    mode: MockMode,
    timing: TimingConfig,
}

impl MockAdapter {
    /// Starts configuring an adapter.
    pub fn builder() -> MockAdapterBuilder {
        MockAdapterBuilder::default()
    }

    /// The adapter item.
    pub fn adapter(&self) -> &ItemRef {
        &self.adapter
    }

    /// The line interface item.
    pub fn interface(&self) -> &ItemRef {
        &self.interface
    }

    /// Channel items in index order.
    pub fn channels(&self) -> &[ItemRef] {
        &self.channels
    }

    /// Channel item `index`.
    pub fn channel(&self, index: usize) -> Option<&ItemRef> {
        self.channels.get(index)
    }

    /// Register state of channel `index`.
    pub fn channel_state(&self, index: usize) -> Option<&Arc<MockChannel>> {
        self.states.get(index)
    }

    /// The simulated lamp.
    pub fn lamp(&self) -> &Arc<MockLamp> {
        &self.lamp
    }

    /// Cadence engine driving the lamp, if enabled.
    pub fn flasher(&self) -> Option<&Arc<LedFlasher>> {
        self.flasher.as_ref()
    }

    /// The provider that must outlive every item of this adapter.
    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    /// Simulation mode.
    pub fn mode(&self) -> MockMode {
        self.mode
    }

    /// Simulates a received frame on channel `index`.
    pub fn receive(&self, index: usize, data: Bytes) {
        if let Some(item) = self.channel(index) {
            self.core.notify_receive(item, data);
        }
    }

    /// Simulates a receiver error on channel `index`.
    pub fn receive_error(&self, index: usize, error: LineError) {
        if let Some(item) = self.channel(index) {
            self.core.notify_receive_error(item, error);
        }
    }

    /// Starts a background thread feeding frames into channel `index`.
    ///
    /// `frames` of `None` runs until the generator is stopped.
    pub fn start_traffic(
        &self,
        index: usize,
        frames: Option<u64>,
        frame_len: usize,
    ) -> BinderResult<TrafficGenerator> {
        let item = self
            .channel(index)
            .ok_or_else(|| BinderError::NotFound(format!("mock channel {index}")))?;
        TrafficGenerator::spawn(
            self.core.downgrade(),
            item.clone(),
            self.rng.clone(),
            self.mode,
            self.timing,
            frames,
            frame_len,
        )
    }

    /// Unregisters the adapter's items and lamp.
    ///
    /// Fails with `Busy` (and leaves everything registered) if a bound
    /// protocol refuses to detach.
    pub fn detach(&self) -> BinderResult<()> {
        self.core.remove_node(self.adapter.id())?;
        if let Some(flasher) = &self.flasher {
            self.core.unregister_led(flasher)?;
        }
        info!(adapter = %self.adapter.name(), "mock adapter detached");
        Ok(())
    }
}

impl std::fmt::Debug for MockAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockAdapter")
            .field("adapter", &self.adapter.name())
            .field("channels", &self.channels.len())
            .field("mode", &self.mode)
            .finish()
    }
}
