//! A core populated from a [`Topology`].

use crate::topology::Topology;
use anyhow::{Context, Result};
use cronyx_core::{Core, CoreConfig, ItemRef, Provider};
use cronyx_driver_mock::{protocols, EchoProtocol, MockAdapter, NullProtocol};
use std::sync::Arc;
use tracing::info;

/// The core plus the simulated hardware and protocols registered with it.
pub struct System {
    core: Core,
    adapters: Vec<MockAdapter>,
    echo: Arc<EchoProtocol>,
    null: Arc<NullProtocol>,
}

impl System {
    /// Starts a core, registers the reference protocols and attaches every
    /// adapter of `topology`, binding start-up protocols as configured.
    pub fn build(config: CoreConfig, topology: &Topology) -> Result<Self> {
        let core = Core::new(config).context("starting core")?;
        let (echo, null) = protocols::register_all(&core)?;
        let provider = Provider::new(cronyx_driver_mock::PROVIDER_NAME);

        let mut adapters = Vec::with_capacity(topology.adapters.len());
        for spec in &topology.adapters {
            let mut builder = MockAdapter::builder()
                .prefix(spec.name.clone())
                .channels(spec.channels)
                .mode(spec.mode)
                .lamp(spec.lamp)
                .provider(provider.clone());
            for index in 0..spec.channels {
                if let Some(alias) = spec.alias(index) {
                    builder = builder.alias(index, alias);
                }
            }
            if let Some(seed) = spec.seed {
                builder = builder.seed(seed);
            }
            let adapter = builder
                .attach(&core)
                .with_context(|| format!("attaching adapter '{}'", spec.name))?;

            for (index, channel) in adapter.channels().iter().enumerate() {
                if let Some(protocol) = spec.protocol(index) {
                    core.bind(channel, Some(protocol)).with_context(|| {
                        format!("binding '{protocol}' to {}", channel.name())
                    })?;
                }
            }
            adapters.push(adapter);
        }
        info!(
            adapters = adapters.len(),
            items = core.items().len(),
            "system ready"
        );
        Ok(Self {
            core,
            adapters,
            echo,
            null,
        })
    }

    /// The running core.
    pub fn core(&self) -> &Core {
        &self.core
    }

    /// Adapters in topology order.
    pub fn adapters(&self) -> &[MockAdapter] {
        &self.adapters
    }

    /// The registered echo protocol.
    pub fn echo(&self) -> &Arc<EchoProtocol> {
        &self.echo
    }

    /// The registered null protocol.
    pub fn null(&self) -> &Arc<NullProtocol> {
        &self.null
    }

    /// The adapter owning `channel` and the channel's index on it.
    pub fn locate(&self, channel: &ItemRef) -> Option<(&MockAdapter, usize)> {
        self.adapters.iter().find_map(|adapter| {
            adapter
                .channels()
                .iter()
                .position(|c| c.id() == channel.id())
                .map(|index| (adapter, index))
        })
    }

    /// Unbinds and unregisters everything, then stops the core.
    pub fn shutdown(self) -> Result<()> {
        for adapter in &self.adapters {
            for channel in adapter.channels() {
                self.core.unbind(channel)?;
            }
            adapter.detach()?;
        }
        self.core.shutdown();
        Ok(())
    }
}
