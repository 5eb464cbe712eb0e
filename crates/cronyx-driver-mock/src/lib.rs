//! Simulated cronyx hardware for tests and demos.
//!
//! This crate plays the hardware collaborator and a couple of protocol
//! modules so the core can be exercised without a physical adapter.
//!
//! # Contents
//!
//! - [`MockAdapter`]: adapter → interface → N channels registered with a
//!   [`Core`](cronyx_core::Core), with modem lines, framer parameters, a
//!   status lamp and a per-second timer
//! - [`TrafficGenerator`]: background receive traffic for one channel
//! - [`EchoProtocol`] and [`NullProtocol`]: reference protocol modules
//! - [`common`]: modes, timing, seeded RNG and failure injection
//!
//! # Modes
//!
//! - `Instant`: frames back to back, deterministic payloads
//! - `Realistic`: paced by [`TimingConfig`]
//! - `Chaos`: paced, with random line errors and carrier flaps
//!
//! ```rust,ignore
//! use cronyx_core::Core;
//! use cronyx_driver_mock::{protocols, MockAdapter};
//!
//! let core = Core::with_defaults()?;
//! let (echo, _null) = protocols::register_all(&core)?;
//! let adapter = MockAdapter::builder().channels(2).attach(&core)?;
//! core.bind(adapter.channel(0).unwrap(), Some("echo"))?;
//! let traffic = adapter.start_traffic(0, Some(100), 64)?;
//! traffic.join();
//! core.flush();
//! ```

pub mod adapter;
pub mod channel;
pub mod common;
pub mod lamp;
pub mod protocols;
pub mod traffic;

pub use adapter::{MockAdapter, MockAdapterBuilder, PROVIDER_NAME};
pub use channel::{MockChannel, MockHardware};
pub use common::{ErrorConfig, ErrorScenario, MockMode, MockRng, TimingConfig};
pub use lamp::MockLamp;
pub use protocols::{EchoProtocol, EchoState, NullProtocol};
pub use traffic::{frame_pattern, TrafficGenerator};
