//! Shared infrastructure for the simulated adapter.
//!
//! - **mode**: Instant, Realistic, Chaos
//! - **timing**: frame pacing and link settle delays
//! - **errors**: failure injection
//! - **rng**: seeded random number generator

pub mod errors;
pub mod mode;
pub mod rng;
pub mod timing;

pub use errors::{ErrorConfig, ErrorScenario};
pub use mode::MockMode;
pub use rng::MockRng;
pub use timing::TimingConfig;
