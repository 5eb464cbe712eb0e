//! Core configuration.
//!
//! Settings are layered with Figment, later providers overriding earlier ones:
//!
//! 1. Built-in defaults (`CoreConfig::default()`)
//! 2. An optional TOML file
//! 3. Environment variables prefixed with `CRONYX_` (e.g. `CRONYX_MINOR_POOL=32`)
//!
//! # Example
//!
//! ```toml
//! minor_pool = 64
//! queue_capacity = 1024
//! led_tick_ms = 83
//! second_timer = false
//! ```

use crate::error::ConfigError;
use crate::limits;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Tunables for a [`crate::Core`] instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Number of allocatable minor numbers.
    pub minor_pool: usize,
    /// Bound on queued deferred notifications.
    pub queue_capacity: usize,
    /// Lamp cadence tick period in milliseconds.
    pub led_tick_ms: u64,
    /// Lamp activity pulse length in milliseconds.
    pub led_kick_ms: u64,
    /// Whether to run the per-second hardware tick.
    pub second_timer: bool,
    /// Debug level given to newly registered items.
    pub default_debug_level: u8,
    /// Thread name of the deferred worker.
    pub worker_name: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            minor_pool: limits::DEFAULT_MINOR_POOL,
            queue_capacity: limits::DEFAULT_QUEUE_CAPACITY,
            led_tick_ms: limits::LED_TICK.as_millis() as u64,
            led_kick_ms: limits::LED_KICK.as_millis() as u64,
            second_timer: true,
            default_debug_level: 0,
            worker_name: "cronyx-deferred".to_string(),
        }
    }
}

impl CoreConfig {
    /// Loads configuration from defaults, an optional TOML file and the
    /// `CRONYX_` environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(CoreConfig::default()));
        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigError::Invalid(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            debug!("Loading core config from: {}", path.display());
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("CRONYX_"));

        let config: CoreConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the core cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.minor_pool == 0 {
            return Err(ConfigError::Invalid("minor_pool must be > 0".into()));
        }
        if self.minor_pool >= i32::MAX as usize {
            return Err(ConfigError::Invalid("minor_pool out of range".into()));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be > 0".into()));
        }
        if self.led_tick_ms == 0 || self.led_kick_ms == 0 {
            return Err(ConfigError::Invalid("led timer periods must be > 0".into()));
        }
        if self.worker_name.is_empty() {
            return Err(ConfigError::Invalid("worker_name must not be empty".into()));
        }
        Ok(())
    }

    /// Lamp cadence tick period.
    pub fn led_tick(&self) -> Duration {
        Duration::from_millis(self.led_tick_ms)
    }

    /// Lamp activity pulse length.
    pub fn led_kick(&self) -> Duration {
        Duration::from_millis(self.led_kick_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let config = CoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.minor_pool, 128);
        assert_eq!(config.led_tick(), Duration::from_millis(83));
    }

    #[test]
    fn test_load_from_toml_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "minor_pool = 8\nsecond_timer = false").unwrap();

        let config = CoreConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.minor_pool, 8);
        assert!(!config.second_timer);
        assert_eq!(config.queue_capacity, limits::DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn test_zero_pool_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "minor_pool = 0").unwrap();

        let err = CoreConfig::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_missing_file_rejected() {
        let err = CoreConfig::load(Some(Path::new("/nonexistent/cronyx.toml"))).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
