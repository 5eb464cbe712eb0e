//! Simulated system topology.
//!
//! A topology file lists the mock adapters to build, one `[[adapter]]` table
//! each. Missing keys take their defaults; without a file a single
//! two-channel adapter is built.
//!
//! ```toml
//! [[adapter]]
//! name = "cx"
//! channels = 4
//! aliases = ["uplink", "", "backup"]
//! protocols = ["echo", "null"]
//! mode = "realistic"
//! seed = 42
//! ```
//!
//! `aliases` and `protocols` are indexed by channel; empty strings leave a
//! channel without alias or protocol.

use cronyx_core::limits::MAX_NAME_LEN;
use cronyx_core::ConfigError;
use cronyx_driver_mock::MockMode;
use figment::{
    providers::{Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

fn default_prefix() -> String {
    "cx".to_string()
}

fn default_channels() -> usize {
    2
}

fn default_lamp() -> bool {
    true
}

/// One mock adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterSpec {
    /// Name prefix; the adapter is registered as `{name}{order}`.
    #[serde(default = "default_prefix")]
    pub name: String,
    /// Channel count.
    #[serde(default = "default_channels")]
    pub channels: usize,
    /// Alias of each channel; empty entries get none.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Protocol bound to each channel at start-up.
    #[serde(default)]
    pub protocols: Vec<String>,
    /// Simulation mode.
    #[serde(default)]
    pub mode: MockMode,
    /// Fixed random seed.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Whether the adapter has a status lamp.
    #[serde(default = "default_lamp")]
    pub lamp: bool,
}

impl Default for AdapterSpec {
    fn default() -> Self {
        Self {
            name: default_prefix(),
            channels: default_channels(),
            aliases: Vec::new(),
            protocols: Vec::new(),
            mode: MockMode::default(),
            seed: None,
            lamp: default_lamp(),
        }
    }
}

impl AdapterSpec {
    /// Alias of channel `index`, if one is configured.
    pub fn alias(&self, index: usize) -> Option<&str> {
        self.aliases
            .get(index)
            .map(String::as_str)
            .filter(|a| !a.is_empty())
    }

    /// Start-up protocol of channel `index`, if one is configured.
    pub fn protocol(&self, index: usize) -> Option<&str> {
        self.protocols
            .get(index)
            .map(String::as_str)
            .filter(|p| !p.is_empty())
    }
}

/// Every adapter of the simulated system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    /// `[[adapter]]` tables.
    #[serde(rename = "adapter", default)]
    pub adapters: Vec<AdapterSpec>,
}

impl Default for Topology {
    fn default() -> Self {
        Self {
            adapters: vec![AdapterSpec::default()],
        }
    }
}

impl Topology {
    /// Loads a topology file, or the default topology when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Topology::default()));
        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigError::Invalid(format!(
                    "topology file not found: {}",
                    path.display()
                )));
            }
            debug!("Loading topology from: {}", path.display());
            figment = figment.merge(Toml::file(path));
        }
        let topology: Topology = figment.extract()?;
        topology.validate()?;
        Ok(topology)
    }

    /// Checks names and per-channel list lengths.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (index, spec) in self.adapters.iter().enumerate() {
            let invalid = |what: String| ConfigError::Invalid(format!("adapter {index}: {what}"));
            if spec.name.is_empty() || spec.name.contains('.') || spec.name.len() > MAX_NAME_LEN {
                return Err(invalid(format!("bad name '{}'", spec.name)));
            }
            if spec.channels == 0 {
                return Err(invalid("needs at least one channel".into()));
            }
            if spec.aliases.len() > spec.channels {
                return Err(invalid(format!(
                    "{} aliases for {} channels",
                    spec.aliases.len(),
                    spec.channels
                )));
            }
            if spec.protocols.len() > spec.channels {
                return Err(invalid(format!(
                    "{} protocols for {} channels",
                    spec.protocols.len(),
                    spec.channels
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_topology() {
        let topology = Topology::load(None).unwrap();
        assert_eq!(topology.adapters.len(), 1);
        assert_eq!(topology.adapters[0].channels, 2);
        assert_eq!(topology.adapters[0].name, "cx");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[[adapter]]
name = "e1"
channels = 3
aliases = ["uplink", "", "backup"]
protocols = ["echo"]
mode = "chaos"
seed = 9

[[adapter]]
name = "sa"
"#
        )
        .unwrap();

        let topology = Topology::load(Some(file.path())).unwrap();
        assert_eq!(topology.adapters.len(), 2);
        let e1 = &topology.adapters[0];
        assert_eq!(e1.mode, MockMode::Chaos);
        assert_eq!(e1.alias(0), Some("uplink"));
        assert_eq!(e1.alias(1), None);
        assert_eq!(e1.protocol(0), Some("echo"));
        assert_eq!(e1.protocol(2), None);
        assert_eq!(topology.adapters[1].channels, 2);
        assert!(topology.adapters[1].lamp);
    }

    #[test]
    fn test_missing_file() {
        let err = Topology::load(Some(Path::new("/nonexistent/topology.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_validation() {
        let mut topology = Topology::default();
        topology.adapters[0].aliases = vec!["a".into(), "b".into(), "c".into()];
        assert!(topology.validate().is_err());

        let mut topology = Topology::default();
        topology.adapters[0].name = "cx.0".into();
        assert!(topology.validate().is_err());

        let mut topology = Topology::default();
        topology.adapters[0].channels = 0;
        assert!(topology.validate().is_err());
    }
}
