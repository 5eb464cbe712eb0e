//! How the simulated adapter paces and perturbs its traffic.

use serde::{Deserialize, Serialize};

/// Operational mode of a mock adapter.
///
/// - **Instant**: frames back to back, no random errors; for unit tests
/// - **Realistic**: frames paced by [`super::TimingConfig`]
/// - **Chaos**: realistic pacing plus random line errors and carrier flaps
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MockMode {
    /// No pacing.
    #[default]
    Instant,
    /// Paced like a real line.
    Realistic,
    /// Paced, with random faults.
    Chaos,
}

impl MockMode {
    /// Whether frames are paced.
    pub fn is_paced(&self) -> bool {
        !matches!(self, MockMode::Instant)
    }

    /// Whether random faults are injected into the traffic.
    pub fn is_chaotic(&self) -> bool {
        matches!(self, MockMode::Chaos)
    }
}

impl std::str::FromStr for MockMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "instant" => Ok(MockMode::Instant),
            "realistic" => Ok(MockMode::Realistic),
            "chaos" => Ok(MockMode::Chaos),
            other => Err(format!("unknown mock mode '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mode() {
        assert_eq!(MockMode::default(), MockMode::Instant);
        assert!(!MockMode::Instant.is_paced());
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("chaos".parse::<MockMode>().unwrap(), MockMode::Chaos);
        assert!(MockMode::Chaos.is_chaotic() && MockMode::Chaos.is_paced());
        assert!("fast".parse::<MockMode>().is_err());
    }
}
