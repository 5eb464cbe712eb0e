//! Failure injection for the simulated adapter and reference protocols.
//!
//! Operations are named by short static strings (`"link_up"`, `"attach"`,
//! `"detach"`, `"transmit"`). An [`ErrorConfig`] is cheap to clone and all
//! clones share counters, so a test can keep one handle and reset it while
//! the adapter holds another.

use super::rng::MockRng;
use cronyx_core::BinderError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Failure injection configuration.
#[derive(Clone, Debug)]
pub struct ErrorConfig {
    /// Per-operation failure rate, `"*"` for all.
    failure_rates: Arc<HashMap<&'static str, f64>>,
    scenarios: Arc<Vec<ErrorScenario>>,
    rng: Arc<MockRng>,
    state: Arc<Mutex<ErrorState>>,
}

/// Deterministic failure pattern.
#[derive(Debug, Clone)]
pub enum ErrorScenario {
    /// Succeed `count` times, then fail every call of `operation`.
    FailAfterN {
        /// Operation name checked.
        operation: &'static str,
        /// Successful calls before the first failure.
        count: u32,
    },
    /// Always refuse `operation`.
    Refuse {
        /// Operation name refused.
        operation: &'static str,
    },
    /// The line drops on the first checked operation and stays down.
    LinkLoss,
    /// The adapter reports a fault code on the first checked operation and
    /// stays faulted.
    HardwareFault {
        /// Fault code reported in the error context.
        code: u32,
    },
}

#[derive(Default, Debug)]
struct ErrorState {
    operation_counts: HashMap<&'static str, u32>,
    link_lost: bool,
    hardware_fault_code: u32,
}

impl ErrorConfig {
    /// No failures.
    pub fn none() -> Self {
        Self::build(HashMap::new(), Vec::new(), None)
    }

    /// Every operation fails with probability `rate`.
    pub fn random_failures(rate: f64) -> Self {
        Self::random_failures_seeded(rate, None)
    }

    /// Like [`ErrorConfig::random_failures`] with a fixed seed.
    pub fn random_failures_seeded(rate: f64, seed: Option<u64>) -> Self {
        let mut rates = HashMap::new();
        rates.insert("*", rate);
        Self::build(rates, Vec::new(), seed)
    }

    /// A single deterministic scenario.
    pub fn scenario(scenario: ErrorScenario) -> Self {
        Self::scenarios(vec![scenario])
    }

    /// Several scenarios, checked in order.
    pub fn scenarios(scenarios: Vec<ErrorScenario>) -> Self {
        Self::build(HashMap::new(), scenarios, None)
    }

    /// Per-operation failure rates.
    pub fn with_rates(rates: HashMap<&'static str, f64>) -> Self {
        Self::build(rates, Vec::new(), None)
    }

    fn build(
        rates: HashMap<&'static str, f64>,
        scenarios: Vec<ErrorScenario>,
        seed: Option<u64>,
    ) -> Self {
        Self {
            failure_rates: Arc::new(rates),
            scenarios: Arc::new(scenarios),
            rng: Arc::new(MockRng::new(seed)),
            state: Arc::new(Mutex::new(ErrorState::default())),
        }
    }

    /// Decides whether `operation` on `source` fails this time.
    pub fn check_operation(
        &self,
        source: &str,
        operation: &'static str,
    ) -> Result<(), BinderError> {
        let mut state = self.state.lock();

        if state.link_lost {
            return Err(BinderError::Busy(format!("{source}: link lost")));
        }
        if state.hardware_fault_code != 0 {
            return Err(BinderError::Unsupported(format!(
                "{source}: hardware fault {:#x}",
                state.hardware_fault_code
            )));
        }

        for scenario in self.scenarios.iter() {
            match scenario {
                ErrorScenario::FailAfterN { operation: op, count } if *op == operation => {
                    let seen = state.operation_counts.entry(operation).or_insert(0);
                    *seen += 1;
                    if *seen > *count {
                        return Err(BinderError::Busy(format!(
                            "{source}: {operation} failed after {count} calls"
                        )));
                    }
                }
                ErrorScenario::Refuse { operation: op } if *op == operation => {
                    return Err(BinderError::Busy(format!("{source}: {operation} refused")));
                }
                ErrorScenario::LinkLoss => {
                    state.link_lost = true;
                    return Err(BinderError::Busy(format!("{source}: link lost")));
                }
                ErrorScenario::HardwareFault { code } => {
                    state.hardware_fault_code = *code;
                    return Err(BinderError::Unsupported(format!(
                        "{source}: hardware fault {code:#x}"
                    )));
                }
                _ => {}
            }
        }

        let rate = self
            .failure_rates
            .get(operation)
            .or_else(|| self.failure_rates.get("*"))
            .copied()
            .unwrap_or(0.0);
        if self.rng.should_fail(rate) {
            return Err(BinderError::Busy(format!(
                "{source}: random failure in {operation}"
            )));
        }
        Ok(())
    }

    /// Clears counters and sticky faults.
    pub fn reset(&self) {
        *self.state.lock() = ErrorState::default();
    }
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cronyx_core::ErrorKind;

    #[test]
    fn test_no_errors() {
        let config = ErrorConfig::none();
        for _ in 0..100 {
            assert!(config.check_operation("cxmock", "link_up").is_ok());
        }
    }

    #[test]
    fn test_random_failures() {
        let config = ErrorConfig::random_failures_seeded(0.5, Some(42));
        let failures = (0..1000)
            .filter(|_| config.check_operation("cxmock", "transmit").is_err())
            .count();
        assert!(failures > 400 && failures < 600, "got {failures} failures");
    }

    #[test]
    fn test_fail_after_n_and_reset() {
        let config = ErrorConfig::scenario(ErrorScenario::FailAfterN {
            operation: "attach",
            count: 2,
        });
        assert!(config.check_operation("echo", "attach").is_ok());
        assert!(config.check_operation("echo", "attach").is_ok());
        let err = config.check_operation("echo", "attach").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Busy);
        assert!(config.check_operation("echo", "detach").is_ok());

        config.reset();
        assert!(config.check_operation("echo", "attach").is_ok());
    }

    #[test]
    fn test_refuse_only_named_operation() {
        let config = ErrorConfig::scenario(ErrorScenario::Refuse { operation: "detach" });
        assert!(config.check_operation("echo", "attach").is_ok());
        let err = config.check_operation("echo", "detach").unwrap_err();
        assert!(err.to_string().contains("detach refused"));
    }

    #[test]
    fn test_sticky_faults() {
        let config = ErrorConfig::scenario(ErrorScenario::LinkLoss);
        assert!(config.check_operation("cxmock", "link_up").is_err());
        assert!(config.check_operation("cxmock", "transmit").is_err());

        let config = ErrorConfig::scenario(ErrorScenario::HardwareFault { code: 0x42 });
        let err = config.check_operation("cxmock", "link_up").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        assert!(err.to_string().contains("0x42"));
        assert!(config.check_operation("cxmock", "transmit").is_err());
    }

    #[test]
    fn test_custom_rates() {
        let mut rates = HashMap::new();
        rates.insert("transmit", 1.0);
        rates.insert("link_up", 0.0);
        let config = ErrorConfig::with_rates(rates);
        for _ in 0..10 {
            assert!(config.check_operation("cxmock", "transmit").is_err());
            assert!(config.check_operation("cxmock", "link_up").is_ok());
        }
    }

    #[test]
    fn test_clones_share_state() {
        let config = ErrorConfig::scenario(ErrorScenario::LinkLoss);
        let other = config.clone();
        assert!(config.check_operation("cxmock", "link_up").is_err());
        other.reset();
        // LinkLoss re-arms on the next check after a reset.
        assert!(config.check_operation("cxmock", "link_up").is_err());
    }
}
