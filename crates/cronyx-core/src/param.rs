//! Control parameter identifiers and values.
//!
//! The parameter space is shared by the control surface, protocol modules and
//! hardware collaborators. Identifiers parse from and print as the lowercase
//! names used by the CLI (`"mtu"`, `"timeslots"`, `"proto"`...).

use crate::error::{BinderError, BinderResult};
use crate::led::LedMode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Parameter identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamId {
    /// Name of the bound protocol (empty when unbound).
    Protocol,
    /// Channel operating mode (async, HDLC, ...), hardware defined.
    Mode,
    /// Loopback mode.
    LoopMode,
    /// Line coding.
    LineCode,
    /// Channel-associated signalling mode.
    CasMode,
    /// Bitmask of timeslots used by the channel.
    TimeslotMask,
    /// Per-item diagnostic verbosity.
    DebugLevel,
    /// Maximum transfer unit.
    Mtu,
    /// Transmit queue length.
    QueueLength,
    /// Notification counters snapshot.
    Statistics,
    /// Status lamp mode.
    LampMode,
}

impl ParamId {
    /// All identifiers, in display order.
    pub const ALL: [ParamId; 11] = [
        ParamId::Protocol,
        ParamId::Mode,
        ParamId::LoopMode,
        ParamId::LineCode,
        ParamId::CasMode,
        ParamId::TimeslotMask,
        ParamId::DebugLevel,
        ParamId::Mtu,
        ParamId::QueueLength,
        ParamId::Statistics,
        ParamId::LampMode,
    ];

    /// CLI name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamId::Protocol => "proto",
            ParamId::Mode => "mode",
            ParamId::LoopMode => "loop",
            ParamId::LineCode => "line-code",
            ParamId::CasMode => "cas",
            ParamId::TimeslotMask => "timeslots",
            ParamId::DebugLevel => "debug",
            ParamId::Mtu => "mtu",
            ParamId::QueueLength => "qlen",
            ParamId::Statistics => "stat",
            ParamId::LampMode => "led",
        }
    }

    /// Whether the core serves this parameter itself instead of forwarding it.
    pub fn is_core_owned(&self) -> bool {
        matches!(
            self,
            ParamId::Protocol
                | ParamId::DebugLevel
                | ParamId::Mtu
                | ParamId::QueueLength
                | ParamId::Statistics
                | ParamId::LampMode
        )
    }
}

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParamId {
    type Err = BinderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ParamId::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| BinderError::InvalidArgument(format!("unknown parameter '{s}'")))
    }
}

/// Snapshot of an item's notification counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Frames received.
    pub rx_frames: u64,
    /// Octets received.
    pub rx_bytes: u64,
    /// Receive errors.
    pub rx_errors: u64,
    /// Transmit completions.
    pub tx_done: u64,
    /// Transmit errors.
    pub tx_errors: u64,
    /// Modem line changes.
    pub modem_events: u64,
    /// Notifications dropped without delivery.
    pub dropped: u64,
}

/// Parameter value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ParamValue {
    /// Free-form text (protocol name, hardware mode names).
    Text(String),
    /// Unsigned number (mtu, queue length, debug level, timeslot mask).
    Number(u64),
    /// On/off switch.
    Flag(bool),
    /// Counter snapshot.
    Stats(StatsSnapshot),
    /// Lamp mode.
    Lamp(LedMode),
}

impl ParamValue {
    /// The text payload, or `InvalidArgument`.
    pub fn as_text(&self) -> BinderResult<&str> {
        match self {
            ParamValue::Text(s) => Ok(s),
            other => Err(BinderError::InvalidArgument(format!(
                "expected text, got {other}"
            ))),
        }
    }

    /// The numeric payload, or `InvalidArgument`.
    pub fn as_number(&self) -> BinderResult<u64> {
        match self {
            ParamValue::Number(n) => Ok(*n),
            ParamValue::Flag(b) => Ok(u64::from(*b)),
            other => Err(BinderError::InvalidArgument(format!(
                "expected number, got {other}"
            ))),
        }
    }

    /// Parses a CLI argument for `param`.
    pub fn parse_for(param: ParamId, input: &str) -> BinderResult<Self> {
        let invalid = || BinderError::InvalidArgument(format!("bad value '{input}' for {param}"));
        match param {
            ParamId::Protocol | ParamId::Mode | ParamId::LineCode | ParamId::CasMode => {
                Ok(ParamValue::Text(input.to_string()))
            }
            ParamId::LoopMode => match input {
                "on" | "1" | "true" => Ok(ParamValue::Flag(true)),
                "off" | "0" | "false" => Ok(ParamValue::Flag(false)),
                _ => Err(invalid()),
            },
            ParamId::TimeslotMask => {
                let digits = input.trim_start_matches("0x");
                u64::from_str_radix(digits, 16)
                    .map(ParamValue::Number)
                    .map_err(|_| invalid())
            }
            ParamId::DebugLevel | ParamId::Mtu | ParamId::QueueLength => input
                .parse::<u64>()
                .map(ParamValue::Number)
                .map_err(|_| invalid()),
            ParamId::Statistics => match input {
                "0" | "clear" => Ok(ParamValue::Stats(StatsSnapshot::default())),
                _ => Err(invalid()),
            },
            ParamId::LampMode => input.parse::<LedMode>().map(ParamValue::Lamp),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Text(s) => f.write_str(s),
            ParamValue::Number(n) => write!(f, "{n}"),
            ParamValue::Flag(b) => f.write_str(if *b { "on" } else { "off" }),
            ParamValue::Stats(s) => write!(
                f,
                "rx={} rx_bytes={} rx_err={} tx={} tx_err={} modem={} dropped={}",
                s.rx_frames,
                s.rx_bytes,
                s.rx_errors,
                s.tx_done,
                s.tx_errors,
                s.modem_events,
                s.dropped
            ),
            ParamValue::Lamp(mode) => write!(f, "{mode}"),
        }
    }
}
