//! `cronyxctl` internals.
//!
//! The binary builds a simulated system from a topology file, runs one
//! control command against it through a [`cronyx_core::ControlSession`] and
//! tears the system down again.
//!
//! ```bash
//! cronyxctl --topology lab.toml list
//! cronyxctl set uplink timeslots 0xfffe
//! cronyxctl traffic c1 --frames 5000 --protocol echo
//! ```

pub mod cli;
pub mod commands;
pub mod system;
pub mod topology;

pub use cli::{Cli, Command};
pub use system::System;
pub use topology::{AdapterSpec, Topology};
