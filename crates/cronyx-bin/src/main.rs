//! `cronyxctl` entry point.

use anyhow::{Context, Result};
use clap::Parser;
use cronyx_bin::{cli, commands, Cli, System, Topology};
use cronyx_core::{Access, CoreConfig};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli::log_level(cli.verbose)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(&cli) {
        Ok(output) => {
            if !output.is_empty() {
                println!("{output}");
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("{}: {err:#}", commands::error_label(&err));
            ExitCode::from(commands::exit_code(&err))
        }
    }
}

fn run(cli: &Cli) -> Result<String> {
    let config = CoreConfig::load(cli.config.as_deref()).context("loading core config")?;
    let topology = Topology::load(cli.topology.as_deref()).context("loading topology")?;
    let system = System::build(config, &topology)?;

    let access = if cli.read_only {
        Access::ReadOnly
    } else {
        Access::Admin
    };
    let output = commands::execute(&system, access, &cli.command);
    system.shutdown()?;
    output
}
