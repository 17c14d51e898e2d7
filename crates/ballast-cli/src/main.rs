// crates/ballast-cli/src/main.rs
//
// CLI entrypoint for the Ballast developer tools.
//
// Provides subcommands for inspecting the decay curve of a single stake and
// for running scripted scenarios against an in-memory power engine.

mod commands;
mod config;
mod output;

use clap::{Parser, Subcommand};
use commands::curve::CurveCmd;
use commands::simulate::SimulateCmd;
use config::ScenarioConfig;

/// Ballast CLI: epoch-based power accounting tools.
#[derive(Parser, Debug)]
#[command(
    name = "ballast",
    version = "0.1.0",
    about = "Ballast CLI for locked-stake power accounting"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Top-level subcommands.
#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the power of one stake over its lockup.
    Curve(CurveCmd),

    /// Run a scenario file and report power per account and epoch.
    Simulate(SimulateCmd),
}

/// Initialize tracing, letting `RUST_LOG` override the given level.
fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Curve(cmd) => {
            init_tracing("warn");
            commands::curve::run(cmd)?;
        }
        Commands::Simulate(cmd) => {
            let scenario = ScenarioConfig::load(&cmd.scenario)?;
            init_tracing(&scenario.log_level);
            tracing::info!(
                accounts = scenario.accounts.len(),
                steps = scenario.steps.len(),
                "Loaded scenario from {}",
                cmd.scenario
            );
            commands::simulate::run(cmd, &scenario)?;
        }
    }

    Ok(())
}
