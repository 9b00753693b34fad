use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use sucursal::{Config, Supervisor};
use tracing::error;

/// One branch node's process: binds the listener, loads the membership
/// table, and drives the CLI menu until "quit" (spec §4.7, §6).
#[derive(Parser)]
#[command(name = "sucursal", version)]
struct Args {
    /// Path to the branch/tunables config file.
    #[arg(long, default_value = "sucursal.toml")]
    config: PathBuf,

    /// Overrides which branch row is `is_self`, for a config file shared
    /// across the whole fleet.
    #[arg(long)]
    node_id: Option<i64>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let mut config = match Config::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, path = %args.config.display(), "failed to load config");
            return ExitCode::FAILURE;
        }
    };

    if let Some(node_id) = args.node_id {
        if let Err(e) = config.select_self(node_id) {
            error!(error = %e, node_id, "failed to select branch row");
            return ExitCode::FAILURE;
        }
    }

    let mut supervisor = match Supervisor::start(&config) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to start node");
            return ExitCode::FAILURE;
        }
    };

    supervisor.run();
    ExitCode::SUCCESS
}
