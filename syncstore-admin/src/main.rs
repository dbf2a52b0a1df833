//! `syncstore-admin` -- open, migrate and inspect a `SyncStore` database.
//!
//! # Usage
//!
//! ```bash
//! # Create the store, or migrate it to the current schema
//! cargo run --bin syncstore-admin -- --db ./store.db open
//!
//! # Print schema version and row counts
//! cargo run --bin syncstore-admin -- --db ./store.db info
//!
//! # Dump a settings namespace
//! SYNCSTORE_DB=./store.db cargo run --bin syncstore-admin -- settings db
//! ```

use clap::Parser;
use syncstore_admin::commands;
use syncstore_admin::config::{AdminCliArgs, AdminConfig};

fn main() {
    let cli = AdminCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match AdminConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(path = ?config.store.path, command = ?cli.command, "running admin command");

    let mut stdout = std::io::stdout().lock();
    if let Err(e) = commands::run(&cli.command, &config.store, &mut stdout) {
        tracing::error!(error = %e, "command failed");
        std::process::exit(1);
    }
}
