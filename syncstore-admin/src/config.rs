//! Configuration for the `syncstore-admin` tool.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/syncstore/config.toml`)
//! 4. Compiled defaults

use std::path::{Path, PathBuf};

use syncstore::DatabaseConfig;
use syncstore::config::{DEFAULT_MAX_IDLE_CONNECTIONS, DEFAULT_MAX_OFFERED_MESSAGES};

/// Errors that can occur when loading admin configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// No store path was given and the platform has no data directory.
    #[error("no store path configured and no data directory available")]
    NoStorePath,
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct AdminConfigFile {
    store: StoreFileConfig,
    log_level: Option<String>,
}

/// `[store]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StoreFileConfig {
    path: Option<PathBuf>,
    max_offered_messages: Option<usize>,
    max_idle_connections: Option<usize>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the admin tool.
#[derive(clap::Parser, Debug)]
#[command(version, about = "Open, migrate and inspect SyncStore databases")]
pub struct AdminCliArgs {
    /// What to do with the store.
    #[command(subcommand)]
    pub command: Command,

    /// Store file to operate on.
    #[arg(short, long, env = "SYNCSTORE_DB", global = true)]
    pub db: Option<PathBuf>,

    /// Path to config file (default: `~/.config/syncstore/config.toml`).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Offers kept per contact before further offers are dropped.
    #[arg(long, global = true)]
    pub max_offered_messages: Option<usize>,

    /// Idle connections kept by the pool.
    #[arg(long, global = true)]
    pub max_idle_connections: Option<usize>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, env = "SYNCSTORE_LOG", global = true)]
    pub log_level: Option<String>,
}

/// Admin subcommands.
#[derive(clap::Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create the store, or migrate it to the current schema.
    Open,
    /// Print the schema version and row counts.
    Info,
    /// Print every key in a settings namespace.
    Settings {
        /// Namespace to dump.
        #[arg(default_value = "db")]
        namespace: String,
    },
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved admin configuration.
#[derive(Debug, Clone)]
pub struct AdminConfig {
    /// Settings the store is opened with.
    pub store: DatabaseConfig,
    /// Log level filter string.
    pub log_level: String,
}

impl AdminConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path is tried and a missing
    /// file is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read or
    /// parsed, or if no store path can be determined.
    pub fn load(cli: &AdminCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file, default_store_path())
    }

    /// Priority: CLI > file > default.
    fn resolve(
        cli: &AdminCliArgs,
        file: &AdminConfigFile,
        default_path: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let path = cli
            .db
            .clone()
            .or_else(|| file.store.path.clone())
            .or(default_path)
            .ok_or(ConfigError::NoStorePath)?;

        Ok(Self {
            store: DatabaseConfig {
                path: Some(path),
                max_offered_messages: cli
                    .max_offered_messages
                    .or(file.store.max_offered_messages)
                    .unwrap_or(DEFAULT_MAX_OFFERED_MESSAGES),
                max_idle_connections: cli
                    .max_idle_connections
                    .or(file.store.max_idle_connections)
                    .unwrap_or(DEFAULT_MAX_IDLE_CONNECTIONS),
            },
            log_level: cli
                .log_level
                .clone()
                .or_else(|| file.log_level.clone())
                .unwrap_or_else(|| "info".to_string()),
        })
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn default_store_path() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("syncstore").join("store.db"))
}

/// Load and parse a TOML config file.
fn load_config_file(explicit_path: Option<&Path>) -> Result<AdminConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(AdminConfigFile::default());
        };
        config_dir.join("syncstore").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AdminConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
