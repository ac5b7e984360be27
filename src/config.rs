// Configuration management for add-ip-rules
// Supports CLI arguments and environment variables

use crate::error::{AppError, AppResult};
use crate::routes::NetworkConfig;
use crate::routes::parser::parse_network_config;
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

/// Netlink parsing warnings about attributes the kernel adds but we never read
const QUIET_TARGETS: &str = "netlink_packet_route=error";

/// Add the static routes and routing policies of a netplan file to the kernel
#[derive(Parser, Debug, Clone)]
#[command(name = "add-ip-rules")]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// The yaml config file
    #[arg(short, long, env = "ADD_IP_RULES_CONFIG")]
    pub config: PathBuf,

    /// Logging level (error, warn, info, debug, trace)
    #[arg(short, long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    /// Print the planned rules and routes as JSON instead of applying them
    #[arg(long, env = "ADD_IP_RULES_DRY_RUN")]
    pub dry_run: bool,
}

/// Settings for one run
#[derive(Debug, Clone)]
pub struct Config {
    pub config_path: PathBuf,
    pub log_level: Level,
    pub dry_run: bool,
}

impl Config {
    /// Load configuration from CLI args and environment
    pub fn load() -> anyhow::Result<Self> {
        Self::from_args(CliArgs::parse())
    }

    pub fn from_args(cli_args: CliArgs) -> anyhow::Result<Self> {
        let log_level = parse_log_level(&cli_args.log_level)?;

        Ok(Config {
            config_path: cli_args.config,
            log_level,
            dry_run: cli_args.dry_run,
        })
    }

    /// Log filter: the configured level, with netlink decoding noise suppressed
    pub fn log_filter(&self) -> EnvFilter {
        EnvFilter::builder()
            .with_default_directive(LevelFilter::from_level(self.log_level).into())
            .parse_lossy(QUIET_TARGETS)
    }

    /// Read and parse the netplan document this run applies
    pub fn read_network_config(&self) -> AppResult<NetworkConfig> {
        tracing::info!("Loading configuration from: {}", self.config_path.display());
        let bytes = read_config_file(&self.config_path)?;
        parse_network_config(&bytes)
    }
}

fn read_config_file(path: &Path) -> AppResult<Vec<u8>> {
    std::fs::read(path).map_err(|source| AppError::ConfigRead {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_log_level(level_str: &str) -> anyhow::Result<Level> {
    match level_str.to_lowercase().as_str() {
        "error" => Ok(Level::ERROR),
        "warn" => Ok(Level::WARN),
        "info" => Ok(Level::INFO),
        "debug" => Ok(Level::DEBUG),
        "trace" => Ok(Level::TRACE),
        _ => Err(anyhow::anyhow!("Invalid log level: {}", level_str)),
    }
}
