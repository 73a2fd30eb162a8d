//! Configuration system for the meshcall signaling server.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/meshcall-relay/config.toml`)
//! 4. Compiled defaults

use std::path::PathBuf;

/// Errors that can occur when loading relay configuration.
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
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure for the relay.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RelayConfigFile {
    server: ServerFileConfig,
    log: LogFileConfig,
}

/// `[server]` section of the relay config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    port: Option<u16>,
    static_dir: Option<PathBuf>,
    max_message_size: Option<usize>,
}

/// `[log]` section of the relay config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct LogFileConfig {
    file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the relay server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "meshcall signaling relay")]
pub struct RelayCliArgs {
    /// Address to bind the relay server to (overrides `--port`).
    #[arg(short, long, env = "MESHCALL_ADDR")]
    pub bind: Option<String>,

    /// Port to listen on all interfaces when no bind address is given.
    #[arg(short, long, env = "PORT")]
    pub port: Option<u16>,

    /// Path to config file (default: `~/.config/meshcall-relay/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory holding the client application bundle to serve.
    #[arg(long, env = "MESHCALL_STATIC_DIR")]
    pub static_dir: Option<PathBuf>,

    /// Maximum inbound signaling frame size in bytes.
    #[arg(long)]
    pub max_message_size: Option<usize>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "MESHCALL_LOG")]
    pub log_level: String,

    /// Write logs to this file instead of stderr.
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved relay server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind the server to (e.g., `0.0.0.0:8080`).
    pub bind_addr: String,
    /// Directory of static client assets, if any.
    pub static_dir: Option<PathBuf>,
    /// Maximum accepted inbound frame size in bytes.
    pub max_message_size: usize,
    /// Log level filter string.
    pub log_level: String,
    /// Log file path; `None` logs to stderr.
    pub log_file: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            static_dir: None,
            max_message_size: 64 * 1024,
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

impl RelayConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path is tried and missing file
    /// is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed.
    pub fn load(cli: &RelayCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `RelayConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default. An explicit bind address wins over a
    /// port from the same or a lower layer.
    #[must_use]
    fn resolve(cli: &RelayCliArgs, file: &RelayConfigFile) -> Self {
        let defaults = Self::default();

        let bind_addr = cli
            .bind
            .clone()
            .or_else(|| cli.port.map(|port| format!("0.0.0.0:{port}")))
            .or_else(|| file.server.bind_addr.clone())
            .or_else(|| file.server.port.map(|port| format!("0.0.0.0:{port}")))
            .unwrap_or(defaults.bind_addr);

        Self {
            bind_addr,
            static_dir: cli
                .static_dir
                .clone()
                .or_else(|| file.server.static_dir.clone()),
            max_message_size: cli
                .max_message_size
                .or(file.server.max_message_size)
                .unwrap_or(defaults.max_message_size),
            log_level: cli.log_level.clone(),
            log_file: cli.log_file.clone().or_else(|| file.log.file.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file for the relay.
fn load_config_file(
    explicit_path: Option<&std::path::Path>,
) -> Result<RelayConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(RelayConfigFile::default());
        };
        config_dir.join("meshcall-relay").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RelayConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
