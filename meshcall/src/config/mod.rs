//! Configuration for the meshcall peering client.
//!
//! Layered with the following priority (highest first):
//! 1. TOML config file (`~/.config/meshcall/config.toml` or an explicit path)
//! 2. Compiled defaults
//!
//! A missing default config file is not an error. An explicit path that
//! doesn't exist is.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;

/// Channel joined when none is configured.
pub const DEFAULT_CHANNEL: &str = "some-global-channel-name";

/// STUN server used when none is configured.
pub const DEFAULT_ICE_SERVER: &str = "stun:stun.l.google.com:19302";

/// Errors that can occur when loading configuration.
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

    /// The signaling server URL is not a `ws://` or `wss://` URL.
    #[error("invalid server_url {url}: {reason}")]
    InvalidServerUrl {
        /// URL as configured.
        url: String,
        /// What is wrong with it.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    signaling: SignalingFileConfig,
    media: MediaFileConfig,
}

/// `[signaling]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SignalingFileConfig {
    server_url: Option<String>,
    channel: Option<String>,
    userdata: Option<Value>,
    connect_timeout_secs: Option<u64>,
}

/// `[media]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct MediaFileConfig {
    use_audio: Option<bool>,
    use_video: Option<bool>,
    mute_audio_by_default: Option<bool>,
    ice_servers: Option<Vec<String>>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Local media capture settings, handed to the negotiation stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaConfig {
    /// Capture audio.
    pub use_audio: bool,
    /// Capture video.
    pub use_video: bool,
    /// Start with the local audio track muted.
    pub mute_audio_by_default: bool,
    /// STUN/TURN URLs for connectivity checks.
    pub ice_servers: Vec<String>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            use_audio: true,
            use_video: true,
            mute_audio_by_default: false,
            ice_servers: vec![DEFAULT_ICE_SERVER.to_string()],
        }
    }
}

/// Fully resolved client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Signaling server WebSocket URL.
    pub server_url: String,
    /// Channel to join.
    pub channel: String,
    /// Opaque data attached to the join request.
    pub userdata: Value,
    /// Timeout for the WebSocket connect and the handshake.
    pub connect_timeout: Duration,
    /// Local media settings.
    pub media: MediaConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://localhost:8080/ws".to_string(),
            channel: DEFAULT_CHANNEL.to_string(),
            userdata: Value::Object(serde_json::Map::new()),
            connect_timeout: Duration::from_secs(10),
            media: MediaConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from `path`, or from the default location when
    /// `path` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if an explicit file cannot be read, any file
    /// fails to parse, or the resolved `server_url` is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = load_config_file(path)?;
        Self::resolve(file)
    }

    /// Parse configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on invalid TOML or an invalid `server_url`.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Self::resolve(toml::from_str(contents)?)
    }

    /// Resolve a `ClientConfig` from a parsed config file. File > default.
    fn resolve(file: ConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            server_url: file.signaling.server_url.unwrap_or(defaults.server_url),
            channel: file.signaling.channel.unwrap_or(defaults.channel),
            userdata: file.signaling.userdata.unwrap_or(defaults.userdata),
            connect_timeout: file
                .signaling
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            media: MediaConfig {
                use_audio: file.media.use_audio.unwrap_or(defaults.media.use_audio),
                use_video: file.media.use_video.unwrap_or(defaults.media.use_video),
                mute_audio_by_default: file
                    .media
                    .mute_audio_by_default
                    .unwrap_or(defaults.media.mute_audio_by_default),
                ice_servers: file.media.ice_servers.unwrap_or(defaults.media.ice_servers),
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidServerUrl {
            url: self.server_url.clone(),
            reason,
        };
        let url = url::Url::parse(&self.server_url).map_err(|e| invalid(e.to_string()))?;
        match url.scheme() {
            "ws" | "wss" => Ok(()),
            other => Err(invalid(format!("unsupported scheme {other:?}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        // No config dir available; use defaults.
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("meshcall").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
