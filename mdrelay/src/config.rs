//! Configuration system for the `mdrelay` server.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/mdrelay/config.toml`)
//! 4. Compiled defaults

use std::path::PathBuf;

use mdrelay_proto::RoomId;

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

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RelayConfigFile {
    relay: RelayFileConfig,
    collab: CollabFileConfig,
}

/// `[relay]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RelayFileConfig {
    enable: Option<bool>,
    host: Option<String>,
    port: Option<u16>,
    default_room: Option<String>,
}

/// `[collab]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct CollabFileConfig {
    enable: Option<bool>,
    port: Option<u16>,
    public_host: Option<String>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the relay server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "mdrelay presence and signaling relay")]
pub struct RelayCliArgs {
    /// Host the presence relay binds to.
    #[arg(long, env = "RELAY_HOST")]
    pub host: Option<String>,

    /// Port of the presence relay listener.
    #[arg(short, long, env = "WS_PORT")]
    pub port: Option<u16>,

    /// Whether to start the presence relay.
    #[arg(long, env = "WS_ENABLE", value_parser = clap::builder::BoolishValueParser::new())]
    pub ws_enable: Option<bool>,

    /// Room used by connections that never name one.
    #[arg(long, env = "WS_DEFAULT_ROOM")]
    pub default_room: Option<String>,

    /// Whether to start the collaboration room server.
    #[arg(long, env = "COLLAB_ENABLE", value_parser = clap::builder::BoolishValueParser::new())]
    pub collab_enable: Option<bool>,

    /// Port of the collaboration room listener.
    #[arg(long, env = "COLLAB_PORT")]
    pub collab_port: Option<u16>,

    /// Host name placed in the connect URLs of created rooms.
    #[arg(long, env = "COLLAB_PUBLIC_HOST")]
    pub public_host: Option<String>,

    /// Path to config file (default: `~/.config/mdrelay/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "RELAY_LOG")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Whether the presence relay listener is started.
    pub relay_enabled: bool,
    /// Host the presence relay binds to.
    pub host: String,
    /// Port of the presence relay.
    pub port: u16,
    /// Room for frames and connections with no room of their own.
    pub default_room: RoomId,
    /// Whether the collaboration room listener is started.
    pub collab_enabled: bool,
    /// Port of the collaboration room server.
    pub collab_port: u16,
    /// Host advertised in collaboration room URLs.
    pub public_host: String,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            relay_enabled: true,
            host: "0.0.0.0".to_string(),
            port: 3001,
            default_room: RoomId::default_room(),
            collab_enabled: true,
            collab_port: 8990,
            public_host: "127.0.0.1".to_string(),
            log_level: "info".to_string(),
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

    /// Address the presence relay listens on.
    #[must_use]
    pub fn relay_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Address the collaboration room server listens on.
    #[must_use]
    pub fn collab_addr(&self) -> String {
        format!("{}:{}", self.host, self.collab_port)
    }

    /// Resolve a `RelayConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default. An empty default room name falls
    /// back to the built-in default.
    #[must_use]
    fn resolve(cli: &RelayCliArgs, file: &RelayConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            relay_enabled: cli
                .ws_enable
                .or(file.relay.enable)
                .unwrap_or(defaults.relay_enabled),
            host: cli
                .host
                .clone()
                .or_else(|| file.relay.host.clone())
                .unwrap_or(defaults.host),
            port: cli.port.or(file.relay.port).unwrap_or(defaults.port),
            default_room: cli
                .default_room
                .clone()
                .or_else(|| file.relay.default_room.clone())
                .and_then(RoomId::new)
                .unwrap_or(defaults.default_room),
            collab_enabled: cli
                .collab_enable
                .or(file.collab.enable)
                .unwrap_or(defaults.collab_enabled),
            collab_port: cli
                .collab_port
                .or(file.collab.port)
                .unwrap_or(defaults.collab_port),
            public_host: cli
                .public_host
                .clone()
                .or_else(|| file.collab.public_host.clone())
                .unwrap_or(defaults.public_host),
            log_level: cli.log_level.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
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
        config_dir.join("mdrelay").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RelayConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
