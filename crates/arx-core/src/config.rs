//! Configuration for the arx node.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $ARX_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/arx/config.toml
//!   3. ~/.config/arx/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArxConfig {
    pub identity: IdentityConfig,
    pub server: ServerConfig,
    /// Peer nodes exposed via the /network directory.
    pub roster: Vec<RosterEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Path to the node's Ed25519 seed (hex). Auto-generated on first run.
    pub key_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the client endpoint binds to.
    pub listen_addr: String,
    /// Client endpoint port.
    pub port: u16,
    /// Worker threads for the request pool. None = runtime-sized elastic
    /// pool. Env override 0 maps to None.
    pub worker_threads: Option<usize>,
}

/// One peer node in the roster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterEntry {
    pub node_id: String,
    pub host: String,
    pub client_port: u16,
    /// Packed node public key, hex-encoded.
    pub public_key: String,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for ArxConfig {
    fn default() -> Self {
        Self {
            identity: IdentityConfig::default(),
            server: ServerConfig::default(),
            roster: Vec::new(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            key_path: config_dir().join("node.key"),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".to_string(),
            port: 2052,
            worker_threads: Some(16),
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_or_tmp().join(".config"))
        .join("arx")
}

fn home_or_tmp() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl ArxConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            ArxConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("ARX_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&ArxConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply ARX_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("ARX_SERVER__LISTEN_ADDR") {
            self.server.listen_addr = v;
        }
        if let Ok(v) = std::env::var("ARX_SERVER__PORT") {
            if let Ok(p) = v.parse() {
                self.server.port = p;
            }
        }
        if let Ok(v) = std::env::var("ARX_SERVER__WORKER_THREADS") {
            if let Ok(n) = v.parse::<usize>() {
                self.server.worker_threads = if n == 0 { None } else { Some(n) };
            }
        }
        if let Ok(v) = std::env::var("ARX_IDENTITY__KEY_PATH") {
            self.identity.key_path = PathBuf::from(v);
        }
    }
}
