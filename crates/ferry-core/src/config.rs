//! Configuration system for Ferry.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $FERRY_CONFIG (explicit override)
//!   2. ./ferry.toml

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

/// Which side of the link this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Listen for the peer.
    Host,
    /// Dial the host.
    Peer,
}

/// Immutable run configuration. The daemon consumes this record and
/// never writes it back.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FerryConfig {
    pub mode: Mode,
    /// Bind address in host mode, target address in peer mode.
    pub address: String,
    pub port: u16,
    /// Shared folder. All transferred files live under this root.
    pub folder: PathBuf,
    /// Handshake password. Sent in cleartext — the link is unencrypted
    /// by design; do not reuse a real credential here.
    pub password: String,
    /// If set in host mode, only this source address may authenticate.
    pub allowed_peer: Option<IpAddr>,
}

impl Default for FerryConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Host,
            address: "0.0.0.0".to_string(),
            port: 12345,
            folder: PathBuf::from("./shared"),
            password: String::new(),
            allowed_peer: None,
        }
    }
}

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

impl FerryConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            FerryConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("FERRY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("ferry.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
                }
            }
            let text = toml::to_string_pretty(&FerryConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply FERRY_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("FERRY_MODE") {
            match v.as_str() {
                "host" => self.mode = Mode::Host,
                "peer" => self.mode = Mode::Peer,
                _ => {}
            }
        }
        if let Ok(v) = std::env::var("FERRY_ADDRESS") {
            self.address = v;
        }
        if let Ok(v) = std::env::var("FERRY_PORT") {
            if let Ok(p) = v.parse() {
                self.port = p;
            }
        }
        if let Ok(v) = std::env::var("FERRY_FOLDER") {
            self.folder = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("FERRY_PASSWORD") {
            self.password = v;
        }
        if let Ok(v) = std::env::var("FERRY_ALLOWED_PEER") {
            if let Ok(ip) = v.parse() {
                self.allowed_peer = Some(ip);
            }
        }
    }
}
