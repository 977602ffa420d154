//! Configuration system for btide.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $BTIDE_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/btide/config.toml
//!   3. ~/.config/btide/config.toml

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Upper bound on `max_peers`.
pub const MAX_PEERS_LIMIT: u32 = 2048;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BtideConfig {
    /// Directory holding .bpkg manifests and their target files.
    pub directory: PathBuf,
    /// Maximum simultaneous peer connections, 1..=2048.
    pub max_peers: u32,
    /// Listening port. Must be above 1024.
    pub port: u16,
    /// Peers to track at startup, as `ip:port`.
    pub peers: Vec<SocketAddr>,
}

impl Default for BtideConfig {
    fn default() -> Self {
        Self {
            directory: data_dir().join("packages"),
            max_peers: 16,
            port: 9100,
            peers: Vec::new(),
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("btide")
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("btide")
}

fn dirs_or_home() -> PathBuf {
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
    #[error("invalid max_peers: {0} (must be 1..={})", MAX_PEERS_LIMIT)]
    InvalidMaxPeers(u32),
    #[error("invalid port: {0} (must be above 1024)")]
    InvalidPort(u16),
    #[error("{0} exists and is not a directory")]
    NotADirectory(PathBuf),
    #[error("failed to create directory {0}: {1}")]
    CreateDirFailed(PathBuf, std::io::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl BtideConfig {
    /// Load config from the default location: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Load config from an explicit file. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            Self::from_toml(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            BtideConfig::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::SerializeFailed)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("BTIDE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing(path: &Path) -> Result<PathBuf, ConfigError> {
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
            }
            let text = BtideConfig::default().to_toml()?;
            std::fs::write(path, text)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        Ok(path.to_path_buf())
    }

    /// Range checks on peer count and port.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_peers < 1 || self.max_peers > MAX_PEERS_LIMIT {
            return Err(ConfigError::InvalidMaxPeers(self.max_peers));
        }
        if self.port <= 1024 {
            return Err(ConfigError::InvalidPort(self.port));
        }
        Ok(())
    }

    /// Create the package directory if needed (mode 0700 on unix).
    pub fn ensure_directory(&self) -> Result<(), ConfigError> {
        let dir = &self.directory;
        match std::fs::metadata(dir) {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(ConfigError::NotADirectory(dir.clone())),
            Err(_) => {
                std::fs::create_dir_all(dir)
                    .map_err(|e| ConfigError::CreateDirFailed(dir.clone(), e))?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
                        .map_err(|e| ConfigError::CreateDirFailed(dir.clone(), e))?;
                }
                tracing::info!(dir = %dir.display(), "created package directory");
                Ok(())
            }
        }
    }

    /// Apply BTIDE_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("BTIDE_DIRECTORY") {
            self.directory = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("BTIDE_MAX_PEERS") {
            if let Ok(n) = v.parse() {
                self.max_peers = n;
            }
        }
        if let Ok(v) = std::env::var("BTIDE_PORT") {
            if let Ok(p) = v.parse() {
                self.port = p;
            }
        }
        if let Ok(v) = std::env::var("BTIDE_PEERS") {
            self.peers = parse_peers(&v);
        }
    }
}

/// Comma-separated `ip:port` list. Entries that do not parse are skipped.
fn parse_peers(list: &str) -> Vec<SocketAddr> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse() {
            Ok(addr) => Some(addr),
            Err(_) => {
                tracing::warn!(peer = %s, "ignoring malformed peer address");
                None
            }
        })
        .collect()
}
