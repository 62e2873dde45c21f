//! Client configuration.
//!
//! Loaded from a TOML file; every field has a default so an empty file (or
//! no file at all) is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Reconnect automatically when the connection drops
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Local tree that manifest target paths are relative to
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Where the last applied version is remembered (relative to `root`)
    #[serde(default = "default_version_file")]
    pub version_file: PathBuf,

    #[serde(default = "default_manifest_timeout_secs")]
    pub manifest_timeout_secs: u64,

    #[serde(default = "default_file_timeout_secs")]
    pub file_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    25564
}

fn default_auto_reconnect() -> bool {
    true
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_version_file() -> PathBuf {
    PathBuf::from(".sync-version")
}

fn default_manifest_timeout_secs() -> u64 {
    10
}

fn default_file_timeout_secs() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            auto_reconnect: default_auto_reconnect(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            version_file: default_version_file(),
            manifest_timeout_secs: default_manifest_timeout_secs(),
            file_timeout_secs: default_file_timeout_secs(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// `host:port` of the sync server.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Version file location, resolved against the sync root when relative.
    pub fn version_path(&self) -> PathBuf {
        if self.sync.version_file.is_absolute() {
            self.sync.version_file.clone()
        } else {
            self.sync.root.join(&self.sync.version_file)
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.server.connect_timeout_secs)
    }

    pub fn manifest_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.manifest_timeout_secs)
    }

    pub fn file_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.file_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server_addr(), "127.0.0.1:25564");
        assert!(config.server.auto_reconnect);
        assert_eq!(config.manifest_timeout(), Duration::from_secs(10));
        assert_eq!(config.file_timeout(), Duration::from_secs(60));
        assert_eq!(config.version_path(), PathBuf::from("./.sync-version"));
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_from_file_partial_sections() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("client.toml");
        std::fs::write(
            &path,
            r#"
[server]
host = "sync.example.net"
auto_reconnect = false

[sync]
root = "/games/pack"
file_timeout_secs = 120
"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.server_addr(), "sync.example.net:25564");
        assert!(!config.server.auto_reconnect);
        assert_eq!(config.file_timeout(), Duration::from_secs(120));
        assert_eq!(config.manifest_timeout(), Duration::from_secs(10));
        assert_eq!(config.version_path(), PathBuf::from("/games/pack/.sync-version"));
    }

    #[test]
    fn test_absolute_version_file() {
        let mut config = Config::default();
        config.sync.version_file = PathBuf::from("/var/lib/sync/version");
        assert_eq!(config.version_path(), PathBuf::from("/var/lib/sync/version"));
    }
}
