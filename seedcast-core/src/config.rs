//! Centralized configuration for Seedcast.
//!
//! Loaded once at startup from a JSONC file, then overridden from the
//! environment and validated. Key names match the files already deployed
//! alongside the origin and peers.

use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::descriptor::{DEFAULT_ANNOUNCE_LIST, DescriptorBuilder};
use crate::storage::{BackendSettings, StorageMethod};

/// Default configuration file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "config.jsonc";

/// Errors raised while loading or validating configuration.
///
/// Always fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file is not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config: {reason}")]
    Parse { reason: String },

    #[error("Invalid config: {reason}")]
    Invalid { reason: String },
}

/// Central configuration for all Seedcast components.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedcastConfig {
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub port: PortConfig,
    pub model: ModelConfig,
    pub storage: StorageConfig,
    pub torrent: TorrentConfig,
}

/// Origin address as seen by peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    #[serde(rename = "ServerIP")]
    pub server_ip: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_ip: "127.0.0.1".to_string(),
        }
    }
}

/// Peer-side expectations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Number of peers that must report receipt before the distribution is complete
    #[serde(rename = "TotalPeers")]
    pub total_peers: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { total_peers: 1 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    /// Swarm listen port
    #[serde(rename = "DataPort")]
    pub data_port: u16,
    /// Control-plane HTTP port
    #[serde(rename = "HttpPort")]
    pub http_port: u16,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            data_port: 42069,
            http_port: 8080,
        }
    }
}

/// Location of the distributed artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Directory holding the artifact; downloads land here too
    #[serde(rename = "ModelPath")]
    pub model_path: PathBuf,
    /// File or directory name inside `model_path`
    #[serde(rename = "ModelName")]
    pub model_name: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("/dev/shm"),
            model_name: "model.pth".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// One of `memory`, `tmpfs` or `disk`
    #[serde(rename = "Method")]
    pub method: String,
    /// Piece length in bytes, 0 picks one from the artifact size
    #[serde(rename = "PieceLength")]
    pub piece_length: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            method: "memory".to_string(),
            piece_length: 0,
        }
    }
}

impl StorageConfig {
    /// Resolves the configured method name.
    pub fn storage_method(&self) -> StorageMethod {
        StorageMethod::from_name(&self.method)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TorrentConfig {
    /// Tracker tiers embedded in built descriptors
    #[serde(rename = "AnnounceList")]
    pub announce_list: Vec<Vec<String>>,
    /// Seconds between download progress lines
    #[serde(rename = "ProgressIntervalSecs")]
    pub progress_interval_secs: u64,
    /// Delay before re-polling when no seed has a piece
    #[serde(rename = "SeedPollMillis")]
    pub seed_poll_millis: u64,
}

impl Default for TorrentConfig {
    fn default() -> Self {
        Self {
            announce_list: DEFAULT_ANNOUNCE_LIST
                .iter()
                .map(|tracker| vec![(*tracker).to_string()])
                .collect(),
            progress_interval_secs: 3,
            seed_poll_millis: 200,
        }
    }
}

impl TorrentConfig {
    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }

    pub fn seed_poll_interval(&self) -> Duration {
        Duration::from_millis(self.seed_poll_millis)
    }
}

/// Removes `//` and `/* */` comments, leaving string literals untouched.
///
/// # Errors
///
/// - `ConfigError::Parse` - If the comment pattern fails to compile
pub fn strip_jsonc_comments(jsonc: &str) -> Result<String, ConfigError> {
    let pattern = Regex::new(r#"("(?:\\.|[^"\\])*")|//[^\n]*|(?s:/\*.*?\*/)"#).map_err(|e| {
        ConfigError::Parse {
            reason: format!("comment pattern: {e}"),
        }
    })?;

    let stripped = pattern.replace_all(jsonc, |caps: &regex::Captures<'_>| {
        caps.get(1)
            .map(|literal| literal.as_str().to_string())
            .unwrap_or_default()
    });
    Ok(stripped.into_owned())
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|value| value.parse().ok())
}

impl SeedcastConfig {
    /// Parses JSONC text. Missing sections and keys keep their defaults.
    ///
    /// # Errors
    ///
    /// - `ConfigError::Parse` - If the text is not valid JSON once comments are removed
    pub fn from_jsonc(jsonc: &str) -> Result<Self, ConfigError> {
        let json = strip_jsonc_comments(jsonc)?;
        serde_json::from_str(&json).map_err(|e| ConfigError::Parse {
            reason: format!("json unmarshal error: {e}"),
        })
    }

    /// Loads a config file, applies environment overrides and validates.
    ///
    /// # Errors
    ///
    /// - `ConfigError::NotFound` - If the file does not exist
    /// - `ConfigError::Read` - If the file cannot be read
    /// - `ConfigError::Parse` / `ConfigError::Invalid` - If the content is unusable
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let jsonc = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config = Self::from_jsonc(&jsonc)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Applies `SEEDCAST_*` environment variable overrides.
    ///
    /// Values that do not parse are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Some(count) = env_parsed::<u64>("SEEDCAST_TOTAL_PEERS") {
            self.client.total_peers = count;
        }

        if let Some(port) = env_parsed::<u16>("SEEDCAST_HTTP_PORT") {
            self.port.http_port = port;
        }

        if let Some(port) = env_parsed::<u16>("SEEDCAST_DATA_PORT") {
            self.port.data_port = port;
        }

        if let Ok(method) = std::env::var("SEEDCAST_STORAGE_METHOD") {
            self.storage.method = method;
        }

        if let Ok(server_ip) = std::env::var("SEEDCAST_SERVER_IP") {
            self.server.server_ip = server_ip;
        }
    }

    /// Rejects configurations the process cannot run with.
    ///
    /// An unsupported storage method is not a validation failure; it is
    /// resolved to a backend that rejects every operation.
    ///
    /// # Errors
    ///
    /// - `ConfigError::Invalid` - On zero peers, zero ports, empty model name or bad tracker URL
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client.total_peers == 0 {
            return Err(ConfigError::Invalid {
                reason: "client.TotalPeers must be at least 1".to_string(),
            });
        }
        if self.port.http_port == 0 || self.port.data_port == 0 {
            return Err(ConfigError::Invalid {
                reason: "port.HttpPort and port.DataPort must be non-zero".to_string(),
            });
        }
        if self.model.model_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                reason: "model.ModelName must not be empty".to_string(),
            });
        }
        for tracker in self.torrent.announce_list.iter().flatten() {
            url::Url::parse(tracker).map_err(|e| ConfigError::Invalid {
                reason: format!("tracker URL {tracker:?}: {e}"),
            })?;
        }
        Ok(())
    }

    /// Base URL of the origin control plane.
    pub fn origin_url(&self) -> String {
        format!("http://{}:{}", self.server.server_ip, self.port.http_port)
    }

    /// Descriptor builder carrying the configured piece length and trackers.
    pub fn descriptor_builder(&self) -> DescriptorBuilder {
        DescriptorBuilder::new()
            .with_piece_length(self.storage.piece_length)
            .with_announce_list(self.torrent.announce_list.clone())
    }

    /// Backend settings for the configured artifact.
    pub fn backend_settings(&self) -> BackendSettings {
        BackendSettings {
            base_dir: self.model.model_path.clone(),
            artifact_name: self.model.model_name.clone(),
            builder: self.descriptor_builder(),
        }
    }
}
