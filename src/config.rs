use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::hasher::DEFAULT_CHUNK_SIZE;

/// Application configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Local,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_local_path")]
    pub local_path: String,
}

/// Tuning for the ingest, delete and reconcile paths
#[derive(Debug, Clone, Deserialize)]
pub struct DedupConfig {
    /// Read size while hashing and streaming uploads
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// How often a lost original race is retried as a duplicate
    #[serde(default = "default_max_race_retries")]
    pub max_race_retries: u32,
    /// Upper bound on a single blob write or read
    #[serde(default = "default_io_timeout")]
    pub io_timeout_secs: u64,
    /// Blob path prefix for new uploads
    #[serde(default = "default_upload_prefix")]
    pub upload_prefix: String,
}

impl DedupConfig {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_db_path() -> String {
    "data/dedupvault.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_local_path() -> String {
    "data/blobs".to_string()
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_max_race_retries() -> u32 {
    3
}

fn default_io_timeout() -> u64 {
    300
}

fn default_upload_prefix() -> String {
    "uploads".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            local_path: default_local_path(),
        }
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_race_retries: default_max_race_retries(),
            io_timeout_secs: default_io_timeout(),
            upload_prefix: default_upload_prefix(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_env_overrides();
        config.validate()?;
        config.ensure_directories()?;
        Ok(config)
    }

    /// Load configuration from the first config file found
    fn load_from_file() -> anyhow::Result<Self> {
        let config_paths = ["dedupvault.toml", "config.toml", "data/dedupvault.toml"];

        for path in config_paths {
            if Path::new(path).exists() {
                let content = fs::read_to_string(path)?;
                let config = Self::from_toml(&content)?;
                tracing::info!("Loaded configuration from {}", path);
                return Ok(config);
            }
        }

        tracing::info!("No configuration file found, using defaults");
        Ok(Config::default())
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply environment variable overrides
    /// Format: DV_CONF_<SECTION>_<KEY>
    fn apply_env_overrides(&mut self) {
        // Server overrides
        if let Ok(val) = env::var("DV_CONF_SERVER_HOST") {
            self.server.host = val;
        }
        if let Ok(val) = env::var("DV_CONF_SERVER_PORT") {
            if let Ok(port) = val.parse() {
                self.server.port = port;
            }
        }

        // Database overrides
        if let Ok(val) = env::var("DV_CONF_DATABASE_PATH") {
            self.database.path = val;
        }
        if let Ok(val) = env::var("DV_CONF_DATABASE_MAX_CONNECTIONS") {
            if let Ok(n) = val.parse() {
                self.database.max_connections = n;
            }
        }

        // Storage overrides
        if let Ok(val) = env::var("DV_CONF_STORAGE_BACKEND") {
            match val.to_lowercase().as_str() {
                "local" => self.storage.backend = StorageBackend::Local,
                "memory" => self.storage.backend = StorageBackend::Memory,
                other => tracing::warn!("Ignoring unknown storage backend {:?}", other),
            }
        }
        if let Ok(val) = env::var("DV_CONF_STORAGE_LOCAL_PATH") {
            self.storage.local_path = val;
        }

        // Dedup overrides
        if let Ok(val) = env::var("DV_CONF_DEDUP_CHUNK_SIZE") {
            if let Ok(n) = val.parse() {
                self.dedup.chunk_size = n;
            }
        }
        if let Ok(val) = env::var("DV_CONF_DEDUP_MAX_RACE_RETRIES") {
            if let Ok(n) = val.parse() {
                self.dedup.max_race_retries = n;
            }
        }
        if let Ok(val) = env::var("DV_CONF_DEDUP_IO_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                self.dedup.io_timeout_secs = secs;
            }
        }
        if let Ok(val) = env::var("DV_CONF_DEDUP_UPLOAD_PREFIX") {
            self.dedup.upload_prefix = val;
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.dedup.chunk_size == 0 {
            anyhow::bail!("dedup.chunk_size must be greater than zero");
        }
        if self.dedup.io_timeout_secs == 0 {
            anyhow::bail!("dedup.io_timeout_secs must be greater than zero");
        }
        if self.database.max_connections == 0 {
            anyhow::bail!("database.max_connections must be greater than zero");
        }
        Ok(())
    }

    /// Ensure required directories exist
    fn ensure_directories(&self) -> anyhow::Result<()> {
        if let Some(parent) = Path::new(&self.database.path).parent() {
            fs::create_dir_all(parent)?;
        }

        if self.storage.backend == StorageBackend::Local {
            fs::create_dir_all(&self.storage.local_path)?;
        }

        Ok(())
    }
}
