use anyhow::Result;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    pub agent: AgentConfig,
    pub directory: DirectoryConfig,
    pub transport: TransportConfig,
    pub search: SearchConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub ask_timeout_ms: u64,
    pub channel_buffer_size: usize,
    /// Number of runtime events kept for `LogAsk`.
    pub log_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    pub name: String,
    pub shared_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    pub bind_addr: String,
    pub server_name: String,
    pub read_timeout_ms: u64,
    pub send_poll_ms: u64,
    pub keep_alive_ms: u64,
    /// Time a new client gets to send its request header.
    pub handshake_timeout_ms: u64,
    pub drain_grace_ms: u64,
    pub accept_timeout_ms: u64,
    /// Consecutive rejected chunks a connection survives; one more halts it.
    pub max_rejected_chunks: u32,
    pub max_chunk_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub coordinator_name: String,
    pub coordinator_service: String,
    pub source_service_prefix: String,
    pub min_deadline_ms: u64,
    pub default_deadline_ms: u64,
    pub repository_agent: Option<String>,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            ask_timeout_ms: 5_000,
            channel_buffer_size: 256,
            log_capacity: 200,
        }
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            name: "directory".to_string(),
            shared_secret: "change-me".to_string(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:7070".to_string(),
            server_name: format!("litmesh/{}", env!("CARGO_PKG_VERSION")),
            read_timeout_ms: 500,
            send_poll_ms: 50,
            keep_alive_ms: 10_000,
            handshake_timeout_ms: 5_000,
            drain_grace_ms: 1_000,
            accept_timeout_ms: 1_000,
            max_rejected_chunks: 5,
            max_chunk_bytes: 16 * 1024 * 1024,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            coordinator_name: "search".to_string(),
            coordinator_service: "/service/search".to_string(),
            source_service_prefix: "/source/".to_string(),
            min_deadline_ms: 1_000,
            default_deadline_ms: 10_000,
            repository_agent: None,
            cache: CacheConfig::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            path: "litmesh-cache.sqlite".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Defaults, then `config/<CONFIG_ENV>.toml`, then `APP__SECTION__KEY` variables.
    pub fn new() -> Result<Self, ConfigError> {
        let config_env = env::var("CONFIG_ENV").unwrap_or_else(|_| "default".to_string());

        let config = Config::builder()
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(File::with_name(&format!("config/{}", config_env)).required(false))
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    pub fn directory_secret() -> Result<String> {
        env::var("LITMESH_DIRECTORY_SECRET")
            .map_err(|_| anyhow::anyhow!("LITMESH_DIRECTORY_SECRET environment variable not set"))
    }
}

impl AgentConfig {
    pub fn ask_timeout(&self) -> Duration {
        Duration::from_millis(self.ask_timeout_ms)
    }
}

impl TransportConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn send_poll(&self) -> Duration {
        Duration::from_millis(self.send_poll_ms)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }

    pub fn accept_timeout(&self) -> Duration {
        Duration::from_millis(self.accept_timeout_ms)
    }
}
