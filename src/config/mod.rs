mod settings;

pub use settings::{
    AgentConfig, CacheBackend, CacheConfig, DirectoryConfig, LoggingConfig, SearchConfig,
    Settings, TransportConfig,
};
