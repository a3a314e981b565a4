use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }
}

fn default_cache_timeout_ms() -> u64 {
    30_000
}

fn default_max_retry_attempts() -> u32 {
    5
}

fn default_retry_delays_ms() -> Vec<u64> {
    vec![1_000, 2_000, 4_000, 8_000, 16_000, 60_000]
}

fn default_chunk_size() -> usize {
    100
}

/// Sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Server URL (e.g., "http://localhost:8080")
    pub server_url: Option<String>,
    /// API key for authentication
    pub api_key: Option<String>,
    /// Enable automatic sync after writes (default: false)
    #[serde(default)]
    pub auto_sync: bool,
    /// Per-request timeout
    #[serde(default = "default_cache_timeout_ms")]
    pub cache_timeout_ms: u64,
    /// Retries after the first failed attempt
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    /// Delay before each retry; the last entry repeats
    #[serde(default = "default_retry_delays_ms")]
    pub retry_delays_ms: Vec<u64>,
    /// Changes per push request
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            api_key: None,
            auto_sync: false,
            cache_timeout_ms: default_cache_timeout_ms(),
            max_retry_attempts: default_max_retry_attempts(),
            retry_delays_ms: default_retry_delays_ms(),
            chunk_size: default_chunk_size(),
        }
    }
}

impl SyncConfig {
    /// Returns true if sync is configured (has both server_url and api_key)
    pub fn is_configured(&self) -> bool {
        self.server_url.is_some() && self.api_key.is_some()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.cache_timeout_ms)
    }
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Path to the SQLite database
    pub database_path: ConfigValue<PathBuf>,
    /// Actor recorded on local edits and workflow transitions
    pub created_by: ConfigValue<String>,
    /// Stable device identity sent with every push; generated on first sync
    /// when unset
    pub client_id: Option<ConfigValue<String>>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
    /// Sync configuration
    pub sync: SyncConfig,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    database_path: Option<PathBuf>,
    created_by: Option<String>,
    client_id: Option<String>,
    sync: Option<SyncConfig>,
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let default_db_path = Self::default_data_dir().join("drillsync.db");

        // Start with defaults
        let mut database_path = ConfigValue::new(default_db_path, ConfigSource::Default);
        let mut created_by = ConfigValue::new("default".to_string(), ConfigSource::Default);
        let mut client_id = None;
        let mut config_file = None;
        let mut sync = SyncConfig::default();

        // Try to load from config file
        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            config_file = Some(path.clone());

            if let Some(db_path) = file_config.database_path {
                // Resolve relative paths against config file's directory
                let resolved_path = if db_path.is_relative() {
                    path.parent().map(|p| p.join(&db_path)).unwrap_or(db_path)
                } else {
                    db_path
                };
                database_path = ConfigValue::new(resolved_path, ConfigSource::File);
            }
            if let Some(user) = file_config.created_by {
                created_by = ConfigValue::new(user, ConfigSource::File);
            }
            if let Some(id) = file_config.client_id {
                client_id = Some(ConfigValue::new(id, ConfigSource::File));
            }
            if let Some(sync_config) = file_config.sync {
                sync = sync_config;
            }
        }

        // Apply environment variable overrides
        if let Ok(db_path) = std::env::var("DRILLSYNC_DATABASE_PATH") {
            database_path = ConfigValue::new(PathBuf::from(db_path), ConfigSource::Environment);
        }
        if let Ok(user) = std::env::var("DRILLSYNC_CREATED_BY") {
            created_by = ConfigValue::new(user, ConfigSource::Environment);
        }
        if let Ok(id) = std::env::var("DRILLSYNC_CLIENT_ID") {
            client_id = Some(ConfigValue::new(id, ConfigSource::Environment));
        }
        // Sync env var overrides
        if let Ok(url) = std::env::var("DRILLSYNC_SYNC_URL") {
            sync.server_url = Some(url);
        }
        if let Ok(key) = std::env::var("DRILLSYNC_SYNC_API_KEY") {
            sync.api_key = Some(key);
        }
        if let Ok(ms) = std::env::var("DRILLSYNC_CACHE_TIMEOUT_MS") {
            sync.cache_timeout_ms = ms
                .parse()
                .map_err(|_| ConfigError::InvalidEnv("DRILLSYNC_CACHE_TIMEOUT_MS", ms))?;
        }

        if sync.retry_delays_ms.is_empty() {
            sync.retry_delays_ms = default_retry_delays_ms();
        }
        sync.chunk_size = sync.chunk_size.max(1);

        Ok(Self {
            database_path,
            created_by,
            client_id,
            config_file,
            sync,
        })
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/drillsync/
    /// - macOS: ~/Library/Application Support/drillsync/
    /// - Windows: %APPDATA%/drillsync/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("drillsync")
    }

    /// Default data directory (platform-specific):
    /// - Linux: ~/.local/share/drillsync/
    /// - macOS: ~/Library/Application Support/drillsync/
    /// - Windows: %APPDATA%/drillsync/
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("drillsync")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
    InvalidEnv(&'static str, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidEnv(name, value) => {
                write!(f, "Invalid value for {}: '{}'", name, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("nonexistent.yaml");

        let config = Config::load(Some(config_path)).unwrap();
        assert!(config
            .database_path
            .value
            .to_string_lossy()
            .contains("drillsync.db"));
        assert_eq!(config.database_path.source, ConfigSource::Default);
        assert_eq!(config.created_by.value, "default");
        assert_eq!(config.sync.cache_timeout_ms, 30_000);
        assert_eq!(config.sync.max_retry_attempts, 5);
        assert_eq!(
            config.sync.retry_delays_ms,
            vec![1_000, 2_000, 4_000, 8_000, 16_000, 60_000]
        );
        assert_eq!(config.sync.chunk_size, 100);
        assert!(!config.sync.is_configured());
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "database_path: field.db").unwrap();
        writeln!(file, "created_by: geo1").unwrap();
        writeln!(file, "client_id: tablet-7").unwrap();
        writeln!(file, "sync:").unwrap();
        writeln!(file, "  server_url: http://localhost:8080").unwrap();
        writeln!(file, "  api_key: secret").unwrap();
        writeln!(file, "  chunk_size: 25").unwrap();

        let config = Config::load(Some(config_path.clone())).unwrap();
        assert_eq!(config.database_path.value, temp_dir.path().join("field.db"));
        assert_eq!(config.database_path.source, ConfigSource::File);
        assert_eq!(config.created_by.value, "geo1");
        assert_eq!(config.client_id.unwrap().value, "tablet-7");
        assert_eq!(config.config_file, Some(config_path));
        assert!(config.sync.is_configured());
        assert_eq!(config.sync.chunk_size, 25);
        // unspecified sync keys keep their defaults
        assert_eq!(config.sync.max_retry_attempts, 5);
    }

    #[test]
    #[ignore] // Run with --ignored; env vars can pollute parallel tests
    fn test_env_var_overrides_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "created_by: fromfile").unwrap();

        std::env::set_var("DRILLSYNC_CREATED_BY", "fromenv");

        let config = Config::load(Some(config_path)).unwrap();
        assert_eq!(config.created_by.value, "fromenv");
        assert_eq!(config.created_by.source, ConfigSource::Environment);

        std::env::remove_var("DRILLSYNC_CREATED_BY");
    }

    #[test]
    fn test_invalid_yaml_error() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "invalid: yaml: content: [").unwrap();

        let result = Config::load(Some(config_path));
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
