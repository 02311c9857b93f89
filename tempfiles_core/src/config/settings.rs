use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Longest accepted file lifetime: one year.
pub const MAX_FILE_EXPIRY_HOURS: u64 = 24 * 365;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub upload_dir: PathBuf,
    /// Upper bound on a single upload, in bytes.
    pub max_file_size: u64,
    pub file_expiry_hours: u64,
    pub cleanup_interval_seconds: u64,
    pub public_url: String,
    pub delete_on_download: bool,
    /// Empty means any content type is accepted.
    pub allowed_content_types: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub enable_cors: bool,
    /// `*` or a comma separated list of origins.
    pub cors_origins: String,
    pub enable_logging: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            database: DatabaseConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            environment: "development".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("./uploads"),
            max_file_size: 100 * 1024 * 1024,
            file_expiry_hours: 1,
            cleanup_interval_seconds: 60,
            public_url: "http://localhost:3000".to_string(),
            delete_on_download: false,
            allowed_content_types: Vec::new(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:./data/ledger.db".to_string(),
            max_connections: 10,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enable_cors: true,
            cors_origins: "*".to_string(),
            enable_logging: true,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?);

        if std::path::Path::new("config.toml").exists() {
            builder = builder.add_source(File::with_name("config"));
        }

        builder = builder.add_source(environment());

        let config = builder.build()?;
        let app_config: AppConfig = config.try_deserialize()?;

        app_config.validate()?;

        Ok(app_config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Message("Server port cannot be 0".to_string()));
        }

        if self.storage.max_file_size == 0 {
            return Err(ConfigError::Message(
                "Max file size must be greater than 0".to_string(),
            ));
        }

        if self.storage.file_expiry_hours == 0 {
            return Err(ConfigError::Message(
                "File expiry hours must be greater than 0".to_string(),
            ));
        }

        if self.storage.file_expiry_hours > MAX_FILE_EXPIRY_HOURS {
            return Err(ConfigError::Message(format!(
                "File expiry hours cannot exceed {}",
                MAX_FILE_EXPIRY_HOURS
            )));
        }

        if self.storage.cleanup_interval_seconds == 0 {
            return Err(ConfigError::Message(
                "Cleanup interval must be greater than 0".to_string(),
            ));
        }

        let public_url = self.storage.public_url.as_str();
        if !(public_url.starts_with("http://") || public_url.starts_with("https://")) {
            return Err(ConfigError::Message(
                "Public URL must start with http:// or https://".to_string(),
            ));
        }

        if self.database.url.is_empty() {
            return Err(ConfigError::Message(
                "Database URL cannot be empty".to_string(),
            ));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::Message(
                "Database max connections must be greater than 0".to_string(),
            ));
        }

        if self.http.enable_cors && self.http.cors_origins.trim().is_empty() {
            tracing::warn!("CORS enabled without origins - no cross-origin request will be allowed");
        }

        Ok(())
    }

    pub fn create_directories(&self) -> Result<(), std::io::Error> {
        std::fs::create_dir_all(&self.storage.upload_dir)?;

        if let Some(parent) = self.database_file().and_then(|path| path.parent().map(PathBuf::from)) {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Clamped to `MAX_FILE_EXPIRY_HOURS` for configs that skipped `validate()`.
    pub fn file_ttl(&self) -> chrono::Duration {
        let hours = self.storage.file_expiry_hours.min(MAX_FILE_EXPIRY_HOURS);
        chrono::Duration::hours(hours as i64)
    }

    pub fn cleanup_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.storage.cleanup_interval_seconds)
    }

    fn database_file(&self) -> Option<PathBuf> {
        let path = self.database.url.strip_prefix("sqlite:")?;
        let path = path.trim_start_matches("//");
        let path = path.split('?').next().unwrap_or(path);
        if path.is_empty() || path.starts_with(":memory:") {
            return None;
        }
        Some(PathBuf::from(path))
    }
}

/// `TEMPFILES_<SECTION>__<KEY>`, with the content-type allow-list read as a
/// comma separated list.
fn environment() -> Environment {
    Environment::with_prefix("TEMPFILES")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("storage.allowed_content_types")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.storage.file_expiry_hours, 1);
        assert_eq!(config.database.url, "sqlite:./data/ledger.db");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();

        config.server.port = 0;
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.storage.max_file_size = 0;
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.storage.file_expiry_hours = 0;
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.storage.file_expiry_hours = MAX_FILE_EXPIRY_HOURS;
        assert!(config.validate().is_ok());

        config.storage.file_expiry_hours = 10_000_000_000;
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.storage.cleanup_interval_seconds = 0;
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.storage.public_url = "files.example.com".to_string();
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.database.url = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bind_address() {
        let config = AppConfig::default();
        assert_eq!(config.bind_address(), "127.0.0.1:3000");

        let mut config = AppConfig::default();
        config.server.host = "0.0.0.0".to_string();
        config.server.port = 8080;
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
    }

    #[test]
    fn test_derived_durations() {
        let mut config = AppConfig::default();
        config.storage.file_expiry_hours = 24;
        config.storage.cleanup_interval_seconds = 30;

        assert_eq!(config.file_ttl(), chrono::Duration::hours(24));
        assert_eq!(config.cleanup_interval(), std::time::Duration::from_secs(30));

        config.storage.file_expiry_hours = u64::MAX;
        assert_eq!(
            config.file_ttl(),
            chrono::Duration::hours(MAX_FILE_EXPIRY_HOURS as i64)
        );
    }

    #[test]
    fn test_environment_overrides() {
        let vars: config::Map<String, String> = [
            ("TEMPFILES_SERVER__PORT", "8081"),
            ("TEMPFILES_STORAGE__FILE_EXPIRY_HOURS", "6"),
            ("TEMPFILES_STORAGE__ALLOWED_CONTENT_TYPES", "image/png,text/plain"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let config: AppConfig = Config::builder()
            .add_source(Config::try_from(&AppConfig::default()).unwrap())
            .add_source(environment().source(Some(vars)))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.server.port, 8081);
        assert_eq!(config.storage.file_expiry_hours, 6);
        assert_eq!(
            config.storage.allowed_content_types,
            vec!["image/png".to_string(), "text/plain".to_string()]
        );
    }

    #[test]
    fn test_database_file_path() {
        let mut config = AppConfig::default();
        assert_eq!(config.database_file(), Some(PathBuf::from("./data/ledger.db")));

        config.database.url = "sqlite://var/lib/tempfiles.db?mode=rwc".to_string();
        assert_eq!(config.database_file(), Some(PathBuf::from("var/lib/tempfiles.db")));

        config.database.url = "sqlite::memory:".to_string();
        assert_eq!(config.database_file(), None);
    }

    #[test]
    fn test_config_loading() {
        let config = AppConfig::load().expect("Should load default configuration");

        assert!(config.validate().is_ok());
        assert!(config.server.port > 0);
        assert!(config.storage.max_file_size > 0);
        assert!(!config.database.url.is_empty());
    }

    #[test]
    fn test_directory_creation() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.storage.upload_dir = temp_dir.path().join("uploads");
        config.database.url = format!("sqlite:{}", temp_dir.path().join("db/ledger.db").display());

        assert!(config.create_directories().is_ok());

        assert!(config.storage.upload_dir.exists());
        assert!(temp_dir.path().join("db").exists());
    }
}
