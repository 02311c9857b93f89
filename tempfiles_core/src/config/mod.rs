pub mod settings;

pub use settings::{AppConfig, DatabaseConfig, HttpConfig, ServerConfig, StorageConfig};
