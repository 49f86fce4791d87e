use std::collections::HashMap;
use std::sync::RwLock;

use config::ConfigError;

/// Configuration key holding the salt used to hash access keys
pub const API_TOKEN_SALT_KEY: &str = "api_token.salt";

#[derive(serde::Deserialize, Clone)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub application: ApplicationSettings,
    #[serde(default)]
    pub api_token: ApiTokenSettings,
}

#[derive(serde::Deserialize, Clone)]
pub struct ApplicationSettings {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

#[derive(serde::Deserialize, Clone)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: String,
    pub port: u16,
    pub host: String,
    pub database_name: String,
}

impl DatabaseSettings {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database_name
        )
    }

    pub fn connection_string_without_db(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}",
            self.username, self.password, self.host, self.port
        )
    }
}

/// API token settings
#[derive(serde::Deserialize, Clone, Default)]
pub struct ApiTokenSettings {
    /// HMAC key for access key hashes; resolved at startup if absent
    pub salt: Option<String>,
}

/// Reads `configuration.yaml` (optional) then `APP_`-prefixed environment
/// variables, e.g. `APP_API_TOKEN__SALT`.
pub fn get_configuration() -> Result<Settings, ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("configuration").required(false))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;
    settings.try_deserialize::<Settings>()
}

/// Process-wide key/value configuration consulted at runtime.
///
/// Loaded once from [`Settings`] at startup; the salt resolution step may
/// write back into it.
pub trait ConfigurationProvider: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String);
}

/// In-process [`ConfigurationProvider`] backed by a lock-protected map
#[derive(Debug, Default)]
pub struct RuntimeConfiguration {
    values: RwLock<HashMap<String, String>>,
}

impl RuntimeConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let configuration = Self::new();
        if let Some(salt) = settings.api_token.salt.as_ref().filter(|s| !s.is_empty()) {
            configuration.set(API_TOKEN_SALT_KEY, salt.clone());
        }
        configuration
    }

    pub fn with_value(self, key: &str, value: impl Into<String>) -> Self {
        self.set(key, value.into());
        self
    }
}

impl ConfigurationProvider for RuntimeConfiguration {
    fn get(&self, key: &str) -> Option<String> {
        // A poisoned lock still holds consistent string values
        let values = self.values.read().unwrap_or_else(|e| e.into_inner());
        values.get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        values.insert(key.to_string(), value);
    }
}
