//! Application configuration

use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,

    // Database
    pub database_url: String,
    pub database_max_connections: u32,

    /// Pre-shared secret for the receiver boundary. `None` when unset or
    /// empty; the boundary then fails closed and rejects every call rather
    /// than running open.
    pub capture_shared_secret: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3100".to_string()),

            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),

            capture_shared_secret: env::var("CAPTURE_SHARED_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Mutex to ensure config tests run serially (they modify shared env vars)
    static CONFIG_TEST_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn test_missing_database_url_fails() {
        let _lock = CONFIG_TEST_MUTEX.lock().unwrap();
        env::remove_var("DATABASE_URL");
        let result = Config::from_env();
        assert!(matches!(result, Err(ConfigError::Missing("DATABASE_URL"))));
    }

    #[test]
    fn test_empty_shared_secret_is_treated_as_unset() {
        let _lock = CONFIG_TEST_MUTEX.lock().unwrap();
        env::set_var("DATABASE_URL", "postgres://test");
        env::set_var("CAPTURE_SHARED_SECRET", "");
        let config = Config::from_env().unwrap();
        assert!(config.capture_shared_secret.is_none());

        env::set_var("CAPTURE_SHARED_SECRET", "a-real-secret");
        let config = Config::from_env().unwrap();
        assert_eq!(config.capture_shared_secret.as_deref(), Some("a-real-secret"));

        env::remove_var("DATABASE_URL");
        env::remove_var("CAPTURE_SHARED_SECRET");
    }
}
