//! Database configuration.

use crate::error::{Error, Result};
use std::str::FromStr;
use std::time::Duration;

/// Connection and worker settings for an [`EntityManager`](crate::EntityManager).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// SQLite URL, e.g. `sqlite://app.db` or `sqlite::memory:`
    pub url: String,

    /// Maximum number of pooled connections.
    pub max_connections: u32,

    /// Connections kept open while idle.
    pub min_connections: u32,

    /// How long `acquire` waits for a free connection.
    pub acquire_timeout: Duration,

    /// How long SQLite waits on a locked database before failing.
    pub busy_timeout: Duration,

    /// Number of async operations allowed to run at once.
    pub async_workers: usize,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 8,
            min_connections: 0,
            acquire_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(5),
            async_workers: default_async_workers(),
        }
    }

    /// Reads the configuration from the environment.
    ///
    /// `DATABASE_URL` is required. `DATABASE_MAX_CONNECTIONS`,
    /// `DATABASE_MIN_CONNECTIONS`, `DATABASE_ACQUIRE_TIMEOUT_MS`,
    /// `DATABASE_BUSY_TIMEOUT_MS` and `DATABASE_ASYNC_WORKERS` override the
    /// defaults when set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if `DATABASE_URL` is missing or a
    /// numeric variable does not parse.
    pub fn from_env() -> Result<Self> {
        let url = std::env::var("DATABASE_URL")
            .map_err(|_| Error::Configuration("DATABASE_URL is not set".to_string()))?;
        let mut config = Self::new(url);

        if let Some(v) = env_number("DATABASE_MAX_CONNECTIONS")? {
            config.max_connections = v;
        }
        if let Some(v) = env_number("DATABASE_MIN_CONNECTIONS")? {
            config.min_connections = v;
        }
        if let Some(v) = env_number("DATABASE_ACQUIRE_TIMEOUT_MS")? {
            config.acquire_timeout = Duration::from_millis(v);
        }
        if let Some(v) = env_number("DATABASE_BUSY_TIMEOUT_MS")? {
            config.busy_timeout = Duration::from_millis(v);
        }
        if let Some(v) = env_number("DATABASE_ASYNC_WORKERS")? {
            config.async_workers = v;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_min_connections(mut self, min_connections: u32) -> Self {
        self.min_connections = min_connections;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn with_async_workers(mut self, workers: usize) -> Self {
        self.async_workers = workers;
        self
    }

    /// Checks the settings for values the pool would reject.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(Error::Configuration("database url is empty".to_string()));
        }
        if self.max_connections == 0 {
            return Err(Error::Configuration(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(Error::Configuration(format!(
                "min_connections ({}) exceeds max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        if self.async_workers == 0 {
            return Err(Error::Configuration(
                "async_workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// At least two workers, otherwise one per available core.
pub fn default_async_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .max(2)
}

fn env_number<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Configuration(format!("{key}: {e}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = DatabaseConfig::new("sqlite::memory:");
        assert_eq!(config.max_connections, 8);
        assert!(config.async_workers >= 2);
        config.validate().unwrap();
    }

    #[test]
    fn validate_rejects_inverted_pool_bounds() {
        let config = DatabaseConfig::new("sqlite::memory:")
            .with_max_connections(2)
            .with_min_connections(3);
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn validate_rejects_zero_workers() {
        let config = DatabaseConfig::new("sqlite::memory:").with_async_workers(0);
        assert!(config.validate().is_err());
    }
}
