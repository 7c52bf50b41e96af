use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Sqlite;
use std::str::FromStr;

/// Hands out pooled SQLite connections.
///
/// A thin wrapper around SQLx's pool; cloning is cheap and every clone
/// shares the same pool. Connections return to the pool when dropped.
///
/// # Examples
///
/// ```rust,no_run
/// use sqlx_entity_manager::{ConnectionProvider, DatabaseConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let provider = ConnectionProvider::connect(&DatabaseConfig::new("sqlite://app.db")).await?;
/// let mut conn = provider.acquire().await?;
/// sqlx::query("SELECT 1").execute(&mut *conn).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionProvider {
    pool: SqlitePool,
}

impl ConnectionProvider {
    /// Opens a pool for `config.url`, creating the database file if needed.
    ///
    /// Connections use WAL journaling, enforce foreign keys and wait up to
    /// `config.busy_timeout` on locks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for invalid settings and
    /// [`Error::Connection`] if the URL is malformed or the pool cannot open
    /// its initial connections.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        config.validate()?;

        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(Error::Connection)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect_with(options)
            .await
            .map_err(Error::Connection)?;

        tracing::info!(
            url = %config.url,
            max_connections = config.max_connections,
            "connection pool initialized"
        );
        Ok(Self { pool })
    }

    /// Wraps an existing pool.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Takes a connection from the pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the pool is closed or no connection
    /// frees up within the acquire timeout.
    pub async fn acquire(&self) -> Result<PoolConnection<Sqlite>> {
        self.pool.acquire().await.map_err(Error::Connection)
    }

    /// Takes a connection from the pool and opens a transaction on it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if no connection is available and
    /// [`Error::Transaction`] if `BEGIN` fails.
    pub async fn begin(&self) -> Result<sqlx::Transaction<'static, Sqlite>> {
        self.pool.begin().await.map_err(|e| match e {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => Error::Connection(e),
            other => Error::Transaction(other),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Closes the pool, waiting for checked-out connections to come back.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("connection pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}
