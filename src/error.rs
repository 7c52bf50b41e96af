/// Error types for entity mapping, schema sync and transaction management
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Entity metadata is missing or inconsistent, or a value could not be
    /// converted between its Rust and SQL representations
    #[error("Mapping error for {entity}: {reason}")]
    Mapping { entity: String, reason: String },

    /// A column name that the entity metadata does not know about
    #[error("Unknown column `{column}` for table `{table}`")]
    UnknownColumn { table: String, column: String },

    /// A DDL statement failed while reconciling a table.
    ///
    /// Statements executed before the failing one stay applied.
    #[error("Schema error on table `{table}` while executing `{statement}`: {source}")]
    Schema {
        table: String,
        statement: String,
        #[source]
        source: sqlx::Error,
    },

    /// The pool could not hand out a connection
    #[error("Connection error: {0}")]
    Connection(#[source] sqlx::Error),

    /// Begin, commit or rollback failed, or a driver error escaped a managed transaction
    #[error("Transaction error: {0}")]
    Transaction(#[source] sqlx::Error),

    /// A nested block of the chain failed, so the chain root rolled back
    #[error("Transaction was marked rollback-only by a failed nested operation")]
    RollbackOnly,

    /// No transaction is bound to the given context
    #[error("No active transaction in this context")]
    NoActiveTransaction,

    /// Transaction has already been consumed (committed or rolled back)
    #[error("Transaction has already been consumed")]
    AlreadyConsumed,

    /// A write statement for an entity failed
    #[error("Failed to {operation} {entity}: {source}")]
    Persistence {
        entity: String,
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },

    /// Database error from SQLx
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An async worker task panicked or was cancelled
    #[error("Worker task failed: {0}")]
    Worker(String),
}

impl Error {
    pub(crate) fn mapping(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Mapping {
            entity: entity.into(),
            reason: reason.into(),
        }
    }

    /// Converts a raw driver error that escaped a managed transaction into a
    /// transaction failure. Domain errors are returned unchanged.
    pub(crate) fn into_transaction_failure(self) -> Self {
        match self {
            Self::Database(source) => Self::Transaction(source),
            other => other,
        }
    }
}

/// Result type alias for entity manager operations
pub type Result<T> = std::result::Result<T, Error>;
