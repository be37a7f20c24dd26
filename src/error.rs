//! Error types for Mayim.
//!
//! `MayimError` covers everything outside the transaction state machine: pools,
//! drivers, query lookup, parameter binding and hydration. Transaction failures have
//! their own taxonomy in [`crate::transaction::TransactionError`] and are carried here
//! through the `Transaction` variant.

use crate::transaction::TransactionError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MayimError {
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u64,
    },

    #[error("Invalid configuration: {message}")]
    Configuration { message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("No SQL query '{query}' registered on executor '{executor}'")]
    MissingSql { executor: String, query: String },

    #[error("Executor {name} not registered")]
    ExecutorNotFound { name: String },

    #[error("Query '{query}' returned no records")]
    RecordNotFound { query: String },

    #[error("Failed to hydrate record: {message}")]
    Hydration { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

impl MayimError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, elapsed_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn missing_sql(executor: impl Into<String>, query: impl Into<String>) -> Self {
        Self::MissingSql {
            executor: executor.into(),
            query: query.into(),
        }
    }

    pub fn executor_not_found(name: impl Into<String>) -> Self {
        Self::ExecutorNotFound { name: name.into() }
    }

    pub fn record_not_found(query: impl Into<String>) -> Self {
        Self::RecordNotFound {
            query: query.into(),
        }
    }

    pub fn hydration(message: impl Into<String>) -> Self {
        Self::Hydration {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }
}

/// Convert sqlx errors to MayimError.
impl From<sqlx::Error> for MayimError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => MayimError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                MayimError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => MayimError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => MayimError::timeout("connection pool acquire", 30),
            sqlx::Error::PoolClosed => {
                MayimError::connection("Connection pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => MayimError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => MayimError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => MayimError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => {
                MayimError::hydration(format!("Column not found: {}", col))
            }
            sqlx::Error::ColumnDecode { index, source } => {
                MayimError::hydration(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => MayimError::hydration(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => MayimError::internal("Database worker crashed"),
            _ => MayimError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for Mayim operations.
pub type MayimResult<T> = Result<T, MayimError>;
