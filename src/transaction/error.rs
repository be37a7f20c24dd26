//! Transaction error taxonomy.
//!
//! Every failure raised by the coordinator, the connection manager or a savepoint is a
//! [`TransactionError`]. State-machine violations always carry the transaction id.

use crate::error::MayimError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransactionError {
    /// Wiring mistakes detected before any I/O: bad isolation level, unknown executor,
    /// empty executor list, invalid savepoint name.
    #[error("Invalid transaction configuration: {message}")]
    Configuration { message: String },

    #[error("Transaction {transaction_id} not begun")]
    NotBegun { transaction_id: String },

    #[error("Transaction {transaction_id} already begun")]
    AlreadyBegun { transaction_id: String },

    #[error("Transaction {transaction_id} already finalized")]
    AlreadyFinalized { transaction_id: String },

    /// After phase one only `commit()` or `rollback()` may touch the connections.
    #[error("Transaction {transaction_id} already prepared; only commit or rollback may follow")]
    AlreadyPrepared { transaction_id: String },

    #[error("Connection isolation failed in transaction {transaction_id}: {message}")]
    ConnectionIsolation {
        transaction_id: String,
        message: String,
        #[source]
        source: Option<Box<MayimError>>,
    },

    #[error(
        "Transaction {transaction_id} exceeded its timeout of {:.1}s and was rolled back",
        .timeout.as_secs_f64()
    )]
    Timeout {
        transaction_id: String,
        timeout: Duration,
    },

    #[error(
        "Savepoints not supported for database type: {db_type}. Only PostgreSQL and MySQL are supported."
    )]
    SavepointNotSupported {
        transaction_id: String,
        db_type: String,
    },

    #[error("Savepoint {name} already exists in transaction {transaction_id}")]
    SavepointExists { transaction_id: String, name: String },

    #[error("Savepoint {name} already released")]
    SavepointReleased { name: String },

    /// Aggregate of every per-connection failure for one command.
    #[error(
        "Command '{command}' failed on {} connection(s) in transaction {transaction_id}: {}",
        .failures.len(),
        .failures.join("; ")
    )]
    Execution {
        transaction_id: String,
        command: String,
        failures: Vec<String>,
    },

    #[error("Failed to begin transaction {transaction_id}: {source}")]
    Begin {
        transaction_id: String,
        source: Box<TransactionError>,
    },

    #[error("Failed to commit transaction {transaction_id}: {source}")]
    Commit {
        transaction_id: String,
        source: Box<TransactionError>,
    },

    #[error("Failed to rollback transaction {transaction_id}: {source}")]
    Rollback {
        transaction_id: String,
        source: Box<TransactionError>,
    },

    #[error("Failed to prepare transaction {transaction_id}: {source}")]
    Prepare {
        transaction_id: String,
        source: Box<TransactionError>,
    },

    #[error("Failed to {operation} savepoint {name} in transaction {transaction_id}: {source}")]
    Savepoint {
        transaction_id: String,
        name: String,
        operation: &'static str,
        source: Box<TransactionError>,
    },
}

impl TransactionError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn connection_isolation(
        transaction_id: impl Into<String>,
        message: impl Into<String>,
        source: Option<MayimError>,
    ) -> Self {
        Self::ConnectionIsolation {
            transaction_id: transaction_id.into(),
            message: message.into(),
            source: source.map(Box::new),
        }
    }

    /// The id of the transaction this error belongs to, if any.
    pub fn transaction_id(&self) -> Option<&str> {
        match self {
            Self::Configuration { .. } | Self::SavepointReleased { .. } => None,
            Self::NotBegun { transaction_id }
            | Self::AlreadyBegun { transaction_id }
            | Self::AlreadyFinalized { transaction_id }
            | Self::AlreadyPrepared { transaction_id }
            | Self::ConnectionIsolation { transaction_id, .. }
            | Self::Timeout { transaction_id, .. }
            | Self::SavepointNotSupported { transaction_id, .. }
            | Self::SavepointExists { transaction_id, .. }
            | Self::Execution { transaction_id, .. }
            | Self::Begin { transaction_id, .. }
            | Self::Commit { transaction_id, .. }
            | Self::Rollback { transaction_id, .. }
            | Self::Prepare { transaction_id, .. }
            | Self::Savepoint { transaction_id, .. } => Some(transaction_id),
        }
    }

    /// True when this error, or the error it wraps, is a timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Begin { source, .. }
            | Self::Commit { source, .. }
            | Self::Rollback { source, .. }
            | Self::Prepare { source, .. }
            | Self::Savepoint { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}
