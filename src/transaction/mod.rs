//! Cross-executor transactions.
//!
//! A [`TransactionCoordinator`] runs one logical transaction over several executors,
//! possibly on different pools and database engines. Its
//! [`TransactionConnectionManager`] holds exactly one connection per distinct pool, so
//! executors sharing a pool also share a connection.
//!
//! Executor calls join a transaction only from inside its scope: the body of
//! [`TransactionCoordinator::run`] or a future passed to [`TransactionCoordinator::scope`].

mod connection_manager;
mod context;
mod coordinator;
mod error;
mod isolation;
mod savepoint;

pub use connection_manager::TransactionConnectionManager;
pub use context::current_transaction_id;
pub use coordinator::TransactionCoordinator;
pub use error::TransactionError;
pub use isolation::IsolationLevel;
pub use savepoint::Savepoint;

use std::time::Duration;

/// How long a transaction may stay open before `commit()` rolls it back instead.
pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(300);

/// Settings for one coordinated transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionOptions {
    pub isolation_level: IsolationLevel,
    pub timeout: Duration,
    /// Prepare every connection before committing, where the back-end supports it.
    pub use_2pc: bool,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            isolation_level: IsolationLevel::default(),
            timeout: DEFAULT_TRANSACTION_TIMEOUT,
            use_2pc: false,
        }
    }
}
