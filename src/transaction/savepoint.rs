//! Named rollback points inside an active transaction.

use super::coordinator::TransactionCoordinator;
use super::error::TransactionError;
use std::fmt;
use tracing::debug;

/// A savepoint handle, valid until it is rolled back to or released.
#[must_use = "a savepoint stays open until it is released or rolled back"]
pub struct Savepoint<'a> {
    name: String,
    coordinator: &'a TransactionCoordinator,
    released: bool,
}

impl<'a> Savepoint<'a> {
    pub(crate) fn new(name: impl Into<String>, coordinator: &'a TransactionCoordinator) -> Self {
        Self {
            name: name.into(),
            coordinator,
            released: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Undo everything since the savepoint was taken. The handle is spent afterwards.
    pub async fn rollback(&mut self) -> Result<(), TransactionError> {
        self.finish("rollback", format!("ROLLBACK TO SAVEPOINT {}", self.name))
            .await?;
        debug!(
            transaction_id = %self.coordinator.transaction_id(),
            savepoint = %self.name,
            "Rolled back to savepoint"
        );
        Ok(())
    }

    /// Keep the work done since the savepoint and discard the savepoint itself.
    pub async fn release(&mut self) -> Result<(), TransactionError> {
        self.finish("release", format!("RELEASE SAVEPOINT {}", self.name))
            .await?;
        debug!(
            transaction_id = %self.coordinator.transaction_id(),
            savepoint = %self.name,
            "Released savepoint"
        );
        Ok(())
    }

    async fn finish(&mut self, operation: &'static str, sql: String) -> Result<(), TransactionError> {
        if self.released {
            return Err(TransactionError::SavepointReleased {
                name: self.name.clone(),
            });
        }
        self.coordinator
            .savepoint_command(&self.name, operation, &sql)
            .await?;
        self.released = true;
        self.coordinator.forget_savepoint(&self.name);
        Ok(())
    }
}

impl fmt::Debug for Savepoint<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Savepoint")
            .field("name", &self.name)
            .field("transaction_id", &self.coordinator.transaction_id())
            .field("released", &self.released)
            .finish()
    }
}

impl fmt::Display for Savepoint<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
