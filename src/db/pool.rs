//! The pool and connection seam.
//!
//! Executors and the transaction coordinator only ever see these traits. The bundled
//! implementation is [`crate::db::SqlxPool`]; anything else (an ODBC bridge to SQL
//! Server, a test double) plugs in by implementing [`Pool`] and [`Connection`].
//!
//! Two-phase commit is an optional capability: a connection opts in by returning
//! itself from [`Connection::as_two_phase`].

use crate::error::MayimResult;
use crate::models::{DatabaseType, QueryParam, Record};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A connection held by one owner at a time, shared between executors in a transaction.
pub type SharedConnection = Arc<tokio::sync::Mutex<Box<dyn Connection>>>;

/// A connection-acquisition resource for one database back-end instance.
#[async_trait]
pub trait Pool: Send + Sync + fmt::Debug {
    /// Identifier used in logs and error messages.
    fn name(&self) -> &str;

    fn dialect(&self) -> DatabaseType;

    fn supports_savepoints(&self) -> bool {
        self.dialect().supports_savepoints()
    }

    /// Verify the pool can reach its database.
    async fn open(&self) -> MayimResult<()>;

    async fn close(&self);

    /// Check out a connection, waiting at most `timeout`.
    async fn acquire(&self, timeout: Duration) -> MayimResult<Box<dyn Connection>>;
}

/// One checked-out connection.
#[async_trait]
pub trait Connection: Send {
    /// Run a statement, returning the number of affected rows.
    async fn execute(&mut self, sql: &str, params: &[QueryParam]) -> MayimResult<u64>;

    async fn fetch_all(&mut self, sql: &str, params: &[QueryParam]) -> MayimResult<Vec<Record>>;

    async fn commit(&mut self) -> MayimResult<()> {
        self.execute("COMMIT", &[]).await.map(|_| ())
    }

    async fn rollback(&mut self) -> MayimResult<()> {
        self.execute("ROLLBACK", &[]).await.map(|_| ())
    }

    /// Hand the connection back to its pool. Later calls must fail.
    async fn release(&mut self) -> MayimResult<()>;

    fn as_two_phase(&mut self) -> Option<&mut dyn TwoPhaseConnection> {
        None
    }
}

/// Connections able to take part in a two-phase commit.
#[async_trait]
pub trait TwoPhaseConnection: Send {
    /// Phase one: persist the open transaction under `xid` and detach it from the session.
    async fn prepare(&mut self, xid: &str) -> MayimResult<()>;

    async fn commit_prepared(&mut self, xid: &str) -> MayimResult<()>;

    async fn rollback_prepared(&mut self, xid: &str) -> MayimResult<()>;
}

/// Identity of a pool: the address of its shared allocation.
///
/// Two executors built from clones of the same `Arc<dyn Pool>` have equal keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolKey(usize);

impl PoolKey {
    pub fn of(pool: &Arc<dyn Pool>) -> Self {
        Self(Arc::as_ptr(pool) as *const () as usize)
    }
}

/// Wrap a connection so it can be shared between executors.
pub fn share(connection: Box<dyn Connection>) -> SharedConnection {
    Arc::new(tokio::sync::Mutex::new(connection))
}
