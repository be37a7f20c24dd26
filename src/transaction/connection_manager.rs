//! One connection per pool for the lifetime of a transaction.
//!
//! The manager is the only owner of transactional connections. Executors sharing a pool
//! receive the same [`SharedConnection`], so they see each other's uncommitted writes
//! and roll back together.

use super::error::TransactionError;
use crate::db::{Pool, PoolKey, SharedConnection, share};
use crate::error::{MayimError, MayimResult};
use crate::executor::Executor;
use crate::models::DatabaseType;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

struct ManagedConnection {
    key: PoolKey,
    pool: String,
    dialect: DatabaseType,
    connection: SharedConnection,
    /// Two-phase transaction id once prepared.
    prepared: Option<String>,
}

pub struct TransactionConnectionManager {
    transaction_id: String,
    timeout: Duration,
    /// Insertion order is acquisition order; commands run in that order.
    connections: Mutex<Vec<ManagedConnection>>,
    active: AtomicBool,
}

impl TransactionConnectionManager {
    pub fn new(transaction_id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            timeout,
            connections: Mutex::new(Vec::new()),
            active: AtomicBool::new(true),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Number of pools holding a connection.
    pub async fn pool_count(&self) -> usize {
        self.connections.lock().await.len()
    }

    /// The cached connection for `pool`, acquiring one on first use.
    pub async fn get_connection(
        &self,
        pool: &Arc<dyn Pool>,
    ) -> Result<SharedConnection, TransactionError> {
        if !self.is_active() {
            return Err(TransactionError::connection_isolation(
                &self.transaction_id,
                "connection manager is no longer active",
                None,
            ));
        }

        let key = PoolKey::of(pool);
        // Held across the acquire so concurrent requests for one pool cannot both acquire.
        let mut connections = self.connections.lock().await;
        if let Some(existing) = connections.iter().find(|c| c.key == key) {
            return Ok(existing.connection.clone());
        }

        let connection = match tokio::time::timeout(self.timeout, pool.acquire(self.timeout)).await
        {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => {
                return Err(TransactionError::connection_isolation(
                    &self.transaction_id,
                    format!("failed to acquire connection from pool '{}'", pool.name()),
                    Some(e),
                ));
            }
            Err(_) => {
                return Err(TransactionError::connection_isolation(
                    &self.transaction_id,
                    format!(
                        "timed out after {:.1}s acquiring connection from pool '{}'",
                        self.timeout.as_secs_f64(),
                        pool.name()
                    ),
                    Some(MayimError::timeout(
                        "transaction connection acquire",
                        self.timeout.as_secs(),
                    )),
                ));
            }
        };

        debug!(
            transaction_id = %self.transaction_id,
            pool = %pool.name(),
            "Acquired transactional connection"
        );
        let connection = share(connection);
        connections.push(ManagedConnection {
            key,
            pool: pool.name().to_string(),
            dialect: pool.dialect(),
            connection: connection.clone(),
            prepared: None,
        });
        Ok(connection)
    }

    /// The cached connection for `pool`, if one was acquired.
    pub async fn connection_for(&self, pool: &Arc<dyn Pool>) -> Option<SharedConnection> {
        let key = PoolKey::of(pool);
        self.connections
            .lock()
            .await
            .iter()
            .find(|c| c.key == key)
            .map(|c| c.connection.clone())
    }

    /// Run `sql` on every cached connection, reporting every failure together.
    pub async fn execute_on_all(&self, sql: &str) -> Result<(), TransactionError> {
        self.run_on_all(sql, |_| vec![sql.to_string()]).await
    }

    /// Run the statements `statements` renders for each connection's dialect.
    ///
    /// A connection stops at its first failing statement; the others still run.
    pub async fn run_on_all<F>(&self, command: &str, statements: F) -> Result<(), TransactionError>
    where
        F: Fn(DatabaseType) -> Vec<String> + Send,
    {
        let connections = self.connections.lock().await;
        let mut failures = Vec::new();

        for managed in connections.iter() {
            let mut conn = managed.connection.lock().await;
            for sql in statements(managed.dialect) {
                debug!(
                    transaction_id = %self.transaction_id,
                    pool = %managed.pool,
                    sql = %sql,
                    "Executing transaction command"
                );
                if let Err(e) = conn.execute(&sql, &[]).await {
                    failures.push(format!("pool '{}': {}", managed.pool, e));
                    break;
                }
            }
        }

        self.aggregate(command, failures)
    }

    /// Phase one of two-phase commit.
    ///
    /// Returns `false` without preparing anything when some connection cannot take part.
    pub async fn prepare_all(&self) -> Result<bool, TransactionError> {
        let mut connections = self.connections.lock().await;

        for managed in connections.iter() {
            let mut conn = managed.connection.lock().await;
            if conn.as_two_phase().is_none() {
                debug!(
                    transaction_id = %self.transaction_id,
                    pool = %managed.pool,
                    "Connection does not support two-phase commit"
                );
                return Ok(false);
            }
        }

        let mut failures = Vec::new();
        for (index, managed) in connections.iter_mut().enumerate() {
            let xid = format!("{}_{}", self.transaction_id, index);
            let mut conn = managed.connection.lock().await;
            let Some(two_phase) = conn.as_two_phase() else {
                continue;
            };
            let result = two_phase.prepare(&xid).await;
            match result {
                Ok(()) => {
                    debug!(transaction_id = %self.transaction_id, pool = %managed.pool, xid = %xid, "Prepared");
                    managed.prepared = Some(xid);
                }
                Err(e) => failures.push(format!("pool '{}': {}", managed.pool, e)),
            }
        }

        self.aggregate("PREPARE TRANSACTION", failures)?;
        Ok(true)
    }

    /// `COMMIT` everywhere; `COMMIT PREPARED` where prepared.
    pub async fn commit_all(&self) -> Result<(), TransactionError> {
        self.finish_all(Finish::Commit).await
    }

    /// `ROLLBACK` everywhere; `ROLLBACK PREPARED` where prepared.
    pub async fn rollback_all(&self) -> Result<(), TransactionError> {
        self.finish_all(Finish::Rollback).await
    }

    async fn finish_all(&self, finish: Finish) -> Result<(), TransactionError> {
        let connections = self.connections.lock().await;
        let mut failures = Vec::new();

        for managed in connections.iter() {
            debug!(
                transaction_id = %self.transaction_id,
                pool = %managed.pool,
                command = finish.command(managed.prepared.is_some()),
                "Finishing transaction"
            );
            if let Err(e) = finish_one(managed, finish).await {
                failures.push(format!("pool '{}': {}", managed.pool, e));
            }
        }

        self.aggregate(finish.command(false), failures)
    }

    /// Bind the connection cached for `executor`'s pool to this transaction's id, so
    /// calls made inside the transaction's scope run on it.
    pub async fn inject_into_executor(&self, executor: &Executor) {
        if let Some(connection) = self.connection_for(executor.pool()).await {
            executor.bind_transaction(&self.transaction_id, connection);
        }
    }

    /// Deactivate and release every connection. Release failures are logged.
    pub async fn cleanup(&self) {
        self.active.store(false, Ordering::SeqCst);
        let connections = std::mem::take(&mut *self.connections.lock().await);
        release_all(&self.transaction_id, connections).await;
    }

    /// Take the connections out synchronously, for use where nothing can be awaited.
    pub(crate) fn detach(&self) -> DetachedConnections {
        self.active.store(false, Ordering::SeqCst);
        let connections = match self.connections.try_lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(_) => Vec::new(),
        };
        DetachedConnections {
            transaction_id: self.transaction_id.clone(),
            connections,
        }
    }

    fn aggregate(&self, command: &str, failures: Vec<String>) -> Result<(), TransactionError> {
        if failures.is_empty() {
            return Ok(());
        }
        Err(TransactionError::Execution {
            transaction_id: self.transaction_id.clone(),
            command: command.to_string(),
            failures,
        })
    }
}

impl std::fmt::Debug for TransactionConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionConnectionManager")
            .field("transaction_id", &self.transaction_id)
            .field("timeout", &self.timeout)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy)]
enum Finish {
    Commit,
    Rollback,
}

impl Finish {
    fn command(self, prepared: bool) -> &'static str {
        match (self, prepared) {
            (Finish::Commit, false) => "COMMIT",
            (Finish::Commit, true) => "COMMIT PREPARED",
            (Finish::Rollback, false) => "ROLLBACK",
            (Finish::Rollback, true) => "ROLLBACK PREPARED",
        }
    }
}

async fn finish_one(managed: &ManagedConnection, finish: Finish) -> MayimResult<()> {
    let mut conn = managed.connection.lock().await;
    match managed.prepared.as_deref() {
        Some(xid) => match conn.as_two_phase() {
            Some(two_phase) => match finish {
                Finish::Commit => two_phase.commit_prepared(xid).await,
                Finish::Rollback => two_phase.rollback_prepared(xid).await,
            },
            None => Err(MayimError::internal(format!(
                "prepared transaction {xid} lost its two-phase connection"
            ))),
        },
        None => match finish {
            Finish::Commit => conn.commit().await,
            Finish::Rollback => conn.rollback().await,
        },
    }
}

async fn release_all(transaction_id: &str, connections: Vec<ManagedConnection>) {
    for managed in connections {
        let mut conn = managed.connection.lock().await;
        match conn.release().await {
            Ok(()) => debug!(transaction_id = %transaction_id, pool = %managed.pool, "Released transactional connection"),
            Err(e) => warn!(
                transaction_id = %transaction_id,
                pool = %managed.pool,
                error = %e,
                "Failed to release transactional connection"
            ),
        }
    }
}

/// Connections pulled out of a manager that is being dropped mid-transaction.
pub(crate) struct DetachedConnections {
    transaction_id: String,
    connections: Vec<ManagedConnection>,
}

impl DetachedConnections {
    pub(crate) fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Roll back and release everything, logging failures.
    pub(crate) async fn abandon(self) {
        for managed in &self.connections {
            if let Err(e) = finish_one(managed, Finish::Rollback).await {
                warn!(
                    transaction_id = %self.transaction_id,
                    pool = %managed.pool,
                    error = %e,
                    "Rollback of abandoned transaction failed"
                );
            }
        }
        release_all(&self.transaction_id, self.connections).await;
    }
}
