//! The cross-executor transaction state machine.
//!
//! ```text
//! not-begun --begin()--> active --commit()---> committed
//!                        active --rollback()-> rolled-back
//! ```
//!
//! Both terminal states are final. Cleanup (unbinding executors and releasing every
//! connection) runs exactly once, from whichever path reaches a terminal state.
//!
//! Executor calls run on the transaction's connections only inside [`TransactionCoordinator::scope`]
//! or the body of [`TransactionCoordinator::run`]. Elsewhere, including other tasks using the
//! same executors, they acquire connections of their own.

use super::connection_manager::TransactionConnectionManager;
use super::context;
use super::error::TransactionError;
use super::isolation::IsolationLevel;
use super::savepoint::Savepoint;
use super::TransactionOptions;
use crate::executor::Executor;
use crate::models::{TransactionMetrics, TransactionState};
use crate::registry::{ExecutorRef, ExecutorRegistry};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Default)]
struct CoordinatorState {
    state: TransactionState,
    started_at: Option<Instant>,
    started_at_utc: Option<DateTime<Utc>>,
    prepared: bool,
    savepoints: BTreeSet<String>,
}

/// One logical transaction spanning several executors.
///
/// Executors that share a pool share one connection; each distinct pool gets its own
/// connection and its own `BEGIN`. Construction does no I/O.
pub struct TransactionCoordinator {
    transaction_id: String,
    executors: Vec<Arc<Executor>>,
    isolation_level: IsolationLevel,
    timeout: Duration,
    use_2pc: bool,
    connections: TransactionConnectionManager,
    inner: Mutex<CoordinatorState>,
    cleaned_up: AtomicBool,
}

impl TransactionCoordinator {
    /// Resolve `executors` through `registry` and build an unstarted coordinator.
    pub fn new(
        registry: &ExecutorRegistry,
        executors: impl IntoIterator<Item = ExecutorRef>,
        options: TransactionOptions,
    ) -> Result<Self, TransactionError> {
        let mut resolved: Vec<Arc<Executor>> = Vec::new();
        for reference in executors {
            let executor = registry.resolve(&reference).ok_or_else(|| {
                TransactionError::configuration(format!("Executor {reference} not registered"))
            })?;
            if !resolved.iter().any(|e| Arc::ptr_eq(e, &executor)) {
                resolved.push(executor);
            }
        }

        if resolved.is_empty() {
            return Err(TransactionError::configuration(
                "a transaction needs at least one executor",
            ));
        }
        if options.timeout.is_zero() {
            return Err(TransactionError::configuration(
                "transaction timeout must be greater than zero",
            ));
        }

        let transaction_id = format!("txn_{}", Uuid::new_v4().simple());
        debug!(
            transaction_id = %transaction_id,
            executors = resolved.len(),
            isolation_level = %options.isolation_level,
            use_2pc = options.use_2pc,
            "Created transaction coordinator"
        );

        Ok(Self {
            connections: TransactionConnectionManager::new(&transaction_id, options.timeout),
            transaction_id,
            executors: resolved,
            isolation_level: options.isolation_level,
            timeout: options.timeout,
            use_2pc: options.use_2pc,
            inner: Mutex::new(CoordinatorState::default()),
            cleaned_up: AtomicBool::new(false),
        })
    }

    fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    pub fn state(&self) -> TransactionState {
        self.lock().state
    }

    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    pub fn is_committed(&self) -> bool {
        self.state() == TransactionState::Committed
    }

    pub fn is_rolled_back(&self) -> bool {
        self.state() == TransactionState::RolledBack
    }

    pub fn executors(&self) -> &[Arc<Executor>] {
        &self.executors
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn use_2pc(&self) -> bool {
        self.use_2pc
    }

    pub fn is_prepared(&self) -> bool {
        self.lock().prepared
    }

    /// Names of the savepoints currently open, sorted.
    pub fn savepoints(&self) -> Vec<String> {
        self.lock().savepoints.iter().cloned().collect()
    }

    /// Time since `begin()`, if it ran.
    pub fn elapsed(&self) -> Option<Duration> {
        self.lock().started_at.map(|t| t.elapsed())
    }

    pub async fn metrics(&self) -> TransactionMetrics {
        let pool_count = self.connections.pool_count().await;
        let inner = self.lock();
        TransactionMetrics {
            transaction_id: self.transaction_id.clone(),
            state: inner.state,
            executor_count: self.executors.len(),
            pool_count,
            isolation_level: self.isolation_level.name().to_string(),
            two_phase: self.use_2pc,
            prepared: inner.prepared,
            savepoints: inner.savepoints.iter().cloned().collect(),
            started_at: inner.started_at_utc,
            elapsed_ms: inner.started_at.map(|t| t.elapsed().as_millis() as u64),
        }
    }

    // =========================================================================
    // State checks
    // =========================================================================

    fn ensure_state(&self, expected: TransactionState) -> Result<(), TransactionError> {
        let transaction_id = self.transaction_id.clone();
        match self.state() {
            actual if actual == expected => Ok(()),
            TransactionState::NotBegun => Err(TransactionError::NotBegun { transaction_id }),
            TransactionState::Active => Err(TransactionError::AlreadyBegun { transaction_id }),
            TransactionState::Committed | TransactionState::RolledBack => {
                Err(TransactionError::AlreadyFinalized { transaction_id })
            }
        }
    }

    fn ensure_active(&self) -> Result<(), TransactionError> {
        self.ensure_state(TransactionState::Active)
    }

    /// Active and not yet prepared: new statements may still run.
    fn ensure_open(&self) -> Result<(), TransactionError> {
        self.ensure_active()?;
        if self.is_prepared() {
            return Err(TransactionError::AlreadyPrepared {
                transaction_id: self.transaction_id.clone(),
            });
        }
        Ok(())
    }

    fn timed_out(&self) -> Option<Duration> {
        self.elapsed().filter(|elapsed| *elapsed > self.timeout)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Acquire one connection per distinct pool, begin on each, and inject them.
    pub async fn begin(&self) -> Result<(), TransactionError> {
        self.ensure_state(TransactionState::NotBegun)?;

        match self.begin_connections().await {
            Ok(()) => {
                {
                    let mut inner = self.lock();
                    inner.state = TransactionState::Active;
                    inner.started_at = Some(Instant::now());
                    inner.started_at_utc = Some(Utc::now());
                }
                info!(
                    transaction_id = %self.transaction_id,
                    executors = self.executors.len(),
                    isolation_level = %self.isolation_level,
                    "Transaction begun"
                );
                Ok(())
            }
            Err(e) => {
                error!(transaction_id = %self.transaction_id, error = %e, "Failed to begin transaction");
                if let Err(rollback_error) = self.connections.rollback_all().await {
                    warn!(
                        transaction_id = %self.transaction_id,
                        error = %rollback_error,
                        "Rollback after failed begin did not complete"
                    );
                }
                self.lock().state = TransactionState::RolledBack;
                self.cleanup().await;
                Err(TransactionError::Begin {
                    transaction_id: self.transaction_id.clone(),
                    source: Box::new(e),
                })
            }
        }
    }

    async fn begin_connections(&self) -> Result<(), TransactionError> {
        for executor in &self.executors {
            self.connections.get_connection(executor.pool()).await?;
        }

        let level = self.isolation_level;
        self.connections
            .run_on_all("BEGIN", |dialect| dialect.begin_statements(level))
            .await?;

        for executor in &self.executors {
            self.connections.inject_into_executor(executor).await;
        }
        Ok(())
    }

    /// Commit on every connection, preparing first when two-phase commit is on.
    ///
    /// A transaction older than its timeout is rolled back instead. Any failure rolls
    /// back every connection before the error is returned.
    pub async fn commit(&self) -> Result<(), TransactionError> {
        self.ensure_active()?;
        let result = self.commit_connections().await;
        self.cleanup().await;
        result
    }

    async fn commit_connections(&self) -> Result<(), TransactionError> {
        if let Some(elapsed) = self.timed_out() {
            warn!(
                transaction_id = %self.transaction_id,
                elapsed_ms = elapsed.as_millis() as u64,
                timeout_ms = self.timeout.as_millis() as u64,
                "Transaction exceeded its timeout; rolling back"
            );
            self.rollback_or_log().await;
            return Err(TransactionError::Timeout {
                transaction_id: self.transaction_id.clone(),
                timeout: self.timeout,
            });
        }

        if self.use_2pc && !self.is_prepared() {
            if let Err(e) = self.prepare_connections().await {
                error!(transaction_id = %self.transaction_id, error = %e, "Prepare failed during commit; rolling back");
                self.rollback_or_log().await;
                return Err(TransactionError::Commit {
                    transaction_id: self.transaction_id.clone(),
                    source: Box::new(TransactionError::Prepare {
                        transaction_id: self.transaction_id.clone(),
                        source: Box::new(e),
                    }),
                });
            }
        }

        match self.connections.commit_all().await {
            Ok(()) => {
                self.lock().state = TransactionState::Committed;
                info!(
                    transaction_id = %self.transaction_id,
                    prepared = self.is_prepared(),
                    "Transaction committed"
                );
                Ok(())
            }
            Err(e) => {
                error!(transaction_id = %self.transaction_id, error = %e, "Commit failed; rolling back");
                self.rollback_or_log().await;
                Err(TransactionError::Commit {
                    transaction_id: self.transaction_id.clone(),
                    source: Box::new(e),
                })
            }
        }
    }

    /// Roll back every connection. The transaction ends rolled back even if this fails.
    pub async fn rollback(&self) -> Result<(), TransactionError> {
        self.ensure_active()?;
        let result = match self.guaranteed_rollback().await {
            Ok(()) => {
                info!(transaction_id = %self.transaction_id, "Transaction rolled back");
                Ok(())
            }
            Err(e) => {
                error!(
                    transaction_id = %self.transaction_id,
                    severity = "critical",
                    error = %e,
                    "Rollback failed; transaction marked rolled back"
                );
                Err(TransactionError::Rollback {
                    transaction_id: self.transaction_id.clone(),
                    source: Box::new(e),
                })
            }
        };
        self.cleanup().await;
        result
    }

    /// Two-phase commit, phase one.
    ///
    /// Returns `false` when some connection cannot prepare; the later commit is then a
    /// plain one. A failed prepare rolls the whole transaction back.
    pub async fn prepare_all(&self) -> Result<bool, TransactionError> {
        self.ensure_active()?;
        if self.is_prepared() {
            return Ok(true);
        }

        match self.prepare_connections().await {
            Ok(prepared) => Ok(prepared),
            Err(e) => {
                error!(transaction_id = %self.transaction_id, error = %e, "Prepare failed; rolling back");
                self.rollback_or_log().await;
                self.cleanup().await;
                Err(TransactionError::Prepare {
                    transaction_id: self.transaction_id.clone(),
                    source: Box::new(e),
                })
            }
        }
    }

    async fn prepare_connections(&self) -> Result<bool, TransactionError> {
        let prepared = self.connections.prepare_all().await?;
        if prepared {
            self.lock().prepared = true;
            for executor in &self.executors {
                executor.seal_transaction(&self.transaction_id);
            }
            info!(transaction_id = %self.transaction_id, "Transaction prepared");
        } else {
            warn!(
                transaction_id = %self.transaction_id,
                "Two-phase commit unavailable on some connection; committing in one phase"
            );
        }
        Ok(prepared)
    }

    async fn guaranteed_rollback(&self) -> Result<(), TransactionError> {
        let result = self.connections.rollback_all().await;
        self.lock().state = TransactionState::RolledBack;
        result
    }

    async fn rollback_or_log(&self) {
        if let Err(e) = self.guaranteed_rollback().await {
            error!(
                transaction_id = %self.transaction_id,
                severity = "critical",
                error = %e,
                "Guaranteed rollback failed"
            );
        }
    }

    async fn cleanup(&self) {
        if self.cleaned_up.swap(true, Ordering::SeqCst) {
            return;
        }
        for executor in &self.executors {
            executor.unbind_transaction(&self.transaction_id);
        }
        self.connections.cleanup().await;
        self.lock().savepoints.clear();
        debug!(transaction_id = %self.transaction_id, "Transaction cleaned up");
    }

    // =========================================================================
    // Savepoints
    // =========================================================================

    /// Open a savepoint on every connection.
    ///
    /// Every participating pool must support savepoints (PostgreSQL and MySQL).
    pub async fn savepoint(&self, name: &str) -> Result<Savepoint<'_>, TransactionError> {
        self.ensure_open()?;
        validate_savepoint_name(name)?;

        if self.lock().savepoints.contains(name) {
            return Err(TransactionError::SavepointExists {
                transaction_id: self.transaction_id.clone(),
                name: name.to_string(),
            });
        }

        if let Some(executor) = self.executors.iter().find(|e| !e.pool().supports_savepoints()) {
            return Err(TransactionError::SavepointNotSupported {
                transaction_id: self.transaction_id.clone(),
                db_type: executor.dialect().display_name().to_string(),
            });
        }

        self.savepoint_command(name, "create", &format!("SAVEPOINT {name}"))
            .await?;
        self.lock().savepoints.insert(name.to_string());
        debug!(transaction_id = %self.transaction_id, savepoint = %name, "Savepoint created");
        Ok(Savepoint::new(name, self))
    }

    pub(crate) async fn savepoint_command(
        &self,
        name: &str,
        operation: &'static str,
        sql: &str,
    ) -> Result<(), TransactionError> {
        self.ensure_open()?;
        self.connections
            .execute_on_all(sql)
            .await
            .map_err(|e| TransactionError::Savepoint {
                transaction_id: self.transaction_id.clone(),
                name: name.to_string(),
                operation,
                source: Box::new(e),
            })
    }

    pub(crate) fn forget_savepoint(&self, name: &str) {
        self.lock().savepoints.remove(name);
    }

    // =========================================================================
    // Scoped use
    // =========================================================================

    /// Run `future` inside this transaction's scope.
    ///
    /// Executor calls the future makes run on the connections this transaction injected.
    /// Tasks it spawns are outside the scope.
    pub async fn scope<F: Future>(&self, future: F) -> F::Output {
        context::within(&self.transaction_id, future).await
    }

    /// Begin, run `body` inside [`TransactionCoordinator::scope`], then commit on `Ok` or
    /// roll back on `Err`.
    ///
    /// The body's own error is always the one returned; a failed rollback after it is
    /// only logged. If the body finalizes the transaction itself, nothing more is sent.
    pub async fn run<T, E, F>(&self, body: F) -> Result<T, E>
    where
        F: AsyncFnOnce(&TransactionCoordinator) -> Result<T, E>,
        E: From<TransactionError>,
    {
        self.begin().await?;
        match self.scope(body(self)).await {
            Ok(value) => {
                if self.is_active() {
                    self.commit().await?;
                }
                Ok(value)
            }
            Err(err) => {
                if self.is_active() {
                    if let Err(rollback_error) = self.rollback().await {
                        warn!(
                            transaction_id = %self.transaction_id,
                            error = %rollback_error,
                            "Rollback after failed transaction body did not complete"
                        );
                    }
                }
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for TransactionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionCoordinator")
            .field("transaction_id", &self.transaction_id)
            .field("state", &self.state())
            .field(
                "executors",
                &self.executors.iter().map(|e| e.name()).collect::<Vec<_>>(),
            )
            .field("isolation_level", &self.isolation_level)
            .field("timeout", &self.timeout)
            .field("use_2pc", &self.use_2pc)
            .finish()
    }
}

impl Drop for TransactionCoordinator {
    fn drop(&mut self) {
        if !self.is_active() || self.cleaned_up.swap(true, Ordering::SeqCst) {
            return;
        }

        warn!(
            transaction_id = %self.transaction_id,
            "Transaction dropped while active; rolling back"
        );
        for executor in &self.executors {
            executor.unbind_transaction(&self.transaction_id);
        }

        let detached = self.connections.detach();
        if detached.is_empty() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(detached.abandon());
            }
            Err(_) => warn!(
                transaction_id = %self.transaction_id,
                "No async runtime available; connections released without rollback"
            ),
        }
    }
}

/// Savepoint names are spliced into SQL, so only plain identifiers are accepted.
fn validate_savepoint_name(name: &str) -> Result<(), TransactionError> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(TransactionError::configuration(format!(
            "invalid savepoint name '{name}': use letters, digits and underscores"
        )))
    }
}
