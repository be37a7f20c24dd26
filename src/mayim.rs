//! The caller-facing entry point.
//!
//! `Mayim` owns an [`ExecutorRegistry`], opens and closes the pools behind it, and is
//! the only place coordinators are built from.

use crate::db::{Pool, PoolKey};
use crate::error::{MayimError, MayimResult};
use crate::executor::{Executor, QueryStatistics};
use crate::registry::{ExecutorRef, ExecutorRegistry};
use crate::transaction::{
    IsolationLevel, TransactionCoordinator, TransactionError, TransactionOptions,
};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Default)]
pub struct Mayim {
    registry: Arc<ExecutorRegistry>,
}

impl Mayim {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share a registry with other facades or with tests.
    pub fn with_registry(registry: Arc<ExecutorRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ExecutorRegistry> {
        &self.registry
    }

    pub fn register(&self, executor: impl Into<Arc<Executor>>) -> Arc<Executor> {
        self.registry.register(executor)
    }

    pub fn get(&self, name: &str) -> MayimResult<Arc<Executor>> {
        self.registry
            .get(name)
            .ok_or_else(|| MayimError::executor_not_found(name))
    }

    /// Distinct pools behind the registered executors, in executor-name order.
    fn pools(&self) -> Vec<Arc<dyn Pool>> {
        let mut seen = HashSet::new();
        self.registry
            .all()
            .into_iter()
            .map(|executor| executor.pool().clone())
            .filter(|pool| seen.insert(PoolKey::of(pool)))
            .collect()
    }

    /// Open every distinct pool once.
    pub async fn connect(&self) -> MayimResult<()> {
        let pools = self.pools();
        for pool in &pools {
            pool.open().await?;
        }
        info!(pools = pools.len(), "Connected");
        Ok(())
    }

    pub async fn disconnect(&self) {
        let pools = self.pools();
        for pool in &pools {
            pool.close().await;
        }
        info!(pools = pools.len(), "Disconnected");
    }

    /// Query counters of every registered executor, keyed by executor name.
    pub fn statistics(&self) -> BTreeMap<String, QueryStatistics> {
        self.registry
            .all()
            .into_iter()
            .map(|executor| (executor.name().to_string(), executor.statistics()))
            .collect()
    }

    pub fn reset_statistics(&self) {
        for executor in self.registry.all() {
            executor.reset_statistics();
        }
    }

    /// Start describing a coordinated transaction. Nothing touches a database until
    /// the coordinator's `begin()`.
    pub fn transaction(&self) -> TransactionBuilder<'_> {
        TransactionBuilder {
            registry: &self.registry,
            executors: Vec::new(),
            options: TransactionOptions::default(),
            invalid_isolation: None,
        }
    }
}

/// Options for [`Mayim::transaction`].
#[derive(Debug)]
#[must_use = "call build() to create the coordinator"]
pub struct TransactionBuilder<'a> {
    registry: &'a ExecutorRegistry,
    executors: Vec<ExecutorRef>,
    options: TransactionOptions,
    invalid_isolation: Option<TransactionError>,
}

impl TransactionBuilder<'_> {
    pub fn executor(mut self, executor: impl Into<ExecutorRef>) -> Self {
        self.executors.push(executor.into());
        self
    }

    pub fn executors<I>(mut self, executors: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<ExecutorRef>,
    {
        self.executors.extend(executors.into_iter().map(Into::into));
        self
    }

    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.options.isolation_level = level;
        self.invalid_isolation = None;
        self
    }

    /// Parse a level such as `"repeatable read"`; a bad name fails `build()`.
    pub fn isolation_level_named(mut self, level: &str) -> Self {
        match level.parse() {
            Ok(level) => {
                self.options.isolation_level = level;
                self.invalid_isolation = None;
            }
            Err(e) => self.invalid_isolation = Some(e),
        }
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = timeout;
        self
    }

    pub fn two_phase(mut self, enabled: bool) -> Self {
        self.options.use_2pc = enabled;
        self
    }

    /// Without explicit executors, every registered executor joins.
    pub fn build(self) -> Result<TransactionCoordinator, TransactionError> {
        if let Some(e) = self.invalid_isolation {
            return Err(e);
        }
        let executors = if self.executors.is_empty() {
            self.registry
                .all()
                .into_iter()
                .map(ExecutorRef::Instance)
                .collect()
        } else {
            self.executors
        };
        TransactionCoordinator::new(self.registry, executors, self.options)
    }
}
