//! Executor lookup.
//!
//! The registry is an explicit object handed to the facade and to every coordinator it
//! builds. Tests get isolation by constructing a fresh one.

use crate::executor::Executor;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

/// Registered executors, keyed by name.
#[derive(Debug, Default)]
pub struct ExecutorRegistry {
    executors: RwLock<HashMap<String, Arc<Executor>>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor under its name, replacing any previous one.
    pub fn register(&self, executor: impl Into<Arc<Executor>>) -> Arc<Executor> {
        let executor = executor.into();
        let name = executor.name().to_string();
        let previous = self
            .executors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), executor.clone());
        if previous.is_some() {
            warn!(executor = %name, "Replaced previously registered executor");
        } else {
            debug!(executor = %name, "Registered executor");
        }
        executor
    }

    pub fn get(&self, name: &str) -> Option<Arc<Executor>> {
        self.executors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Resolve a reference to a registered executor. Instances are returned as given.
    pub fn resolve(&self, executor: &ExecutorRef) -> Option<Arc<Executor>> {
        match executor {
            ExecutorRef::Named(name) => self.get(name),
            ExecutorRef::Instance(instance) => Some(instance.clone()),
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .executors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Every registered executor, ordered by name.
    pub fn all(&self) -> Vec<Arc<Executor>> {
        let mut executors: Vec<Arc<Executor>> = self
            .executors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        executors.sort_by(|a, b| a.name().cmp(b.name()));
        executors
    }

    pub fn len(&self) -> usize {
        self.executors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An executor named in a transaction request: by registered name or by instance.
#[derive(Debug, Clone)]
pub enum ExecutorRef {
    Named(String),
    Instance(Arc<Executor>),
}

impl From<&str> for ExecutorRef {
    fn from(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}

impl From<String> for ExecutorRef {
    fn from(name: String) -> Self {
        Self::Named(name)
    }
}

impl From<Arc<Executor>> for ExecutorRef {
    fn from(executor: Arc<Executor>) -> Self {
        Self::Instance(executor)
    }
}

impl From<&Arc<Executor>> for ExecutorRef {
    fn from(executor: &Arc<Executor>) -> Self {
        Self::Instance(executor.clone())
    }
}

impl std::fmt::Display for ExecutorRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Named(name) => f.write_str(name),
            Self::Instance(executor) => f.write_str(executor.name()),
        }
    }
}
