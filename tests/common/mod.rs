//! Recording in-memory pool shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use mayim::db::{Connection, Pool, TwoPhaseConnection};
use mayim::models::{DatabaseType, QueryParam, Record};
use mayim::{MayimError, MayimResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Every statement any mock connection ran, as "<pool>: <sql>".
pub type Log = Arc<Mutex<Vec<String>>>;

pub fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Number of log entries equal to "<pool>: <sql>".
pub fn count(log: &Log, pool: &str, sql: &str) -> usize {
    let expected = format!("{pool}: {sql}");
    entries(log).iter().filter(|e| **e == expected).count()
}

/// Number of log entries for `pool` whose SQL starts with `prefix`.
pub fn count_prefix(log: &Log, pool: &str, prefix: &str) -> usize {
    let expected = format!("{pool}: {prefix}");
    entries(log).iter().filter(|e| e.starts_with(&expected)).count()
}

#[derive(Debug)]
struct Shared {
    name: String,
    log: Log,
    fail_on: Mutex<Option<String>>,
    two_phase: bool,
    acquisitions: AtomicUsize,
    releases: AtomicUsize,
}

impl Shared {
    fn run(&self, sql: &str) -> MayimResult<()> {
        self.log.lock().unwrap().push(format!("{}: {}", self.name, sql));
        let fail_on = self.fail_on.lock().unwrap();
        match fail_on.as_deref() {
            Some(pattern) if sql.contains(pattern) => Err(MayimError::database(
                format!("simulated failure on '{sql}'"),
                None,
                "",
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Debug)]
pub struct MockPool {
    dialect: DatabaseType,
    shared: Arc<Shared>,
    acquire_delay: Option<Duration>,
    acquire_fails: bool,
}

impl MockPool {
    pub fn new(name: &str, dialect: DatabaseType, log: &Log) -> Self {
        Self {
            dialect,
            shared: Arc::new(Shared {
                name: name.to_string(),
                log: log.clone(),
                fail_on: Mutex::new(None),
                two_phase: false,
                acquisitions: AtomicUsize::new(0),
                releases: AtomicUsize::new(0),
            }),
            acquire_delay: None,
            acquire_fails: false,
        }
    }

    pub fn postgres(name: &str, log: &Log) -> Arc<Self> {
        Arc::new(Self::new(name, DatabaseType::PostgreSQL, log))
    }

    pub fn with_two_phase(mut self) -> Self {
        Arc::get_mut(&mut self.shared).unwrap().two_phase = true;
        self
    }

    pub fn with_acquire_delay(mut self, delay: Duration) -> Self {
        self.acquire_delay = Some(delay);
        self
    }

    pub fn with_failing_acquire(mut self) -> Self {
        self.acquire_fails = true;
        self
    }

    /// Make every statement containing `pattern` fail from now on.
    pub fn fail_on(&self, pattern: &str) {
        *self.shared.fail_on.lock().unwrap() = Some(pattern.to_string());
    }

    pub fn acquisitions(&self) -> usize {
        self.shared.acquisitions.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.shared.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Pool for MockPool {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn dialect(&self) -> DatabaseType {
        self.dialect
    }

    async fn open(&self) -> MayimResult<()> {
        Ok(())
    }

    async fn close(&self) {}

    async fn acquire(&self, _timeout: Duration) -> MayimResult<Box<dyn Connection>> {
        if let Some(delay) = self.acquire_delay {
            tokio::time::sleep(delay).await;
        }
        if self.acquire_fails {
            return Err(MayimError::connection("simulated acquire failure", ""));
        }
        self.shared.acquisitions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            shared: self.shared.clone(),
            released: false,
        }))
    }
}

pub struct MockConnection {
    shared: Arc<Shared>,
    released: bool,
}

impl MockConnection {
    fn check(&self) -> MayimResult<()> {
        if self.released {
            return Err(MayimError::internal("connection already released"));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn execute(&mut self, sql: &str, _params: &[QueryParam]) -> MayimResult<u64> {
        self.check()?;
        self.shared.run(sql)?;
        Ok(1)
    }

    async fn fetch_all(&mut self, sql: &str, _params: &[QueryParam]) -> MayimResult<Vec<Record>> {
        self.check()?;
        self.shared.run(sql)?;
        Ok(Vec::new())
    }

    async fn release(&mut self) -> MayimResult<()> {
        self.check()?;
        self.released = true;
        self.shared.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn as_two_phase(&mut self) -> Option<&mut dyn TwoPhaseConnection> {
        if self.shared.two_phase {
            Some(self as &mut dyn TwoPhaseConnection)
        } else {
            None
        }
    }
}

#[async_trait]
impl TwoPhaseConnection for MockConnection {
    async fn prepare(&mut self, xid: &str) -> MayimResult<()> {
        self.check()?;
        self.shared.run(&format!("PREPARE TRANSACTION '{xid}'"))
    }

    async fn commit_prepared(&mut self, xid: &str) -> MayimResult<()> {
        self.check()?;
        self.shared.run(&format!("COMMIT PREPARED '{xid}'"))
    }

    async fn rollback_prepared(&mut self, xid: &str) -> MayimResult<()> {
        self.check()?;
        self.shared.run(&format!("ROLLBACK PREPARED '{xid}'"))
    }
}
