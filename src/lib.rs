//! Mayim Library
//!
//! A lightweight data-access layer: named SQL queries bound to pooled connections on
//! PostgreSQL, MySQL and SQLite, with transactions coordinated across executors that
//! may use different pools.

pub mod config;
pub mod db;
pub mod error;
pub mod executor;
pub mod mayim;
pub mod models;
pub mod registry;
pub mod sql;
pub mod transaction;

pub use config::Config;
pub use error::{MayimError, MayimResult};
pub use executor::Executor;
pub use mayim::{Mayim, TransactionBuilder};
pub use models::{Params, QueryParam, Record};
pub use registry::{ExecutorRef, ExecutorRegistry};
pub use transaction::{
    IsolationLevel, Savepoint, TransactionCoordinator, TransactionError, TransactionOptions,
};
