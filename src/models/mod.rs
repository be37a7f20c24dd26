//! Data models for Mayim.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod query;
pub mod transaction;

pub use connection::{ConnectionConfig, ConnectionConfigError, DatabaseType};
pub use query::{ParamStyle, Params, QueryParam, Record};
pub use transaction::{TransactionMetrics, TransactionState};
