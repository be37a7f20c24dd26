//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - The `Pool`/`Connection` seam executors and transactions are written against
//! - The bundled sqlx-backed pools
//! - Parameter binding and row hydration

mod params;
pub mod driver;
pub mod pool;
pub mod types;

pub use driver::{DbPool, SqlxConnection, SqlxPool};
pub use pool::{Connection, Pool, PoolKey, SharedConnection, TwoPhaseConnection, share};
pub use types::ToRecord;
