//! SQL text handling: named queries, query files and placeholder conversion.

pub mod convert;
pub mod query;

pub use convert::{BoundStatement, bind_params, detect_param_style};
pub use query::{QueryRegistry, SqlQuery};
