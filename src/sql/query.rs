//! Named SQL queries and the per-executor query registry.

use super::convert::{BoundStatement, bind_params, detect_param_style};
use crate::error::{MayimError, MayimResult};
use crate::models::{DatabaseType, ParamStyle, Params};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// A SQL statement registered under a method name.
#[derive(Debug, Clone)]
pub struct SqlQuery {
    name: String,
    text: String,
    style: ParamStyle,
}

impl SqlQuery {
    /// Create a query, detecting its parameter style from the text.
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> MayimResult<Self> {
        let name = name.into();
        let text = text.into();
        let style = detect_param_style(&text).map_err(|e| {
            MayimError::invalid_input(format!("Query '{name}': {e}"))
        })?;
        Ok(Self { name, text, style })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn param_style(&self) -> ParamStyle {
        self.style
    }

    /// Render this query for `dialect` with `params` bound in placeholder order.
    pub fn bind(&self, dialect: DatabaseType, params: &Params) -> MayimResult<BoundStatement> {
        bind_params(&self.text, self.style, dialect, params)
            .map_err(|e| MayimError::invalid_input(format!("Query '{}': {e}", self.name)))
    }
}

/// Queries available to one executor, keyed by method name.
#[derive(Debug, Clone, Default)]
pub struct QueryRegistry {
    queries: HashMap<String, SqlQuery>,
}

impl QueryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.sql` file in `dir`; the file stem becomes the query name.
    pub fn load_dir(dir: impl AsRef<Path>) -> MayimResult<Self> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir).map_err(|e| {
            MayimError::configuration(format!(
                "Failed to read query directory {}: {e}",
                dir.display()
            ))
        })?;

        let mut registry = Self::new();
        for entry in entries {
            let path = entry
                .map_err(|e| MayimError::configuration(format!("Failed to list {}: {e}", dir.display())))?
                .path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("sql") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let text = std::fs::read_to_string(&path).map_err(|e| {
                MayimError::configuration(format!("Failed to read {}: {e}", path.display()))
            })?;
            registry.insert(SqlQuery::new(name, text.trim())?);
        }

        debug!(dir = %dir.display(), count = registry.len(), "Loaded SQL queries");
        Ok(registry)
    }

    pub fn insert(&mut self, query: SqlQuery) {
        self.queries.insert(query.name.clone(), query);
    }

    pub fn get(&self, name: &str) -> Option<&SqlQuery> {
        self.queries.get(name)
    }

    /// Registered query names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.queries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}
