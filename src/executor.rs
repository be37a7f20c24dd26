//! Executors: named query sets bound to one pool.
//!
//! An executor owns a [`QueryRegistry`] and a pool. Each query call renders the named
//! statement for the pool's dialect, then runs it on the connection a coordinated
//! transaction injected when the calling task is inside that transaction's scope, or on
//! a connection of its own otherwise.

use crate::config::DEFAULT_ACQUIRE_TIMEOUT_SECS;
use crate::db::{Connection, Pool, SharedConnection};
use crate::error::{MayimError, MayimResult};
use crate::models::{DatabaseType, Params, QueryParam, Record};
use crate::sql::{BoundStatement, QueryRegistry, SqlQuery};
use crate::transaction::{TransactionError, current_transaction_id};
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/// Query name prefixes counted separately; anything else counts as `unknown`.
const QUERY_VERBS: [&str; 4] = ["select", "insert", "update", "delete"];

/// Calls per query kind, e.g. `{"insert": 2, "select": 5}`.
pub type QueryStatistics = BTreeMap<&'static str, u64>;

fn query_kind(name: &str) -> &'static str {
    QUERY_VERBS
        .iter()
        .find(|verb| {
            name.strip_prefix(**verb)
                .is_some_and(|rest| rest.starts_with('_'))
        })
        .copied()
        .unwrap_or("unknown")
}

struct TransactionBinding {
    connection: SharedConnection,
    /// Set once the transaction is prepared; the connection then refuses new statements.
    sealed: bool,
}

/// A data-access object bound to one connection pool.
pub struct Executor {
    name: String,
    pool: Arc<dyn Pool>,
    queries: QueryRegistry,
    acquire_timeout: Duration,
    /// Keyed by transaction id.
    bindings: Mutex<HashMap<String, TransactionBinding>>,
    statistics: Mutex<QueryStatistics>,
}

impl Executor {
    pub fn new(name: impl Into<String>, pool: Arc<dyn Pool>) -> Self {
        Self {
            name: name.into(),
            pool,
            queries: QueryRegistry::new(),
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
            bindings: Mutex::new(HashMap::new()),
            statistics: Mutex::new(QueryStatistics::new()),
        }
    }

    /// Register one query under `name`.
    pub fn with_query(mut self, name: impl Into<String>, sql: impl Into<String>) -> MayimResult<Self> {
        self.queries.insert(SqlQuery::new(name, sql)?);
        Ok(self)
    }

    pub fn with_queries(mut self, queries: QueryRegistry) -> Self {
        self.queries = queries;
        self
    }

    /// Load every `*.sql` file in `dir` as a query.
    pub fn with_queries_from_dir(self, dir: impl AsRef<Path>) -> MayimResult<Self> {
        let queries = QueryRegistry::load_dir(dir)?;
        Ok(self.with_queries(queries))
    }

    /// How long a non-transactional call waits for a pool connection.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pool(&self) -> &Arc<dyn Pool> {
        &self.pool
    }

    pub fn dialect(&self) -> DatabaseType {
        self.pool.dialect()
    }

    pub fn queries(&self) -> &QueryRegistry {
        &self.queries
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Calls made through this executor since creation or the last reset, by query kind.
    pub fn statistics(&self) -> QueryStatistics {
        self.counters().clone()
    }

    pub fn reset_statistics(&self) {
        self.counters().clear();
    }

    fn counters(&self) -> MutexGuard<'_, QueryStatistics> {
        self.statistics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn count(&self, query: &str) {
        *self.counters().entry(query_kind(query)).or_default() += 1;
    }

    // =========================================================================
    // Transaction binding
    // =========================================================================

    fn bindings(&self) -> MutexGuard<'_, HashMap<String, TransactionBinding>> {
        self.bindings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Route calls made inside `transaction_id`'s scope through `connection`.
    ///
    /// Any number of transactions may bind the same executor at once.
    pub fn bind_transaction(&self, transaction_id: &str, connection: SharedConnection) {
        debug!(executor = %self.name, transaction_id = %transaction_id, "Bound transactional connection");
        self.bindings().insert(
            transaction_id.to_string(),
            TransactionBinding {
                connection,
                sealed: false,
            },
        );
    }

    /// Refuse further statements for `transaction_id`.
    pub(crate) fn seal_transaction(&self, transaction_id: &str) {
        if let Some(binding) = self.bindings().get_mut(transaction_id) {
            binding.sealed = true;
        }
    }

    pub fn unbind_transaction(&self, transaction_id: &str) {
        if self.bindings().remove(transaction_id).is_some() {
            debug!(executor = %self.name, transaction_id = %transaction_id, "Unbound transactional connection");
        }
    }

    /// Ids of every transaction currently bound to this executor, sorted.
    pub fn bound_transactions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.bindings().keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// The connection `transaction_id` injected, if it is bound.
    pub fn transaction_connection(&self, transaction_id: &str) -> Option<SharedConnection> {
        self.bindings()
            .get(transaction_id)
            .map(|b| b.connection.clone())
    }

    /// The connection of the transaction the calling task is in, if this executor takes part.
    pub fn current_connection(&self) -> Option<SharedConnection> {
        current_transaction_id().and_then(|id| self.transaction_connection(&id))
    }

    fn routed_connection(&self) -> MayimResult<Option<SharedConnection>> {
        let Some(transaction_id) = current_transaction_id() else {
            return Ok(None);
        };
        match self.bindings().get(&transaction_id) {
            Some(binding) if binding.sealed => {
                Err(TransactionError::AlreadyPrepared { transaction_id }.into())
            }
            Some(binding) => Ok(Some(binding.connection.clone())),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Query methods
    // =========================================================================

    fn prepare(&self, query: &str, params: &Params) -> MayimResult<BoundStatement> {
        let sql = self
            .queries
            .get(query)
            .ok_or_else(|| MayimError::missing_sql(&self.name, query))?;
        sql.bind(self.dialect(), params)
    }

    /// Run a registered statement, returning the number of affected rows.
    pub async fn execute(&self, query: &str, params: Params) -> MayimResult<u64> {
        let statement = self.prepare(query, &params)?;
        debug!(executor = %self.name, query = %query, "Executing query");
        self.count(query);
        self.execute_statement(&statement.sql, &statement.params).await
    }

    /// Run a registered statement and hydrate every row.
    pub async fn fetch_all(&self, query: &str, params: Params) -> MayimResult<Vec<Record>> {
        let statement = self.prepare(query, &params)?;
        debug!(executor = %self.name, query = %query, "Fetching query");
        self.count(query);
        self.fetch_statement(&statement.sql, &statement.params).await
    }

    /// Like [`Executor::fetch_all`], failing with `RecordNotFound` when there are no rows.
    pub async fn fetch_one(&self, query: &str, params: Params) -> MayimResult<Record> {
        self.fetch_optional(query, params)
            .await?
            .ok_or_else(|| MayimError::record_not_found(query))
    }

    pub async fn fetch_optional(&self, query: &str, params: Params) -> MayimResult<Option<Record>> {
        Ok(self.fetch_all(query, params).await?.into_iter().next())
    }

    /// Fetch rows and deserialize each into `T`.
    pub async fn fetch_as<T: DeserializeOwned>(&self, query: &str, params: Params) -> MayimResult<Vec<T>> {
        self.fetch_all(query, params)
            .await?
            .into_iter()
            .map(hydrate)
            .collect()
    }

    pub async fn fetch_one_as<T: DeserializeOwned>(&self, query: &str, params: Params) -> MayimResult<T> {
        hydrate(self.fetch_one(query, params).await?)
    }

    /// Run SQL that is not registered as a query. Placeholders follow the same rules.
    pub async fn run_sql(&self, sql: &str, params: Params) -> MayimResult<u64> {
        let statement = SqlQuery::new("<inline>", sql)?.bind(self.dialect(), &params)?;
        self.count("");
        self.execute_statement(&statement.sql, &statement.params).await
    }

    async fn execute_statement(&self, sql: &str, params: &[QueryParam]) -> MayimResult<u64> {
        if let Some(shared) = self.routed_connection()? {
            let mut conn = shared.lock().await;
            return conn.execute(sql, params).await;
        }

        let mut conn = self.pool.acquire(self.acquire_timeout).await?;
        let result = conn.execute(sql, params).await;
        self.release(conn.as_mut()).await;
        result
    }

    async fn fetch_statement(&self, sql: &str, params: &[QueryParam]) -> MayimResult<Vec<Record>> {
        if let Some(shared) = self.routed_connection()? {
            let mut conn = shared.lock().await;
            return conn.fetch_all(sql, params).await;
        }

        let mut conn = self.pool.acquire(self.acquire_timeout).await?;
        let result = conn.fetch_all(sql, params).await;
        self.release(conn.as_mut()).await;
        result
    }

    async fn release(&self, conn: &mut dyn Connection) {
        if let Err(e) = conn.release().await {
            warn!(executor = %self.name, error = %e, "Failed to release connection");
        }
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("name", &self.name)
            .field("pool", &self.pool.name())
            .field("queries", &self.queries.names())
            .field("bound_transactions", &self.bound_transactions())
            .finish()
    }
}

fn hydrate<T: DeserializeOwned>(record: Record) -> MayimResult<T> {
    serde_json::from_value(serde_json::Value::Object(record))
        .map_err(|e| MayimError::hydration(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{DbPool, SqlxPool};
    use serde::Deserialize;

    async fn sqlite_executor() -> Executor {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let pool: Arc<dyn Pool> = Arc::new(SqlxPool::from_pool("memory", DbPool::SQLite(pool)));
        Executor::new("users", pool)
            .with_query("create_table", "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
            .unwrap()
            .with_query("insert_user", "INSERT INTO users (id, name) VALUES ($id, $name)")
            .unwrap()
            .with_query("user_by_id", "SELECT id, name FROM users WHERE id = $1")
            .unwrap()
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct User {
        id: i64,
        name: String,
    }

    #[tokio::test]
    async fn test_execute_and_fetch_without_transaction() {
        let executor = sqlite_executor().await;
        executor.execute("create_table", Params::None).await.unwrap();
        let inserted = executor
            .execute("insert_user", Params::keyword([("id", QueryParam::Int(1)), ("name", "ada".into())]))
            .await
            .unwrap();
        assert_eq!(inserted, 1);

        let user: User = executor
            .fetch_one_as("user_by_id", Params::positional([1]))
            .await
            .unwrap();
        assert_eq!(user, User { id: 1, name: "ada".into() });

        let missing = executor
            .fetch_optional("user_by_id", Params::positional([2]))
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_unknown_query_is_missing_sql() {
        let executor = sqlite_executor().await;
        let err = executor.execute("drop_everything", Params::None).await.unwrap_err();
        assert!(matches!(err, MayimError::MissingSql { .. }));
    }

    #[tokio::test]
    async fn test_fetch_one_on_empty_result() {
        let executor = sqlite_executor().await;
        executor.execute("create_table", Params::None).await.unwrap();
        let err = executor
            .fetch_one("user_by_id", Params::positional([9]))
            .await
            .unwrap_err();
        assert!(matches!(err, MayimError::RecordNotFound { .. }));
    }

    #[test]
    fn test_query_kind_from_name_prefix() {
        assert_eq!(query_kind("select_user_by_id"), "select");
        assert_eq!(query_kind("insert_user"), "insert");
        assert_eq!(query_kind("update_email"), "update");
        assert_eq!(query_kind("delete_user"), "delete");
        assert_eq!(query_kind("selection"), "unknown");
        assert_eq!(query_kind("create_table"), "unknown");
        assert_eq!(query_kind(""), "unknown");
    }

    #[tokio::test]
    async fn test_statistics_count_calls_by_kind() {
        let executor = sqlite_executor().await;
        executor.execute("create_table", Params::None).await.unwrap();
        executor
            .execute("insert_user", Params::keyword([("id", QueryParam::Int(1)), ("name", "ada".into())]))
            .await
            .unwrap();
        executor
            .fetch_optional("user_by_id", Params::positional([1]))
            .await
            .unwrap();
        executor.run_sql("DELETE FROM users", Params::None).await.unwrap();
        // Missing queries never reach the database and are not counted.
        executor.execute("select_nothing", Params::None).await.unwrap_err();

        let stats = executor.statistics();
        assert_eq!(stats.get("insert"), Some(&1));
        assert_eq!(stats.get("unknown"), Some(&3));
        assert_eq!(stats.get("select"), None);

        executor.reset_statistics();
        assert!(executor.statistics().is_empty());
    }

    #[tokio::test]
    async fn test_bindings_are_per_transaction() {
        let executor = sqlite_executor().await;
        let first = crate::db::share(executor.pool().acquire(Duration::from_secs(1)).await.unwrap());

        executor.bind_transaction("txn_b", first.clone());
        executor.bind_transaction("txn_a", first.clone());
        assert_eq!(executor.bound_transactions(), vec!["txn_a", "txn_b"]);
        assert!(Arc::ptr_eq(&executor.transaction_connection("txn_a").unwrap(), &first));
        // Outside any transaction scope nothing is routed.
        assert!(executor.current_connection().is_none());

        executor.unbind_transaction("txn_missing");
        executor.unbind_transaction("txn_a");
        assert_eq!(executor.bound_transactions(), vec!["txn_b"]);
        executor.unbind_transaction("txn_b");
        assert!(executor.transaction_connection("txn_b").is_none());
    }
}
