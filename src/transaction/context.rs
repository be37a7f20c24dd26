//! The transaction a task is currently running inside.
//!
//! Executors hold one binding per transaction they take part in. A query call uses a
//! binding only when its own task entered that transaction's scope, so unrelated tasks
//! sharing the executor keep acquiring their own connections.

tokio::task_local! {
    static CURRENT_TRANSACTION: String;
}

/// Id of the transaction whose scope the calling task is in, if any.
///
/// Spawned tasks do not inherit the scope.
pub fn current_transaction_id() -> Option<String> {
    CURRENT_TRANSACTION.try_with(Clone::clone).ok()
}

pub(crate) async fn within<F: Future>(transaction_id: &str, future: F) -> F::Output {
    CURRENT_TRANSACTION
        .scope(transaction_id.to_string(), future)
        .await
}
