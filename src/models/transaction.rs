//! Transaction state and metrics models.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a coordinated transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    #[default]
    NotBegun,
    Active,
    Committed,
    RolledBack,
}

impl TransactionState {
    /// Check if the transaction is still active.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Check if the transaction has ended (committed or rolled back).
    pub fn is_finalized(&self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NotBegun => "not_begun",
            Self::Active => "active",
            Self::Committed => "committed",
            Self::RolledBack => "rolled_back",
        };
        f.write_str(s)
    }
}

/// Point-in-time snapshot of a coordinator, for logs and CLI output.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionMetrics {
    pub transaction_id: String,
    pub state: TransactionState,
    pub executor_count: usize,
    /// Distinct pools holding a transactional connection.
    pub pool_count: usize,
    pub isolation_level: String,
    pub two_phase: bool,
    pub prepared: bool,
    pub savepoints: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        assert!(!TransactionState::NotBegun.is_active());
        assert!(!TransactionState::NotBegun.is_finalized());
        assert!(TransactionState::Active.is_active());
        assert!(TransactionState::Committed.is_finalized());
        assert!(TransactionState::RolledBack.is_finalized());
    }

    #[test]
    fn test_state_serializes_snake_case() {
        let json = serde_json::to_string(&TransactionState::RolledBack).unwrap();
        assert_eq!(json, r#""rolled_back""#);
        assert_eq!(TransactionState::NotBegun.to_string(), "not_begun");
    }
}
