//! Core types for the ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Memory safety (no unsafe code)
//! - Exact arithmetic (Decimal for money)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Account identifier (email address or other opaque login handle)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Create new account ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Parse untrusted input: trims whitespace, rejects empty or control characters
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.chars().any(char::is_control) {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Storage key bytes
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Persisted account record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Immutable identifier
    pub id: AccountId,

    /// Current balance, never negative
    pub balance: Decimal,

    /// Incremented by every successful compare-and-set
    pub version: u64,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last balance change
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// New account with zero balance at version 0
    pub fn open(id: AccountId) -> Self {
        let now = Utc::now();
        Self {
            id,
            balance: Decimal::ZERO,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Successor record carrying `balance` at the next version
    pub fn next(&self, balance: Decimal) -> Self {
        Self {
            id: self.id.clone(),
            balance,
            version: self.version + 1,
            created_at: self.created_at,
            updated_at: Utc::now(),
        }
    }
}

/// Ledger operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Create a zero-balance account
    OpenAccount,
    /// Add funds
    Deposit,
    /// Remove funds
    Withdraw,
    /// Move funds between two accounts
    Transfer,
    /// Read the balance
    GetBalance,
}

impl OperationKind {
    /// Metric/log label
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::OpenAccount => "open_account",
            OperationKind::Deposit => "deposit",
            OperationKind::Withdraw => "withdraw",
            OperationKind::Transfer => "transfer",
            OperationKind::GetBalance => "get_balance",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-operation state
///
/// `Validated → Reading → Writing → {Committed | Retrying → Writing | Failed}`.
/// A transfer passes through `Writing` once per leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum OperationState {
    /// Input accepted
    Validated = 1,
    /// Reading current records
    Reading = 2,
    /// Issuing compare-and-set
    Writing = 3,
    /// Re-reading after a version conflict
    Retrying = 4,
    /// Applied (terminal)
    Committed = 5,
    /// Rejected or aborted (terminal)
    Failed = 6,
}

impl OperationState {
    /// Check if state is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationState::Committed | OperationState::Failed)
    }

    /// Whether `self → next` is a legal transition
    pub fn can_transition_to(&self, next: OperationState) -> bool {
        use OperationState::*;
        matches!(
            (self, next),
            (Validated, Reading)
                | (Validated, Failed)
                | (Reading, Writing)
                | (Reading, Failed)
                | (Writing, Writing)
                | (Writing, Committed)
                | (Writing, Retrying)
                | (Writing, Failed)
                | (Retrying, Writing)
                | (Retrying, Failed)
        )
    }
}

/// Result of a committed transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferReceipt {
    /// Operation ID (UUIDv7)
    pub operation_id: Uuid,

    /// Debited account
    pub from: AccountId,

    /// Credited account
    pub to: AccountId,

    /// Amount moved
    pub amount: Decimal,

    /// Source balance after the debit
    pub from_balance: Decimal,

    /// Destination balance after the credit
    pub to_balance: Decimal,

    /// Commit timestamp
    pub committed_at: DateTime<Utc>,
}
