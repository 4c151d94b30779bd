//! Error types for the ledger

use crate::types::AccountId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Amount is zero, negative, or has more decimal places than allowed
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Applying the amount would exceed the largest representable balance
    #[error("Balance of {0} would overflow")]
    BalanceOverflow(AccountId),

    /// Self-transfer or malformed counterparty
    #[error("Invalid transfer: {0}")]
    InvalidTransfer(String),

    /// Referenced account has no record
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Account already exists
    #[error("Account already exists: {0}")]
    AccountExists(AccountId),

    /// Balance too low for the requested debit
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        /// Amount requested
        required: Decimal,
        /// Balance observed at the time of the check
        available: Decimal,
    },

    /// Stored version differs from the version the write was based on
    #[error("Version conflict on {account}: expected {expected}, found {actual}")]
    VersionConflict {
        /// Account being written
        account: AccountId,
        /// Version the caller read
        expected: u64,
        /// Version currently stored
        actual: u64,
    },

    /// Contention outlasted the retry budget
    #[error("Concurrency exhausted after {attempts} attempts")]
    ConcurrencyExhausted {
        /// Attempts made before giving up
        attempts: u32,
    },

    /// Credit leg of a transfer failed after the debit committed
    #[error("Transfer {from} -> {to} of {amount} failed ({compensation}): {reason}")]
    TransferFailed {
        /// Debited account
        from: AccountId,
        /// Account that should have been credited
        to: AccountId,
        /// Transfer amount
        amount: Decimal,
        /// Outcome of the compensating reversal
        compensation: Compensation,
        /// Error that stopped the credit leg
        reason: String,
    },

    /// Store connectivity or I/O failure
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal failure (task panicked, etc.)
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result of reversing the debit leg of a failed transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compensation {
    /// Debit was reversed; no money moved
    Reversed,
    /// Reversal failed; the debit is outstanding and needs manual reconciliation
    Unreconciled,
}

impl fmt::Display for Compensation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compensation::Reversed => write!(f, "debit reversed"),
            Compensation::Unreconciled => write!(f, "reversal failed, reconciliation required"),
        }
    }
}

/// Caller-facing failure taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or non-positive amount
    InvalidAmount,
    /// Self-transfer or malformed counterparty
    InvalidTransfer,
    /// Unknown account
    AccountNotFound,
    /// Duplicate account
    AccountExists,
    /// Business-rule violation
    InsufficientFunds,
    /// Transient contention; the whole operation may be retried
    ConcurrencyExhausted,
    /// Transfer second leg failed
    TransferFailed,
    /// Transient store failure
    StoreUnavailable,
    /// Anything else
    Internal,
}

impl ErrorKind {
    /// Stable label used in metrics and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidAmount => "invalid_amount",
            ErrorKind::InvalidTransfer => "invalid_transfer",
            ErrorKind::AccountNotFound => "account_not_found",
            ErrorKind::AccountExists => "account_exists",
            ErrorKind::InsufficientFunds => "insufficient_funds",
            ErrorKind::ConcurrencyExhausted => "concurrency_exhausted",
            ErrorKind::TransferFailed => "transfer_failed",
            ErrorKind::StoreUnavailable => "store_unavailable",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Project onto the caller-facing taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidAmount(_) | Error::BalanceOverflow(_) => ErrorKind::InvalidAmount,
            Error::InvalidTransfer(_) => ErrorKind::InvalidTransfer,
            Error::AccountNotFound(_) => ErrorKind::AccountNotFound,
            Error::AccountExists(_) => ErrorKind::AccountExists,
            Error::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            // A conflict only escapes the core once the retry budget is spent
            Error::VersionConflict { .. } | Error::ConcurrencyExhausted { .. } => {
                ErrorKind::ConcurrencyExhausted
            }
            Error::TransferFailed { .. } => ErrorKind::TransferFailed,
            Error::StoreUnavailable(_) | Error::Io(_) => ErrorKind::StoreUnavailable,
            Error::Serialization(_) | Error::Config(_) | Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the ledger retries this error internally
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::VersionConflict { .. })
    }

    /// Whether this error needs operator attention
    pub fn requires_reconciliation(&self) -> bool {
        matches!(
            self,
            Error::TransferFailed {
                compensation: Compensation::Unreconciled,
                ..
            }
        )
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::StoreUnavailable(err.to_string())
    }
}
