//! DelTran Account Ledger
//!
//! Balance ledger for identity-bound accounts: deposit, withdraw, transfer
//! and balance inquiry under optimistic concurrency control.
//!
//! # Architecture
//!
//! - **Account Store**: versioned records, `compare_and_set` is the only write path
//! - **Ledger Core**: validation, bounded retry, compensating transfers
//! - **Gateway**: maps authenticated caller requests onto ledger calls and
//!   ledger results onto user-facing outcomes
//!
//! # Invariants
//!
//! - Non-negative balances: `balance >= 0` after every committed operation
//! - Money conservation: a transfer never creates or destroys money
//! - No lost updates: every write is checked against the version it read
//! - Deadlock freedom: transfers lock account pairs in ascending id order

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod store;
pub mod retry;
pub mod locks;
pub mod ledger;
pub mod gateway;
pub mod error;
pub mod config;
pub mod metrics;

// Re-exports
pub use error::{Compensation, Error, ErrorKind, Result};
pub use types::{Account, AccountId, OperationKind, OperationState, TransferReceipt};
pub use store::{AccountStore, MemoryStore, RocksStore};
pub use ledger::Ledger;
pub use gateway::{CallerContext, FlashCategory, Gateway, OperationRequest, Outcome};
pub use config::Config;
