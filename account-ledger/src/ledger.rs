//! Ledger core
//!
//! Validates and applies deposit, withdraw and transfer against an
//! [`AccountStore`] under optimistic concurrency control.
//!
//! Every balance change is a read followed by `compare_and_set` against the
//! version that was read. A conflict re-runs the whole read-check-write step
//! (bounded, with backoff), so a withdrawal's funds check always uses the
//! balance read in the same attempt.
//!
//! Transfers run as two legs, debit then credit, while holding both account
//! locks in ascending id order. If the credit leg cannot complete, the debit
//! is reversed before the transfer returns.
//!
//! # Example
//!
//! ```no_run
//! use account_ledger::{AccountId, Config, Ledger, MemoryStore};
//! use rust_decimal::Decimal;
//!
//! #[tokio::main]
//! async fn main() -> account_ledger::Result<()> {
//!     let ledger = Ledger::new(MemoryStore::new(), &Config::default())?;
//!     let alice = AccountId::new("alice@example.com");
//!
//!     ledger.open_account(&alice).await?;
//!     let balance = ledger.deposit(&alice, Decimal::new(5000, 2)).await?;
//!     assert_eq!(balance, Decimal::new(5000, 2));
//!     Ok(())
//! }
//! ```

use crate::{
    error::Compensation,
    locks::LockTable,
    metrics::Metrics,
    retry::RetryPolicy,
    store::{AccountStore, RocksStore},
    types::{Account, AccountId, OperationKind, OperationState, TransferReceipt},
    Config, Error, Result,
};
use chrono::Utc;
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Main ledger interface
///
/// Cheap to clone; clones share the store, lock table and metrics.
pub struct Ledger<S: AccountStore> {
    inner: Arc<Inner<S>>,
}

impl<S: AccountStore> Clone for Ledger<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: AccountStore> std::fmt::Debug for Ledger<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("max_attempts", &self.inner.retry.max_attempts())
            .field("max_scale", &self.inner.max_scale)
            .field("locked_accounts", &self.inner.locks.len())
            .finish_non_exhaustive()
    }
}

struct Inner<S> {
    store: Arc<S>,
    locks: LockTable,
    retry: RetryPolicy,
    compensation: RetryPolicy,
    max_scale: u32,
    metrics: Metrics,
}

/// Tracks one operation through its state machine
struct Tracker {
    operation_id: Uuid,
    kind: OperationKind,
    state: OperationState,
    started: Instant,
}

impl Tracker {
    fn new(kind: OperationKind) -> Self {
        Self {
            operation_id: Uuid::now_v7(),
            kind,
            state: OperationState::Validated,
            started: Instant::now(),
        }
    }

    fn advance(&mut self, next: OperationState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!(
            operation_id = %self.operation_id,
            operation = %self.kind,
            from = ?self.state,
            to = ?next,
            "State transition"
        );
        self.state = next;
    }

    /// Move to the terminal state matching `result` and record metrics
    fn finish<T>(&mut self, metrics: &Metrics, result: &Result<T>) {
        let outcome = match result {
            Ok(_) => {
                self.advance(OperationState::Committed);
                "committed"
            }
            Err(e) => {
                if !self.state.is_terminal() {
                    self.advance(OperationState::Failed);
                }
                if matches!(e, Error::ConcurrencyExhausted { .. }) {
                    metrics.record_exhausted();
                }
                e.kind().as_str()
            }
        };
        metrics.record_operation(
            self.kind.as_str(),
            outcome,
            self.started.elapsed().as_secs_f64(),
        );
    }
}

impl Ledger<RocksStore> {
    /// Open a ledger over the RocksDB store at `config.data_dir`
    pub fn open(config: &Config) -> Result<Self> {
        let store = RocksStore::open(config)?;
        Self::new(store, config)
    }
}

impl<S: AccountStore> Ledger<S> {
    /// Create a ledger owning `store`
    pub fn new(store: S, config: &Config) -> Result<Self> {
        Self::with_store(Arc::new(store), config)
    }

    /// Create a ledger over a shared store
    ///
    /// Ledgers built over the same store do not share transfer locks; their
    /// writes are still serialized by the store's compare-and-set.
    pub fn with_store(store: Arc<S>, config: &Config) -> Result<Self> {
        config.validate()?;
        let metrics = Metrics::new()
            .map_err(|e| Error::Internal(format!("Failed to create metrics: {}", e)))?;

        Ok(Self {
            inner: Arc::new(Inner {
                store,
                locks: LockTable::new(),
                retry: RetryPolicy::for_operations(&config.retry),
                compensation: RetryPolicy::for_compensation(&config.retry),
                max_scale: config.amounts.max_scale,
                metrics,
            }),
        })
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<S> {
        &self.inner.store
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    /// Check that `amount` is positive and within the configured precision
    pub fn validate_amount(&self, amount: Decimal) -> Result<()> {
        self.inner.validate_amount(amount)
    }

    /// Create a zero-balance account
    pub async fn open_account(&self, id: &AccountId) -> Result<Account> {
        let mut tracker = Tracker::new(OperationKind::OpenAccount);
        tracker.advance(OperationState::Reading);
        tracker.advance(OperationState::Writing);
        let result = self.inner.store.insert(id);
        tracker.finish(&self.inner.metrics, &result);

        if result.is_ok() {
            info!(operation_id = %tracker.operation_id, account = %id, "Account opened");
        }
        result
    }

    /// Current balance
    pub async fn balance(&self, id: &AccountId) -> Result<Decimal> {
        let started = Instant::now();
        let result = self.inner.store.get(id).map(|account| account.balance);
        let outcome = match &result {
            Ok(_) => "committed",
            Err(e) => e.kind().as_str(),
        };
        self.inner.metrics.record_operation(
            OperationKind::GetBalance.as_str(),
            outcome,
            started.elapsed().as_secs_f64(),
        );
        result
    }

    /// Full account record
    pub async fn account(&self, id: &AccountId) -> Result<Account> {
        self.inner.store.get(id)
    }

    /// Sum of every balance in the store
    pub async fn total_balance(&self) -> Result<Decimal> {
        let accounts = self.inner.store.accounts()?;
        Ok(accounts.iter().map(|a| a.balance).sum())
    }

    /// Add `amount` to the account; returns the new balance
    pub async fn deposit(&self, id: &AccountId, amount: Decimal) -> Result<Decimal> {
        self.inner.validate_amount(amount)?;

        let inner = self.inner.clone();
        let id = id.clone();
        run_detached(async move {
            let mut tracker = Tracker::new(OperationKind::Deposit);
            let result = inner.deposit(&mut tracker, &id, amount).await;
            tracker.finish(&inner.metrics, &result);
            result
        })
        .await
    }

    /// Remove `amount` from the account; returns the new balance
    pub async fn withdraw(&self, id: &AccountId, amount: Decimal) -> Result<Decimal> {
        self.inner.validate_amount(amount)?;

        let inner = self.inner.clone();
        let id = id.clone();
        run_detached(async move {
            let mut tracker = Tracker::new(OperationKind::Withdraw);
            let result = inner.withdraw(&mut tracker, &id, amount).await;
            tracker.finish(&inner.metrics, &result);
            result
        })
        .await
    }

    /// Move `amount` from `from` to `to`
    ///
    /// Either both balances change or neither does. If the credit leg fails
    /// after the debit committed, the debit is reversed and
    /// `TransferFailed` is returned.
    pub async fn transfer(
        &self,
        from: &AccountId,
        to: &AccountId,
        amount: Decimal,
    ) -> Result<TransferReceipt> {
        if from == to {
            return Err(Error::InvalidTransfer(format!(
                "cannot transfer from {} to itself",
                from
            )));
        }
        for (role, account) in [("source", from), ("recipient", to)] {
            if account.as_str().trim().is_empty() {
                return Err(Error::InvalidTransfer(format!("{} identifier is empty", role)));
            }
        }
        self.inner.validate_amount(amount)?;

        let inner = self.inner.clone();
        let from = from.clone();
        let to = to.clone();
        run_detached(async move {
            let mut tracker = Tracker::new(OperationKind::Transfer);
            let result = inner.transfer(&mut tracker, &from, &to, amount).await;
            tracker.finish(&inner.metrics, &result);
            result
        })
        .await
    }
}

/// Run an operation on its own task so that dropping the caller's future
/// cannot interrupt it between writes.
async fn run_detached<T, F>(operation: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(operation)
        .await
        .map_err(|e| Error::Internal(format!("Operation task failed: {}", e)))?
}

fn checked_add(id: &AccountId, balance: Decimal, amount: Decimal) -> Result<Decimal> {
    balance
        .checked_add(amount)
        .ok_or_else(|| Error::BalanceOverflow(id.clone()))
}

impl<S: AccountStore> Inner<S> {
    fn validate_amount(&self, amount: Decimal) -> Result<()> {
        if amount <= Decimal::ZERO {
            return Err(Error::InvalidAmount(
                "Amount must be positive".to_string(),
            ));
        }
        if amount.normalize().scale() > self.max_scale {
            return Err(Error::InvalidAmount(format!(
                "Amount {} has more than {} decimal places",
                amount, self.max_scale
            )));
        }
        Ok(())
    }

    /// One compare-and-set, counting conflicts
    fn write(&self, id: &AccountId, version: u64, balance: Decimal) -> Result<Account> {
        self.store
            .compare_and_set(id, version, balance)
            .map_err(|e| {
                if e.is_retryable() {
                    self.metrics.record_conflict();
                }
                e
            })
    }

    /// Bounded read-modify-write of one account.
    ///
    /// `apply` maps the balance read in an attempt to the balance to write,
    /// or rejects it.
    async fn update<F>(
        &self,
        policy: &RetryPolicy,
        label: &str,
        tracker: &mut Tracker,
        id: &AccountId,
        mut apply: F,
    ) -> Result<Account>
    where
        F: FnMut(Decimal) -> Result<Decimal>,
    {
        policy
            .run(label, |attempt| {
                if attempt > 0 {
                    tracker.advance(OperationState::Retrying);
                }
                let current = self.store.get(id)?;
                let balance = apply(current.balance)?;
                tracker.advance(OperationState::Writing);
                self.write(id, current.version, balance)
            })
            .await
    }

    async fn deposit(
        &self,
        tracker: &mut Tracker,
        id: &AccountId,
        amount: Decimal,
    ) -> Result<Decimal> {
        tracker.advance(OperationState::Reading);
        let account = self
            .update(&self.retry, "deposit", tracker, id, |balance| {
                checked_add(id, balance, amount)
            })
            .await?;

        info!(
            operation_id = %tracker.operation_id,
            account = %id,
            amount = %amount,
            balance = %account.balance,
            version = account.version,
            "Deposit committed"
        );
        Ok(account.balance)
    }

    async fn withdraw(
        &self,
        tracker: &mut Tracker,
        id: &AccountId,
        amount: Decimal,
    ) -> Result<Decimal> {
        tracker.advance(OperationState::Reading);
        let account = self
            .update(&self.retry, "withdraw", tracker, id, |balance| {
                if balance < amount {
                    return Err(Error::InsufficientFunds {
                        required: amount,
                        available: balance,
                    });
                }
                Ok(balance - amount)
            })
            .await?;

        info!(
            operation_id = %tracker.operation_id,
            account = %id,
            amount = %amount,
            balance = %account.balance,
            version = account.version,
            "Withdrawal committed"
        );
        Ok(account.balance)
    }

    async fn transfer(
        &self,
        tracker: &mut Tracker,
        from: &AccountId,
        to: &AccountId,
        amount: Decimal,
    ) -> Result<TransferReceipt> {
        tracker.advance(OperationState::Reading);

        // Both records must exist before any lock entry is created for them;
        // accounts are never deleted, so the check stays valid under the locks
        self.store.get(from)?;
        self.store.get(to)?;

        let locks = self.locks.acquire(&[from, to]).await;
        debug!(
            operation_id = %tracker.operation_id,
            order = ?locks.order(),
            "Transfer locks acquired"
        );

        let debited = self
            .update(&self.retry, "transfer debit", tracker, from, |balance| {
                if balance < amount {
                    return Err(Error::InsufficientFunds {
                        required: amount,
                        available: balance,
                    });
                }
                Ok(balance - amount)
            })
            .await?;

        debug!(
            operation_id = %tracker.operation_id,
            account = %from,
            balance = %debited.balance,
            "Transfer debit committed"
        );

        let credit = self
            .update(&self.retry, "transfer credit", tracker, to, |balance| {
                checked_add(to, balance, amount)
            })
            .await;

        match credit {
            Ok(credited) => {
                info!(
                    operation_id = %tracker.operation_id,
                    from = %from,
                    to = %to,
                    amount = %amount,
                    from_balance = %debited.balance,
                    to_balance = %credited.balance,
                    "Transfer committed"
                );

                Ok(TransferReceipt {
                    operation_id: tracker.operation_id,
                    from: from.clone(),
                    to: to.clone(),
                    amount,
                    from_balance: debited.balance,
                    to_balance: credited.balance,
                    committed_at: Utc::now(),
                })
            }
            Err(credit_err) => Err(self.reverse_debit(tracker, from, to, amount, credit_err).await),
        }
    }

    /// Return the debited amount to the source after a failed credit leg
    async fn reverse_debit(
        &self,
        tracker: &mut Tracker,
        from: &AccountId,
        to: &AccountId,
        amount: Decimal,
        credit_err: Error,
    ) -> Error {
        warn!(
            operation_id = %tracker.operation_id,
            from = %from,
            to = %to,
            amount = %amount,
            error = %credit_err,
            "Transfer credit failed, reversing debit"
        );

        let reversal = self
            .update(
                &self.compensation,
                "transfer reversal",
                tracker,
                from,
                |balance| checked_add(from, balance, amount),
            )
            .await;

        match reversal {
            Ok(restored) => {
                self.metrics.record_compensation("reversed");
                warn!(
                    operation_id = %tracker.operation_id,
                    account = %from,
                    balance = %restored.balance,
                    "Transfer debit reversed"
                );
                Error::TransferFailed {
                    from: from.clone(),
                    to: to.clone(),
                    amount,
                    compensation: Compensation::Reversed,
                    reason: credit_err.to_string(),
                }
            }
            Err(reversal_err) => {
                self.metrics.record_compensation("unreconciled");
                error!(
                    operation_id = %tracker.operation_id,
                    from = %from,
                    to = %to,
                    amount = %amount,
                    credit_error = %credit_err,
                    reversal_error = %reversal_err,
                    "Transfer reversal failed; manual reconciliation required"
                );
                Error::TransferFailed {
                    from: from.clone(),
                    to: to.clone(),
                    amount,
                    compensation: Compensation::Unreconciled,
                    reason: format!("{}; reversal failed: {}", credit_err, reversal_err),
                }
            }
        }
    }
}
