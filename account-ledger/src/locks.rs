//! Per-account transfer locks
//!
//! Transfers serialize against each other on the accounts they touch. Locks
//! are always taken in ascending [`AccountId`] order, so two transfers moving
//! money between the same pair in opposite directions cannot wait on each
//! other in a cycle. Deposits and withdrawals never lock; they rely on the
//! store's compare-and-set alone.

use crate::types::AccountId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lazily populated table of async mutexes, one per account
#[derive(Debug, Default)]
pub struct LockTable {
    locks: DashMap<AccountId, Arc<Mutex<()>>>,
}

/// Guards held for the duration of a transfer
#[derive(Debug)]
pub struct LockSet {
    order: Vec<AccountId>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl LockSet {
    /// Accounts in the order their locks were acquired
    pub fn order(&self) -> &[AccountId] {
        &self.order
    }
}

impl LockTable {
    /// Create empty table
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, id: &AccountId) -> Arc<Mutex<()>> {
        self.locks
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquire the locks for `ids` in ascending id order; duplicates are locked once
    pub async fn acquire(&self, ids: &[&AccountId]) -> LockSet {
        let mut order: Vec<AccountId> = ids.iter().map(|id| (*id).clone()).collect();
        order.sort();
        order.dedup();

        let mut guards = Vec::with_capacity(order.len());
        for id in &order {
            // Clone the Arc out first; no map shard stays locked across the await
            let lock = self.handle(id);
            guards.push(lock.lock_owned().await);
        }

        LockSet {
            order,
            _guards: guards,
        }
    }

    /// Number of accounts that have ever been locked
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no account has been locked yet
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_acquire_sorts_and_dedups() {
        let table = LockTable::new();
        let bob = AccountId::new("bob");
        let alice = AccountId::new("alice");

        let set = table.acquire(&[&bob, &alice, &bob]).await;
        assert_eq!(set.order(), &[alice.clone(), bob.clone()]);
        assert_eq!(table.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_opposite_order_does_not_deadlock() {
        let table = Arc::new(LockTable::new());
        let a = AccountId::new("a");
        let b = AccountId::new("b");

        let mut handles = Vec::new();
        for i in 0..50 {
            let table = table.clone();
            let (x, y) = if i % 2 == 0 {
                (a.clone(), b.clone())
            } else {
                (b.clone(), a.clone())
            };
            handles.push(tokio::spawn(async move {
                let _set = table.acquire(&[&x, &y]).await;
                tokio::task::yield_now().await;
            }));
        }

        let all = futures_join(handles);
        tokio::time::timeout(Duration::from_secs(10), all)
            .await
            .expect("lock acquisition deadlocked");
    }

    async fn futures_join(handles: Vec<tokio::task::JoinHandle<()>>) {
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_lock_is_exclusive() {
        let table = LockTable::new();
        let a = AccountId::new("a");

        let held = table.acquire(&[&a]).await;
        let keys = [&a];
        let contender = table.acquire(&keys);
        tokio::pin!(contender);

        let blocked = tokio::time::timeout(Duration::from_millis(20), &mut contender).await;
        assert!(blocked.is_err());

        drop(held);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .expect("lock not released");
    }
}
