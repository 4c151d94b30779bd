//! Account store
//!
//! Versioned key-value mapping from [`AccountId`] to [`Account`]. The store is
//! the single point of serialization for an account's balance: the only way to
//! change a balance is [`AccountStore::compare_and_set`], which succeeds only
//! when the caller's expected version is still current.
//!
//! # Backends
//!
//! - [`MemoryStore`] - `DashMap`, per-key shard locking
//! - [`RocksStore`] - RocksDB, striped write locks, synced WAL writes

use crate::{
    error::{Error, Result},
    types::{Account, AccountId},
    Config,
};
use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::Mutex;
use rocksdb::{IteratorMode, Options, WriteOptions, DB};
use rust_decimal::Decimal;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Versioned account storage
///
/// Implementations must be safe to call concurrently and must make every
/// successful write durable before returning.
pub trait AccountStore: Send + Sync + 'static {
    /// Fetch an account
    fn get(&self, id: &AccountId) -> Result<Account>;

    /// Replace the balance if the stored version equals `expected_version`.
    ///
    /// On success the version is incremented and the new record returned.
    /// Fails with `VersionConflict` on mismatch and `AccountNotFound` when
    /// there is no record.
    fn compare_and_set(
        &self,
        id: &AccountId,
        expected_version: u64,
        new_balance: Decimal,
    ) -> Result<Account>;

    /// Create a zero-balance account; fails with `AccountExists` on duplicates
    fn insert(&self, id: &AccountId) -> Result<Account>;

    /// Snapshot of every account, ordered by id
    fn accounts(&self) -> Result<Vec<Account>>;
}

fn check_balance(id: &AccountId, new_balance: Decimal) -> Result<()> {
    if new_balance < Decimal::ZERO {
        return Err(Error::InvalidAmount(format!(
            "balance of {} cannot become negative ({})",
            id, new_balance
        )));
    }
    Ok(())
}

/// In-memory store backed by `DashMap`
#[derive(Debug, Default)]
pub struct MemoryStore {
    accounts: DashMap<AccountId, Account>,
}

impl MemoryStore {
    /// Create empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl AccountStore for MemoryStore {
    fn get(&self, id: &AccountId) -> Result<Account> {
        self.accounts
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::AccountNotFound(id.clone()))
    }

    fn compare_and_set(
        &self,
        id: &AccountId,
        expected_version: u64,
        new_balance: Decimal,
    ) -> Result<Account> {
        check_balance(id, new_balance)?;

        // Shard write lock held for the whole check-and-replace
        let mut entry = self
            .accounts
            .get_mut(id)
            .ok_or_else(|| Error::AccountNotFound(id.clone()))?;

        if entry.version != expected_version {
            return Err(Error::VersionConflict {
                account: id.clone(),
                expected: expected_version,
                actual: entry.version,
            });
        }

        let updated = entry.next(new_balance);
        *entry = updated.clone();
        Ok(updated)
    }

    fn insert(&self, id: &AccountId) -> Result<Account> {
        match self.accounts.entry(id.clone()) {
            Entry::Occupied(_) => Err(Error::AccountExists(id.clone())),
            Entry::Vacant(slot) => {
                let account = Account::open(id.clone());
                slot.insert(account.clone());
                Ok(account)
            }
        }
    }

    fn accounts(&self) -> Result<Vec<Account>> {
        let mut accounts: Vec<Account> = self
            .accounts
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        accounts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(accounts)
    }
}

/// Key prefix for account records
const ACCOUNT_PREFIX: &[u8] = b"account:";

/// Number of write-lock stripes
const LOCK_STRIPES: usize = 64;

/// RocksDB-backed store
///
/// RocksDB has no native compare-and-set, so each write holds the stripe lock
/// covering its key across read, version check, and put.
pub struct RocksStore {
    db: Arc<DB>,
    stripes: Vec<Mutex<()>>,
    sync_writes: bool,
}

impl std::fmt::Debug for RocksStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksStore")
            .field("path", &self.db.path())
            .field("sync_writes", &self.sync_writes)
            .finish()
    }
}

impl RocksStore {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);
        db_opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let db = DB::open(&db_opts, path)?;

        tracing::info!(
            path = ?path,
            sync_writes = config.rocksdb.sync_writes,
            "Opened RocksDB account store"
        );

        Ok(Self {
            db: Arc::new(db),
            stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            sync_writes: config.rocksdb.sync_writes,
        })
    }

    fn key(id: &AccountId) -> Vec<u8> {
        let mut key = ACCOUNT_PREFIX.to_vec();
        key.extend_from_slice(id.as_bytes());
        key
    }

    fn stripe(&self, id: &AccountId) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        &self.stripes[(hasher.finish() as usize) % self.stripes.len()]
    }

    fn write_options(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.sync_writes);
        opts
    }

    fn read(&self, id: &AccountId) -> Result<Option<Account>> {
        match self.db.get(Self::key(id))? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    fn write(&self, account: &Account) -> Result<()> {
        let value = bincode::serialize(account)?;
        self.db
            .put_opt(Self::key(&account.id), value, &self.write_options())?;
        Ok(())
    }

    /// Close database (graceful shutdown)
    pub fn close(self) -> Result<()> {
        self.db.flush()?;
        drop(self.db);
        tracing::info!("RocksDB closed gracefully");
        Ok(())
    }
}

impl AccountStore for RocksStore {
    fn get(&self, id: &AccountId) -> Result<Account> {
        self.read(id)?
            .ok_or_else(|| Error::AccountNotFound(id.clone()))
    }

    fn compare_and_set(
        &self,
        id: &AccountId,
        expected_version: u64,
        new_balance: Decimal,
    ) -> Result<Account> {
        check_balance(id, new_balance)?;

        let _guard = self.stripe(id).lock();

        let current = self
            .read(id)?
            .ok_or_else(|| Error::AccountNotFound(id.clone()))?;

        if current.version != expected_version {
            return Err(Error::VersionConflict {
                account: id.clone(),
                expected: expected_version,
                actual: current.version,
            });
        }

        let updated = current.next(new_balance);
        self.write(&updated)?;

        tracing::debug!(
            account = %id,
            version = updated.version,
            balance = %updated.balance,
            "Balance written"
        );

        Ok(updated)
    }

    fn insert(&self, id: &AccountId) -> Result<Account> {
        let _guard = self.stripe(id).lock();

        if self.read(id)?.is_some() {
            return Err(Error::AccountExists(id.clone()));
        }

        let account = Account::open(id.clone());
        self.write(&account)?;
        Ok(account)
    }

    fn accounts(&self) -> Result<Vec<Account>> {
        let mut accounts = Vec::new();
        let iter = self.db.iterator(IteratorMode::From(
            ACCOUNT_PREFIX,
            rocksdb::Direction::Forward,
        ));

        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(ACCOUNT_PREFIX) {
                break;
            }
            accounts.push(bincode::deserialize(&value)?);
        }

        Ok(accounts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config() -> (Config, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (config, temp_dir)
    }

    fn alice() -> AccountId {
        AccountId::new("alice@example.com")
    }

    /// Contract shared by both backends
    fn exercise_contract(store: &dyn AccountStore) {
        let id = alice();

        let opened = store.insert(&id).unwrap();
        assert_eq!(opened.balance, Decimal::ZERO);
        assert_eq!(opened.version, 0);

        assert!(matches!(store.insert(&id), Err(Error::AccountExists(_))));

        let updated = store
            .compare_and_set(&id, 0, Decimal::new(10000, 2))
            .unwrap();
        assert_eq!(updated.version, 1);
        assert_eq!(store.get(&id).unwrap().balance, Decimal::new(10000, 2));

        // Stale version
        match store.compare_and_set(&id, 0, Decimal::ONE) {
            Err(Error::VersionConflict {
                expected, actual, ..
            }) => {
                assert_eq!(expected, 0);
                assert_eq!(actual, 1);
            }
            other => panic!("expected conflict, got {:?}", other),
        }
        assert_eq!(store.get(&id).unwrap().balance, Decimal::new(10000, 2));

        // Negative balance never reaches the record
        assert!(matches!(
            store.compare_and_set(&id, 1, Decimal::NEGATIVE_ONE),
            Err(Error::InvalidAmount(_))
        ));
        assert_eq!(store.get(&id).unwrap().version, 1);

        let ghost = AccountId::new("ghost@example.com");
        assert!(matches!(store.get(&ghost), Err(Error::AccountNotFound(_))));
        assert!(matches!(
            store.compare_and_set(&ghost, 0, Decimal::ONE),
            Err(Error::AccountNotFound(_))
        ));
    }

    #[test]
    fn test_memory_store_contract() {
        exercise_contract(&MemoryStore::new());
    }

    #[test]
    fn test_rocks_store_contract() {
        let (config, _temp) = test_config();
        let store = RocksStore::open(&config).unwrap();
        exercise_contract(&store);
    }

    #[test]
    fn test_rocks_store_survives_reopen() {
        let (config, _temp) = test_config();

        {
            let store = RocksStore::open(&config).unwrap();
            store.insert(&alice()).unwrap();
            store
                .compare_and_set(&alice(), 0, Decimal::new(4250, 2))
                .unwrap();
            store.close().unwrap();
        }

        let store = RocksStore::open(&config).unwrap();
        let account = store.get(&alice()).unwrap();
        assert_eq!(account.balance, Decimal::new(4250, 2));
        assert_eq!(account.version, 1);
    }

    #[test]
    fn test_accounts_listed_in_id_order() {
        let (config, _temp) = test_config();
        let rocks = RocksStore::open(&config).unwrap();
        let memory = MemoryStore::new();

        for store in [&rocks as &dyn AccountStore, &memory] {
            for name in ["carol", "alice", "bob"] {
                store.insert(&AccountId::new(name)).unwrap();
            }
            let ids: Vec<String> = store
                .accounts()
                .unwrap()
                .into_iter()
                .map(|a| a.id.to_string())
                .collect();
            assert_eq!(ids, vec!["alice", "bob", "carol"]);
        }
    }

    #[test]
    fn test_memory_store_concurrent_cas_single_winner() {
        let store = Arc::new(MemoryStore::new());
        store.insert(&alice()).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || store.compare_and_set(&alice(), 0, Decimal::TEN).is_ok())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
        assert_eq!(store.get(&alice()).unwrap().version, 1);
    }
}
