//! In-process transactional backend.
//!
//! Committed rows live in one table set behind an async mutex. A transaction
//! stages its writes privately and publishes them on commit. Every write to an
//! account row first takes that row's lock and keeps it until the transaction
//! ends, which gives the same blocking behavior as row locks in PostgreSQL:
//! `add_account_balance` reads the balance only while holding the lock, so
//! the increment is atomic with respect to every other transaction.
//!
//! Each account also has a key lock. Inserting an entry or transfer shares
//! it for every referenced account and deleting the account takes it
//! exclusively, so a reference can never commit against a deleted account.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::sync::{Mutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::config::StoreConfig;
use crate::models::{
    Account, AddAccountBalanceParams, CreateAccountParams, CreateEntryParams, CreateTransferParams, Entry,
    ListAccountsParams, ListEntriesParams, ListTransfersParams, Transfer, UpdateAccountParams, UpdateEntryParams,
    UpdateTransferParams
};
use crate::store::{check_page, Backend, Queries, StoreError, StoreResult, Transaction};
use crate::types::{AccountId, EntryId, TransferId};

const ACCOUNT: &str = "account";
const ENTRY: &str = "entry";
const TRANSFER: &str = "transfer";

#[derive(Default)]
struct Tables {
    accounts: BTreeMap<AccountId, Account>,
    entries: BTreeMap<EntryId, Entry>,
    transfers: BTreeMap<TransferId, Transfer>
}

/// Writes of one transaction. `None` marks a deleted row.
#[derive(Default)]
struct Staged {
    accounts: BTreeMap<AccountId, Option<Account>>,
    entries: BTreeMap<EntryId, Option<Entry>>,
    transfers: BTreeMap<TransferId, Option<Transfer>>
}

impl Staged {
    fn is_empty(&self) -> bool {
        self.accounts.is_empty() && self.entries.is_empty() && self.transfers.is_empty()
    }
}

struct Shared {
    tables: Mutex<Tables>,
    row_locks: DashMap<AccountId, Arc<Mutex<()>>>,
    key_locks: DashMap<AccountId, Arc<RwLock<()>>>,
    //NOTE: Like database sequences, ids are never reused even when the transaction that took them rolls back
    account_ids: AtomicI64,
    entry_ids: AtomicI64,
    transfer_ids: AtomicI64,
    lock_timeout: Duration
}

/// Shared handle to an in-memory store. Clones see the same data.
#[derive(Clone)]
pub struct MemoryBackend {
    shared: Arc<Shared>
}

impl MemoryBackend {
    /// Creates an empty store. Statements waiting on a row lock for longer
    /// than `lock_timeout` fail with [`StoreError::LockTimeout`].
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: Mutex::new(Tables::default()),
                row_locks: DashMap::new(),
                key_locks: DashMap::new(),
                account_ids: AtomicI64::new(1),
                entry_ids: AtomicI64::new(1),
                transfer_ids: AtomicI64::new(1),
                lock_timeout
            })
        }
    }

    pub fn begin_tx(&self) -> MemoryTx {
        MemoryTx {
            shared: self.shared.clone(),
            staged: Staged::default(),
            locks: HashMap::new(),
            key_shares: HashMap::new(),
            key_owners: HashMap::new()
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(StoreConfig::default().lock_timeout())
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    type Tx = MemoryTx;
    type Conn = MemoryConn;

    async fn begin(&self) -> StoreResult<MemoryTx> {
        Ok(self.begin_tx())
    }

    async fn acquire(&self) -> StoreResult<MemoryConn> {
        Ok(MemoryConn { backend: self.clone() })
    }
}

/// An open in-memory transaction.
pub struct MemoryTx {
    shared: Arc<Shared>,
    staged: Staged,
    locks: HashMap<AccountId, OwnedMutexGuard<()>>,
    key_shares: HashMap<AccountId, OwnedRwLockReadGuard<()>>,
    key_owners: HashMap<AccountId, OwnedRwLockWriteGuard<()>>
}

impl MemoryTx {
    async fn lock_row(&mut self, account_id: AccountId) -> StoreResult<()> {
        if self.locks.contains_key(&account_id) {
            return Ok(());
        }

        let row_lock = self.shared.row_locks.entry(account_id).or_default().clone();

        let guard = timeout(self.shared.lock_timeout, row_lock.lock_owned()).await
            .map_err(|_| StoreError::lock_timeout(account_id))?;

        trace!("Row lock taken on account [{account_id}]");
        self.locks.insert(account_id, guard);

        Ok(())
    }

    async fn share_key(&mut self, account_id: AccountId) -> StoreResult<()> {
        if self.key_shares.contains_key(&account_id) || self.key_owners.contains_key(&account_id) {
            return Ok(());
        }

        let key_lock = self.shared.key_locks.entry(account_id).or_default().clone();

        let guard = timeout(self.shared.lock_timeout, key_lock.read_owned()).await
            .map_err(|_| StoreError::lock_timeout(account_id))?;

        self.key_shares.insert(account_id, guard);

        Ok(())
    }

    async fn own_key(&mut self, account_id: AccountId) -> StoreResult<()> {
        if self.key_owners.contains_key(&account_id) {
            return Ok(());
        }

        //NOTE: A share held by this transaction would block its own upgrade
        self.key_shares.remove(&account_id);

        let key_lock = self.shared.key_locks.entry(account_id).or_default().clone();

        let guard = timeout(self.shared.lock_timeout, key_lock.write_owned()).await
            .map_err(|_| StoreError::lock_timeout(account_id))?;

        trace!("Key lock taken on account [{account_id}]");
        self.key_owners.insert(account_id, guard);

        Ok(())
    }

    async fn account(&self, id: AccountId) -> Option<Account> {
        if let Some(staged) = self.staged.accounts.get(&id) {
            return staged.clone();
        }

        self.shared.tables.lock().await.accounts.get(&id).cloned()
    }

    async fn entry(&self, id: EntryId) -> Option<Entry> {
        if let Some(staged) = self.staged.entries.get(&id) {
            return staged.clone();
        }

        self.shared.tables.lock().await.entries.get(&id).cloned()
    }

    async fn transfer(&self, id: TransferId) -> Option<Transfer> {
        if let Some(staged) = self.staged.transfers.get(&id) {
            return staged.clone();
        }

        self.shared.tables.lock().await.transfers.get(&id).cloned()
    }

    async fn existing_account(&self, id: AccountId) -> StoreResult<Account> {
        self.account(id).await.ok_or_else(|| StoreError::not_found(ACCOUNT, id))
    }

    async fn check_account_reference(&mut self, id: AccountId) -> StoreResult<()> {
        self.share_key(id).await?;

        match self.account(id).await {
            Some(_) => Ok(()),
            None => Err(StoreError::ForeignKeyViolation(format!("account [{id}] does not exist")))
        }
    }

    async fn locked_account(&mut self, id: AccountId) -> StoreResult<Account> {
        self.lock_row(id).await?;
        self.existing_account(id).await
    }

    async fn entries_view(&self) -> BTreeMap<EntryId, Entry> {
        let tables = self.shared.tables.lock().await;
        merge(&tables.entries, &self.staged.entries)
    }

    async fn transfers_view(&self) -> BTreeMap<TransferId, Transfer> {
        let tables = self.shared.tables.lock().await;
        merge(&tables.transfers, &self.staged.transfers)
    }
}

#[async_trait]
impl Queries for MemoryTx {
    async fn create_account(&mut self, params: CreateAccountParams) -> StoreResult<Account> {
        let account = Account {
            id: self.shared.account_ids.fetch_add(1, Ordering::SeqCst),
            owner: params.owner,
            balance: params.balance,
            currency: params.currency,
            created_at: Utc::now()
        };

        self.staged.accounts.insert(account.id, Some(account.clone()));

        Ok(account)
    }

    async fn get_account(&mut self, id: AccountId) -> StoreResult<Account> {
        self.existing_account(id).await
    }

    async fn get_account_for_update(&mut self, id: AccountId) -> StoreResult<Account> {
        self.locked_account(id).await
    }

    async fn list_accounts(&mut self, params: ListAccountsParams) -> StoreResult<Vec<Account>> {
        let accounts = {
            let tables = self.shared.tables.lock().await;
            merge(&tables.accounts, &self.staged.accounts)
        };

        page(accounts.into_values(), params.limit, params.offset)
    }

    async fn update_account(&mut self, params: UpdateAccountParams) -> StoreResult<Account> {
        let mut account = self.locked_account(params.id).await?;
        account.balance = params.balance;

        self.staged.accounts.insert(account.id, Some(account.clone()));

        Ok(account)
    }

    async fn add_account_balance(&mut self, params: AddAccountBalanceParams) -> StoreResult<Account> {
        let mut account = self.locked_account(params.id).await?;

        account.balance = account.balance.checked_add(params.amount)
            .ok_or_else(|| StoreError::invalid_amount(params.amount))?;

        self.staged.accounts.insert(account.id, Some(account.clone()));

        Ok(account)
    }

    async fn delete_account(&mut self, id: AccountId) -> StoreResult<()> {
        self.locked_account(id).await?;
        self.own_key(id).await?;

        let referenced_by_entry = self.entries_view().await.values()
            .any(|entry| entry.account_id == id);
        let referenced_by_transfer = self.transfers_view().await.values()
            .any(|transfer| transfer.from_account_id == id || transfer.to_account_id == id);

        if referenced_by_entry || referenced_by_transfer {
            return Err(StoreError::ForeignKeyViolation(format!("account [{id}] is still referenced")));
        }

        self.staged.accounts.insert(id, None);

        Ok(())
    }

    async fn create_entry(&mut self, params: CreateEntryParams) -> StoreResult<Entry> {
        self.check_account_reference(params.account_id).await?;

        let entry = Entry {
            id: self.shared.entry_ids.fetch_add(1, Ordering::SeqCst),
            account_id: params.account_id,
            amount: params.amount,
            created_at: Utc::now()
        };

        self.staged.entries.insert(entry.id, Some(entry.clone()));

        Ok(entry)
    }

    async fn get_entry(&mut self, id: EntryId) -> StoreResult<Entry> {
        self.entry(id).await.ok_or_else(|| StoreError::not_found(ENTRY, id))
    }

    async fn list_entries(&mut self, params: ListEntriesParams) -> StoreResult<Vec<Entry>> {
        let entries = self.entries_view().await.into_values()
            .filter(|entry| params.account_id.is_none_or(|account_id| entry.account_id == account_id));

        page(entries, params.limit, params.offset)
    }

    async fn update_entry(&mut self, params: UpdateEntryParams) -> StoreResult<Entry> {
        let mut entry = self.get_entry(params.id).await?;
        entry.amount = params.amount;

        self.staged.entries.insert(entry.id, Some(entry.clone()));

        Ok(entry)
    }

    async fn delete_entry(&mut self, id: EntryId) -> StoreResult<()> {
        self.get_entry(id).await?;
        self.staged.entries.insert(id, None);

        Ok(())
    }

    async fn create_transfer(&mut self, params: CreateTransferParams) -> StoreResult<Transfer> {
        if params.amount <= 0 {
            return Err(StoreError::invalid_amount(params.amount));
        }

        self.check_account_reference(params.from_account_id).await?;
        self.check_account_reference(params.to_account_id).await?;

        let transfer = Transfer {
            id: self.shared.transfer_ids.fetch_add(1, Ordering::SeqCst),
            from_account_id: params.from_account_id,
            to_account_id: params.to_account_id,
            amount: params.amount,
            created_at: Utc::now()
        };

        self.staged.transfers.insert(transfer.id, Some(transfer.clone()));

        Ok(transfer)
    }

    async fn get_transfer(&mut self, id: TransferId) -> StoreResult<Transfer> {
        self.transfer(id).await.ok_or_else(|| StoreError::not_found(TRANSFER, id))
    }

    async fn list_transfers(&mut self, params: ListTransfersParams) -> StoreResult<Vec<Transfer>> {
        let transfers = self.transfers_view().await.into_values()
            .filter(|transfer| params.account_id.is_none_or(|account_id| {
                transfer.from_account_id == account_id || transfer.to_account_id == account_id
            }));

        page(transfers, params.limit, params.offset)
    }

    async fn update_transfer(&mut self, params: UpdateTransferParams) -> StoreResult<Transfer> {
        if params.amount <= 0 {
            return Err(StoreError::invalid_amount(params.amount));
        }

        let mut transfer = self.get_transfer(params.id).await?;
        transfer.amount = params.amount;

        self.staged.transfers.insert(transfer.id, Some(transfer.clone()));

        Ok(transfer)
    }

    async fn delete_transfer(&mut self, id: TransferId) -> StoreResult<()> {
        self.get_transfer(id).await?;
        self.staged.transfers.insert(id, None);

        Ok(())
    }
}

#[async_trait]
impl Transaction for MemoryTx {
    async fn commit(self) -> StoreResult<()> {
        let MemoryTx { shared, staged, locks, key_shares, key_owners } = self;

        if !staged.is_empty() {
            let mut tables = shared.tables.lock().await;

            apply(&mut tables.accounts, staged.accounts);
            apply(&mut tables.entries, staged.entries);
            apply(&mut tables.transfers, staged.transfers);
        }

        //NOTE: Row locks are released only once the new rows are visible
        drop(locks);
        drop(key_shares);
        drop(key_owners);

        Ok(())
    }

    async fn rollback(self) -> StoreResult<()> {
        debug!("Discarding staged writes for {} locked account(s)", self.locks.len());
        Ok(())
    }
}

/// Accessors outside of any explicit transaction. Every call runs in its own
/// transaction and commits immediately.
pub struct MemoryConn {
    backend: MemoryBackend
}

impl MemoryConn {
    async fn autocommit<T, F>(&self, work: F) -> StoreResult<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut MemoryTx) -> BoxFuture<'c, StoreResult<T>> + Send,
    {
        let mut tx = self.backend.begin_tx();
        let value = work(&mut tx).await?;
        tx.commit().await?;

        Ok(value)
    }
}

#[async_trait]
impl Queries for MemoryConn {
    async fn create_account(&mut self, params: CreateAccountParams) -> StoreResult<Account> {
        self.autocommit(move |tx| tx.create_account(params)).await
    }

    async fn get_account(&mut self, id: AccountId) -> StoreResult<Account> {
        self.autocommit(move |tx| tx.get_account(id)).await
    }

    async fn get_account_for_update(&mut self, id: AccountId) -> StoreResult<Account> {
        self.autocommit(move |tx| tx.get_account_for_update(id)).await
    }

    async fn list_accounts(&mut self, params: ListAccountsParams) -> StoreResult<Vec<Account>> {
        self.autocommit(move |tx| tx.list_accounts(params)).await
    }

    async fn update_account(&mut self, params: UpdateAccountParams) -> StoreResult<Account> {
        self.autocommit(move |tx| tx.update_account(params)).await
    }

    async fn add_account_balance(&mut self, params: AddAccountBalanceParams) -> StoreResult<Account> {
        self.autocommit(move |tx| tx.add_account_balance(params)).await
    }

    async fn delete_account(&mut self, id: AccountId) -> StoreResult<()> {
        self.autocommit(move |tx| tx.delete_account(id)).await
    }

    async fn create_entry(&mut self, params: CreateEntryParams) -> StoreResult<Entry> {
        self.autocommit(move |tx| tx.create_entry(params)).await
    }

    async fn get_entry(&mut self, id: EntryId) -> StoreResult<Entry> {
        self.autocommit(move |tx| tx.get_entry(id)).await
    }

    async fn list_entries(&mut self, params: ListEntriesParams) -> StoreResult<Vec<Entry>> {
        self.autocommit(move |tx| tx.list_entries(params)).await
    }

    async fn update_entry(&mut self, params: UpdateEntryParams) -> StoreResult<Entry> {
        self.autocommit(move |tx| tx.update_entry(params)).await
    }

    async fn delete_entry(&mut self, id: EntryId) -> StoreResult<()> {
        self.autocommit(move |tx| tx.delete_entry(id)).await
    }

    async fn create_transfer(&mut self, params: CreateTransferParams) -> StoreResult<Transfer> {
        self.autocommit(move |tx| tx.create_transfer(params)).await
    }

    async fn get_transfer(&mut self, id: TransferId) -> StoreResult<Transfer> {
        self.autocommit(move |tx| tx.get_transfer(id)).await
    }

    async fn list_transfers(&mut self, params: ListTransfersParams) -> StoreResult<Vec<Transfer>> {
        self.autocommit(move |tx| tx.list_transfers(params)).await
    }

    async fn update_transfer(&mut self, params: UpdateTransferParams) -> StoreResult<Transfer> {
        self.autocommit(move |tx| tx.update_transfer(params)).await
    }

    async fn delete_transfer(&mut self, id: TransferId) -> StoreResult<()> {
        self.autocommit(move |tx| tx.delete_transfer(id)).await
    }
}

fn merge<K: Ord + Copy, V: Clone>(committed: &BTreeMap<K, V>, staged: &BTreeMap<K, Option<V>>) -> BTreeMap<K, V> {
    let mut view = committed.clone();
    apply(&mut view, staged.clone());
    view
}

fn apply<K: Ord, V>(rows: &mut BTreeMap<K, V>, staged: BTreeMap<K, Option<V>>) {
    for (key, row) in staged {
        match row {
            Some(row) => {
                rows.insert(key, row);
            }
            None => {
                rows.remove(&key);
            }
        }
    }
}

fn page<V>(rows: impl Iterator<Item = V>, limit: i64, offset: i64) -> StoreResult<Vec<V>> {
    check_page(limit, offset)?;

    let skip = usize::try_from(offset).unwrap_or(usize::MAX);
    let take = usize::try_from(limit).unwrap_or(usize::MAX);

    Ok(rows.skip(skip).take(take).collect())
}
