mod errors;
pub mod memory;
pub mod postgres;
mod tx_store;

use async_trait::async_trait;

use crate::models::{
    Account, AddAccountBalanceParams, CreateAccountParams, CreateEntryParams, CreateTransferParams, Entry,
    ListAccountsParams, ListEntriesParams, ListTransfersParams, Transfer, UpdateAccountParams, UpdateEntryParams,
    UpdateTransferParams
};
use crate::types::{AccountId, EntryId, TransferId};

pub use errors::{StoreError, StoreResult};
pub use memory::MemoryBackend;
pub use postgres::PgBackend;
pub use tx_store::Store;

/// Rejects the page bounds PostgreSQL refuses in `LIMIT` and `OFFSET`.
pub(crate) fn check_page(limit: i64, offset: i64) -> StoreResult<()> {
    if limit < 0 || offset < 0 {
        return Err(StoreError::invalid_page(limit, offset));
    }

    Ok(())
}

/// Single statement row accessors for accounts, entries and transfers.
///
/// An implementation is bound either to a pooled connection (every call
/// commits on its own) or to an open transaction (every call joins it).
/// Lookups of a missing id return [`StoreError::NotFound`]; writes that
/// reference a missing account return [`StoreError::ForeignKeyViolation`].
#[async_trait]
pub trait Queries: Send {
    async fn create_account(&mut self, params: CreateAccountParams) -> StoreResult<Account>;
    async fn get_account(&mut self, id: AccountId) -> StoreResult<Account>;
    /// Reads the account and holds its row lock until the end of the transaction.
    async fn get_account_for_update(&mut self, id: AccountId) -> StoreResult<Account>;
    async fn list_accounts(&mut self, params: ListAccountsParams) -> StoreResult<Vec<Account>>;
    async fn update_account(&mut self, params: UpdateAccountParams) -> StoreResult<Account>;
    /// Adds `params.amount` to the stored balance as one atomic
    /// read-modify-write and returns the updated row. Any storage engine
    /// behind this trait must provide this primitive; emulating it with a
    /// separate read and write reintroduces lost updates under concurrency.
    async fn add_account_balance(&mut self, params: AddAccountBalanceParams) -> StoreResult<Account>;
    async fn delete_account(&mut self, id: AccountId) -> StoreResult<()>;

    async fn create_entry(&mut self, params: CreateEntryParams) -> StoreResult<Entry>;
    async fn get_entry(&mut self, id: EntryId) -> StoreResult<Entry>;
    async fn list_entries(&mut self, params: ListEntriesParams) -> StoreResult<Vec<Entry>>;
    async fn update_entry(&mut self, params: UpdateEntryParams) -> StoreResult<Entry>;
    async fn delete_entry(&mut self, id: EntryId) -> StoreResult<()>;

    async fn create_transfer(&mut self, params: CreateTransferParams) -> StoreResult<Transfer>;
    async fn get_transfer(&mut self, id: TransferId) -> StoreResult<Transfer>;
    async fn list_transfers(&mut self, params: ListTransfersParams) -> StoreResult<Vec<Transfer>>;
    async fn update_transfer(&mut self, params: UpdateTransferParams) -> StoreResult<Transfer>;
    async fn delete_transfer(&mut self, id: TransferId) -> StoreResult<()>;
}

/// Accessor set bound to one open database transaction.
///
/// Dropping it without calling [`commit`](Transaction::commit) rolls the
/// transaction back.
#[async_trait]
pub trait Transaction: Queries + Sized {
    async fn commit(self) -> StoreResult<()>;
    async fn rollback(self) -> StoreResult<()>;
}

/// A transactional relational store.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    type Tx: Transaction + 'static;
    type Conn: Queries + 'static;

    /// Opens a new transaction.
    async fn begin(&self) -> StoreResult<Self::Tx>;
    /// Checks out an autocommit connection.
    async fn acquire(&self) -> StoreResult<Self::Conn>;
}
