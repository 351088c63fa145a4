//! PostgreSQL backend.

use std::ops::DerefMut;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::Postgres;
use tracing::info;

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

//NOTE: PostgreSQL stores lock_timeout as a 32 bit millisecond count
const MAX_LOCK_TIMEOUT_MS: u128 = i32::MAX as u128;

const ACCOUNT_COLUMNS: &str = "id, owner, balance, currency, created_at";
const ENTRY_COLUMNS: &str = "id, account_id, amount, created_at";
const TRANSFER_COLUMNS: &str = "id, from_account_id, to_account_id, amount, created_at";

/// Pooled PostgreSQL connections.
#[derive(Clone)]
pub struct PgBackend {
    pool: PgPool,
    lock_timeout: Duration
}

impl PgBackend {
    pub async fn connect(config: &StoreConfig) -> StoreResult<Self> {
        let database_url = config.database_url.as_deref()
            .ok_or_else(|| StoreError::Database(sqlx::Error::Configuration("no database url configured".into())))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(database_url)
            .await?;

        info!("PostgreSQL connection pool established");

        Ok(Self::from_pool(pool, config.lock_timeout()))
    }

    pub fn from_pool(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    /// Creates or upgrades the `accounts`, `entries` and `transfers` tables.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|error| StoreError::Database(error.into()))
    }
}

#[async_trait]
impl Backend for PgBackend {
    type Tx = PgQueries<sqlx::Transaction<'static, Postgres>>;
    type Conn = PgQueries<PoolConnection<Postgres>>;

    async fn begin(&self) -> StoreResult<Self::Tx> {
        let mut tx = self.pool.begin().await?;

        //NOTE: Bounds row lock waits for this transaction only
        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout.as_millis().min(MAX_LOCK_TIMEOUT_MS)))
            .execute(&mut *tx)
            .await?;

        Ok(PgQueries { conn: tx })
    }

    async fn acquire(&self) -> StoreResult<Self::Conn> {
        Ok(PgQueries { conn: self.pool.acquire().await? })
    }
}

/// Accessors over a pooled connection or an open transaction.
pub struct PgQueries<C> {
    conn: C
}

#[async_trait]
impl<C> Queries for PgQueries<C>
where
    C: DerefMut<Target = PgConnection> + Send,
{
    async fn create_account(&mut self, params: CreateAccountParams) -> StoreResult<Account> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "INSERT INTO accounts (owner, balance, currency) VALUES ($1, $2, $3) RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(params.owner)
        .bind(params.balance)
        .bind(params.currency.as_str())
        .fetch_one(&mut *self.conn)
        .await?;

        Ok(account)
    }

    async fn get_account(&mut self, id: AccountId) -> StoreResult<Account> {
        sqlx::query_as::<_, Account>(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await?
            .ok_or_else(|| StoreError::not_found(ACCOUNT, id))
    }

    async fn get_account_for_update(&mut self, id: AccountId) -> StoreResult<Account> {
        //NOTE: NO KEY UPDATE leaves foreign key checks from inserts into entries/transfers unblocked
        sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1 FOR NO KEY UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *self.conn)
        .await
        .map_err(|error| StoreError::on_account(error, id))?
        .ok_or_else(|| StoreError::not_found(ACCOUNT, id))
    }

    async fn list_accounts(&mut self, params: ListAccountsParams) -> StoreResult<Vec<Account>> {
        check_page(params.limit, params.offset)?;

        let accounts = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY id LIMIT $1 OFFSET $2"
        ))
        .bind(params.limit)
        .bind(params.offset)
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(accounts)
    }

    async fn update_account(&mut self, params: UpdateAccountParams) -> StoreResult<Account> {
        sqlx::query_as::<_, Account>(&format!(
            "UPDATE accounts SET balance = $2 WHERE id = $1 RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(params.id)
        .bind(params.balance)
        .fetch_optional(&mut *self.conn)
        .await
        .map_err(|error| StoreError::on_account(error, params.id))?
        .ok_or_else(|| StoreError::not_found(ACCOUNT, params.id))
    }

    async fn add_account_balance(&mut self, params: AddAccountBalanceParams) -> StoreResult<Account> {
        sqlx::query_as::<_, Account>(&format!(
            "UPDATE accounts SET balance = balance + $2 WHERE id = $1 RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(params.id)
        .bind(params.amount)
        .fetch_optional(&mut *self.conn)
        .await
        .map_err(|error| StoreError::on_account(error, params.id))?
        .ok_or_else(|| StoreError::not_found(ACCOUNT, params.id))
    }

    async fn delete_account(&mut self, id: AccountId) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id)
            .execute(&mut *self.conn)
            .await
            .map_err(|error| StoreError::on_account(error, id))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(ACCOUNT, id));
        }

        Ok(())
    }

    async fn create_entry(&mut self, params: CreateEntryParams) -> StoreResult<Entry> {
        let entry = sqlx::query_as::<_, Entry>(&format!(
            "INSERT INTO entries (account_id, amount) VALUES ($1, $2) RETURNING {ENTRY_COLUMNS}"
        ))
        .bind(params.account_id)
        .bind(params.amount)
        .fetch_one(&mut *self.conn)
        .await?;

        Ok(entry)
    }

    async fn get_entry(&mut self, id: EntryId) -> StoreResult<Entry> {
        sqlx::query_as::<_, Entry>(&format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await?
            .ok_or_else(|| StoreError::not_found(ENTRY, id))
    }

    async fn list_entries(&mut self, params: ListEntriesParams) -> StoreResult<Vec<Entry>> {
        check_page(params.limit, params.offset)?;

        let entries = sqlx::query_as::<_, Entry>(&format!(
            r#"
            SELECT {ENTRY_COLUMNS} FROM entries
            WHERE $1::BIGINT IS NULL OR account_id = $1
            ORDER BY id
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(params.account_id)
        .bind(params.limit)
        .bind(params.offset)
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(entries)
    }

    async fn update_entry(&mut self, params: UpdateEntryParams) -> StoreResult<Entry> {
        sqlx::query_as::<_, Entry>(&format!(
            "UPDATE entries SET amount = $2 WHERE id = $1 RETURNING {ENTRY_COLUMNS}"
        ))
        .bind(params.id)
        .bind(params.amount)
        .fetch_optional(&mut *self.conn)
        .await?
        .ok_or_else(|| StoreError::not_found(ENTRY, params.id))
    }

    async fn delete_entry(&mut self, id: EntryId) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM entries WHERE id = $1")
            .bind(id)
            .execute(&mut *self.conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(ENTRY, id));
        }

        Ok(())
    }

    async fn create_transfer(&mut self, params: CreateTransferParams) -> StoreResult<Transfer> {
        if params.amount <= 0 {
            return Err(StoreError::invalid_amount(params.amount));
        }

        let transfer = sqlx::query_as::<_, Transfer>(&format!(
            "INSERT INTO transfers (from_account_id, to_account_id, amount) VALUES ($1, $2, $3) RETURNING {TRANSFER_COLUMNS}"
        ))
        .bind(params.from_account_id)
        .bind(params.to_account_id)
        .bind(params.amount)
        .fetch_one(&mut *self.conn)
        .await?;

        Ok(transfer)
    }

    async fn get_transfer(&mut self, id: TransferId) -> StoreResult<Transfer> {
        sqlx::query_as::<_, Transfer>(&format!("SELECT {TRANSFER_COLUMNS} FROM transfers WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await?
            .ok_or_else(|| StoreError::not_found(TRANSFER, id))
    }

    async fn list_transfers(&mut self, params: ListTransfersParams) -> StoreResult<Vec<Transfer>> {
        check_page(params.limit, params.offset)?;

        let transfers = sqlx::query_as::<_, Transfer>(&format!(
            r#"
            SELECT {TRANSFER_COLUMNS} FROM transfers
            WHERE $1::BIGINT IS NULL OR from_account_id = $1 OR to_account_id = $1
            ORDER BY id
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(params.account_id)
        .bind(params.limit)
        .bind(params.offset)
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(transfers)
    }

    async fn update_transfer(&mut self, params: UpdateTransferParams) -> StoreResult<Transfer> {
        if params.amount <= 0 {
            return Err(StoreError::invalid_amount(params.amount));
        }

        sqlx::query_as::<_, Transfer>(&format!(
            "UPDATE transfers SET amount = $2 WHERE id = $1 RETURNING {TRANSFER_COLUMNS}"
        ))
        .bind(params.id)
        .bind(params.amount)
        .fetch_optional(&mut *self.conn)
        .await?
        .ok_or_else(|| StoreError::not_found(TRANSFER, params.id))
    }

    async fn delete_transfer(&mut self, id: TransferId) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM transfers WHERE id = $1")
            .bind(id)
            .execute(&mut *self.conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(TRANSFER, id));
        }

        Ok(())
    }
}

#[async_trait]
impl Transaction for PgQueries<sqlx::Transaction<'static, Postgres>> {
    async fn commit(self) -> StoreResult<()> {
        self.conn.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> StoreResult<()> {
        self.conn.rollback().await?;
        Ok(())
    }
}
