use futures::future::BoxFuture;
use tokio::time::timeout;
use tracing::{debug, error, info_span, warn, Instrument};

use crate::config::{OverdraftPolicy, StoreConfig};
use crate::models::{
    Account, AddAccountBalanceParams, CreateEntryParams, CreateTransferParams, TransferTxParams, TransferTxResult,
    TxContext
};
use crate::store::{Backend, MemoryBackend, PgBackend, Queries, StoreError, StoreResult, Transaction};
use crate::types::{AccountId, Amount};

/// Runs single statements and multi statement transactions against a backend.
///
/// `Store` keeps no mutable state of its own; concurrent callers are
/// coordinated entirely by the backend's transactions and row locks.
pub struct Store<B: Backend> {
    backend: B,
    config: StoreConfig
}

impl Store<MemoryBackend> {
    pub fn in_memory(config: StoreConfig) -> Self {
        let backend = MemoryBackend::new(config.lock_timeout());
        Self::new(backend, config)
    }
}

impl Store<PgBackend> {
    /// Connects to PostgreSQL and applies pending migrations.
    pub async fn connect(config: StoreConfig) -> StoreResult<Self> {
        let backend = PgBackend::connect(&config).await?;
        backend.migrate().await?;
        Ok(Self::new(backend, config))
    }
}

impl<B: Backend> Store<B> {
    pub fn new(backend: B, config: StoreConfig) -> Self {
        Self { backend, config }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Autocommit accessors for reads and administrative writes.
    pub async fn queries(&self) -> StoreResult<B::Conn> {
        self.backend.acquire().await
    }

    /// Runs `work` inside one transaction.
    ///
    /// Commits when `work` succeeds. When it fails the transaction is rolled
    /// back and the error of `work` is returned unchanged, or combined with
    /// the rollback error if the rollback fails too. A commit failure is
    /// reported as [`StoreError::Commit`]: every statement succeeded but the
    /// caller cannot know whether the writes are durable.
    pub async fn exec_tx<T, F>(&self, context: &TxContext, work: F) -> StoreResult<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut B::Tx) -> BoxFuture<'c, StoreResult<T>> + Send,
    {
        let span = info_span!("tx", tx_name = %context.tx_name);

        async move {
            let mut tx = self.backend.begin().await?;
            debug!("Transaction opened");

            match work(&mut tx).await {
                Ok(value) => {
                    if let Err(commit_error) = tx.commit().await {
                        error!("Commit failed, outcome unknown: {commit_error}");
                        return Err(StoreError::commit(commit_error));
                    }

                    debug!("Transaction committed");
                    Ok(value)
                }
                Err(work_error) => match tx.rollback().await {
                    Ok(()) => {
                        warn!("Transaction rolled back: {work_error}");
                        Err(work_error)
                    }
                    Err(rollback_error) => {
                        error!("Rollback failed after [{work_error}]: {rollback_error}");
                        Err(StoreError::rollback(work_error, rollback_error))
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Moves `params.amount` from one account to another.
    ///
    /// Creates the transfer row, the debit entry, the credit entry and
    /// applies both balance changes in one transaction. Balance rows are
    /// locked in ascending account id order whatever the direction of the
    /// transfer, so concurrent transfers over the same accounts serialize
    /// instead of deadlocking.
    ///
    /// When `context.deadline` expires the in-flight transaction is dropped,
    /// which rolls it back, and [`StoreError::DeadlineExceeded`] is returned.
    pub async fn transfer_tx(&self, context: &TxContext, params: TransferTxParams) -> StoreResult<TransferTxResult> {
        if params.from_account_id == params.to_account_id {
            return Err(StoreError::same_account(params.from_account_id));
        }

        if params.amount <= 0 {
            return Err(StoreError::invalid_amount(params.amount));
        }

        let overdraft = self.config.overdraft;

        let work = self.exec_tx(context, move |q| Box::pin(move_money(q, params, overdraft)));

        match context.deadline {
            Some(deadline) => timeout(deadline, work).await
                .map_err(|_| StoreError::deadline_exceeded(&context.tx_name, deadline))?,
            None => work.await
        }
    }
}

/// Writes the transfer, both entries and both balance changes through `q`.
async fn move_money<Q: Queries + ?Sized>(
    q: &mut Q,
    params: TransferTxParams,
    overdraft: OverdraftPolicy
) -> StoreResult<TransferTxResult> {
    let transfer = q.create_transfer(CreateTransferParams {
        from_account_id: params.from_account_id,
        to_account_id: params.to_account_id,
        amount: params.amount
    }).await?;

    let from_entry = q.create_entry(CreateEntryParams {
        account_id: params.from_account_id,
        amount: -params.amount
    }).await?;

    let to_entry = q.create_entry(CreateEntryParams {
        account_id: params.to_account_id,
        amount: params.amount
    }).await?;

    let [first, second] = add_money(q, params.balance_mutations()).await?;

    let (from_account, to_account) = if first.id == params.from_account_id {
        (first, second)
    } else {
        (second, first)
    };

    if overdraft == OverdraftPolicy::Reject && from_account.balance < 0 {
        return Err(StoreError::insufficient_funds(from_account.id, from_account.balance));
    }

    debug!(
        "Transfer [{}] moved [{}] from account [{}] to account [{}]",
        transfer.id, transfer.amount, transfer.from_account_id, transfer.to_account_id
    );

    Ok(TransferTxResult { transfer, from_account, to_account, from_entry, to_entry })
}

/// Applies the balance mutations in the given order and returns the updated
/// rows in that same order.
async fn add_money<Q: Queries + ?Sized>(q: &mut Q, mutations: [(AccountId, Amount); 2]) -> StoreResult<[Account; 2]> {
    let [(first_id, first_amount), (second_id, second_amount)] = mutations;

    let first = q.add_account_balance(AddAccountBalanceParams { id: first_id, amount: first_amount }).await?;
    let second = q.add_account_balance(AddAccountBalanceParams { id: second_id, amount: second_amount }).await?;

    Ok([first, second])
}
