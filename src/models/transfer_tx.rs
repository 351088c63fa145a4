use std::time::Duration;

use serde::Serialize;

use crate::models::{Account, Entry, Transfer};
use crate::types::{AccountId, Amount};

/// Input of a transfer between two distinct accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferTxParams {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    /// Positive quantity in the accounts' shared minor unit.
    pub amount: Amount
}

impl TransferTxParams {
    pub fn new(from_account_id: AccountId, to_account_id: AccountId, amount: Amount) -> Self {
        Self { from_account_id, to_account_id, amount }
    }

    /// The two balance mutations of this transfer, in the order their row
    /// locks must be taken.
    ///
    /// Mutations are always `{(from, -amount), (to, +amount)}`; only their
    /// order changes, ascending by account id. Every transfer touching the
    /// same pair of accounts therefore locks them in the same order, so two
    /// transfers running in opposite directions can never wait on each other.
    pub fn balance_mutations(&self) -> [(AccountId, Amount); 2] {
        let debit = (self.from_account_id, -self.amount);
        let credit = (self.to_account_id, self.amount);

        if self.from_account_id < self.to_account_id {
            [debit, credit]
        } else {
            [credit, debit]
        }
    }
}

/// Every row written by one transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferTxResult {
    pub transfer: Transfer,
    pub from_account: Account,
    pub to_account: Account,
    pub from_entry: Entry,
    pub to_entry: Entry
}

/// Request scoped metadata threaded through a transaction.
#[derive(Debug, Clone, Default)]
pub struct TxContext {
    /// Correlation id attached to every log line of the transaction.
    pub tx_name: String,
    /// Upper bound for the whole call, including waits on row locks.
    pub deadline: Option<Duration>
}

impl TxContext {
    pub fn new(tx_name: impl Into<String>) -> Self {
        Self { tx_name: tx_name.into(), deadline: None }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}
