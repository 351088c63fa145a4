use crate::types::{AccountId, Amount, Currency, EntryId, TransferId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateAccountParams {
    pub owner: String,
    pub balance: Amount,
    pub currency: Currency
}

/// Administrative absolute overwrite of a balance. Transfers never use it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateAccountParams {
    pub id: AccountId,
    pub balance: Amount
}

/// Atomic `balance = balance + amount` on one account row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddAccountBalanceParams {
    pub id: AccountId,
    pub amount: Amount
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListAccountsParams {
    pub limit: i64,
    pub offset: i64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateEntryParams {
    pub account_id: AccountId,
    pub amount: Amount
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateEntryParams {
    pub id: EntryId,
    pub amount: Amount
}

/// Lists entries ordered by id, optionally restricted to one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListEntriesParams {
    pub account_id: Option<AccountId>,
    pub limit: i64,
    pub offset: i64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateTransferParams {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: Amount
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateTransferParams {
    pub id: TransferId,
    pub amount: Amount
}

/// Lists transfers ordered by id, optionally restricted to those where the
/// account is either the source or the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListTransfersParams {
    pub account_id: Option<AccountId>,
    pub limit: i64,
    pub offset: i64
}
