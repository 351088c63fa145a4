use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

use crate::types::{AccountId, Amount, Currency, EntryId, TransferId};

/// A balance-holding account.
///
/// `balance` always equals the sum of every entry posted against the account
/// once the transaction that posted them has committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct Account {
    pub id: AccountId,
    pub owner: String,
    /// Balance in the currency's minor unit.
    pub balance: Amount,
    #[sqlx(try_from = "String")]
    pub currency: Currency,
    pub created_at: DateTime<Utc>
}

/// A signed balance adjustment posted against one account.
/// Negative amounts are debits, positive amounts are credits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct Entry {
    pub id: EntryId,
    pub account_id: AccountId,
    pub amount: Amount,
    pub created_at: DateTime<Utc>
}

/// One completed movement of funds between two accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct Transfer {
    pub id: TransferId,
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    /// Always positive.
    pub amount: Amount,
    pub created_at: DateTime<Utc>
}
