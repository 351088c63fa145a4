use std::time::Duration;

use thiserror::Error;

use crate::types::{AccountId, Amount};

pub type StoreResult<T> = Result<T, StoreError>;

const LOCK_NOT_AVAILABLE: &str = "55P03";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("No {entity} found with id [{id}]")]
    NotFound {
        entity: &'static str,
        id: i64
    },
    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),
    #[error("Account [{account_id}] cannot transfer to itself")]
    SameAccount {
        account_id: AccountId
    },
    #[error("Amount must be positive, got [{amount}]")]
    InvalidAmount {
        amount: Amount
    },
    #[error("Invalid page, limit [{limit}] and offset [{offset}] must not be negative")]
    InvalidPage {
        limit: i64,
        offset: i64
    },
    #[error("Insufficient funds in account [{account_id}], balance would be [{balance}]")]
    InsufficientFunds {
        account_id: AccountId,
        balance: Amount
    },
    #[error("Timed out waiting for the row lock on account [{account_id}]")]
    LockTimeout {
        account_id: AccountId
    },
    #[error("Transaction [{tx_name}] did not finish within {deadline:?} and was rolled back")]
    DeadlineExceeded {
        tx_name: String,
        deadline: Duration
    },
    /// Every statement succeeded but the commit did not; durability of the
    /// transaction is unknown.
    #[error("Commit failed, outcome unknown: {0}")]
    Commit(#[source] Box<StoreError>),
    #[error("tx error: {source}, rollback error: {rollback}")]
    Rollback {
        source: Box<StoreError>,
        rollback: Box<StoreError>
    },
    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error)
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn same_account(account_id: AccountId) -> Self {
        Self::SameAccount { account_id }
    }

    pub fn invalid_amount(amount: Amount) -> Self {
        Self::InvalidAmount { amount }
    }

    pub fn invalid_page(limit: i64, offset: i64) -> Self {
        Self::InvalidPage { limit, offset }
    }

    pub fn insufficient_funds(account_id: AccountId, balance: Amount) -> Self {
        Self::InsufficientFunds { account_id, balance }
    }

    pub fn lock_timeout(account_id: AccountId) -> Self {
        Self::LockTimeout { account_id }
    }

    pub fn deadline_exceeded(tx_name: &str, deadline: Duration) -> Self {
        Self::DeadlineExceeded { tx_name: tx_name.to_string(), deadline }
    }

    pub fn commit(error: StoreError) -> Self {
        Self::Commit(Box::new(error))
    }

    pub fn rollback(error: StoreError, rollback: StoreError) -> Self {
        Self::Rollback { source: Box::new(error), rollback: Box::new(rollback) }
    }

    /// Maps an error from a statement that takes the row lock of `account_id`.
    pub(crate) fn on_account(error: sqlx::Error, account_id: AccountId) -> Self {
        if let sqlx::Error::Database(database_error) = &error {
            if database_error.code().as_deref() == Some(LOCK_NOT_AVAILABLE) {
                return Self::lock_timeout(account_id);
            }
        }

        Self::from(error)
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        if let sqlx::Error::Database(database_error) = &error {
            if database_error.is_foreign_key_violation() {
                return Self::ForeignKeyViolation(database_error.message().to_string());
            }
        }

        Self::Database(error)
    }
}
