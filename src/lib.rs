//! Atomic money transfers between accounts on top of a transactional store.
//!
//! A transfer writes one transfer row, a debit and a credit entry, and
//! updates both account balances inside a single database transaction.
//! Balance rows are always locked in ascending account id order so that
//! concurrent transfers in opposite directions cannot deadlock.

pub mod config;
pub mod models;
pub mod store;
pub mod types;
pub mod util;
