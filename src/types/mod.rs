mod currency;
mod errors;

pub use currency::Currency;
pub use errors::CurrencyError;

pub type AccountId = i64;
pub type EntryId = i64;
pub type TransferId = i64;

/// Signed quantity in the currency's minor unit.
pub type Amount = i64;
