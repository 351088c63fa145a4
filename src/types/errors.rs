use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CurrencyError {
    #[error("Currency error: {0}")]
    InvalidFormat(String),
    #[error("Currency error: unsupported currency [{0}]")]
    Unsupported(String)
}
