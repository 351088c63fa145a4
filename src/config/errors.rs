use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value [{value}] for [{key}]")]
    InvalidValue {
        key: &'static str,
        value: String
    }
}

impl ConfigError {
    pub fn invalid(key: &'static str, value: &str) -> Self {
        Self::InvalidValue { key, value: value.to_string() }
    }
}
