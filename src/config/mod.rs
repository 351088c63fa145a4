mod errors;

use std::str::FromStr;
use std::time::Duration;

pub use errors::ConfigError;

const DATABASE_URL: &str = "SIMPLE_BANK_DATABASE_URL";
const FALLBACK_DATABASE_URL: &str = "DATABASE_URL";
const MAX_CONNECTIONS: &str = "SIMPLE_BANK_MAX_CONNECTIONS";
const ACQUIRE_TIMEOUT_MS: &str = "SIMPLE_BANK_ACQUIRE_TIMEOUT_MS";
const LOCK_TIMEOUT_MS: &str = "SIMPLE_BANK_LOCK_TIMEOUT_MS";
const OVERDRAFT: &str = "SIMPLE_BANK_OVERDRAFT";

/// What a transfer does when it would leave the source account negative.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum OverdraftPolicy {
    /// The transfer goes through and the balance becomes negative.
    Allow,
    /// The transfer is rolled back with `InsufficientFunds`.
    #[default]
    Reject
}

impl FromStr for OverdraftPolicy {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "allow" => Ok(OverdraftPolicy::Allow),
            "reject" => Ok(OverdraftPolicy::Reject),
            _ => Err(ConfigError::invalid(OVERDRAFT, value))
        }
    }
}

/// Connection and policy settings for a [`Store`](crate::store::Store).
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct StoreConfig {
    /// PostgreSQL connection string. `None` selects the in-memory backend.
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
    /// How long a statement may wait for a row lock held by another transaction.
    pub lock_timeout_ms: u64,
    pub overdraft: OverdraftPolicy
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 10,
            acquire_timeout_ms: 5_000,
            lock_timeout_ms: 5_000,
            overdraft: OverdraftPolicy::default()
        }
    }
}

impl StoreConfig {
    /// Loads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the configuration from any key/value source, starting from the defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        config.database_url = lookup(DATABASE_URL)
            .or_else(|| lookup(FALLBACK_DATABASE_URL))
            .filter(|url| !url.trim().is_empty());

        if let Some(value) = lookup(MAX_CONNECTIONS) {
            config.max_connections = parse(MAX_CONNECTIONS, &value)?;

            if config.max_connections == 0 {
                return Err(ConfigError::invalid(MAX_CONNECTIONS, &value));
            }
        }

        if let Some(value) = lookup(ACQUIRE_TIMEOUT_MS) {
            config.acquire_timeout_ms = parse(ACQUIRE_TIMEOUT_MS, &value)?;
        }

        if let Some(value) = lookup(LOCK_TIMEOUT_MS) {
            config.lock_timeout_ms = parse(LOCK_TIMEOUT_MS, &value)?;
        }

        if let Some(value) = lookup(OVERDRAFT) {
            config.overdraft = value.parse()?;
        }

        Ok(config)
    }

    pub fn with_overdraft(mut self, overdraft: OverdraftPolicy) -> Self {
        self.overdraft = overdraft;
        self
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout_ms = u64::try_from(lock_timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

fn parse<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::invalid(key, value))
}
