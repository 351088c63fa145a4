use crate::types::errors::CurrencyError;
use serde::{Serialize, Serializer};
use std::fmt;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

const CODE_LENGTH: usize = 3;

/// ISO 4217 code of the currencies accounts can be opened in.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Currency {
    Eur,
    Usd,
    Cad,
    Try
}

impl Currency {
    pub const ALL: [Currency; 4] = [Currency::Eur, Currency::Usd, Currency::Cad, Currency::Try];

    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Eur => "EUR",
            Currency::Usd => "USD",
            Currency::Cad => "CAD",
            Currency::Try => "TRY"
        }
    }
}

impl Display for Currency {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for Currency {
    type Err = CurrencyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();

        if value.len() != CODE_LENGTH || !value.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(CurrencyError::InvalidFormat(format!("[{value}] is not a three letter code")));
        }

        match value.to_ascii_uppercase().as_str() {
            "EUR" => Ok(Currency::Eur),
            "USD" => Ok(Currency::Usd),
            "CAD" => Ok(Currency::Cad),
            "TRY" => Ok(Currency::Try),
            other => Err(CurrencyError::Unsupported(other.to_string()))
        }
    }
}

//NOTE: Rows come back from postgres as TEXT, `#[sqlx(try_from = "String")]` routes them through here
impl TryFrom<String> for Currency {
    type Error = CurrencyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Currency::from_str(&value)
    }
}

impl Serialize for Currency {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}
