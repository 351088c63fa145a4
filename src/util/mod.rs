mod random;
#[cfg(test)]
mod tests;

pub use random::{random_amount, random_currency, random_int, random_money, random_owner, random_string};
