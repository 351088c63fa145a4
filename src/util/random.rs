use rand::seq::SliceRandom;
use rand::Rng;

use crate::types::{Amount, Currency};

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

/// Random integer in `min..=max`.
pub fn random_int(min: i64, max: i64) -> i64 {
    rand::thread_rng().gen_range(min..=max)
}

/// Random lowercase string of `length` letters.
pub fn random_string(length: usize) -> String {
    let mut rng = rand::thread_rng();

    (0..length)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

pub fn random_owner() -> String {
    random_string(6)
}

/// Random non-negative balance.
pub fn random_money() -> Amount {
    random_int(0, 1000)
}

/// Random entry amount, either sign.
pub fn random_amount() -> Amount {
    random_int(-1000, 1000)
}

pub fn random_currency() -> Currency {
    *Currency::ALL.choose(&mut rand::thread_rng()).unwrap_or(&Currency::Usd)
}
