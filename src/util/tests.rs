use super::{random_amount, random_currency, random_int, random_money, random_owner, random_string};
use crate::types::Currency;

#[test]
fn test_random_int_stays_within_inclusive_bounds() {
    for _ in 0..1000 {
        let value = random_int(-3, 3);
        assert!((-3..=3).contains(&value));
    }

    assert_eq!(random_int(7, 7), 7);
}

#[test]
fn test_random_string_has_requested_length_and_alphabet() {
    let value = random_string(32);

    assert_eq!(value.len(), 32);
    assert!(value.chars().all(|c| c.is_ascii_lowercase()));
    assert_eq!(random_owner().len(), 6);
    assert!(random_string(0).is_empty());
}

#[test]
fn test_random_money_and_amount_ranges() {
    for _ in 0..1000 {
        assert!((0..=1000).contains(&random_money()));
        assert!((-1000..=1000).contains(&random_amount()));
    }
}

#[test]
fn test_random_currency_is_supported() {
    for _ in 0..100 {
        assert!(Currency::ALL.contains(&random_currency()));
    }
}
