// 💵 Money helpers - fixed-point amounts and their persisted form
//
// Amounts are stored as canonical decimal TEXT ("1000.00"). SQLite's SUM()
// would coerce TEXT to REAL, so every total is summed in Rust.

use crate::error::LedgerError;
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

/// Minor-unit precision of every stored amount.
pub const CURRENCY_SCALE: u32 = 2;

/// Round to currency precision (banker's rounding is wrong for invoices).
pub fn round_currency(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(CURRENCY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Canonical TEXT form written to the store.
pub fn format_amount(amount: Decimal) -> String {
    let mut rounded = round_currency(amount);
    rounded.rescale(CURRENCY_SCALE);
    rounded.to_string()
}

/// Parse a stored amount back into a Decimal.
pub fn parse_amount(column: &'static str, raw: &str) -> Result<Decimal, LedgerError> {
    Decimal::from_str(raw.trim()).map_err(|_| LedgerError::Corrupt {
        column,
        value: raw.to_string(),
    })
}

/// Sum an iterator of amounts (empty = zero).
pub fn sum_amounts<I>(amounts: I) -> Decimal
where
    I: IntoIterator<Item = Decimal>,
{
    amounts.into_iter().fold(Decimal::ZERO, |acc, a| acc + a)
}
