//! Money arithmetic for per-diem and mileage lines. Everything stays in `Decimal`.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::errors::DomainError;

/// Mileage reimbursement rate used when configuration does not supply one.
pub const DEFAULT_MILEAGE_RATE: Decimal = Decimal::from_parts(70, 0, 0, false, 2);

/// Largest total accepted for one line item.
pub const MAX_LINE_AMOUNT: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);

/// Largest manually entered per diem rate.
pub const MAX_DAILY_RATE: Decimal = Decimal::from_parts(10_000, 0, 0, false, 0);

pub const MAX_MILES: Decimal = Decimal::from_parts(100_000, 0, 0, false, 0);

pub fn to_cents(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Rounds to cents and checks the result is a usable line total.
pub fn line_amount(value: Decimal) -> Result<Decimal, DomainError> {
    let amount = to_cents(value);
    if amount <= Decimal::ZERO {
        return Err(DomainError::NonPositiveAmount(amount.to_string()));
    }
    if amount > MAX_LINE_AMOUNT {
        return Err(DomainError::AmountTooLarge {
            amount: amount.to_string(),
            max: MAX_LINE_AMOUNT.to_string(),
        });
    }
    Ok(amount)
}

pub fn per_diem_total(daily_rate: Decimal, days: u32, travelers: u32) -> Result<Decimal, DomainError> {
    let total = daily_rate
        .checked_mul(Decimal::from(days))
        .and_then(|subtotal| subtotal.checked_mul(Decimal::from(travelers)))
        .ok_or(DomainError::AmountOverflow)?;
    line_amount(total)
}

pub fn mileage_amount(miles: Decimal, rate: Decimal) -> Result<Decimal, DomainError> {
    let total = miles.checked_mul(rate).ok_or(DomainError::AmountOverflow)?;
    line_amount(total)
}

/// Reads a user-typed money or quantity value such as `$1,204.50` or `42.5`.
pub fn parse_decimal(raw: &str) -> Option<Decimal> {
    let cleaned = raw
        .trim()
        .trim_start_matches('$')
        .trim_end_matches(|c: char| c == '.' || c == ',')
        .replace(',', "");
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<Decimal>().ok()
}
