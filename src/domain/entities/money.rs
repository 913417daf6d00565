//! Amount and currency helpers shared by initialize, verify and webhook ingest.
//!
//! Provider amounts are integers in the smallest currency unit (pesewas for GHS).
//! Local amounts are `NUMERIC(12,2)` major units and are authoritative.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Converts a major-unit amount to minor units, rounding half away from zero.
///
/// Returns `None` when the value does not fit an `i64`.
pub fn to_minor_units(amount: Decimal) -> Option<i64> {
    amount
        .checked_mul(Decimal::ONE_HUNDRED)?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}

/// Converts a provider-reported minor-unit amount (e.g. fees) back to major units.
pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}

pub fn normalize_currency(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

pub fn currency_matches(local: &str, provider: &str) -> bool {
    normalize_currency(local) == normalize_currency(provider)
}

/// Exact match of provider amount and currency against the local payment.
pub fn amount_and_currency_match(
    local_amount: Decimal,
    local_currency: &str,
    provider_amount: i64,
    provider_currency: &str,
) -> bool {
    currency_matches(local_currency, provider_currency)
        && to_minor_units(local_amount) == Some(provider_amount)
}
