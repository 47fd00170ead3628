use alloy_primitives::U256;
use rust_decimal::{Decimal, RoundingStrategy};

/// Largest scale `Decimal` can carry.
const MAX_SCALE: u32 = 28;

/// Convert a raw on-chain amount to a decimal with `decimals` places.
///
/// Precision beyond what `Decimal` can hold is dropped from the right.
/// Returns None only for amounts above ~7.9e28 whole tokens.
pub fn to_decimal(raw: U256, decimals: u32) -> Option<Decimal> {
    let ten = U256::from(10);
    let mut raw = raw;
    let mut scale = decimals;

    if scale > MAX_SCALE {
        raw /= ten.pow(U256::from(scale - MAX_SCALE));
        scale = MAX_SCALE;
    }

    // Mantissa must fit in 96 bits.
    while raw.bit_len() > 96 && scale > 0 {
        raw /= ten;
        scale -= 1;
    }

    let mantissa = i128::try_from(u128::try_from(raw).ok()?).ok()?;
    Decimal::try_from_i128_with_scale(mantissa, scale)
        .ok()
        .map(|d| d.normalize())
}

/// Display string with exactly `dp` decimal places, rounded half away from
/// zero, with thousands grouped.
///
/// # Example
/// `format_amount(dec!(1234.567), 2)` → `"1,234.57"`
pub fn format_amount(value: Decimal, dp: u32) -> String {
    let rounded = value.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero);
    group_thousands(&format!("{:.*}", dp as usize, rounded))
}

/// Insert thousands separators into the integer part of a formatted number.
pub fn group_thousands(formatted: &str) -> String {
    let (int_part, frac_part) = match formatted.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (formatted, None),
    };
    let (sign, digits) = match int_part.strip_prefix('-') {
        Some(d) => ("-", d),
        None => ("", int_part),
    };

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    match frac_part {
        Some(f) => format!("{}{}.{}", sign, grouped, f),
        None => format!("{}{}", sign, grouped),
    }
}
