//! Decimal rendering of token and native amounts.

use alloy::primitives::U256;

fn pow10(exp: u32) -> Option<U256> {
    U256::from(10u64).checked_pow(U256::from(exp))
}

/// Rounds half-up to `precision` fractional digits and splits the
/// value into integral and fractional parts.
fn scaled_rounded(amount: U256, decimals: u8, precision: u32) -> (U256, u64) {
    let (Some(scale), Some(p)) = (pow10(decimals as u32), pow10(precision)) else {
        return (U256::ZERO, 0);
    };
    let scaled = match amount.checked_mul(p) {
        Some(widened) => (widened + scale / U256::from(2u64)) / scale,
        // astronomically large amounts lose the fractional part
        None => (amount / scale) * p,
    };
    (scaled / p, (scaled % p).to::<u64>())
}

/// Fixed-width fraction: `123456` with 4 decimals at precision 2 is
/// `"12.35"`.
pub fn format_units_fixed(amount: U256, decimals: u8, precision: u32) -> String {
    let (int, frac) = scaled_rounded(amount, decimals, precision);
    format!("{int}.{frac:0width$}", width = precision as usize)
}

/// Trailing zeros trimmed down to one fractional digit, so integral
/// values still carry a decimal point: `"100.0"`, `"1.234"`.
pub fn format_units_trimmed(amount: U256, decimals: u8, precision: u32) -> String {
    let (int, frac) = scaled_rounded(amount, decimals, precision);
    let mut frac_str = format!("{frac:0width$}", width = precision as usize);
    while frac_str.len() > 1 && frac_str.ends_with('0') {
        frac_str.pop();
    }
    format!("{int}.{frac_str}")
}

/// Signed rendering of a magnitude; the sign is dropped when the
/// rounded magnitude is zero.
pub fn format_units_signed(
    negative: bool,
    magnitude: U256,
    decimals: u8,
    precision: u32,
) -> String {
    let rendered = format_units_trimmed(magnitude, decimals, precision);
    let is_zero = !rendered.chars().any(|c| ('1'..='9').contains(&c));
    if negative && !is_zero {
        format!("-{rendered}")
    } else {
        rendered
    }
}
