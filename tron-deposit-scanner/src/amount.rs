//! Fixed-point token amount decoding.
//!
//! Token quantities arrive as base-unit integer strings of arbitrary length
//! (`"10229460000"` with 6 decimals is `10229.46`). Division by `10^decimals`
//! on a decimal string is a split at a digit position, so the conversion is
//! exact for any quantity and any number of decimals.

use thiserror::Error;

/// Decimals assumed when the upstream entry does not carry token info.
pub const DEFAULT_DECIMALS: u32 = 6;

/// Largest decimal count accepted from upstream token info.
pub const MAX_DECIMALS: u32 = 255;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("empty token quantity")]
    Empty,

    #[error("malformed token quantity {0:?}")]
    Malformed(String),

    #[error("unsupported token decimals {0} (max {})", MAX_DECIMALS)]
    Decimals(u32),
}

/// Convert a raw base-unit quantity into a decimal amount string.
///
/// The fractional part is padded to `decimals` digits and has its trailing
/// zeros stripped; a zero fraction is omitted entirely.
pub fn to_display_amount(raw_quantity: &str, decimals: u32) -> Result<String, AmountError> {
    let raw = raw_quantity.trim();
    if raw.is_empty() {
        return Err(AmountError::Empty);
    }
    if decimals > MAX_DECIMALS {
        return Err(AmountError::Decimals(decimals));
    }
    if !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AmountError::Malformed(raw_quantity.to_string()));
    }

    let digits = raw.trim_start_matches('0');
    let decimals = decimals as usize;

    let (int_part, frac_part) = if digits.len() > decimals {
        digits.split_at(digits.len() - decimals)
    } else {
        ("", digits)
    };

    let int_part = if int_part.is_empty() { "0" } else { int_part };
    let padded = format!("{:0>width$}", frac_part, width = decimals);
    let frac = padded.trim_end_matches('0');

    if frac.is_empty() {
        Ok(int_part.to_string())
    } else {
        Ok(format!("{}.{}", int_part, frac))
    }
}
