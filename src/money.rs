//! Money Conversion Module
//!
//! Conversion between raw subunit integers and the human strings subscribers
//! type and read in SMS. All conversions MUST go through this module.
//!
//! ## Internal Representation
//! - All amounts are `RawAmount` (i64) counts of the smallest subunit
//! - The scale factor is `10^decimals` of the network currency
//!   (e.g. 10^2 for USD = cents, 10^0 for IDR)
//!
//! ## Usage
//! ```rust
//! use cellcredit::money::{USD, parse_credits, humanize_credits};
//!
//! let money = parse_credits("1,234.5", &USD).unwrap();
//! assert_eq!(money.amount_raw(), 123_450);
//! assert_eq!(humanize_credits(123_450, &USD).to_string(), "$1,234.50");
//! ```

use rust_decimal::Decimal;
use std::fmt;
use thiserror::Error;

use crate::core_types::RawAmount;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Precision overflow: provided {provided} decimals, max allowed {max}")]
    PrecisionOverflow { provided: u32, max: u32 },

    #[error("Amount too large, would overflow")]
    Overflow,

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Unknown currency: {0}")]
    UnknownCurrency(String),
}

// ============================================================================
// Currencies
// ============================================================================

/// Network currency descriptor.
#[derive(Debug, PartialEq, Eq)]
pub struct Currency {
    pub code: &'static str,
    pub name: &'static str,
    /// Display prefix, including any separating space.
    pub symbol: &'static str,
    /// Subunit digits: one unit is `10^decimals` raw.
    pub decimals: u32,
}

pub static USD: Currency = Currency {
    code: "USD",
    name: "US Dollar",
    symbol: "$",
    decimals: 2,
};

pub static EUR: Currency = Currency {
    code: "EUR",
    name: "Euro",
    symbol: "€",
    decimals: 2,
};

pub static PHP: Currency = Currency {
    code: "PHP",
    name: "Philippine Peso",
    symbol: "₱",
    decimals: 2,
};

pub static IDR: Currency = Currency {
    code: "IDR",
    name: "Indonesian Rupiah",
    symbol: "Rp ",
    decimals: 0,
};

static CURRENCIES: [&Currency; 4] = [&USD, &EUR, &PHP, &IDR];

/// Look up a supported currency by ISO code (case-insensitive).
pub fn currency(code: &str) -> Result<&'static Currency, MoneyError> {
    CURRENCIES
        .iter()
        .copied()
        .find(|c| c.code.eq_ignore_ascii_case(code.trim()))
        .ok_or_else(|| MoneyError::UnknownCurrency(code.to_string()))
}

// ============================================================================
// Money
// ============================================================================

/// A raw amount bound to its currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Money {
    amount_raw: RawAmount,
    currency: &'static Currency,
}

impl Money {
    pub fn new(amount_raw: RawAmount, currency: &'static Currency) -> Self {
        Self {
            amount_raw,
            currency,
        }
    }

    #[inline]
    pub fn amount_raw(&self) -> RawAmount {
        self.amount_raw
    }

    #[inline]
    pub fn currency(&self) -> &'static Currency {
        self.currency
    }

    /// Amount without the currency symbol, e.g. `1,234.50`.
    pub fn amount_str(&self) -> String {
        format_raw(self.amount_raw, self.currency.decimals)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.amount_raw < 0 {
            let magnitude = format_raw(self.amount_raw, self.currency.decimals);
            write!(f, "-{}{}", self.currency.symbol, magnitude.trim_start_matches('-'))
        } else {
            write!(f, "{}{}", self.currency.symbol, self.amount_str())
        }
    }
}

/// Render a raw amount for subscribers.
pub fn humanize_credits(amount_raw: RawAmount, currency: &'static Currency) -> Money {
    Money::new(amount_raw, currency)
}

/// Parse a subscriber-typed amount in display units.
///
/// Accepts an optional currency symbol, `,` thousands separators and a `.`
/// decimal fraction. Extra fraction digits are rejected, never truncated.
pub fn parse_credits(amount_str: &str, currency: &'static Currency) -> Result<Money, MoneyError> {
    let mut s = amount_str.trim();
    let negative = s.starts_with('-');
    if negative {
        s = s[1..].trim_start();
    }
    let symbol = currency.symbol.trim();
    if !symbol.is_empty()
        && let Some(rest) = s.strip_prefix(symbol)
    {
        s = rest.trim_start();
    }
    let magnitude = parse_magnitude(s, currency.decimals)?;
    let signed = if negative { -magnitude } else { magnitude };
    if signed < RawAmount::MIN as i128 || signed > RawAmount::MAX as i128 {
        return Err(MoneyError::Overflow);
    }
    Ok(Money::new(signed as RawAmount, currency))
}

// ============================================================================
// Parse / Format primitives
// ============================================================================

/// Convert an unsigned display-unit string to raw subunits.
///
/// # Errors
/// * `InvalidFormat` - empty input, bad characters, malformed digit groups
/// * `PrecisionOverflow` - more fraction digits than `decimals`
/// * `Overflow` - result does not fit in `RawAmount`
pub fn parse_raw(amount_str: &str, decimals: u32) -> Result<RawAmount, MoneyError> {
    let amount = parse_magnitude(amount_str, decimals)?;
    RawAmount::try_from(amount).map_err(|_| MoneyError::Overflow)
}

fn parse_magnitude(amount_str: &str, decimals: u32) -> Result<i128, MoneyError> {
    let amount_str = amount_str.trim();
    if amount_str.is_empty() {
        return Err(MoneyError::InvalidFormat("empty string".into()));
    }

    let parts: Vec<&str> = amount_str.split('.').collect();
    let (whole, frac) = match parts.len() {
        1 => (parts[0], ""),
        2 => (parts[0], parts[1]),
        _ => return Err(MoneyError::InvalidFormat("multiple decimal points".into())),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(MoneyError::InvalidFormat("no digits".into()));
    }
    if !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(MoneyError::InvalidFormat(format!(
            "invalid character in fractional part: {}",
            frac
        )));
    }

    // Precision validation: REJECT if too many decimals (no silent truncation!)
    if frac.len() > decimals as usize {
        return Err(MoneyError::PrecisionOverflow {
            provided: frac.len() as u32,
            max: decimals,
        });
    }

    let whole_digits = strip_thousands(whole)?;
    let whole_num: i128 = if whole_digits.is_empty() {
        0
    } else {
        whole_digits
            .parse::<i128>()
            .map_err(|_| MoneyError::Overflow)?
    };

    let frac_num: i128 = if frac.is_empty() {
        0
    } else {
        let frac_padded = format!("{:0<width$}", frac, width = decimals as usize);
        frac_padded
            .parse::<i128>()
            .map_err(|_| MoneyError::InvalidFormat("invalid fractional part".into()))?
    };

    let multiplier = 10i128.pow(decimals);
    let amount = whole_num
        .checked_mul(multiplier)
        .and_then(|v| v.checked_add(frac_num))
        .ok_or(MoneyError::Overflow)?;

    Ok(amount)
}

/// Validate `,ddd` grouping and return the bare digits.
///
/// The leading group may have any length; every following group has exactly
/// three digits.
fn strip_thousands(whole: &str) -> Result<String, MoneyError> {
    let mut groups = whole.split(',');
    let mut digits = String::with_capacity(whole.len());
    if let Some(first) = groups.next() {
        if !first.chars().all(|c| c.is_ascii_digit()) {
            return Err(MoneyError::InvalidFormat(format!(
                "invalid character in whole part: {}",
                whole
            )));
        }
        digits.push_str(first);
    }
    for group in groups {
        if group.len() != 3 || !group.chars().all(|c| c.is_ascii_digit()) {
            return Err(MoneyError::InvalidFormat(format!(
                "bad thousands group '{}' in {}",
                group, whole
            )));
        }
        digits.push_str(group);
    }
    Ok(digits)
}

/// Format raw subunits with thousands separators and exactly `decimals`
/// fraction digits.
pub fn format_raw(value: RawAmount, decimals: u32) -> String {
    let decimal_value = Decimal::from_i128_with_scale(value as i128, decimals);
    let plain = format!("{:.prec$}", decimal_value, prec = decimals as usize);
    let (sign, unsigned) = match plain.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", plain.as_str()),
    };
    let (whole, frac) = match unsigned.split_once('.') {
        Some((w, f)) => (w, Some(f)),
        None => (unsigned, None),
    };
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    match frac {
        Some(f) => format!("{}{}.{}", sign, grouped, f),
        None => format!("{}{}", sign, grouped),
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
