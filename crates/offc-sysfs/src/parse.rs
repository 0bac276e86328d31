//! Integer parsing with the same rules as the kernel's `kstrtoint`/`kstrtouint` in base 0.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid integer")]
    Invalid,

    #[error("integer out of range")]
    Overflow,
}

/// Parse a signed 32-bit value: optional sign, then `0x`/`0X` hex, leading-`0` octal or decimal.
/// One trailing newline is allowed.
pub fn parse_int(buf: &str) -> Result<i64, ParseError> {
    let s = strip_newline(buf);
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let magnitude = parse_magnitude(digits)?;
    let value = if negative {
        -i128::from(magnitude)
    } else {
        i128::from(magnitude)
    };
    if value < i128::from(i32::MIN) || value > i128::from(i32::MAX) {
        return Err(ParseError::Overflow);
    }
    Ok(value as i64)
}

/// Parse an unsigned 32-bit value. Like [`parse_int`] but only `+` is accepted as a sign.
pub fn parse_uint(buf: &str) -> Result<u64, ParseError> {
    let s = strip_newline(buf);
    let digits = s.strip_prefix('+').unwrap_or(s);
    let value = parse_magnitude(digits)?;
    if value > u64::from(u32::MAX) {
        return Err(ParseError::Overflow);
    }
    Ok(value)
}

fn strip_newline(buf: &str) -> &str {
    buf.strip_suffix('\n').unwrap_or(buf)
}

fn parse_magnitude(s: &str) -> Result<u64, ParseError> {
    let (radix, digits) = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        (16, hex)
    } else if s.len() > 1 && s.starts_with('0') {
        (8, &s[1..])
    } else {
        (10, s)
    };
    if digits.is_empty() {
        return Err(ParseError::Invalid);
    }

    let mut value: u64 = 0;
    for c in digits.chars() {
        let digit = c.to_digit(radix).ok_or(ParseError::Invalid)?;
        value = value
            .checked_mul(u64::from(radix))
            .and_then(|v| v.checked_add(u64::from(digit)))
            .ok_or(ParseError::Overflow)?;
    }
    Ok(value)
}
