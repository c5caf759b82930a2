//! Strict argument decoding
//!
//! Every parser rejects trailing garbage and out-of-range values instead of
//! truncating, so a typo never reaches the radio as a zero.

use std::ops::RangeInclusive;
use std::str::FromStr;

use crate::error::{CliError, Result};

/// Decimal integer of type `T`
pub fn dec<T: FromStr>(arg: &str) -> Result<T> {
    arg.parse().map_err(|_| CliError::InvalidArgs)
}

/// Decimal integer within `range`
pub fn dec_in<T>(arg: &str, range: RangeInclusive<T>) -> Result<T>
where
    T: FromStr + PartialOrd,
{
    let value = dec(arg)?;
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(CliError::InvalidArgs)
    }
}

fn strip_hex_prefix(arg: &str) -> &str {
    arg.strip_prefix("0x")
        .or_else(|| arg.strip_prefix("0X"))
        .unwrap_or(arg)
}

fn hex_digits(arg: &str) -> Result<&str> {
    let digits = strip_hex_prefix(arg);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(CliError::InvalidArgs);
    }
    Ok(digits)
}

/// Hex byte, with or without a `0x` prefix
pub fn hex_u8(arg: &str) -> Result<u8> {
    u8::from_str_radix(hex_digits(arg)?, 16).map_err(|_| CliError::InvalidArgs)
}

/// Hex 16-bit value, with or without a `0x` prefix
pub fn hex_u16(arg: &str) -> Result<u16> {
    u16::from_str_radix(hex_digits(arg)?, 16).map_err(|_| CliError::InvalidArgs)
}

/// EUI-64 written as `0x` followed by exactly 16 hex digits, most significant byte first
pub fn eui64(arg: &str) -> Result<u64> {
    let digits = arg
        .strip_prefix("0x")
        .or_else(|| arg.strip_prefix("0X"))
        .ok_or(CliError::InvalidArgs)?;
    if digits.len() != 16 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(CliError::InvalidArgs);
    }
    u64::from_str_radix(digits, 16).map_err(|_| CliError::InvalidArgs)
}
