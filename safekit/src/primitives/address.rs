use alloy::primitives::Address;

use crate::primitives::{ParseFromForeignBinding, ValidationError};

/// Whether `value` is `0x` followed by exactly 40 hex digits (any case).
#[must_use]
pub fn is_valid_address(value: &str) -> bool {
    value
        .strip_prefix("0x")
        .is_some_and(|digits| digits.len() == 40 && digits.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Validates an address string and returns its EIP-55 checksummed form.
///
/// # Errors
/// - `ValidationError::InvalidInput` if the string is not an address.
#[uniffi::export]
pub fn validate_address(address: &str) -> Result<String, ValidationError> {
    Ok(Address::parse_from_ffi(address, "address")?.to_checksum(None))
}

/// Parses a chain id given either as a decimal string or as an `eth_chainId` hex quantity.
///
/// # Errors
/// - `ValidationError::InvalidInput` if the value is empty, zero or not a number.
#[uniffi::export]
pub fn parse_chain_id(value: &str) -> Result<u64, ValidationError> {
    let parsed = match value.strip_prefix("0x") {
        Some(hex_digits) => u64::from_str_radix(hex_digits, 16),
        None => value.parse::<u64>(),
    }
    .map_err(|_| ValidationError::invalid_input("chain_id", format!("`{value}` is not a chain id")))?;

    if parsed == 0 {
        return Err(ValidationError::invalid_input(
            "chain_id",
            "must be greater than zero",
        ));
    }
    Ok(parsed)
}
