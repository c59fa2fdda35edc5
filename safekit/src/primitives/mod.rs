use std::fmt::Display;

use alloy::primitives::{Address, Bytes, U256};

/// Address and chain id validation.
pub mod address;

/// Chain metadata and the canonical Safe deployments per chain.
pub mod chain;

/// Runtime configuration shared by sessions and workflows.
pub mod config;

/// Host-provided string key-value storage.
pub mod key_value_store;

/// Logging bridge to the host application.
pub mod logger;

pub use address::{is_valid_address, parse_chain_id, validate_address};
pub use chain::{ChainConfig, ChainRegistry, SafeContracts, UnparsedChainConfig};
pub use config::{SafekitConfig, SafekitEnvironment};
pub use key_value_store::{DeviceKeyValueStore, InMemoryDeviceKeyValueStore, KeyValueStoreError};

/// A wrapper around hex-encoded bytes. Output is always prefixed with `0x`.
///
/// ```
/// use safekit::primitives::HexEncodedData;
/// let signature = HexEncodedData::new("abcd").unwrap();
/// assert_eq!(signature.as_str(), "0xabcd");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Object)]
pub struct HexEncodedData(String);

#[uniffi::export]
impl HexEncodedData {
    /// Initializes a new `HexEncodedData` from a hex string, with or without `0x` prefix.
    ///
    /// # Errors
    /// - `ValidationError::InvalidHexString` if the string is not valid hex.
    #[uniffi::constructor]
    pub fn new(s: &str) -> Result<Self, ValidationError> {
        let s = s.trim_start_matches("0x");
        hex::decode(s).map_err(|_| ValidationError::InvalidHexString(s.to_string()))?;
        Ok(Self(format!("0x{s}")))
    }

    /// Returns the wrapped hex string.
    #[must_use]
    pub fn to_hex_string(&self) -> String {
        self.0.clone()
    }
}

impl HexEncodedData {
    /// Returns the wrapped hex string as a `&str`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for HexEncodedData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<HexEncodedData> for String {
    fn from(value: HexEncodedData) -> Self {
        value.0
    }
}

impl From<&[u8]> for HexEncodedData {
    fn from(bytes: &[u8]) -> Self {
        Self(format!("0x{}", hex::encode(bytes)))
    }
}

/// Input that failed validation before anything was built or stored.
#[crate::safekit_error]
pub enum ValidationError {
    /// The provided string is not validly encoded hex data.
    #[error("invalid hex string: {0}")]
    InvalidHexString(String),
    /// A named input attribute is malformed.
    #[error("invalid input on {attribute}: {message}")]
    InvalidInput {
        /// Path of the offending attribute, e.g. `calls[1].value`.
        attribute: String,
        /// What is wrong with it.
        message: String,
    },
    /// The chain id is not known to the registry.
    #[error("unsupported chain id {chain_id}")]
    UnsupportedChain {
        /// The rejected chain id.
        chain_id: u64,
    },
    /// Owners or threshold do not describe a usable Safe.
    #[error("invalid account configuration: {message}")]
    InvalidAccountConfig {
        /// What is wrong with the configuration.
        message: String,
    },
}

impl ValidationError {
    pub(crate) fn invalid_input(attribute: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            attribute: attribute.into(),
            message: message.into(),
        }
    }
}

/// Parses values received as strings over the foreign boundary or from persisted JSON.
///
/// `attribute` names the input in the resulting `ValidationError`.
pub trait ParseFromForeignBinding: Sized {
    /// Parses `value`.
    ///
    /// # Errors
    /// `ValidationError::InvalidInput` when `value` is malformed.
    fn parse_from_ffi(value: &str, attribute: &str) -> Result<Self, ValidationError>;
}

impl ParseFromForeignBinding for Address {
    fn parse_from_ffi(value: &str, attribute: &str) -> Result<Self, ValidationError> {
        if !is_valid_address(value) {
            return Err(ValidationError::invalid_input(
                attribute,
                "must be 0x followed by 40 hex digits",
            ));
        }
        value
            .parse::<Self>()
            .map_err(|err| ValidationError::invalid_input(attribute, err.to_string()))
    }
}

impl ParseFromForeignBinding for U256 {
    /// Accepts a decimal string, or a `0x` prefixed hex quantity.
    fn parse_from_ffi(value: &str, attribute: &str) -> Result<Self, ValidationError> {
        let (digits, radix) = value
            .strip_prefix("0x")
            .map_or((value, 10), |hex_digits| (hex_digits, 16));

        let valid_digits = !digits.is_empty()
            && digits.chars().all(|c| c.is_digit(radix));
        if !valid_digits {
            return Err(ValidationError::invalid_input(
                attribute,
                "must be a non-negative integer",
            ));
        }

        Self::from_str_radix(digits, u64::from(radix))
            .map_err(|_| ValidationError::invalid_input(attribute, "does not fit in 256 bits"))
    }
}

impl ParseFromForeignBinding for Bytes {
    /// Accepts `""`, `"0x"` or `0x` followed by an even number of hex digits.
    fn parse_from_ffi(value: &str, attribute: &str) -> Result<Self, ValidationError> {
        if value.is_empty() {
            return Ok(Self::new());
        }
        let Some(hex_digits) = value.strip_prefix("0x") else {
            return Err(ValidationError::invalid_input(
                attribute,
                "must be hex encoded and start with 0x",
            ));
        };
        hex::decode(hex_digits)
            .map(Self::from)
            .map_err(|err| ValidationError::invalid_input(attribute, err.to_string()))
    }
}
