//! Safe (previously Gnosis Safe) accounts: transaction hashing, proposals, signatures,
//! MultiSend batching, address prediction and the execution / deployment workflows.
//!
//! Reference: <https://github.com/safe-global/safe-smart-account/tree/v1.4.1>

use std::collections::BTreeSet;
use std::fmt;

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

use crate::primitives::{ParseFromForeignBinding, ValidationError};

/// Deployment of predicted Safes through the proxy factory.
pub mod deployment;

/// Turns a list of calls into a transaction proposal.
pub mod draft;

/// Dispatches a sufficiently signed proposal through `execTransaction`.
pub mod execution;

/// Packed `MultiSend` batches.
/// Reference: <https://github.com/safe-global/safe-smart-account/blob/v1.4.1/contracts/libraries/MultiSend.sol>
pub mod multisend;

/// Reads owners, threshold, version and nonce from a deployed Safe.
pub mod onchain;

/// CREATE2 address prediction for new Safes.
pub mod predict;

/// The active proposal of an account and its signature collection.
pub mod proposal;

/// Owner signatures and their packed encoding.
pub mod signatures;

/// EIP-712 domain and signing for Safe transactions.
pub mod signer;

/// The Safe transaction structure and its hash.
pub mod transaction;

pub use draft::{build_proposal, build_transaction, DraftCall};
pub use predict::{predict_safe_address, SafeSetup, SafeSetupRecord};
pub use proposal::{ProposalSnapshot, ProposalStatus, SignatureError, TransactionProposal};
pub use signatures::SafeSignature;
pub use signer::LocalOwnerSigner;
pub use transaction::{SafeTransactionData, SafeTransactionRecord};

/// Operation type of a Safe transaction.
#[derive(uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SafeOperation {
    /// Performs a standard message call.
    Call = 0,
    /// Performs a `delegatecall`. Executes the target contract's code in the context of the Safe's storage.
    DelegateCall = 1,
}

impl SafeOperation {
    /// Numeric value used on-chain.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parses the on-chain value.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Call),
            1 => Some(Self::DelegateCall),
            _ => None,
        }
    }
}

/// Identity of a Safe: the chain it lives on and its address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountKey {
    /// EIP-155 chain id.
    pub chain_id: u64,
    /// Safe address.
    pub address: Address,
}

impl AccountKey {
    /// Creates a key.
    #[must_use]
    pub const fn new(chain_id: u64, address: Address) -> Self {
        Self { chain_id, address }
    }

    /// Parses a key from foreign input.
    ///
    /// # Errors
    /// - `ValidationError::InvalidInput` if the address is malformed or the chain id is zero.
    pub fn parse(chain_id: u64, address: &str) -> Result<Self, ValidationError> {
        if chain_id == 0 {
            return Err(ValidationError::invalid_input(
                "chain_id",
                "must be greater than zero",
            ));
        }
        Ok(Self::new(chain_id, Address::parse_from_ffi(address, "safe_address")?))
    }
}

impl fmt::Display for AccountKey {
    /// `{chain_id}:{lowercase address}`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:?}", self.chain_id, self.address)
    }
}

/// Whether the Safe contract exists on-chain yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, uniffi::Enum)]
pub enum DeploymentStatus {
    /// The proxy is deployed.
    Deployed,
    /// Only the counterfactual address is known.
    Predicted,
}

/// Owners and threshold of a Safe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountConfig {
    owners: Vec<Address>,
    threshold: u64,
    deployment: DeploymentStatus,
    version: String,
}

impl AccountConfig {
    /// Validates and builds a configuration.
    ///
    /// # Errors
    /// - `ValidationError::InvalidAccountConfig` if owners are empty or repeated, or the
    ///   threshold is outside `1..=owners.len()`.
    pub fn new(
        owners: Vec<Address>,
        threshold: u64,
        deployment: DeploymentStatus,
        version: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        validate_owners(&owners, threshold)?;
        Ok(Self {
            owners,
            threshold,
            deployment,
            version: version.into(),
        })
    }

    /// Owners in their on-chain order.
    #[must_use]
    pub fn owners(&self) -> &[Address] {
        &self.owners
    }

    /// Signatures required to execute.
    #[must_use]
    pub const fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Deployment status.
    #[must_use]
    pub const fn deployment(&self) -> DeploymentStatus {
        self.deployment
    }

    /// Contract version, e.g. `1.4.1`.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Whether `address` is an owner.
    #[must_use]
    pub fn is_owner(&self, address: &Address) -> bool {
        self.owners.contains(address)
    }
}

/// Checks owners are non-empty and unique, and `1 <= threshold <= owners.len()`.
pub(crate) fn validate_owners(owners: &[Address], threshold: u64) -> Result<(), ValidationError> {
    if owners.is_empty() {
        return Err(ValidationError::InvalidAccountConfig {
            message: "at least one owner is required".to_string(),
        });
    }
    let mut seen = BTreeSet::new();
    if let Some(duplicate) = owners.iter().find(|owner| !seen.insert(**owner)) {
        return Err(ValidationError::InvalidAccountConfig {
            message: format!("owner {duplicate} is listed twice"),
        });
    }
    if owners.contains(&Address::ZERO) {
        return Err(ValidationError::InvalidAccountConfig {
            message: "the zero address cannot be an owner".to_string(),
        });
    }
    let owner_count = u64::try_from(owners.len()).unwrap_or(u64::MAX);
    if threshold == 0 || threshold > owner_count {
        return Err(ValidationError::InvalidAccountConfig {
            message: format!("threshold {threshold} must be between 1 and {owner_count}"),
        });
    }
    Ok(())
}

/// [`AccountConfig`] as exchanged with foreign code.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct UnparsedAccountConfig {
    /// Owner addresses.
    pub owners: Vec<String>,
    /// Signatures required to execute.
    pub threshold: u64,
    /// Deployment status.
    pub deployment: DeploymentStatus,
    /// Contract version.
    pub version: String,
}

impl TryFrom<UnparsedAccountConfig> for AccountConfig {
    type Error = ValidationError;

    fn try_from(value: UnparsedAccountConfig) -> Result<Self, Self::Error> {
        let owners = value
            .owners
            .iter()
            .enumerate()
            .map(|(i, owner)| Address::parse_from_ffi(owner, &format!("owners[{i}]")))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(owners, value.threshold, value.deployment, value.version)
    }
}

impl From<&AccountConfig> for UnparsedAccountConfig {
    fn from(value: &AccountConfig) -> Self {
        Self {
            owners: value
                .owners
                .iter()
                .map(|owner| owner.to_checksum(None))
                .collect(),
            threshold: value.threshold,
            deployment: value.deployment,
            version: value.version.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    const OWNER_A: Address = address!("0x1000000000000000000000000000000000000001");
    const OWNER_B: Address = address!("0x2000000000000000000000000000000000000002");

    #[test]
    fn test_account_key_display_is_lowercase() {
        let key = AccountKey::parse(10, "0x4564420674EA68fcc61b463C0494807C759d47e6").unwrap();
        assert_eq!(key.to_string(), "10:0x4564420674ea68fcc61b463c0494807c759d47e6");
        assert!(AccountKey::parse(0, "0x4564420674EA68fcc61b463C0494807C759d47e6").is_err());
    }

    #[test]
    fn test_account_config_validation() {
        assert!(AccountConfig::new(
            vec![OWNER_A, OWNER_B],
            2,
            DeploymentStatus::Deployed,
            "1.4.1"
        )
        .is_ok());

        for (owners, threshold) in [
            (vec![], 1),
            (vec![OWNER_A, OWNER_B], 0),
            (vec![OWNER_A, OWNER_B], 3),
            (vec![OWNER_A, OWNER_A], 1),
            (vec![Address::ZERO], 1),
        ] {
            assert!(matches!(
                AccountConfig::new(owners, threshold, DeploymentStatus::Deployed, "1.4.1"),
                Err(ValidationError::InvalidAccountConfig { .. })
            ));
        }
    }

    #[test]
    fn test_unparsed_account_config() {
        let config = AccountConfig::try_from(UnparsedAccountConfig {
            owners: vec![
                "0x1000000000000000000000000000000000000001".to_string(),
                "0x2000000000000000000000000000000000000002".to_string(),
            ],
            threshold: 1,
            deployment: DeploymentStatus::Predicted,
            version: "1.4.1".to_string(),
        })
        .unwrap();
        assert!(config.is_owner(&OWNER_B));
        assert_eq!(UnparsedAccountConfig::from(&config).threshold, 1);

        let err = AccountConfig::try_from(UnparsedAccountConfig {
            owners: vec!["0x1234".to_string()],
            threshold: 1,
            deployment: DeploymentStatus::Deployed,
            version: "1.4.1".to_string(),
        })
        .unwrap_err();
        assert!(err.to_string().contains("owners[0]"));
    }

    #[test]
    fn test_operation_values() {
        assert_eq!(SafeOperation::DelegateCall.as_u8(), 1);
        assert_eq!(SafeOperation::from_u8(0), Some(SafeOperation::Call));
        assert_eq!(SafeOperation::from_u8(2), None);
    }
}
