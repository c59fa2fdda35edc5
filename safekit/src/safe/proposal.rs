use std::collections::BTreeMap;

use alloy::primitives::{Address, Bytes, FixedBytes};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    primitives::ValidationError,
    safe::{
        signatures::{encode_signatures, SignatureRecord},
        signer::recover_owner,
        AccountConfig, AccountKey, SafeSignature, SafeTransactionData, SafeTransactionRecord,
    },
};

/// Where a proposal is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum ProposalStatus {
    /// No signatures yet.
    Unsigned,
    /// Some signatures, fewer than the threshold.
    PartiallySigned,
    /// At least `threshold` signatures; can be executed.
    Ready,
    /// Executed on-chain. No further signatures are accepted.
    Executed,
}

/// Errors when collecting signatures.
#[crate::safekit_error]
pub enum SignatureError {
    /// The owner already signed this proposal.
    #[error("signer {signer} has already signed this proposal")]
    DuplicateSigner {
        /// The repeated signer.
        signer: String,
    },
    /// The signer is not an owner of the Safe.
    #[error("signer {signer} is not an owner of the account")]
    UnauthorizedSigner {
        /// The rejected signer.
        signer: String,
    },
    /// The proposal was already executed.
    #[error("proposal with nonce {nonce} has already been executed")]
    AlreadyExecuted {
        /// Nonce of the executed proposal.
        nonce: u64,
    },
    /// The signature is malformed or was not produced by the claimed signer.
    #[error("invalid signature from {signer}: {reason}")]
    InvalidSignature {
        /// The claimed signer.
        signer: String,
        /// What is wrong with the signature.
        reason: String,
    },
}

/// The single active transaction proposal of a Safe.
///
/// Mutated only by appending signatures. Signatures are keyed by signer so iteration
/// yields them in ascending address order, which is what `execTransaction` requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionProposal {
    account: AccountKey,
    transaction: SafeTransactionData,
    signatures: BTreeMap<Address, SafeSignature>,
    created_at: DateTime<Utc>,
    executed: bool,
}

impl TransactionProposal {
    /// A fresh, unsigned proposal.
    #[must_use]
    pub fn new(account: AccountKey, transaction: SafeTransactionData) -> Self {
        Self {
            account,
            transaction,
            signatures: BTreeMap::new(),
            created_at: Utc::now(),
            executed: false,
        }
    }

    /// The Safe this proposal belongs to.
    #[must_use]
    pub const fn account(&self) -> &AccountKey {
        &self.account
    }

    /// The proposed transaction.
    #[must_use]
    pub const fn transaction(&self) -> &SafeTransactionData {
        &self.transaction
    }

    /// When the proposal was drafted.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The hash owners sign.
    #[must_use]
    pub fn safe_tx_hash(&self) -> FixedBytes<32> {
        self.transaction.safe_tx_hash(&self.account)
    }

    /// Adds an owner's signature and returns the resulting status.
    ///
    /// EOA signatures must recover to `signature.signer` over [`Self::safe_tx_hash`]; contract
    /// signatures are verified on-chain through EIP-1271. Nothing changes on error.
    ///
    /// # Errors
    /// - `SignatureError::AlreadyExecuted` once the proposal was executed
    /// - `SignatureError::DuplicateSigner` if the signer already signed
    /// - `SignatureError::UnauthorizedSigner` if the signer is not an owner
    /// - `SignatureError::InvalidSignature` if an EOA signature does not recover to the signer
    pub fn add_signature(
        &mut self,
        config: &AccountConfig,
        mut signature: SafeSignature,
    ) -> Result<ProposalStatus, SignatureError> {
        let signer = signature.signer.to_checksum(None);
        if self.executed {
            return Err(SignatureError::AlreadyExecuted {
                nonce: self.transaction.nonce,
            });
        }
        if self.signatures.contains_key(&signature.signer) {
            return Err(SignatureError::DuplicateSigner { signer });
        }
        if !config.is_owner(&signature.signer) {
            return Err(SignatureError::UnauthorizedSigner { signer });
        }

        if signature.is_contract_signature {
            if signature.data.is_empty() {
                return Err(SignatureError::InvalidSignature {
                    signer,
                    reason: "contract signature is empty".to_string(),
                });
            }
        } else {
            let (recovered, normalized) = recover_owner(&self.safe_tx_hash(), &signature.data)
                .map_err(|reason| SignatureError::InvalidSignature {
                    signer: signer.clone(),
                    reason,
                })?;
            if recovered != signature.signer {
                return Err(SignatureError::InvalidSignature {
                    signer,
                    reason: format!("signature recovers to {}", recovered.to_checksum(None)),
                });
            }
            signature.data = normalized;
        }

        self.signatures.insert(signature.signer, signature);
        Ok(self.status(config.threshold()))
    }

    /// Number of collected signatures.
    #[must_use]
    pub fn signature_count(&self) -> usize {
        self.signatures.len()
    }

    /// Whether `signer` already signed.
    #[must_use]
    pub fn has_signed(&self, signer: &Address) -> bool {
        self.signatures.contains_key(signer)
    }

    /// `signature_count >= threshold`.
    #[must_use]
    pub fn is_ready(&self, threshold: u64) -> bool {
        u64::try_from(self.signatures.len()).unwrap_or(u64::MAX) >= threshold
    }

    /// Current status for the given threshold.
    #[must_use]
    pub fn status(&self, threshold: u64) -> ProposalStatus {
        if self.executed {
            ProposalStatus::Executed
        } else if self.signatures.is_empty() {
            ProposalStatus::Unsigned
        } else if self.is_ready(threshold) {
            ProposalStatus::Ready
        } else {
            ProposalStatus::PartiallySigned
        }
    }

    /// Signatures ascending by signer address.
    pub fn sorted_signatures(&self) -> impl ExactSizeIterator<Item = &SafeSignature> {
        self.signatures.values()
    }

    /// Packed signatures for `execTransaction`.
    #[must_use]
    pub fn encoded_signatures(&self) -> Bytes {
        encode_signatures(self.signatures.values())
    }

    /// Calldata of `execTransaction` for this proposal.
    #[must_use]
    pub fn exec_transaction_calldata(&self) -> Vec<u8> {
        self.transaction.exec_transaction_calldata(self.encoded_signatures())
    }

    /// Whether the proposal was executed.
    #[must_use]
    pub const fn is_executed(&self) -> bool {
        self.executed
    }

    /// Flags the proposal as executed.
    pub fn mark_executed(&mut self) {
        self.executed = true;
    }

    /// Owners of `config` who have not signed yet.
    #[must_use]
    pub fn missing_owners(&self, config: &AccountConfig) -> Vec<Address> {
        config
            .owners()
            .iter()
            .copied()
            .filter(|owner| !self.signatures.contains_key(owner))
            .collect()
    }

    /// Persisted form.
    #[must_use]
    pub fn to_record(&self) -> ProposalRecord {
        ProposalRecord {
            data: SafeTransactionRecord::from(&self.transaction),
            signatures: self
                .signatures
                .values()
                .map(SignatureRecord::from)
                .collect(),
            created_at: Some(self.created_at.to_rfc3339()),
        }
    }

    /// Rebuilds a proposal from its persisted form, validating every field again.
    ///
    /// Signers must be unique and EOA signatures must recover to their signer.
    ///
    /// # Errors
    /// - `ValidationError::InvalidInput` naming the first offending field.
    pub fn from_record(
        account: AccountKey,
        record: &ProposalRecord,
    ) -> Result<Self, ValidationError> {
        let transaction = SafeTransactionData::try_from(&record.data)?;
        let created_at = match &record.created_at {
            Some(created_at) => DateTime::parse_from_rfc3339(created_at)
                .map_err(|e| ValidationError::invalid_input("createdAt", e.to_string()))?
                .with_timezone(&Utc),
            None => Utc::now(),
        };

        let mut proposal = Self {
            account,
            transaction,
            signatures: BTreeMap::new(),
            created_at,
            executed: false,
        };
        let safe_tx_hash = proposal.safe_tx_hash();

        for (index, signature_record) in record.signatures.iter().enumerate() {
            let mut signature = signature_record.parse(index)?;
            if proposal.signatures.contains_key(&signature.signer) {
                return Err(ValidationError::invalid_input(
                    format!("signatures[{index}].signer"),
                    "duplicate signer",
                ));
            }
            if !signature.is_contract_signature {
                let (recovered, normalized) = recover_owner(&safe_tx_hash, &signature.data)
                    .map_err(|reason| {
                        ValidationError::invalid_input(format!("signatures[{index}].data"), reason)
                    })?;
                if recovered != signature.signer {
                    return Err(ValidationError::invalid_input(
                        format!("signatures[{index}].data"),
                        "signature does not belong to signer",
                    ));
                }
                signature.data = normalized;
            }
            proposal.signatures.insert(signature.signer, signature);
        }

        Ok(proposal)
    }

    /// View of the proposal for the host UI.
    #[must_use]
    pub fn snapshot(&self, config: &AccountConfig) -> ProposalSnapshot {
        let record = self.to_record();
        ProposalSnapshot {
            chain_id: self.account.chain_id,
            safe_address: self.account.address.to_checksum(None),
            safe_tx_hash: self.safe_tx_hash().to_string(),
            transaction: record.data,
            signatures: record.signatures,
            status: self.status(config.threshold()),
            threshold: config.threshold(),
            confirmations: u64::try_from(self.signatures.len()).unwrap_or(u64::MAX),
            missing_owners: self
                .missing_owners(config)
                .iter()
                .map(|owner| owner.to_checksum(None))
                .collect(),
            created_at: self.created_at.to_rfc3339(),
        }
    }
}

/// JSON document stored per account and used for export / import.
///
/// ```json
/// {
///   "data": { "to": "0x…", "value": "0", "data": "0x", "operation": 0, "safeTxGas": "0",
///             "baseGas": "0", "gasPrice": "0", "gasToken": "0x…", "refundReceiver": "0x…",
///             "nonce": 7 },
///   "signatures": [ { "signer": "0x…", "data": "0x…", "isContractSignature": false } ],
///   "createdAt": "2025-01-01T00:00:00+00:00"
/// }
/// ```
#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalRecord {
    /// The transaction.
    pub data: SafeTransactionRecord,
    /// Signatures ascending by signer.
    pub signatures: Vec<SignatureRecord>,
    /// RFC 3339 creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// A proposal as shown to the host.
#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct ProposalSnapshot {
    /// Chain of the Safe.
    pub chain_id: u64,
    /// Checksummed Safe address.
    pub safe_address: String,
    /// Hash owners sign.
    pub safe_tx_hash: String,
    /// The transaction.
    pub transaction: SafeTransactionRecord,
    /// Collected signatures ascending by signer.
    pub signatures: Vec<SignatureRecord>,
    /// Lifecycle status.
    pub status: ProposalStatus,
    /// Signatures required.
    pub threshold: u64,
    /// Signatures collected.
    pub confirmations: u64,
    /// Owners who have not signed, in on-chain order.
    pub missing_owners: Vec<String>,
    /// RFC 3339 creation time.
    pub created_at: String,
}
