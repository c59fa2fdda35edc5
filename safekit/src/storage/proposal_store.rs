use std::sync::Arc;

use alloy::primitives::FixedBytes;
use chrono::Utc;

use crate::{
    primitives::{DeviceKeyValueStore, KeyValueStoreError},
    safe::{proposal::ProposalRecord, AccountKey, TransactionProposal},
    storage::StorageError,
};

/// Prefix of proposal keys: `safekit:tx:{chain_id}:{lowercase address}`.
pub const PROPOSAL_KEY_PREFIX: &str = "safekit:tx:";

/// Stores at most one proposal per account.
///
/// Every `save` writes the complete record; there are no partial updates.
#[derive(Clone)]
pub struct ProposalStore {
    kv_store: Arc<dyn DeviceKeyValueStore>,
}

impl ProposalStore {
    /// Wraps the host store.
    #[must_use]
    pub fn new(kv_store: Arc<dyn DeviceKeyValueStore>) -> Self {
        Self { kv_store }
    }

    /// Storage key of `account`.
    #[must_use]
    pub fn storage_key(account: &AccountKey) -> String {
        format!("{PROPOSAL_KEY_PREFIX}{account}")
    }

    /// Writes `proposal` as the active proposal of `account`, replacing any previous one.
    ///
    /// # Errors
    /// - `StorageError::AccountMismatch` if `proposal` belongs to another account
    /// - `StorageError::KeyValueStore` if the host store fails
    pub fn save(
        &self,
        account: &AccountKey,
        proposal: &TransactionProposal,
    ) -> Result<(), StorageError> {
        if proposal.account() != account {
            return Err(StorageError::AccountMismatch {
                expected: account.to_string(),
                actual: proposal.account().to_string(),
            });
        }
        let json = serde_json::to_string(&proposal.to_record())?;
        self.kv_store.set(Self::storage_key(account), json)?;
        crate::debug!(
            "proposal.saved account={account} nonce={} signatures={}",
            proposal.transaction().nonce,
            proposal.signature_count()
        );
        Ok(())
    }

    /// Reads the active proposal of `account`.
    ///
    /// # Errors
    /// - `StorageError::CorruptRecord` if the stored value is no longer a valid proposal.
    ///   The record is left in place so it can be exported or discarded explicitly.
    /// - `StorageError::KeyValueStore` if the host store fails
    pub fn load(&self, account: &AccountKey) -> Result<Option<TransactionProposal>, StorageError> {
        let key = Self::storage_key(account);
        let json = match self.kv_store.get(key.clone()) {
            Ok(json) => json,
            Err(KeyValueStoreError::KeyNotFound) => return Ok(None),
            Err(KeyValueStoreError::ParsingFailure) => {
                return Err(StorageError::CorruptRecord {
                    key,
                    message: "the key-value store could not read the value".to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        Self::parse_record(*account, &json)
            .map(Some)
            .map_err(|message| {
                crate::warn!("proposal.corrupt key={key} error={message}");
                StorageError::CorruptRecord { key, message }
            })
    }

    /// Deletes the active proposal of `account`. Returns whether one existed.
    ///
    /// # Errors
    /// - `StorageError::KeyValueStore` if the host store fails
    pub fn remove(&self, account: &AccountKey) -> Result<bool, StorageError> {
        match self.kv_store.delete(Self::storage_key(account)) {
            Ok(()) => {
                crate::debug!("proposal.removed account={account}");
                Ok(true)
            }
            Err(KeyValueStoreError::KeyNotFound) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes the active proposal of `account` only if it is the proposal with
    /// `safe_tx_hash`. Returns whether it was removed.
    ///
    /// A different or corrupt record is left in place.
    ///
    /// # Errors
    /// - `StorageError::KeyValueStore` if the host store fails
    pub fn remove_if(
        &self,
        account: &AccountKey,
        safe_tx_hash: FixedBytes<32>,
    ) -> Result<bool, StorageError> {
        match self.load(account) {
            Ok(Some(stored)) if stored.safe_tx_hash() == safe_tx_hash => self.remove(account),
            Ok(Some(stored)) => {
                crate::info!(
                    "proposal.kept account={account} stored_safe_tx_hash={} removed_safe_tx_hash={safe_tx_hash}",
                    stored.safe_tx_hash()
                );
                Ok(false)
            }
            Ok(None) | Err(StorageError::CorruptRecord { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// The stored record of `account` as pretty-printed JSON.
    ///
    /// Exports the raw stored value when it is corrupt, so it can still be inspected.
    ///
    /// # Errors
    /// - `StorageError::NotFound` if there is no active proposal
    /// - `StorageError::KeyValueStore` if the host store fails
    pub fn export_json(&self, account: &AccountKey) -> Result<String, StorageError> {
        let key = Self::storage_key(account);
        let json = match self.kv_store.get(key.clone()) {
            Ok(json) => json,
            Err(KeyValueStoreError::KeyNotFound) => return Err(StorageError::NotFound { key }),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str::<serde_json::Value>(&json) {
            Ok(value) => Ok(serde_json::to_string_pretty(&value)?),
            Err(_) => Ok(json),
        }
    }

    /// Validates an exported document without touching storage.
    ///
    /// # Errors
    /// - `StorageError::ImportParse` describing the first problem found
    pub fn parse_import(
        account: &AccountKey,
        json: &str,
    ) -> Result<TransactionProposal, StorageError> {
        Self::parse_record(*account, json).map_err(|message| StorageError::ImportParse { message })
    }

    /// Replaces the active proposal of `account` with an exported document.
    ///
    /// The whole document is validated first; on any error the existing proposal is
    /// left untouched.
    ///
    /// # Errors
    /// - `StorageError::ImportParse` if the document is malformed
    /// - `StorageError::KeyValueStore` if the host store fails
    pub fn import_json(
        &self,
        account: &AccountKey,
        json: &str,
    ) -> Result<TransactionProposal, StorageError> {
        let proposal = Self::parse_import(account, json)?;
        self.save(account, &proposal)?;
        crate::info!(
            "proposal.imported account={account} nonce={} signatures={} timestamp={}",
            proposal.transaction().nonce,
            proposal.signature_count(),
            Utc::now().to_rfc3339()
        );
        Ok(proposal)
    }

    fn parse_record(account: AccountKey, json: &str) -> Result<TransactionProposal, String> {
        let record: ProposalRecord = serde_json::from_str(json).map_err(|e| e.to_string())?;
        TransactionProposal::from_record(account, &record).map_err(|e| e.to_string())
    }
}
