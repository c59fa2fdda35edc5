//! Persistence on top of the host's [`DeviceKeyValueStore`](crate::primitives::DeviceKeyValueStore).
//!
//! Everything is stored as JSON strings. Values are validated again when read back, the
//! host store gives no integrity guarantees.

use crate::primitives::{KeyValueStoreError, ValidationError};

/// The active proposal of each account.
pub mod proposal_store;

/// Address book, added / undeployed / visited Safes.
pub mod wallet_store;

pub use proposal_store::{ProposalStore, PROPOSAL_KEY_PREFIX};
pub use wallet_store::{WalletStore, WALLET_DATA_KEY};

/// Errors from the persistence layer.
#[crate::safekit_error]
pub enum StorageError {
    /// An imported document is malformed. Nothing was written.
    #[error("failed to import: {message}")]
    ImportParse {
        /// What is wrong with the document.
        message: String,
    },
    /// A stored record can no longer be read.
    #[error("stored record {key} is corrupt: {message}")]
    CorruptRecord {
        /// Storage key of the record.
        key: String,
        /// Why it could not be read.
        message: String,
    },
    /// Nothing is stored under the key.
    #[error("nothing stored under {key}")]
    NotFound {
        /// Storage key.
        key: String,
    },
    /// A proposal was saved under a different account than its own.
    #[error("proposal belongs to {actual}, not {expected}")]
    AccountMismatch {
        /// Account the caller saved under.
        expected: String,
        /// Account of the proposal.
        actual: String,
    },
    /// Input validation failed.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The host key-value store failed.
    #[error(transparent)]
    KeyValueStore(#[from] KeyValueStoreError),
    /// JSON serialization failed.
    #[error("JSON error: {message}")]
    Serialization {
        /// The error message from `serde_json`.
        message: String,
    },
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization {
            message: e.to_string(),
        }
    }
}
