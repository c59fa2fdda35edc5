use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use thiserror::Error;

/// Failures reported by the host's [`DeviceKeyValueStore`].
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Error, uniffi::Error)]
pub enum KeyValueStoreError {
    /// Nothing is stored under the key.
    #[error("no value stored under key")]
    KeyNotFound,
    /// The host could not decode the stored value.
    #[error("stored value could not be decoded")]
    ParsingFailure,
    /// The host could not write or remove the value.
    #[error("write to device storage failed")]
    UpdateFailure,
    /// The host callback failed in a way it did not declare.
    #[error("device storage callback failed: {0}")]
    UnexpectedUniFFICallbackError(String),
}

impl From<uniffi::UnexpectedUniFFICallbackError> for KeyValueStoreError {
    fn from(error: uniffi::UnexpectedUniFFICallbackError) -> Self {
        Self::UnexpectedUniFFICallbackError(error.reason)
    }
}

/// Plain string storage owned by the host (`localStorage` in an extension,
/// `SharedPreferences` or `UserDefaults` on mobile).
///
/// Proposals live under `safekit:tx:{chain_id}:{address}`, the wallet data record under
/// `safekit:wallet`, both as JSON. Values are untrusted and re-validated on every read.
#[uniffi::export(with_foreign)]
pub trait DeviceKeyValueStore: Send + Sync {
    /// Reads the value under `key`.
    ///
    /// # Errors
    /// - `KeyValueStoreError::KeyNotFound` when the key is absent
    fn get(&self, key: String) -> Result<String, KeyValueStoreError>;

    /// Writes `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    /// - `KeyValueStoreError::UpdateFailure` when the write fails
    fn set(&self, key: String, value: String) -> Result<(), KeyValueStoreError>;

    /// Removes `key`.
    ///
    /// # Errors
    /// - `KeyValueStoreError::KeyNotFound` when the key is absent
    /// - `KeyValueStoreError::UpdateFailure` when the removal fails
    fn delete(&self, key: String) -> Result<(), KeyValueStoreError>;
}

/// Process-local [`DeviceKeyValueStore`], for tests and hosts without persistent storage.
#[derive(Debug, Default)]
pub struct InMemoryDeviceKeyValueStore {
    store: Mutex<HashMap<String, String>>,
}

impl InMemoryDeviceKeyValueStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DeviceKeyValueStore for InMemoryDeviceKeyValueStore {
    fn get(&self, key: String) -> Result<String, KeyValueStoreError> {
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()
            .ok_or(KeyValueStoreError::KeyNotFound)
    }

    fn set(&self, key: String, value: String) -> Result<(), KeyValueStoreError> {
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, value);
        Ok(())
    }

    fn delete(&self, key: String) -> Result<(), KeyValueStoreError> {
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key)
            .map(|_| ())
            .ok_or(KeyValueStoreError::KeyNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_store_get_set_delete() {
        let store = InMemoryDeviceKeyValueStore::new();
        assert!(matches!(
            store.get("safekit:tx:1:0xabc".to_string()),
            Err(KeyValueStoreError::KeyNotFound)
        ));

        store
            .set("safekit:tx:1:0xabc".to_string(), "{}".to_string())
            .unwrap();
        assert_eq!(store.get("safekit:tx:1:0xabc".to_string()).unwrap(), "{}");
        assert_eq!(store.len(), 1);

        store.delete("safekit:tx:1:0xabc".to_string()).unwrap();
        assert!(store.is_empty());
        assert!(matches!(
            store.delete("safekit:tx:1:0xabc".to_string()),
            Err(KeyValueStoreError::KeyNotFound)
        ));
    }
}
