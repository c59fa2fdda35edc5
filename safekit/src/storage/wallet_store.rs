use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use alloy::primitives::{Address, U256};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{
    primitives::{
        DeviceKeyValueStore, KeyValueStoreError, ParseFromForeignBinding, ValidationError,
    },
    safe::{predict::SafeSetupRecord, AccountKey, SafeSetup},
    safekit_export,
    storage::StorageError,
};

/// Key of the wallet data record.
pub const WALLET_DATA_KEY: &str = "safekit:wallet";

/// Current version of the wallet data record.
pub const WALLET_DATA_VERSION: u32 = 1;

/// Entries keyed by chain id (decimal string), then by checksummed address.
pub type ChainMap<T> = BTreeMap<String, BTreeMap<String, T>>;

/// A Safe the user added to the sidebar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddedSafeRecord {
    /// Owners, checksummed.
    pub owners: Vec<String>,
    /// Threshold.
    pub threshold: u64,
}

/// A predicted Safe that is not deployed yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UndeployedSafeRecord {
    /// `setup` arguments.
    pub props: SafeSetupRecord,
    /// CREATE2 salt nonce, decimal.
    pub salt_nonce: String,
}

/// When a Safe was last opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitedSafeRecord {
    /// Unix time in milliseconds.
    pub last_visited: i64,
}

/// The four maps of the wallet data record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletData {
    /// Contact names.
    pub address_book: ChainMap<String>,
    /// Safes shown in the sidebar.
    pub added_safes: ChainMap<AddedSafeRecord>,
    /// Predicted Safes awaiting deployment.
    pub undeployed_safes: ChainMap<UndeployedSafeRecord>,
    /// Last visit per Safe.
    pub visited_safes: ChainMap<VisitedSafeRecord>,
}

/// `{ "version": 1, "data": { ... } }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletDataRecord {
    /// Format version.
    pub version: u32,
    /// Contents.
    pub data: WalletData,
}

impl Default for WalletDataRecord {
    fn default() -> Self {
        Self {
            version: WALLET_DATA_VERSION,
            data: WalletData::default(),
        }
    }
}

impl WalletDataRecord {
    /// Checks every key and nested value.
    fn validate(&self) -> Result<(), ValidationError> {
        if self.version == 0 || self.version > WALLET_DATA_VERSION {
            return Err(ValidationError::invalid_input(
                "version",
                format!("unsupported version {}", self.version),
            ));
        }
        validate_keys(&self.data.address_book, "addressBook")?;
        validate_keys(&self.data.added_safes, "addedSafes")?;
        validate_keys(&self.data.undeployed_safes, "undeployedSafes")?;
        validate_keys(&self.data.visited_safes, "visitedSafes")?;

        for (chain_id, safes) in &self.data.added_safes {
            for (address, safe) in safes {
                let attribute = format!("addedSafes.{chain_id}.{address}.owners");
                for owner in &safe.owners {
                    Address::parse_from_ffi(owner, &attribute)?;
                }
            }
        }
        for (chain_id, safes) in &self.data.undeployed_safes {
            for (address, safe) in safes {
                SafeSetup::try_from(&safe.props)?;
                U256::parse_from_ffi(
                    &safe.salt_nonce,
                    &format!("undeployedSafes.{chain_id}.{address}.saltNonce"),
                )?;
            }
        }
        Ok(())
    }
}

fn validate_keys<T>(map: &ChainMap<T>, name: &str) -> Result<(), ValidationError> {
    for (chain_id, entries) in map {
        let chain_id_value = chain_id.parse::<u64>().ok().filter(|id| *id > 0);
        if chain_id_value.is_none() {
            return Err(ValidationError::invalid_input(
                format!("{name}.{chain_id}"),
                "chain id must be a positive decimal integer",
            ));
        }
        for address in entries.keys() {
            Address::parse_from_ffi(address, &format!("{name}.{chain_id}.{address}"))?;
        }
    }
    Ok(())
}

fn entry_keys(account: &AccountKey) -> (String, String) {
    (account.chain_id.to_string(), account.address.to_checksum(None))
}

/// A contact from the address book.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct AddressBookEntry {
    /// Checksummed address.
    pub address: String,
    /// Display name.
    pub name: String,
}

/// The wallet data record: address book plus added, undeployed and visited Safes.
///
/// Every mutation reads, changes and writes the whole record under a lock.
#[derive(uniffi::Object)]
pub struct WalletStore {
    kv_store: Arc<dyn DeviceKeyValueStore>,
    write_lock: Mutex<()>,
}

impl WalletStore {
    /// Reads the record; an absent record is empty.
    ///
    /// # Errors
    /// - `StorageError::CorruptRecord` if the stored record cannot be read
    pub fn load(&self) -> Result<WalletDataRecord, StorageError> {
        let json = match self.kv_store.get(WALLET_DATA_KEY.to_string()) {
            Ok(json) => json,
            Err(KeyValueStoreError::KeyNotFound) => return Ok(WalletDataRecord::default()),
            Err(e) => return Err(e.into()),
        };
        let record: WalletDataRecord =
            serde_json::from_str(&json).map_err(|e| StorageError::CorruptRecord {
                key: WALLET_DATA_KEY.to_string(),
                message: e.to_string(),
            })?;
        Ok(record)
    }

    fn update<R>(
        &self,
        change: impl FnOnce(&mut WalletData) -> R,
    ) -> Result<R, StorageError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut record = self.load()?;
        let result = change(&mut record.data);
        self.kv_store
            .set(WALLET_DATA_KEY.to_string(), serde_json::to_string(&record)?)?;
        Ok(result)
    }

    /// The stored setup and salt nonce of an undeployed Safe.
    ///
    /// # Errors
    /// - `StorageError::CorruptRecord` if the record or the entry cannot be read
    pub fn undeployed_safe(
        &self,
        account: &AccountKey,
    ) -> Result<Option<(SafeSetup, U256)>, StorageError> {
        let (chain_id, address) = entry_keys(account);
        let record = self.load()?;
        let Some(entry) = record
            .data
            .undeployed_safes
            .get(&chain_id)
            .and_then(|safes| safes.get(&address))
        else {
            return Ok(None);
        };

        let corrupt = |e: ValidationError| StorageError::CorruptRecord {
            key: WALLET_DATA_KEY.to_string(),
            message: e.to_string(),
        };
        let setup = SafeSetup::try_from(&entry.props).map_err(corrupt)?;
        let salt_nonce = U256::parse_from_ffi(&entry.salt_nonce, "saltNonce").map_err(corrupt)?;
        Ok(Some((setup, salt_nonce)))
    }

    /// Stores a predicted Safe.
    ///
    /// # Errors
    /// - `StorageError::CorruptRecord` / `StorageError::KeyValueStore` on storage failures
    pub fn insert_undeployed_safe(
        &self,
        account: &AccountKey,
        setup: &SafeSetup,
        salt_nonce: U256,
    ) -> Result<(), StorageError> {
        let (chain_id, address) = entry_keys(account);
        self.update(|data| {
            data.undeployed_safes.entry(chain_id).or_default().insert(
                address,
                UndeployedSafeRecord {
                    props: SafeSetupRecord::from(setup),
                    salt_nonce: salt_nonce.to_string(),
                },
            );
        })?;
        crate::info!("wallet.undeployed_safe_added account={account}");
        Ok(())
    }

    /// Moves a Safe from `undeployedSafes` to `addedSafes`. Returns whether it was undeployed.
    ///
    /// # Errors
    /// - `StorageError::CorruptRecord` / `StorageError::KeyValueStore` on storage failures
    pub fn complete_deployment(&self, account: &AccountKey) -> Result<bool, StorageError> {
        let (chain_id, address) = entry_keys(account);
        let moved = self.update(|data| {
            let removed = data
                .undeployed_safes
                .get_mut(&chain_id)
                .and_then(|safes| safes.remove(&address));
            if data
                .undeployed_safes
                .get(&chain_id)
                .is_some_and(BTreeMap::is_empty)
            {
                data.undeployed_safes.remove(&chain_id);
            }
            let Some(undeployed) = removed else {
                return false;
            };
            data.added_safes.entry(chain_id).or_default().insert(
                address,
                AddedSafeRecord {
                    owners: undeployed.props.owners,
                    threshold: undeployed.props.threshold,
                },
            );
            true
        })?;
        crate::info!(
            "wallet.safe_deployed account={account} was_undeployed={moved} timestamp={}",
            Utc::now().to_rfc3339()
        );
        Ok(moved)
    }

    /// Whether the Safe is in `addedSafes`.
    ///
    /// # Errors
    /// - `StorageError::CorruptRecord` if the record cannot be read
    pub fn is_added(&self, account: &AccountKey) -> Result<bool, StorageError> {
        let (chain_id, address) = entry_keys(account);
        Ok(self
            .load()?
            .data
            .added_safes
            .get(&chain_id)
            .is_some_and(|safes| safes.contains_key(&address)))
    }
}

#[safekit_export]
impl WalletStore {
    /// Wraps the host store.
    #[uniffi::constructor]
    pub fn new(kv_store: Arc<dyn DeviceKeyValueStore>) -> Self {
        Self {
            kv_store,
            write_lock: Mutex::new(()),
        }
    }

    /// Adds or renames a contact.
    ///
    /// # Errors
    /// - `StorageError::Validation` if the address or the name is invalid
    pub fn set_address_book_entry(
        &self,
        chain_id: u64,
        address: String,
        name: String,
    ) -> Result<(), StorageError> {
        let account = AccountKey::parse(chain_id, &address)?;
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(ValidationError::invalid_input("name", "must not be empty").into());
        }
        let (chain_id, address) = entry_keys(&account);
        self.update(|data| {
            data.address_book
                .entry(chain_id)
                .or_default()
                .insert(address, name);
        })
    }

    /// Removes a contact. Returns whether it existed.
    ///
    /// # Errors
    /// - `StorageError::Validation` if the address is invalid
    pub fn remove_address_book_entry(
        &self,
        chain_id: u64,
        address: String,
    ) -> Result<bool, StorageError> {
        let (chain_id, address) = entry_keys(&AccountKey::parse(chain_id, &address)?);
        self.update(|data| {
            let removed = data
                .address_book
                .get_mut(&chain_id)
                .and_then(|entries| entries.remove(&address))
                .is_some();
            if data.address_book.get(&chain_id).is_some_and(BTreeMap::is_empty) {
                data.address_book.remove(&chain_id);
            }
            removed
        })
    }

    /// Contacts on `chain_id`, ordered by address.
    ///
    /// # Errors
    /// - `StorageError::CorruptRecord` if the record cannot be read
    pub fn address_book(&self, chain_id: u64) -> Result<Vec<AddressBookEntry>, StorageError> {
        Ok(self
            .load()?
            .data
            .address_book
            .remove(&chain_id.to_string())
            .unwrap_or_default()
            .into_iter()
            .map(|(address, name)| AddressBookEntry { address, name })
            .collect())
    }

    /// Adds a deployed Safe to the sidebar.
    ///
    /// # Errors
    /// - `StorageError::Validation` if the address, owners or threshold are invalid
    pub fn add_safe(
        &self,
        chain_id: u64,
        address: String,
        owners: Vec<String>,
        threshold: u64,
    ) -> Result<(), StorageError> {
        let account = AccountKey::parse(chain_id, &address)?;
        let owners = owners
            .iter()
            .enumerate()
            .map(|(i, owner)| Address::parse_from_ffi(owner, &format!("owners[{i}]")))
            .collect::<Result<Vec<_>, _>>()?;
        crate::safe::validate_owners(&owners, threshold)?;

        let (chain_id, address) = entry_keys(&account);
        self.update(|data| {
            data.added_safes.entry(chain_id).or_default().insert(
                address,
                AddedSafeRecord {
                    owners: owners.iter().map(|owner| owner.to_checksum(None)).collect(),
                    threshold,
                },
            );
        })?;
        crate::info!("wallet.safe_added account={account}");
        Ok(())
    }

    /// Stores a predicted Safe with the setup it will be deployed with.
    ///
    /// # Errors
    /// - `StorageError::Validation` if the address, the setup or the salt nonce is invalid
    pub fn add_undeployed_safe(
        &self,
        chain_id: u64,
        address: String,
        setup: SafeSetupRecord,
        salt_nonce: String,
    ) -> Result<(), StorageError> {
        let account = AccountKey::parse(chain_id, &address)?;
        let setup = SafeSetup::try_from(&setup)?;
        let salt_nonce = U256::parse_from_ffi(&salt_nonce, "salt_nonce")?;
        self.insert_undeployed_safe(&account, &setup, salt_nonce)
    }

    /// Moves a Safe from the undeployed Safes to the added Safes.
    ///
    /// # Errors
    /// - `StorageError::Validation` if the address is invalid
    pub fn mark_deployed(&self, chain_id: u64, address: String) -> Result<bool, StorageError> {
        self.complete_deployment(&AccountKey::parse(chain_id, &address)?)
    }

    /// Addresses of added Safes on `chain_id`.
    ///
    /// # Errors
    /// - `StorageError::CorruptRecord` if the record cannot be read
    pub fn added_safes(&self, chain_id: u64) -> Result<Vec<String>, StorageError> {
        Ok(self
            .load()?
            .data
            .added_safes
            .remove(&chain_id.to_string())
            .map(|safes| safes.into_keys().collect())
            .unwrap_or_default())
    }

    /// Addresses of undeployed Safes on `chain_id`.
    ///
    /// # Errors
    /// - `StorageError::CorruptRecord` if the record cannot be read
    pub fn undeployed_safes(&self, chain_id: u64) -> Result<Vec<String>, StorageError> {
        Ok(self
            .load()?
            .data
            .undeployed_safes
            .remove(&chain_id.to_string())
            .map(|safes| safes.into_keys().collect())
            .unwrap_or_default())
    }

    /// Records that the Safe was opened now.
    ///
    /// # Errors
    /// - `StorageError::Validation` if the address is invalid
    pub fn record_visit(&self, chain_id: u64, address: String) -> Result<(), StorageError> {
        let (chain_id, address) = entry_keys(&AccountKey::parse(chain_id, &address)?);
        let last_visited = Utc::now().timestamp_millis();
        self.update(|data| {
            data.visited_safes
                .entry(chain_id)
                .or_default()
                .insert(address, VisitedSafeRecord { last_visited });
        })
    }

    /// Last visit of the Safe in Unix milliseconds.
    ///
    /// # Errors
    /// - `StorageError::Validation` if the address is invalid
    pub fn last_visited(
        &self,
        chain_id: u64,
        address: String,
    ) -> Result<Option<i64>, StorageError> {
        let (chain_id, address) = entry_keys(&AccountKey::parse(chain_id, &address)?);
        Ok(self
            .load()?
            .data
            .visited_safes
            .get(&chain_id)
            .and_then(|safes| safes.get(&address))
            .map(|visit| visit.last_visited))
    }

    /// The whole record as pretty-printed JSON.
    ///
    /// # Errors
    /// - `StorageError::CorruptRecord` if the record cannot be read
    pub fn export_json(&self) -> Result<String, StorageError> {
        Ok(serde_json::to_string_pretty(&self.load()?)?)
    }

    /// Replaces the whole record with an exported one. Never merges.
    ///
    /// # Errors
    /// - `StorageError::ImportParse` if the document is malformed; nothing is written
    pub fn import_json(&self, json: String) -> Result<(), StorageError> {
        let record: WalletDataRecord =
            serde_json::from_str(&json).map_err(|e| StorageError::ImportParse {
                message: e.to_string(),
            })?;
        record.validate().map_err(|e| StorageError::ImportParse {
            message: e.to_string(),
        })?;

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.kv_store
            .set(WALLET_DATA_KEY.to_string(), serde_json::to_string(&record)?)?;
        crate::info!(
            "wallet.imported chains={} timestamp={}",
            record.data.added_safes.len(),
            Utc::now().to_rfc3339()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::InMemoryDeviceKeyValueStore;
    use serde_json::json;

    const SAFE: &str = "0x4564420674EA68fcc61b463C0494807C759d47e6";
    const OWNER: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";
    const HANDLER: &str = "0xfd0732dc9e303f09fcef3a7388ad10a83459ec99";

    fn checksum(address: &str) -> String {
        address.parse::<Address>().unwrap().to_checksum(None)
    }

    fn wallet_store() -> WalletStore {
        WalletStore::new(Arc::new(InMemoryDeviceKeyValueStore::new()))
    }

    fn setup_record() -> SafeSetupRecord {
        SafeSetupRecord {
            owners: vec![OWNER.to_string()],
            threshold: 1,
            to: None,
            data: None,
            fallback_handler: HANDLER.to_string(),
            payment_token: None,
            payment: None,
            payment_receiver: None,
        }
    }

    #[test]
    fn test_address_book() {
        let store = wallet_store();
        store
            .set_address_book_entry(10, OWNER.to_lowercase(), "Alice".to_string())
            .unwrap();

        let entries = store.address_book(10).unwrap();
        assert_eq!(
            entries,
            vec![AddressBookEntry {
                address: checksum(OWNER),
                name: "Alice".to_string()
            }]
        );
        assert!(store.address_book(1).unwrap().is_empty());

        assert!(store
            .set_address_book_entry(10, OWNER.to_string(), "  ".to_string())
            .is_err());
        assert!(store.remove_address_book_entry(10, OWNER.to_string()).unwrap());
        assert!(!store.remove_address_book_entry(10, OWNER.to_string()).unwrap());
    }

    #[test]
    fn test_undeployed_safe_moves_to_added_on_deployment() {
        let store = wallet_store();
        store
            .add_undeployed_safe(10, SAFE.to_string(), setup_record(), "3".to_string())
            .unwrap();
        assert_eq!(store.undeployed_safes(10).unwrap(), vec![checksum(SAFE)]);

        let account = AccountKey::parse(10, SAFE).unwrap();
        let (setup, salt_nonce) = store.undeployed_safe(&account).unwrap().unwrap();
        assert_eq!(setup.threshold, 1);
        assert_eq!(salt_nonce, U256::from(3));

        assert!(store.mark_deployed(10, SAFE.to_string()).unwrap());
        assert!(store.undeployed_safes(10).unwrap().is_empty());
        assert_eq!(store.added_safes(10).unwrap(), vec![checksum(SAFE)]);
        assert!(store.is_added(&account).unwrap());
        assert!(!store.mark_deployed(10, SAFE.to_string()).unwrap());
    }

    #[test]
    fn test_add_safe_validates_owners() {
        let store = wallet_store();
        assert!(store
            .add_safe(10, SAFE.to_string(), vec![OWNER.to_string()], 2)
            .is_err());
        store
            .add_safe(10, SAFE.to_string(), vec![OWNER.to_string()], 1)
            .unwrap();
        assert_eq!(store.added_safes(10).unwrap().len(), 1);
    }

    #[test]
    fn test_record_visit() {
        let store = wallet_store();
        assert_eq!(store.last_visited(10, SAFE.to_string()).unwrap(), None);
        store.record_visit(10, SAFE.to_string()).unwrap();
        assert!(store.last_visited(10, SAFE.to_string()).unwrap().is_some());
    }

    #[test]
    fn test_import_replaces_wholesale() {
        let store = wallet_store();
        store
            .set_address_book_entry(10, OWNER.to_string(), "Alice".to_string())
            .unwrap();

        let document = json!({
            "version": 1,
            "data": {
                "addressBook": { "1": { OWNER: "Bob" } },
                "addedSafes": { "1": { SAFE: { "owners": [OWNER], "threshold": 1 } } },
                "undeployedSafes": {},
                "visitedSafes": {}
            }
        });
        store.import_json(document.to_string()).unwrap();

        assert!(store.address_book(10).unwrap().is_empty());
        assert_eq!(store.address_book(1).unwrap()[0].name, "Bob");
        assert_eq!(store.added_safes(1).unwrap(), vec![SAFE.to_string()]);
    }

    #[test]
    fn test_invalid_import_leaves_record_untouched() {
        let store = wallet_store();
        store
            .set_address_book_entry(10, OWNER.to_string(), "Alice".to_string())
            .unwrap();
        let before = store.export_json().unwrap();

        for document in [
            json!({ "version": 1 }),
            json!({ "version": 2, "data": {
                "addressBook": {}, "addedSafes": {}, "undeployedSafes": {}, "visitedSafes": {}
            }}),
            json!({ "version": 1, "data": {
                "addressBook": { "ten": {} }, "addedSafes": {}, "undeployedSafes": {}, "visitedSafes": {}
            }}),
            json!({ "version": 1, "data": {
                "addressBook": { "10": { "0x1234": "x" } }, "addedSafes": {},
                "undeployedSafes": {}, "visitedSafes": {}
            }}),
        ] {
            assert!(matches!(
                store.import_json(document.to_string()),
                Err(StorageError::ImportParse { .. })
            ));
        }

        assert_eq!(store.export_json().unwrap(), before);
    }

    #[test]
    fn test_export_round_trip() {
        let store = wallet_store();
        store
            .add_undeployed_safe(480, SAFE.to_string(), setup_record(), "0".to_string())
            .unwrap();
        store.record_visit(480, SAFE.to_string()).unwrap();
        let exported = store.export_json().unwrap();

        let other = wallet_store();
        other.import_json(exported.clone()).unwrap();
        assert_eq!(other.export_json().unwrap(), exported);
    }
}
