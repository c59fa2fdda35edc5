use alloy::{
    primitives::{fixed_bytes, keccak256, Address, Bytes, FixedBytes, U256},
    sol,
    sol_types::{SolCall, SolValue},
};
use serde::{Deserialize, Serialize};

use crate::{
    primitives::{ParseFromForeignBinding, ValidationError},
    safe::{signer::eip712_hash, AccountKey, SafeOperation},
};

/// Reference: <https://github.com/safe-global/safe-smart-account/blob/v1.4.1/contracts/Safe.sol#L62C49-L62C115>
static SAFE_TX_TYPEHASH: FixedBytes<32> =
    fixed_bytes!("0xbb8310d486368db6bd6f849402fdd73ad53d316b5a4b2644ad6efe0f941286d8");

sol! {
    /// Represents the hash of a Safe transaction.
    /// Reference: <https://github.com/safe-global/safe-smart-account/blob/v1.4.1/contracts/Safe.sol#L427>
    #[derive(Debug)]
    #[sol(rename_all = "camelcase")]
    struct SafeTxHash {
        bytes32 safe_tx_typehash;
        address to;
        uint256 value;
        /// keccak256 of calldata
        bytes32 data;
        uint8 operation;
        uint256 safe_tx_gas;
        uint256 base_gas;
        uint256 gas_price;
        address gas_token;
        address refund_receiver;
        uint256 nonce;
    }

    /// The parts of the Safe interface safekit calls.
    /// Reference: <https://github.com/safe-global/safe-smart-account/blob/v1.4.1/contracts/Safe.sol>
    interface ISafe {
        function setup(
            address[] calldata _owners,
            uint256 _threshold,
            address to,
            bytes calldata data,
            address fallbackHandler,
            address paymentToken,
            uint256 payment,
            address payable paymentReceiver
        ) external;

        function execTransaction(
            address to,
            uint256 value,
            bytes calldata data,
            uint8 operation,
            uint256 safeTxGas,
            uint256 baseGas,
            uint256 gasPrice,
            address gasToken,
            address payable refundReceiver,
            bytes memory signatures
        ) external payable returns (bool success);

        function nonce() external view returns (uint256 nonce);

        function getThreshold() external view returns (uint256 threshold);

        function getOwners() external view returns (address[] memory owners);

        function VERSION() external view returns (string memory version);
    }
}

/// A Safe transaction as hashed and executed by the Safe contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeTransactionData {
    /// Destination address.
    pub to: Address,
    /// Native value in wei.
    pub value: U256,
    /// Calldata.
    pub data: Bytes,
    /// Call or delegate call.
    pub operation: SafeOperation,
    /// Gas reserved for the inner call, 0 to forward all.
    pub safe_tx_gas: U256,
    /// Gas independent of the inner call, used for refunds.
    pub base_gas: U256,
    /// Gas price for the refund, 0 for no refund.
    pub gas_price: U256,
    /// Token used for the refund, zero for native.
    pub gas_token: Address,
    /// Refund receiver, zero for `tx.origin`.
    pub refund_receiver: Address,
    /// Safe nonce this transaction consumes.
    pub nonce: u64,
}

impl SafeTransactionData {
    /// A transaction without refund parameters.
    #[must_use]
    pub const fn new(
        to: Address,
        value: U256,
        data: Bytes,
        operation: SafeOperation,
        nonce: u64,
    ) -> Self {
        Self {
            to,
            value,
            data,
            operation,
            safe_tx_gas: U256::ZERO,
            base_gas: U256::ZERO,
            gas_price: U256::ZERO,
            gas_token: Address::ZERO,
            refund_receiver: Address::ZERO,
            nonce,
        }
    }

    /// `keccak256(abi.encode(SAFE_TX_TYPEHASH, ...))`, the EIP-712 struct hash.
    #[must_use]
    pub fn struct_hash(&self) -> FixedBytes<32> {
        let safe_tx_hash = SafeTxHash {
            safe_tx_typehash: SAFE_TX_TYPEHASH,
            to: self.to,
            value: self.value,
            data: keccak256(&self.data),
            operation: self.operation.as_u8(),
            safe_tx_gas: self.safe_tx_gas,
            base_gas: self.base_gas,
            gas_price: self.gas_price,
            gas_token: self.gas_token,
            refund_receiver: self.refund_receiver,
            nonce: U256::from(self.nonce),
        };
        keccak256(safe_tx_hash.abi_encode())
    }

    /// The hash owners sign (`getTransactionHash` equivalent).
    ///
    /// Reference: <https://github.com/safe-global/safe-smart-account/blob/v1.4.1/contracts/Safe.sol#L427>
    #[must_use]
    pub fn safe_tx_hash(&self, account: &AccountKey) -> FixedBytes<32> {
        eip712_hash(self.struct_hash(), account.chain_id, account.address)
    }

    /// Calldata for `execTransaction` with the given packed signatures.
    #[must_use]
    pub fn exec_transaction_calldata(&self, signatures: Bytes) -> Vec<u8> {
        ISafe::execTransactionCall {
            to: self.to,
            value: self.value,
            data: self.data.clone(),
            operation: self.operation.as_u8(),
            safeTxGas: self.safe_tx_gas,
            baseGas: self.base_gas,
            gasPrice: self.gas_price,
            gasToken: self.gas_token,
            refundReceiver: self.refund_receiver,
            signatures,
        }
        .abi_encode()
    }
}

/// Persisted and exported form of a [`SafeTransactionData`].
///
/// Numbers are decimal strings, byte strings are `0x` hex.
#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeTransactionRecord {
    /// Destination address.
    pub to: String,
    /// Native value in wei, decimal.
    pub value: String,
    /// Calldata, `0x` hex.
    pub data: String,
    /// `0` for call, `1` for delegate call.
    pub operation: u8,
    /// Decimal.
    pub safe_tx_gas: String,
    /// Decimal.
    pub base_gas: String,
    /// Decimal.
    pub gas_price: String,
    /// Refund token address.
    pub gas_token: String,
    /// Refund receiver address.
    pub refund_receiver: String,
    /// Safe nonce.
    pub nonce: u64,
}

impl From<&SafeTransactionData> for SafeTransactionRecord {
    fn from(tx: &SafeTransactionData) -> Self {
        Self {
            to: tx.to.to_checksum(None),
            value: tx.value.to_string(),
            data: format!("0x{}", hex::encode(&tx.data)),
            operation: tx.operation.as_u8(),
            safe_tx_gas: tx.safe_tx_gas.to_string(),
            base_gas: tx.base_gas.to_string(),
            gas_price: tx.gas_price.to_string(),
            gas_token: tx.gas_token.to_checksum(None),
            refund_receiver: tx.refund_receiver.to_checksum(None),
            nonce: tx.nonce,
        }
    }
}

impl TryFrom<&SafeTransactionRecord> for SafeTransactionData {
    type Error = ValidationError;

    fn try_from(record: &SafeTransactionRecord) -> Result<Self, Self::Error> {
        let operation = SafeOperation::from_u8(record.operation).ok_or_else(|| {
            ValidationError::invalid_input(
                "data.operation",
                "must be 0 (call) or 1 (delegate call)",
            )
        })?;

        Ok(Self {
            to: Address::parse_from_ffi(&record.to, "data.to")?,
            value: U256::parse_from_ffi(&record.value, "data.value")?,
            data: Bytes::parse_from_ffi(&record.data, "data.data")?,
            operation,
            safe_tx_gas: U256::parse_from_ffi(&record.safe_tx_gas, "data.safeTxGas")?,
            base_gas: U256::parse_from_ffi(&record.base_gas, "data.baseGas")?,
            gas_price: U256::parse_from_ffi(&record.gas_price, "data.gasPrice")?,
            gas_token: Address::parse_from_ffi(&record.gas_token, "data.gasToken")?,
            refund_receiver: Address::parse_from_ffi(
                &record.refund_receiver,
                "data.refundReceiver",
            )?,
            nonce: record.nonce,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, bytes};

    fn example_transaction() -> SafeTransactionData {
        SafeTransactionData {
            to: address!("0x00000000219ab540356cbb839cbe05303d7705fa"),
            value: U256::from(1),
            data: bytes!("0x095ea7b3000000000000000000000000c36442b4a4522e871399cd717abdd847ab11fe8800000000000000000000000000000000000000000000000000015c3b87af4cf5"),
            operation: SafeOperation::DelegateCall,
            safe_tx_gas: U256::from(0x123),
            base_gas: U256::from(0x321),
            gas_price: U256::from(0x1234),
            gas_token: address!("0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2"),
            refund_receiver: address!("0x8315177ab297ba92a06054ce80a67ed4dbd7ed3a"),
            nonce: 2,
        }
    }

    #[test]
    fn test_safe_tx_hash_matches_contract() {
        let account = AccountKey::new(10, address!("0x4564420674EA68fcc61b463C0494807C759d47e6"));

        assert_eq!(
            example_transaction().safe_tx_hash(&account),
            // From `getTransactionHash(tx)` in the explorer for 0x4564420674EA68fcc61b463C0494807C759d47e6 safe
            fixed_bytes!("0x358c04136e795dddeb66023c9431955b6f6d63515c76f1f2113afcced52410e2")
        );
    }

    #[test]
    fn test_safe_tx_hash_depends_on_chain_and_nonce() {
        let tx = example_transaction();
        let optimism = AccountKey::new(10, address!("0x4564420674EA68fcc61b463C0494807C759d47e6"));
        let ethereum = AccountKey::new(1, optimism.address);
        assert_ne!(tx.safe_tx_hash(&optimism), tx.safe_tx_hash(&ethereum));

        let mut next = tx.clone();
        next.nonce = 3;
        assert_ne!(tx.safe_tx_hash(&optimism), next.safe_tx_hash(&optimism));
    }

    #[test]
    fn test_record_uses_decimal_strings() {
        let record = SafeTransactionRecord::from(&example_transaction());
        assert_eq!(record.value, "1");
        assert_eq!(record.safe_tx_gas, "291");
        assert_eq!(record.gas_price, "4660");
        assert_eq!(record.operation, 1);
        assert_eq!(record.nonce, 2);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["safeTxGas"], "291");
        assert_eq!(
            json["refundReceiver"],
            address!("0x8315177ab297ba92a06054ce80a67ed4dbd7ed3a").to_checksum(None)
        );
        assert_eq!(
            SafeTransactionData::try_from(&record).unwrap(),
            example_transaction()
        );
    }

    #[test]
    fn test_record_validation_names_the_field() {
        let mut record = SafeTransactionRecord::from(&example_transaction());
        record.gas_token = "0xc02aaa39".to_string();
        let err = SafeTransactionData::try_from(&record).unwrap_err();
        assert!(err.to_string().contains("data.gasToken"));

        let mut record = SafeTransactionRecord::from(&example_transaction());
        record.operation = 2;
        assert!(SafeTransactionData::try_from(&record).is_err());
    }

    #[test]
    fn test_exec_transaction_calldata_selector() {
        let calldata = example_transaction().exec_transaction_calldata(Bytes::new());
        // execTransaction(address,uint256,bytes,uint8,uint256,uint256,uint256,address,address,bytes)
        assert_eq!(&calldata[..4], &[0x6a, 0x76, 0x12, 0x02]);
        let decoded = ISafe::execTransactionCall::abi_decode(&calldata).unwrap();
        assert_eq!(decoded.data, example_transaction().data);
        assert_eq!(decoded.safeTxGas, U256::from(0x123));
        assert!(decoded.signatures.is_empty());
    }
}
