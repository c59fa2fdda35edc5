use alloy::{
    primitives::{Address, Bytes, U256},
    sol,
    sol_types::{SolCall, SolValue},
};

use crate::{primitives::ValidationError, safe::SafeOperation};

sol! {
    /// Reference: <https://github.com/safe-global/safe-smart-account/blob/v1.4.1/contracts/libraries/MultiSend.sol>
    interface IMultiSend {
        function multiSend(bytes transactions) external payable;
    }

    /// The structure of an encoded transaction
    /// Reference: <https://github.com/safe-global/safe-smart-account/blob/v1.4.1/contracts/libraries/MultiSend.sol#L26>
    #[sol(rename_all = "camelcase")]
    #[derive(Debug, Default, PartialEq, Eq)]
    struct MultiSendTx {
        /// call = 0, delegatecall = 1
        uint8 operation;
        /// contract to call
        address to;
        /// eth to send with the call
        uint256 value;
        /// length of the data
        uint256 data_length;
        /// call data
        bytes data;
    }
}

/// Packed header of one sub-call: operation (1) + to (20) + value (32) + data length (32).
const PACKED_HEADER_LEN: usize = 85;

impl MultiSendTx {
    /// A sub-call with `data_length` filled in.
    #[must_use]
    pub fn new(operation: SafeOperation, to: Address, value: U256, data: Bytes) -> Self {
        Self {
            operation: operation.as_u8(),
            to,
            value,
            data_length: U256::from(data.len()),
            data,
        }
    }
}

/// A bundle of transactions to be executed via MultiSend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiSendBundle {
    /// Always `DelegateCall`, MultiSend runs in the Safe's context.
    pub operation: SafeOperation,
    /// The MultiSend contract.
    pub to: Address,
    /// Always zero; sub-calls carry their own value.
    pub value: U256,
    /// `multiSend(bytes)` calldata.
    pub data: Bytes,
}

/// Helper for building and reading MultiSend transaction bundles.
pub struct MultiSend;

impl MultiSend {
    /// Packs `txs` into one `multiSend` call on `multi_send`.
    #[must_use]
    pub fn build_bundle(multi_send: Address, txs: &[MultiSendTx]) -> MultiSendBundle {
        let mut blob = Vec::new();
        for tx in txs {
            blob.extend_from_slice(&tx.abi_encode_packed());
        }
        let multisend_data = IMultiSend::multiSendCall {
            transactions: blob.into(),
        }
        .abi_encode();

        MultiSendBundle {
            to: multi_send,
            data: multisend_data.into(),
            value: U256::ZERO,
            operation: SafeOperation::DelegateCall,
        }
    }

    /// Unpacks the sub-calls of `multiSend` calldata, e.g. to show a batch to a co-signer.
    ///
    /// # Errors
    /// - `ValidationError::InvalidInput` if `calldata` is not a well-formed `multiSend` call.
    pub fn decode_bundle(calldata: &[u8]) -> Result<Vec<MultiSendTx>, ValidationError> {
        let call = IMultiSend::multiSendCall::abi_decode(calldata)
            .map_err(|e| ValidationError::invalid_input("data", e.to_string()))?;

        let mut remaining: &[u8] = &call.transactions;
        let mut txs = Vec::new();
        while !remaining.is_empty() {
            let index = txs.len();
            if remaining.len() < PACKED_HEADER_LEN {
                return Err(ValidationError::invalid_input(
                    format!("transactions[{index}]"),
                    "truncated header",
                ));
            }
            let operation = SafeOperation::from_u8(remaining[0]).ok_or_else(|| {
                ValidationError::invalid_input(
                    format!("transactions[{index}].operation"),
                    "must be 0 or 1",
                )
            })?;
            let to = Address::from_slice(&remaining[1..21]);
            let value = U256::from_be_slice(&remaining[21..53]);
            let data_length = usize::try_from(U256::from_be_slice(&remaining[53..85]))
                .ok()
                .filter(|length| *length <= remaining.len() - PACKED_HEADER_LEN)
                .ok_or_else(|| {
                    ValidationError::invalid_input(
                        format!("transactions[{index}].data"),
                        "data length exceeds the bundle",
                    )
                })?;

            let end = PACKED_HEADER_LEN + data_length;
            let data = Bytes::copy_from_slice(&remaining[PACKED_HEADER_LEN..end]);
            txs.push(MultiSendTx::new(operation, to, value, data));
            remaining = &remaining[end..];
        }
        Ok(txs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, bytes};

    const MULTI_SEND: Address = address!("0x38869bf66a61cf6bdb996a6ae40d5853fd43b526");

    #[test]
    fn test_packed_layout() {
        let tx = MultiSendTx::new(
            SafeOperation::Call,
            address!("0x1000000000000000000000000000000000000001"),
            U256::from(5),
            bytes!("0xdeadbeef"),
        );
        let packed = tx.abi_encode_packed();

        assert_eq!(packed.len(), PACKED_HEADER_LEN + 4);
        assert_eq!(packed[0], 0);
        assert_eq!(&packed[1..21], tx.to.as_slice());
        assert_eq!(U256::from_be_slice(&packed[21..53]), U256::from(5));
        assert_eq!(U256::from_be_slice(&packed[53..85]), U256::from(4));
        assert_eq!(&packed[85..], &[0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn test_bundle_targets_multisend_with_delegatecall() {
        let txs = vec![
            MultiSendTx::new(
                SafeOperation::Call,
                address!("0x1000000000000000000000000000000000000001"),
                U256::from(1),
                Bytes::new(),
            ),
            MultiSendTx::new(
                SafeOperation::Call,
                address!("0x2000000000000000000000000000000000000002"),
                U256::ZERO,
                bytes!("0xa9059cbb"),
            ),
        ];

        let bundle = MultiSend::build_bundle(MULTI_SEND, &txs);

        assert_eq!(bundle.to, MULTI_SEND);
        assert_eq!(bundle.operation, SafeOperation::DelegateCall);
        assert_eq!(bundle.value, U256::ZERO);
        // multiSend(bytes)
        assert_eq!(&bundle.data[..4], &[0x8d, 0x80, 0xff, 0x0a]);
        assert_eq!(MultiSend::decode_bundle(&bundle.data).unwrap(), txs);
    }

    #[test]
    fn test_decode_rejects_truncated_bundle() {
        let calldata = IMultiSend::multiSendCall {
            transactions: Bytes::from(vec![0u8; 40]),
        }
        .abi_encode();
        assert!(MultiSend::decode_bundle(&calldata).is_err());

        let mut packed = MultiSendTx::new(
            SafeOperation::Call,
            Address::ZERO,
            U256::ZERO,
            bytes!("0xdeadbeef"),
        )
        .abi_encode_packed();
        packed.truncate(packed.len() - 1);
        let calldata = IMultiSend::multiSendCall {
            transactions: packed.into(),
        }
        .abi_encode();
        assert!(MultiSend::decode_bundle(&calldata).is_err());
    }
}
