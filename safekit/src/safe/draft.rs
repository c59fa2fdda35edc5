use alloy::primitives::{Address, Bytes, U256};

use crate::{
    primitives::{ChainConfig, ParseFromForeignBinding, ValidationError},
    safe::{
        multisend::{MultiSend, MultiSendTx},
        AccountKey, SafeOperation, SafeTransactionData, TransactionProposal,
    },
};

/// One call of a draft, as entered by the user.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct DraftCall {
    /// Recipient, `0x` followed by 40 hex digits.
    pub to: String,
    /// Amount of native currency in base units, as a decimal string.
    pub value: String,
    /// Calldata: empty, `0x`, or `0x` followed by an even number of hex digits.
    pub data: String,
}

impl DraftCall {
    fn parse(&self, index: usize) -> Result<MultiSendTx, ValidationError> {
        let to = Address::parse_from_ffi(&self.to, &format!("calls[{index}].to"))?;
        let value = parse_decimal(&self.value, &format!("calls[{index}].value"))?;
        let data = Bytes::parse_from_ffi(&self.data, &format!("calls[{index}].data"))?;
        Ok(MultiSendTx::new(SafeOperation::Call, to, value, data))
    }
}

/// Amounts in drafts are decimal only; `0x` quantities are rejected.
fn parse_decimal(value: &str, attribute: &str) -> Result<U256, ValidationError> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::invalid_input(
            attribute,
            "must be a non-negative decimal integer",
        ));
    }
    U256::parse_from_ffi(value, attribute)
}

/// Builds the Safe transaction for `calls`.
///
/// A single call is proposed as-is. Several calls are batched into one `DelegateCall` to
/// the chain's `MultiSend` contract with zero value.
///
/// # Errors
/// - `ValidationError::InvalidInput` for an empty list, or naming the first malformed
///   field as `calls[i].to`, `calls[i].value` or `calls[i].data`.
pub fn build_transaction(
    chain: &ChainConfig,
    calls: &[DraftCall],
    nonce: u64,
) -> Result<SafeTransactionData, ValidationError> {
    if calls.is_empty() {
        return Err(ValidationError::invalid_input(
            "calls",
            "at least one call is required",
        ));
    }

    let mut txs = calls
        .iter()
        .enumerate()
        .map(|(index, call)| call.parse(index))
        .collect::<Result<Vec<_>, _>>()?;

    if txs.len() == 1 {
        let tx = txs.remove(0);
        return Ok(SafeTransactionData::new(
            tx.to,
            tx.value,
            tx.data,
            SafeOperation::Call,
            nonce,
        ));
    }

    let bundle = MultiSend::build_bundle(chain.contracts.multi_send, &txs);
    Ok(SafeTransactionData::new(
        bundle.to,
        bundle.value,
        bundle.data,
        bundle.operation,
        nonce,
    ))
}

/// Builds an unsigned proposal for `account` from `calls`.
///
/// # Errors
/// See [`build_transaction`].
pub fn build_proposal(
    account: AccountKey,
    chain: &ChainConfig,
    calls: &[DraftCall],
    nonce: u64,
) -> Result<TransactionProposal, ValidationError> {
    if account.chain_id != chain.chain_id {
        return Err(ValidationError::invalid_input(
            "chain_id",
            format!(
                "account is on chain {}, chain config is for {}",
                account.chain_id, chain.chain_id
            ),
        ));
    }
    let transaction = build_transaction(chain, calls, nonce)?;
    crate::debug!(
        "draft.built account={account} calls={} operation={:?} nonce={nonce}",
        calls.len(),
        transaction.operation
    );
    Ok(TransactionProposal::new(account, transaction))
}
