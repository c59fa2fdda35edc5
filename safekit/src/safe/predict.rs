use std::sync::Arc;

use alloy::{
    primitives::{keccak256, Address, Bytes, U256},
    sol,
    sol_types::{SolCall, SolValue},
};
use serde::{Deserialize, Serialize};

use crate::{
    primitives::{ChainConfig, ChainRegistry, ParseFromForeignBinding, ValidationError},
    safe::{transaction::ISafe, validate_owners},
};

sol! {
    /// Reference: <https://github.com/safe-global/safe-smart-account/blob/v1.4.1/contracts/proxies/SafeProxyFactory.sol>
    interface ISafeProxyFactory {
        function createProxyWithNonce(
            address _singleton,
            bytes memory initializer,
            uint256 saltNonce
        ) external returns (address proxy);
    }
}

/// Arguments of the Safe `setup` call a new proxy is initialized with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeSetup {
    /// Initial owners.
    pub owners: Vec<Address>,
    /// Initial threshold.
    pub threshold: u64,
    /// Optional delegate call target run during setup (e.g. to enable modules).
    pub to: Address,
    /// Calldata for `to`.
    pub data: Bytes,
    /// Fallback handler to install.
    pub fallback_handler: Address,
    /// Token used to refund the deployer, zero for the native currency.
    pub payment_token: Address,
    /// Refund amount.
    pub payment: U256,
    /// Refund receiver.
    pub payment_receiver: Address,
}

impl SafeSetup {
    /// A plain setup: owners, threshold and the chain's fallback handler, no setup call,
    /// no refund.
    ///
    /// # Errors
    /// - `ValidationError::InvalidAccountConfig` if owners or threshold are invalid.
    pub fn new(
        owners: Vec<Address>,
        threshold: u64,
        chain: &ChainConfig,
    ) -> Result<Self, ValidationError> {
        validate_owners(&owners, threshold)?;
        Ok(Self {
            owners,
            threshold,
            to: Address::ZERO,
            data: Bytes::new(),
            fallback_handler: chain.contracts.fallback_handler,
            payment_token: Address::ZERO,
            payment: U256::ZERO,
            payment_receiver: Address::ZERO,
        })
    }

    /// `setup(...)` calldata.
    #[must_use]
    pub fn initializer(&self) -> Vec<u8> {
        ISafe::setupCall {
            _owners: self.owners.clone(),
            _threshold: U256::from(self.threshold),
            to: self.to,
            data: self.data.clone(),
            fallbackHandler: self.fallback_handler,
            paymentToken: self.payment_token,
            payment: self.payment,
            paymentReceiver: self.payment_receiver,
        }
        .abi_encode()
    }

    /// `createProxyWithNonce` calldata for the chain's proxy factory.
    #[must_use]
    pub fn create_proxy_calldata(&self, chain: &ChainConfig, salt_nonce: U256) -> Vec<u8> {
        ISafeProxyFactory::createProxyWithNonceCall {
            _singleton: chain.contracts.singleton,
            initializer: self.initializer().into(),
            saltNonce: salt_nonce,
        }
        .abi_encode()
    }
}

/// Predicts the address the proxy factory deploys `setup` to.
///
/// `salt = keccak256(keccak256(initializer) ‖ uint256(salt_nonce))`, then CREATE2 from the
/// factory with the chain's proxy init code hash.
#[must_use]
pub fn predict_safe_address(chain: &ChainConfig, setup: &SafeSetup, salt_nonce: U256) -> Address {
    let initializer_hash = keccak256(setup.initializer());

    let mut salt_bytes = Vec::with_capacity(64);
    salt_bytes.extend_from_slice(initializer_hash.as_slice());
    salt_bytes.extend_from_slice(&salt_nonce.abi_encode());
    let salt = keccak256(&salt_bytes);

    chain
        .contracts
        .proxy_factory
        .create2(salt, chain.contracts.proxy_init_code_hash)
}

/// [`SafeSetup`] as stored in the wallet data record and exchanged with the host.
#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeSetupRecord {
    /// Owner addresses.
    pub owners: Vec<String>,
    /// Threshold.
    pub threshold: u64,
    /// Setup call target, zero address when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// Setup call data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Fallback handler.
    pub fallback_handler: String,
    /// Refund token, zero address when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_token: Option<String>,
    /// Refund amount, decimal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment: Option<String>,
    /// Refund receiver, zero address when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_receiver: Option<String>,
}

fn optional_address(value: Option<&String>, attribute: &str) -> Result<Address, ValidationError> {
    value.map_or(Ok(Address::ZERO), |value| {
        Address::parse_from_ffi(value, attribute)
    })
}

impl TryFrom<&SafeSetupRecord> for SafeSetup {
    type Error = ValidationError;

    fn try_from(record: &SafeSetupRecord) -> Result<Self, Self::Error> {
        let owners = record
            .owners
            .iter()
            .enumerate()
            .map(|(i, owner)| Address::parse_from_ffi(owner, &format!("setup.owners[{i}]")))
            .collect::<Result<Vec<_>, _>>()?;
        validate_owners(&owners, record.threshold)?;

        Ok(Self {
            owners,
            threshold: record.threshold,
            to: optional_address(record.to.as_ref(), "setup.to")?,
            data: record
                .data
                .as_deref()
                .map_or(Ok(Bytes::new()), |data| Bytes::parse_from_ffi(data, "setup.data"))?,
            fallback_handler: Address::parse_from_ffi(
                &record.fallback_handler,
                "setup.fallbackHandler",
            )?,
            payment_token: optional_address(record.payment_token.as_ref(), "setup.paymentToken")?,
            payment: record
                .payment
                .as_deref()
                .map_or(Ok(U256::ZERO), |payment| {
                    U256::parse_from_ffi(payment, "setup.payment")
                })?,
            payment_receiver: optional_address(
                record.payment_receiver.as_ref(),
                "setup.paymentReceiver",
            )?,
        })
    }
}

impl From<&SafeSetup> for SafeSetupRecord {
    fn from(setup: &SafeSetup) -> Self {
        let non_zero = |address: Address| (!address.is_zero()).then(|| address.to_checksum(None));
        Self {
            owners: setup
                .owners
                .iter()
                .map(|owner| owner.to_checksum(None))
                .collect(),
            threshold: setup.threshold,
            to: non_zero(setup.to),
            data: (!setup.data.is_empty()).then(|| format!("0x{}", hex::encode(&setup.data))),
            fallback_handler: setup.fallback_handler.to_checksum(None),
            payment_token: non_zero(setup.payment_token),
            payment: (!setup.payment.is_zero()).then(|| setup.payment.to_string()),
            payment_receiver: non_zero(setup.payment_receiver),
        }
    }
}

/// Predicts the checksummed address of a Safe deployed with `setup` and `salt_nonce` on
/// `chain_id`.
///
/// # Errors
/// - `ValidationError::UnsupportedChain` if `chain_id` is not registered
/// - `ValidationError::InvalidInput` if the setup or the salt nonce is malformed
#[uniffi::export]
pub fn predict_safe_address_for_setup(
    registry: Arc<ChainRegistry>,
    chain_id: u64,
    setup: SafeSetupRecord,
    salt_nonce: String,
) -> Result<String, ValidationError> {
    let chain = registry.get(chain_id)?;
    let setup = SafeSetup::try_from(&setup)?;
    let salt_nonce = U256::parse_from_ffi(&salt_nonce, "salt_nonce")?;
    Ok(predict_safe_address(&chain, &setup, salt_nonce).to_checksum(None))
}
