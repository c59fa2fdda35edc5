use alloy::{
    dyn_abi::DynSolValue,
    primitives::{eip191_hash_message, fixed_bytes, keccak256, Address, Bytes, FixedBytes, U256},
    signers::{k256::ecdsa::SigningKey, local::LocalSigner, Signature, SignerSync},
};

use crate::{
    primitives::{HexEncodedData, ValidationError},
    safe::proposal::SignatureError,
    safekit_export,
};

// https://github.com/safe-global/safe-smart-account/blob/v1.4.1/contracts/Safe.sol#L52
static DOMAIN_SEPARATOR_TYPEHASH: FixedBytes<32> =
    fixed_bytes!("0x47e79534a245952e8b16893a336b85a3d9ea9fa8c573f3d803afb92a79469218");

/// Domain separator of a Safe (`domainSeparator()` equivalent).
///
/// Reference: <https://github.com/safe-global/safe-smart-account/blob/v1.4.1/contracts/Safe.sol#L365>
#[must_use]
pub fn domain_separator(chain_id: u64, safe: Address) -> FixedBytes<32> {
    let domain_separator = DynSolValue::Tuple(vec![
        DynSolValue::FixedBytes(DOMAIN_SEPARATOR_TYPEHASH, 32),
        DynSolValue::Uint(U256::from(chain_id), 256),
        DynSolValue::Address(safe),
    ]);
    keccak256(domain_separator.abi_encode())
}

/// `keccak256(0x1901 ‖ domainSeparator ‖ structHash)` for a Safe.
#[must_use]
pub fn eip712_hash(struct_hash: FixedBytes<32>, chain_id: u64, safe: Address) -> FixedBytes<32> {
    let mut buf = [0u8; 66];
    buf[0] = 0x19;
    buf[1] = 0x01;
    buf[2..34].copy_from_slice(domain_separator(chain_id, safe).as_slice());
    buf[34..66].copy_from_slice(struct_hash.as_slice());
    keccak256(buf)
}

/// Recovers the owner behind a 65-byte `r ‖ s ‖ v` signature over `safe_tx_hash`.
///
/// Accepts the `v` values the Safe contract accepts for EOAs: 27/28 for a signature of the
/// hash itself and 31/32 for an `eth_sign` (EIP-191 prefixed) signature. 0/1 are read as
/// 27/28. Returns the signer and the signature with `v` normalized for `execTransaction`.
///
/// Reference: <https://github.com/safe-global/safe-smart-account/blob/v1.4.1/contracts/Safe.sol#L307>
///
/// # Errors
/// Returns a reason when the signature is malformed or does not recover.
pub fn recover_owner(
    safe_tx_hash: &FixedBytes<32>,
    signature: &[u8],
) -> Result<(Address, Bytes), String> {
    if signature.len() != 65 {
        return Err(format!("expected 65 bytes, got {}", signature.len()));
    }

    let v = match signature[64] {
        v @ (0 | 1) => v + 27,
        v => v,
    };
    let (digest, y_parity) = match v {
        27 | 28 => (*safe_tx_hash, v == 28),
        31 | 32 => (eip191_hash_message(safe_tx_hash), v == 32),
        other => return Err(format!("unsupported v value {other}")),
    };

    let parsed = Signature::new(
        U256::from_be_slice(&signature[0..32]),
        U256::from_be_slice(&signature[32..64]),
        y_parity,
    );
    let owner = parsed
        .recover_address_from_prehash(&digest)
        .map_err(|err| err.to_string())?;

    let mut normalized = signature.to_vec();
    normalized[64] = v;
    Ok((owner, normalized.into()))
}

/// An owner key held by the host, used to sign proposals locally (tests, hot wallets).
///
/// Wallet-extension signatures are collected through `SafeSession::add_signature` instead.
#[derive(Debug, uniffi::Object)]
pub struct LocalOwnerSigner {
    signer: LocalSigner<SigningKey>,
}

#[safekit_export]
impl LocalOwnerSigner {
    /// Initializes a signer from a hex-encoded secret key.
    ///
    /// # Errors
    /// - `ValidationError::InvalidInput` if the key is not hex or not a valid k256 scalar.
    #[uniffi::constructor]
    pub fn new(private_key: String) -> Result<Self, ValidationError> {
        let key_bytes = hex::decode(private_key.trim_start_matches("0x"))
            .map_err(|e| ValidationError::invalid_input("private_key", e.to_string()))?;
        let signer = LocalSigner::from_slice(&key_bytes)
            .map_err(|e| ValidationError::invalid_input("private_key", e.to_string()))?;
        Ok(Self { signer })
    }

    /// Checksummed address of the owner.
    #[must_use]
    pub fn address(&self) -> String {
        self.signer.address().to_checksum(None)
    }

    /// Signs a `safe_tx_hash`, returning the 65-byte `r ‖ s ‖ v` signature.
    ///
    /// # Errors
    /// - `SignatureError::InvalidSignature` if the hash is not 32 bytes of hex or signing fails.
    pub fn sign_safe_tx_hash(&self, safe_tx_hash: &str) -> Result<HexEncodedData, SignatureError> {
        let hash = safe_tx_hash
            .parse::<FixedBytes<32>>()
            .map_err(|e| SignatureError::InvalidSignature {
                signer: self.address(),
                reason: format!("invalid safe_tx_hash: {e}"),
            })?;
        let signature = self.sign_hash(&hash)?;
        Ok(HexEncodedData::from(signature.as_ref()))
    }
}

impl LocalOwnerSigner {
    /// The owner address.
    #[must_use]
    pub fn owner(&self) -> Address {
        self.signer.address()
    }

    /// Signs `hash` directly (`v` = 27/28).
    ///
    /// # Errors
    /// - `SignatureError::InvalidSignature` if signing fails.
    pub fn sign_hash(&self, hash: &FixedBytes<32>) -> Result<Bytes, SignatureError> {
        let signature = self
            .signer
            .sign_hash_sync(hash)
            .map_err(|e| SignatureError::InvalidSignature {
                signer: self.address(),
                reason: e.to_string(),
            })?;
        Ok(Bytes::from(signature.as_bytes().to_vec()))
    }

    /// Random key, for tests.
    #[cfg(test)]
    pub fn random() -> Self {
        Self {
            signer: LocalSigner::random(),
        }
    }
}
