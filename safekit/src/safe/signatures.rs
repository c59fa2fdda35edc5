use alloy::primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};

use crate::primitives::{ParseFromForeignBinding, ValidationError};

/// Length of the static part of every signature in `execTransaction`.
const STATIC_PART_LEN: usize = 65;

/// One owner's approval of a proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeSignature {
    /// Owner that signed.
    pub signer: Address,
    /// `r ‖ s ‖ v` for EOAs, the EIP-1271 signature bytes for contract owners.
    pub data: Bytes,
    /// Whether `signer` is a contract owner verified through EIP-1271.
    pub is_contract_signature: bool,
}

/// Persisted and exported form of a [`SafeSignature`].
#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureRecord {
    /// Owner address.
    pub signer: String,
    /// Signature bytes, `0x` hex.
    pub data: String,
    /// Whether this is an EIP-1271 contract signature.
    pub is_contract_signature: bool,
}

impl From<&SafeSignature> for SignatureRecord {
    fn from(signature: &SafeSignature) -> Self {
        Self {
            signer: signature.signer.to_checksum(None),
            data: format!("0x{}", hex::encode(&signature.data)),
            is_contract_signature: signature.is_contract_signature,
        }
    }
}

impl SignatureRecord {
    /// Validates the record; `index` locates it in error messages.
    ///
    /// # Errors
    /// - `ValidationError::InvalidInput` if the signer or the data is malformed.
    pub fn parse(&self, index: usize) -> Result<SafeSignature, ValidationError> {
        let signer = Address::parse_from_ffi(&self.signer, &format!("signatures[{index}].signer"))?;
        let data = Bytes::parse_from_ffi(&self.data, &format!("signatures[{index}].data"))?;
        if data.is_empty() {
            return Err(ValidationError::invalid_input(
                format!("signatures[{index}].data"),
                "must not be empty",
            ));
        }
        Ok(SafeSignature {
            signer,
            data,
            is_contract_signature: self.is_contract_signature,
        })
    }
}

/// Packs signatures for `execTransaction`. `sorted` must be ascending by signer.
///
/// EOA signatures are copied as-is. Contract signatures get a static part of
/// `r = signer`, `s = offset of the dynamic part`, `v = 0`, and their bytes are appended
/// after all static parts as `length (32 bytes) ‖ data`.
///
/// Reference: <https://docs.safe.global/advanced/smart-account-signatures>
#[must_use]
pub fn encode_signatures<'a, I>(sorted: I) -> Bytes
where
    I: IntoIterator<Item = &'a SafeSignature>,
    I::IntoIter: ExactSizeIterator,
{
    let sorted = sorted.into_iter();
    let mut static_part = Vec::with_capacity(sorted.len() * STATIC_PART_LEN);
    let mut dynamic_part = Vec::new();
    let static_len = sorted.len() * STATIC_PART_LEN;

    for signature in sorted {
        if signature.is_contract_signature {
            let offset = U256::from(static_len + dynamic_part.len());
            static_part.extend_from_slice(&[0u8; 12]);
            static_part.extend_from_slice(signature.signer.as_slice());
            static_part.extend_from_slice(&offset.to_be_bytes::<32>());
            static_part.push(0);

            dynamic_part.extend_from_slice(&U256::from(signature.data.len()).to_be_bytes::<32>());
            dynamic_part.extend_from_slice(&signature.data);
        } else {
            static_part.extend_from_slice(&signature.data);
        }
    }

    static_part.extend_from_slice(&dynamic_part);
    static_part.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    fn eoa(signer: Address, fill: u8) -> SafeSignature {
        let mut data = vec![fill; 65];
        data[64] = 27;
        SafeSignature {
            signer,
            data: data.into(),
            is_contract_signature: false,
        }
    }

    #[test]
    fn test_eoa_signatures_are_concatenated() {
        let a = eoa(address!("0x1000000000000000000000000000000000000001"), 0xaa);
        let b = eoa(address!("0x2000000000000000000000000000000000000002"), 0xbb);

        let encoded = encode_signatures([&a, &b]);

        assert_eq!(encoded.len(), 130);
        assert_eq!(&encoded[..65], a.data.as_ref());
        assert_eq!(&encoded[65..], b.data.as_ref());
    }

    #[test]
    fn test_contract_signature_points_into_dynamic_part() {
        let a = eoa(address!("0x1000000000000000000000000000000000000001"), 0xaa);
        let contract_owner = address!("0x2000000000000000000000000000000000000002");
        let contract = SafeSignature {
            signer: contract_owner,
            data: Bytes::from(vec![0x12, 0x34, 0x56]),
            is_contract_signature: true,
        };

        let encoded = encode_signatures([&a, &contract]);

        // two static parts, then length word and data
        assert_eq!(encoded.len(), 130 + 32 + 3);
        let static_contract = &encoded[65..130];
        assert_eq!(&static_contract[12..32], contract_owner.as_slice());
        assert_eq!(U256::from_be_slice(&static_contract[32..64]), U256::from(130));
        assert_eq!(static_contract[64], 0);
        assert_eq!(U256::from_be_slice(&encoded[130..162]), U256::from(3));
        assert_eq!(&encoded[162..], &[0x12, 0x34, 0x56]);
    }

    #[test]
    fn test_record_parse_validates_fields() {
        let record = SignatureRecord {
            signer: "0x1000000000000000000000000000000000000001".to_string(),
            data: "0x".to_string(),
            is_contract_signature: false,
        };
        let err = record.parse(3).unwrap_err();
        assert!(err.to_string().contains("signatures[3].data"));

        let record = SignatureRecord {
            signer: "0x10".to_string(),
            data: "0x12".to_string(),
            is_contract_signature: true,
        };
        assert!(record.parse(0).unwrap_err().to_string().contains("signatures[0].signer"));
    }
}
