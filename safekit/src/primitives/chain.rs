use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use alloy::primitives::{address, fixed_bytes, Address, FixedBytes};

use crate::primitives::{ParseFromForeignBinding, SafekitEnvironment, ValidationError};
use crate::safekit_export;

/// Addresses of the Safe contracts a chain uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafeContracts {
    /// `SafeProxyFactory`, deploys new Safes through CREATE2.
    pub proxy_factory: Address,
    /// Singleton every proxy delegates to.
    pub singleton: Address,
    /// Fallback handler installed by `setup`.
    pub fallback_handler: Address,
    /// `MultiSend`, target of batched proposals.
    pub multi_send: Address,
    /// `MultiSendCallOnly`, same encoding but refuses nested delegate calls.
    pub multi_send_call_only: Address,
    /// `keccak256` of the proxy creation code with the singleton appended.
    pub proxy_init_code_hash: FixedBytes<32>,
}

impl SafeContracts {
    /// The canonical v1.4.1 deployments (L2 singleton), identical on every chain they exist on.
    ///
    /// Reference: <https://github.com/safe-global/safe-deployments/tree/main/src/assets/v1.4.1>
    pub const CANONICAL_V1_4_1: Self = Self {
        proxy_factory: address!("0x4e1dcf7ad4e460cfd30791ccc4f9c8a4f820ec67"),
        singleton: address!("0x29fcb43b46531bca003ddc8fcb67ffe91900c762"),
        fallback_handler: address!("0xfd0732dc9e303f09fcef3a7388ad10a83459ec99"),
        multi_send: address!("0x38869bf66a61cf6bdb996a6ae40d5853fd43b526"),
        multi_send_call_only: address!("0x9641d764fc13c8b624c04430c7356c1c7c8102e2"),
        proxy_init_code_hash: fixed_bytes!(
            "0xe298282cefe913ab5d282047161268a8222e4bd4ed106300c547894bbefd31ee"
        ),
    };
}

/// Metadata about one chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    /// EIP-155 chain id.
    pub chain_id: u64,
    /// Human readable name.
    pub name: String,
    /// Symbol of the native currency.
    pub native_currency_symbol: String,
    /// Decimals of the native currency.
    pub native_currency_decimals: u8,
    /// Base URL of the block explorer, without trailing slash.
    pub block_explorer_url: String,
    /// Whether this is a test network.
    pub is_testnet: bool,
    /// Safe contract addresses.
    pub contracts: SafeContracts,
}

impl ChainConfig {
    fn canonical(
        chain_id: u64,
        name: &str,
        symbol: &str,
        explorer: &str,
        is_testnet: bool,
    ) -> Self {
        Self {
            chain_id,
            name: name.to_string(),
            native_currency_symbol: symbol.to_string(),
            native_currency_decimals: 18,
            block_explorer_url: explorer.to_string(),
            is_testnet,
            contracts: SafeContracts::CANONICAL_V1_4_1,
        }
    }

    /// Explorer link for a transaction hash.
    #[must_use]
    pub fn explorer_tx_url(&self, tx_hash: &str) -> String {
        format!("{}/tx/{tx_hash}", self.block_explorer_url)
    }

    /// Explorer link for an address.
    #[must_use]
    pub fn explorer_address_url(&self, address: &Address) -> String {
        format!("{}/address/{}", self.block_explorer_url, address.to_checksum(None))
    }
}

/// A chain as supplied by the host application. All addresses are hex strings.
#[derive(Debug, Clone, uniffi::Record)]
pub struct UnparsedChainConfig {
    /// EIP-155 chain id.
    pub chain_id: u64,
    /// Human readable name.
    pub name: String,
    /// Symbol of the native currency.
    pub native_currency_symbol: String,
    /// Decimals of the native currency.
    pub native_currency_decimals: u8,
    /// Base URL of the block explorer.
    pub block_explorer_url: String,
    /// Whether this is a test network.
    pub is_testnet: bool,
    /// `SafeProxyFactory` address.
    pub proxy_factory: String,
    /// Safe singleton address.
    pub singleton: String,
    /// Fallback handler address.
    pub fallback_handler: String,
    /// `MultiSend` address.
    pub multi_send: String,
    /// `MultiSendCallOnly` address.
    pub multi_send_call_only: String,
    /// Proxy init code hash, 32 bytes hex.
    pub proxy_init_code_hash: String,
}

impl TryFrom<UnparsedChainConfig> for ChainConfig {
    type Error = ValidationError;

    fn try_from(value: UnparsedChainConfig) -> Result<Self, Self::Error> {
        if value.chain_id == 0 {
            return Err(ValidationError::invalid_input(
                "chain_id",
                "must be greater than zero",
            ));
        }
        if value.name.trim().is_empty() {
            return Err(ValidationError::invalid_input("name", "must not be empty"));
        }

        let init_code_hash = value
            .proxy_init_code_hash
            .parse::<FixedBytes<32>>()
            .map_err(|_| {
                ValidationError::invalid_input("proxy_init_code_hash", "must be 32 bytes of hex")
            })?;

        Ok(Self {
            chain_id: value.chain_id,
            name: value.name,
            native_currency_symbol: value.native_currency_symbol,
            native_currency_decimals: value.native_currency_decimals,
            block_explorer_url: value.block_explorer_url.trim_end_matches('/').to_string(),
            is_testnet: value.is_testnet,
            contracts: SafeContracts {
                proxy_factory: Address::parse_from_ffi(&value.proxy_factory, "proxy_factory")?,
                singleton: Address::parse_from_ffi(&value.singleton, "singleton")?,
                fallback_handler: Address::parse_from_ffi(
                    &value.fallback_handler,
                    "fallback_handler",
                )?,
                multi_send: Address::parse_from_ffi(&value.multi_send, "multi_send")?,
                multi_send_call_only: Address::parse_from_ffi(
                    &value.multi_send_call_only,
                    "multi_send_call_only",
                )?,
                proxy_init_code_hash: init_code_hash,
            },
        })
    }
}

/// Chains known to safekit, keyed by chain id.
#[derive(Debug, uniffi::Object)]
pub struct ChainRegistry {
    chains: RwLock<BTreeMap<u64, ChainConfig>>,
}

impl ChainRegistry {
    fn builtin_chains() -> Vec<ChainConfig> {
        vec![
            ChainConfig::canonical(1, "Ethereum", "ETH", "https://etherscan.io", false),
            ChainConfig::canonical(10, "Optimism", "ETH", "https://optimistic.etherscan.io", false),
            ChainConfig::canonical(100, "Gnosis", "xDAI", "https://gnosisscan.io", false),
            ChainConfig::canonical(137, "Polygon", "POL", "https://polygonscan.com", false),
            ChainConfig::canonical(480, "World Chain", "ETH", "https://worldscan.org", false),
            ChainConfig::canonical(8453, "Base", "ETH", "https://basescan.org", false),
            ChainConfig::canonical(42161, "Arbitrum One", "ETH", "https://arbiscan.io", false),
            ChainConfig::canonical(
                11_155_111,
                "Sepolia",
                "ETH",
                "https://sepolia.etherscan.io",
                true,
            ),
        ]
    }

    /// Looks up a chain.
    ///
    /// # Errors
    /// - `ValidationError::UnsupportedChain` if the chain id is unknown.
    pub fn get(&self, chain_id: u64) -> Result<ChainConfig, ValidationError> {
        self.chains
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&chain_id)
            .cloned()
            .ok_or(ValidationError::UnsupportedChain { chain_id })
    }

    /// Adds or replaces a chain.
    pub fn insert(&self, chain: ChainConfig) {
        crate::info!(
            "chain_registry.registered chain_id={} name={}",
            chain.chain_id,
            chain.name
        );
        self.chains
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(chain.chain_id, chain);
    }
}

#[safekit_export]
impl ChainRegistry {
    /// Creates a registry with the built-in chains. `Production` leaves testnets out.
    #[uniffi::constructor]
    #[must_use]
    pub fn new(environment: SafekitEnvironment) -> Self {
        let chains = Self::builtin_chains()
            .into_iter()
            .filter(|chain| environment == SafekitEnvironment::Staging || !chain.is_testnet)
            .map(|chain| (chain.chain_id, chain))
            .collect();
        Self {
            chains: RwLock::new(chains),
        }
    }

    /// Registers a custom chain, replacing any chain with the same id.
    ///
    /// # Errors
    /// - `ValidationError::InvalidInput` if an address or the init code hash is malformed.
    pub fn register(&self, chain: UnparsedChainConfig) -> Result<(), ValidationError> {
        self.insert(ChainConfig::try_from(chain)?);
        Ok(())
    }

    /// Whether `chain_id` is known.
    #[must_use]
    pub fn is_supported(&self, chain_id: u64) -> bool {
        self.chains
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&chain_id)
    }

    /// All known chain ids, ascending.
    #[must_use]
    pub fn supported_chain_ids(&self) -> Vec<u64> {
        self.chains
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    /// Human readable name of a chain.
    ///
    /// # Errors
    /// - `ValidationError::UnsupportedChain` if the chain id is unknown.
    pub fn chain_name(&self, chain_id: u64) -> Result<String, ValidationError> {
        Ok(self.get(chain_id)?.name)
    }

    /// Explorer link for a transaction on a chain.
    ///
    /// # Errors
    /// - `ValidationError::UnsupportedChain` if the chain id is unknown.
    pub fn explorer_tx_url(&self, chain_id: u64, tx_hash: &str) -> Result<String, ValidationError> {
        Ok(self.get(chain_id)?.explorer_tx_url(tx_hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn custom_chain() -> UnparsedChainConfig {
        UnparsedChainConfig {
            chain_id: 31337,
            name: "Anvil".to_string(),
            native_currency_symbol: "ETH".to_string(),
            native_currency_decimals: 18,
            block_explorer_url: "http://localhost:8545/".to_string(),
            is_testnet: true,
            proxy_factory: "0x4e1DCf7AD4e460CfD30791CCC4F9c8a4f820ec67".to_string(),
            singleton: "0x29fcB43b46531BcA003ddC8FCB67FFE91900C762".to_string(),
            fallback_handler: "0xfd0732Dc9E303f09fCEf3a7388Ad10A83459Ec99".to_string(),
            multi_send: "0x38869bf66a61cF6bDB996A6aE40D5853Fd43B526".to_string(),
            multi_send_call_only: "0x9641d764fc13c8B624c04430C7356C1C7C8102e2".to_string(),
            proxy_init_code_hash:
                "0xe298282cefe913ab5d282047161268a8222e4bd4ed106300c547894bbefd31ee".to_string(),
        }
    }

    #[test]
    fn test_production_registry_excludes_testnets() {
        let registry = ChainRegistry::new(SafekitEnvironment::Production);
        assert!(registry.is_supported(1));
        assert!(registry.is_supported(480));
        assert!(!registry.is_supported(11_155_111));
        assert!(matches!(
            registry.get(11_155_111),
            Err(ValidationError::UnsupportedChain { chain_id: 11_155_111 })
        ));
    }

    #[test]
    fn test_staging_registry_includes_sepolia() {
        let registry = ChainRegistry::new(SafekitEnvironment::Staging);
        assert_eq!(
            registry.supported_chain_ids(),
            vec![1, 10, 100, 137, 480, 8453, 42161, 11_155_111]
        );
        assert_eq!(registry.chain_name(11_155_111).unwrap(), "Sepolia");
    }

    #[test]
    fn test_register_custom_chain() {
        let registry = ChainRegistry::new(SafekitEnvironment::Production);
        registry.register(custom_chain()).unwrap();

        let chain = registry.get(31337).unwrap();
        assert_eq!(chain.contracts, SafeContracts::CANONICAL_V1_4_1);
        assert_eq!(
            registry.explorer_tx_url(31337, "0xabc").unwrap(),
            "http://localhost:8545/tx/0xabc"
        );
    }

    #[test]
    fn test_register_rejects_malformed_addresses() {
        let registry = ChainRegistry::new(SafekitEnvironment::Production);
        let mut chain = custom_chain();
        chain.multi_send = "0x38869bf66a61cF6bDB996A6aE40D5853Fd43B5".to_string();

        let err = registry.register(chain).unwrap_err();
        assert!(err.to_string().contains("multi_send"));
        assert!(!registry.is_supported(31337));
    }

    #[test]
    fn test_explorer_address_url_is_checksummed() {
        let registry = ChainRegistry::new(SafekitEnvironment::Production);
        let chain = registry.get(1).unwrap();
        assert_eq!(
            chain.explorer_address_url(&address!("0x163f8c2467924be0ae7b5347228cabf260318753")),
            "https://etherscan.io/address/0x163f8C2467924be0ae7B5347228CABF260318753"
        );
    }
}
